//! Session controller.
//!
//! Owns one call: spawns the inbound receiver, the AI bridge and the
//! outbound sender, drives the `Accepted → Streaming → Draining → Closed`
//! state machine, and joins every task before reporting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use callbridge_core::config::{AudioConfig, Config};
use callbridge_core::error::CallBridgeError;
use callbridge_core::types::AudioFormat;
use callbridge_media::AudioCodec;
use callbridge_providers::{LiveSetup, RealtimeBackend};
use callbridge_tools::ToolDispatcher;

use crate::bridge::{BridgeContext, BridgeEnd, BridgeStats, run_bridge};
use crate::inbound::{InboundContext, InboundEnd, InboundStats, run_inbound};
use crate::outbound::{OutboundContext, OutboundOutcome, run_outbound};
use crate::queue::{inbound_queue, outbound_queue};
use crate::signal::stream_start_latch;
use crate::state::{SessionState, StateCell};

/// Per-session settings resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub audio: AudioConfig,
    pub grace_period: Duration,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub send_turn_marks: bool,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            grace_period: Duration::from_secs(5),
            inbound_capacity: 256,
            outbound_capacity: 256,
            send_turn_marks: false,
            model: "gemini-2.0-flash-live-001".into(),
            voice: "Puck".into(),
            system_instruction: String::new(),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> callbridge_core::error::Result<Self> {
        if config.inbound_queue_capacity() == 0 || config.outbound_queue_capacity() == 0 {
            return Err(CallBridgeError::Session(
                "session queue capacities must be greater than zero".into(),
            ));
        }
        Ok(Self {
            audio: config.audio(),
            grace_period: config.grace_period(),
            inbound_capacity: config.inbound_queue_capacity(),
            outbound_capacity: config.outbound_queue_capacity(),
            send_turn_marks: config.send_turn_marks(),
            model: config.gemini_model(),
            voice: config.gemini_voice(),
            system_instruction: config.system_prompt()?,
        })
    }

    /// Backend setup; function declarations are filled in at connect time.
    pub fn live_setup(&self) -> LiveSetup {
        LiveSetup {
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
            function_declarations: Vec::new(),
            input_format: AudioFormat::linear16(self.audio.input_rate),
            output_format: AudioFormat::linear16(self.audio.output_rate),
        }
    }
}

/// What happened during one call.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub final_state: SessionState,
    pub inbound_frames: u64,
    pub inbound_dropped: u64,
    pub inbound_end: Option<InboundEnd>,
    pub frames_forwarded: u64,
    pub outbound_frames: u64,
    pub marks_sent: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub turns: u64,
    pub bridge_end: Option<BridgeEnd>,
    /// Some task was still running when the grace period expired.
    pub force_cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub struct SessionController {
    session_id: String,
    settings: SessionSettings,
    backend: Arc<dyn RealtimeBackend>,
    dispatcher: ToolDispatcher,
    state: StateCell,
}

impl SessionController {
    pub fn new(
        settings: SessionSettings,
        backend: Arc<dyn RealtimeBackend>,
        dispatcher: ToolDispatcher,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            settings,
            backend,
            dispatcher,
            state: StateCell::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run the call to completion over a telephony transport split into
    /// its read half (`transport`) and write half (`sink`).
    pub async fn run<T, O>(self, transport: T, sink: O) -> SessionReport
    where
        T: Stream<Item = anyhow::Result<String>> + Send + Unpin + 'static,
        O: Sink<String, Error = anyhow::Error> + Send + Unpin + 'static,
    {
        let started_at = Utc::now();
        let started = Instant::now();
        let session_id = self.session_id.clone();
        let settings = &self.settings;
        info!(%session_id, backend = self.backend.id(), "Session accepted");

        let cancel = CancellationToken::new();
        let (latch, waiter) = stream_start_latch();
        let (inbound_tx, inbound_rx) = inbound_queue(settings.inbound_capacity);
        let (outbound_tx, outbound_rx) = outbound_queue(settings.outbound_capacity);
        let (decoder, encoder) = AudioCodec::new(&settings.audio).split();

        let mut inbound_task = tokio::spawn(run_inbound(
            transport,
            InboundContext {
                session_id: session_id.clone(),
                latch,
                queue: inbound_tx,
                cancel: cancel.clone(),
                wire_format: AudioFormat::mulaw(settings.audio.telephony_rate),
            },
        ));
        let mut bridge_task = tokio::spawn(run_bridge(BridgeContext {
            session_id: session_id.clone(),
            backend: self.backend.clone(),
            setup: settings.live_setup(),
            dispatcher: self.dispatcher.clone(),
            decoder,
            encoder,
            start: waiter.clone(),
            inbound: inbound_rx,
            outbound: outbound_tx,
            cancel: cancel.clone(),
        }));
        let mut outbound_task = tokio::spawn(run_outbound(
            sink,
            OutboundContext {
                session_id: session_id.clone(),
                start: waiter.clone(),
                queue: outbound_rx,
                cancel: cancel.clone(),
                send_turn_marks: settings.send_turn_marks,
            },
        ));

        // Accepted / Streaming: until the inbound stream ends or the end signal fires.
        let mut start_waiter = waiter.clone();
        let mut awaiting_start = true;
        let mut inbound_out: Option<Result<InboundStats, JoinError>> = None;
        loop {
            tokio::select! {
                start = start_waiter.wait(), if awaiting_start => {
                    awaiting_start = false;
                    if start.is_some() {
                        self.state.advance(SessionState::Streaming);
                        debug!(%session_id, "Session streaming");
                    }
                }
                result = &mut inbound_task => {
                    inbound_out = Some(result);
                    break;
                }
                _ = cancel.cancelled() => break,
            }
        }

        self.state.advance(SessionState::Draining);
        info!(%session_id, grace_ms = settings.grace_period.as_millis() as u64, "Session draining");

        let mut bridge_out: Option<Result<BridgeStats, JoinError>> = None;
        let mut outbound_out: Option<Result<OutboundOutcome<O>, JoinError>> = None;
        let joined = tokio::time::timeout(settings.grace_period, async {
            if inbound_out.is_none() {
                inbound_out = Some((&mut inbound_task).await);
            }
            bridge_out = Some((&mut bridge_task).await);
            outbound_out = Some((&mut outbound_task).await);
        })
        .await;

        let force_cancelled = joined.is_err();
        if force_cancelled {
            warn!(%session_id, "Grace period expired, cancelling remaining tasks");
            cancel.cancel();
            if inbound_out.is_none() {
                inbound_task.abort();
                inbound_out = Some(inbound_task.await);
            }
            if bridge_out.is_none() {
                bridge_task.abort();
                bridge_out = Some(bridge_task.await);
            }
            if outbound_out.is_none() {
                outbound_task.abort();
                outbound_out = Some(outbound_task.await);
            }
        }
        cancel.cancel();

        let inbound = take_result(&session_id, "inbound", inbound_out);
        let bridge = take_result(&session_id, "bridge", bridge_out);
        let outbound = take_result(&session_id, "outbound", outbound_out);

        let (outbound_frames, marks_sent) = match outbound {
            Some(mut outcome) => {
                if let Err(e) = outcome.sink.close().await {
                    debug!(%session_id, error = %e, "Telephony transport close failed");
                }
                (outcome.frames, outcome.marks)
            }
            None => (0, 0),
        };

        self.state.advance(SessionState::Closed);
        let start = waiter.current();
        let report = SessionReport {
            session_id: session_id.clone(),
            stream_sid: start.as_ref().map(|s| s.stream_sid.clone()),
            call_sid: start.and_then(|s| s.call_sid),
            final_state: self.state.current(),
            inbound_frames: inbound.as_ref().map_or(0, |s| s.frames),
            inbound_dropped: inbound.as_ref().map_or(0, |s| s.dropped),
            inbound_end: inbound.as_ref().map(|s| s.end),
            frames_forwarded: bridge.as_ref().map_or(0, |s| s.frames_forwarded),
            outbound_frames,
            marks_sent,
            tool_calls: bridge.as_ref().map_or(0, |s| s.tool_calls),
            tool_errors: bridge.as_ref().map_or(0, |s| s.tool_errors),
            turns: bridge.as_ref().map_or(0, |s| s.turns),
            bridge_end: bridge.as_ref().map(|s| s.end),
            force_cancelled,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %session_id,
            stream_sid = ?report.stream_sid,
            inbound_frames = report.inbound_frames,
            outbound_frames = report.outbound_frames,
            tool_calls = report.tool_calls,
            force_cancelled,
            duration_ms = report.duration_ms,
            "Session closed"
        );
        report
    }
}

fn take_result<T>(
    session_id: &str,
    task: &str,
    result: Option<Result<T, JoinError>>,
) -> Option<T> {
    match result? {
        Ok(value) => Some(value),
        Err(e) if e.is_cancelled() => {
            debug!(%session_id, task, "Task aborted");
            None
        }
        Err(e) => {
            warn!(%session_id, task, error = %e, "Task panicked");
            None
        }
    }
}
