//! Telephony media-stream connection: adapts the axum WebSocket to the
//! session's text transport and runs one call.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tracing::{debug, info};

use callbridge_session::{SessionController, SessionReport};

use crate::state::GatewayState;

/// Text messages from the telephony side. Ends at a close frame; control
/// frames are skipped and binary frames are accepted when they hold UTF-8.
pub fn telephony_stream<S>(socket: S) -> BoxStream<'static, anyhow::Result<String>>
where
    S: Stream<Item = Result<Message, axum::Error>> + Send + 'static,
{
    socket
        .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        debug!("Ignoring non-UTF-8 binary frame");
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            })
        })
        .boxed()
}

/// Write half: each outbound JSON message becomes one text frame.
pub fn telephony_sink<S>(sink: S) -> impl Sink<String, Error = anyhow::Error> + Send + Unpin + 'static
where
    S: Sink<Message, Error = axum::Error> + Send + Unpin + 'static,
{
    sink.sink_map_err(anyhow::Error::from)
        .with(|text: String| future::ready(Ok::<_, anyhow::Error>(Message::Text(text.into()))))
}

/// Run one call over an upgraded `/audio_stream` socket.
pub async fn handle_audio_stream(state: Arc<GatewayState>, ws: WebSocket) -> SessionReport {
    let controller = SessionController::new(
        state.settings.clone(),
        state.backend.clone(),
        state.dispatcher(),
    );
    let session_id = controller.session_id().to_string();
    info!(%session_id, "Telephony media stream connected");

    state.register_session(&session_id, controller.subscribe()).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_session_start();

    let (ws_tx, ws_rx) = ws.split();
    let report = controller
        .run(telephony_stream(ws_rx), telephony_sink(ws_tx))
        .await;

    state.finish_session(&session_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_session_end(&report);

    report
}
