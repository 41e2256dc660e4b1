//! Executes tool-call requests against the shared registry.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use callbridge_core::types::{ToolCallRequest, ToolCallResult};

use crate::ToolContext;
use crate::registry::SharedToolRegistry;

/// Resolves and runs tool calls. Failures never escape as errors; every
/// request yields exactly one [`ToolCallResult`].
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: SharedToolRegistry,
    parallel: bool,
}

impl ToolDispatcher {
    pub fn new(registry: SharedToolRegistry) -> Self {
        Self {
            registry,
            parallel: false,
        }
    }

    /// Run the calls of a batch concurrently instead of one after another.
    pub fn with_parallel_calls(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn registry(&self) -> &SharedToolRegistry {
        &self.registry
    }

    pub async fn execute(&self, request: &ToolCallRequest, context: &ToolContext) -> ToolCallResult {
        let snapshot = self.registry.snapshot();

        let Some(entry) = snapshot.get(&request.name) else {
            warn!(
                tool = %request.name,
                call_id = %request.call_id,
                session_id = %context.session_id,
                "Tool not found"
            );
            return ToolCallResult::error(request, format!("tool not found: {}", request.name));
        };

        for param in entry.definition.required_params() {
            if !request.args.contains_key(param) {
                warn!(
                    tool = %request.name,
                    call_id = %request.call_id,
                    param,
                    "Missing required parameter, passing call through"
                );
            }
        }

        let Some(tool) = entry.implementation.clone() else {
            warn!(tool = %request.name, "No implementation bound");
            return ToolCallResult::error(
                request,
                format!("no implementation bound for tool: {}", request.name),
            );
        };

        info!(
            tool = %request.name,
            call_id = %request.call_id,
            session_id = %context.session_id,
            "Executing tool"
        );

        let params = Value::Object(request.args.clone());
        match AssertUnwindSafe(tool.execute(params, context))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => ToolCallResult::success(request, value),
            Ok(Err(e)) => {
                warn!(tool = %request.name, call_id = %request.call_id, error = %e, "Tool failed");
                ToolCallResult::error(request, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(tool = %request.name, call_id = %request.call_id, %message, "Tool panicked");
                ToolCallResult::error(request, format!("tool panicked: {message}"))
            }
        }
    }

    /// One result per request, in request order.
    pub async fn execute_batch(
        &self,
        requests: &[ToolCallRequest],
        context: &ToolContext,
    ) -> Vec<ToolCallResult> {
        if self.parallel {
            return join_all(requests.iter().map(|r| self.execute(r, context))).await;
        }
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.execute(request, context).await);
        }
        results
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::Tool;
    use crate::registry::{ToolCatalog, ToolDefinition, ToolRegistry};
    use callbridge_core::types::ToolOutcome;

    struct EchoArgs;

    #[async_trait]
    impl Tool for EchoArgs {
        fn name(&self) -> &str {
            "echo_args"
        }
        fn description(&self) -> &str {
            "Returns its arguments"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, params: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            Ok(params)
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            anyhow::bail!("backend unavailable")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Tool for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            panic!("index out of range")
        }
    }

    /// Sleeps, then records the order it finished in.
    struct Slow {
        name: &'static str,
        delay_ms: u64,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(json!(self.finished.fetch_add(1, Ordering::SeqCst)))
        }
    }

    fn dispatcher(tools: Vec<Arc<dyn Tool>>) -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        ToolDispatcher::new(SharedToolRegistry::new(registry))
    }

    fn request(id: &str, name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.into(),
            name: name.into(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dispatcher = dispatcher(vec![]);
        let result = dispatcher
            .execute(&request("c1", "get_weather", json!({})), &ToolContext::default())
            .await;
        assert_eq!(result.call_id, "c1");
        match result.outcome {
            ToolOutcome::Error(msg) => assert!(msg.contains("tool not found")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_required_param_passes_through() {
        let dispatcher = dispatcher(vec![Arc::new(EchoArgs)]);
        let result = dispatcher
            .execute(&request("c1", "echo_args", json!({"other": 1})), &ToolContext::default())
            .await;
        assert_eq!(result.outcome, ToolOutcome::Success(json!({"other": 1})));
    }

    #[tokio::test]
    async fn test_mixed_batch_keeps_order_and_ids() {
        let dispatcher = dispatcher(vec![
            Arc::new(EchoArgs),
            Arc::new(Failing),
            Arc::new(Panicking),
        ]);
        let requests = vec![
            request("a", "echo_args", json!({"text": "hi"})),
            request("b", "failing", json!({})),
            request("c", "panicking", json!({})),
            request("d", "missing", json!({})),
            request("e", "echo_args", json!({"text": "bye"})),
        ];
        let results = dispatcher
            .execute_batch(&requests, &ToolContext::default())
            .await;

        assert_eq!(results.len(), 5);
        let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert!(!results[0].is_error());
        assert_eq!(
            results[1].outcome,
            ToolOutcome::Error("backend unavailable".into())
        );
        match &results[2].outcome {
            ToolOutcome::Error(msg) => assert!(msg.contains("index out of range")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(results[3].is_error());
        assert_eq!(results[4].outcome, ToolOutcome::Success(json!({"text": "bye"})));
    }

    #[tokio::test]
    async fn test_parallel_batch_keeps_request_order() {
        let finished = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(vec![
            Arc::new(Slow {
                name: "slow",
                delay_ms: 80,
                finished: finished.clone(),
            }),
            Arc::new(Slow {
                name: "fast",
                delay_ms: 5,
                finished: finished.clone(),
            }),
        ])
        .with_parallel_calls(true);

        let results = dispatcher
            .execute_batch(
                &[request("1", "slow", json!({})), request("2", "fast", json!({}))],
                &ToolContext::default(),
            )
            .await;

        assert_eq!(results[0].call_id, "1");
        assert_eq!(results[1].call_id, "2");
        // The fast call finished first even though it is reported second.
        assert_eq!(results[0].outcome, ToolOutcome::Success(json!(1)));
        assert_eq!(results[1].outcome, ToolOutcome::Success(json!(0)));
    }

    #[tokio::test]
    async fn test_declared_without_implementation() {
        let registry = ToolRegistry::bind(
            vec![ToolDefinition {
                name: "get_weather".into(),
                description: "Weather".into(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
            &ToolCatalog::new(),
            false,
        );
        let dispatcher = ToolDispatcher::new(SharedToolRegistry::new(registry));
        let result = dispatcher
            .execute(&request("w", "get_weather", json!({})), &ToolContext::default())
            .await;
        match result.outcome {
            ToolOutcome::Error(msg) => assert!(msg.contains("no implementation")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reload_visible_to_next_call() {
        let dispatcher = dispatcher(vec![]);
        let ctx = ToolContext::default();
        assert!(
            dispatcher
                .execute(&request("1", "echo_args", json!({})), &ctx)
                .await
                .is_error()
        );

        let mut next = ToolRegistry::new();
        next.register(Arc::new(EchoArgs));
        dispatcher.registry().replace(next);

        assert!(
            !dispatcher
                .execute(&request("2", "echo_args", json!({})), &ctx)
                .await
                .is_error()
        );
    }
}
