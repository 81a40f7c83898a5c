//! Invocation payloads exchanged with a worker.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// One function invocation, with its inputs already resolved.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Unique id, sent to the worker as a header.
    pub invocation_id: String,
    /// Target function; becomes the request path.
    pub function_name: String,
    /// Resolved input bindings keyed by binding name.
    pub inputs: Map<String, Value>,
    /// Trigger metadata passed through untouched.
    pub metadata: Map<String, Value>,
    /// Cancelled when the caller gives up.
    pub cancel: CancellationToken,
}

impl InvocationContext {
    /// Creates a context with a generated invocation id and no inputs.
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            invocation_id: nanoid::nanoid!(),
            function_name: function_name.into(),
            inputs: Map::new(),
            metadata: Map::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Adds one resolved input binding.
    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, name: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(name.into(), value);
        self
    }

    /// Replaces the cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Serialize)]
pub(crate) struct InvocationRequest<'a> {
    pub(crate) data: &'a Map<String, Value>,
    pub(crate) metadata: &'a Map<String, Value>,
}

/// Worker response to an invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Output bindings keyed by binding name.
    #[serde(default)]
    pub outputs: Map<String, Value>,
    /// Function return value, if any.
    #[serde(default)]
    pub return_value: Option<Value>,
    /// Log lines emitted by the function.
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Result of a status ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatus {
    /// Round-trip time of the ping.
    pub latency: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let ctx = InvocationContext::new("orders")
            .with_input("req", json!({"id": 7}))
            .with_metadata("sys", json!({"method": "POST"}));
        let body = serde_json::to_value(InvocationRequest {
            data: &ctx.inputs,
            metadata: &ctx.metadata,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"data": {"req": {"id": 7}}, "metadata": {"sys": {"method": "POST"}}})
        );
        assert!(!ctx.invocation_id.is_empty());
    }

    #[test]
    fn test_result_fields_default_when_missing() {
        let res: InvocationResult = serde_json::from_str(r#"{"return_value": 3}"#).unwrap();
        assert!(res.outputs.is_empty());
        assert!(res.logs.is_empty());
        assert_eq!(res.return_value, Some(json!(3)));
    }
}
