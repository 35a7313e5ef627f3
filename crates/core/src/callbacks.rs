use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{WorkflowId, WorkflowStatus};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Descriptor for a terminal callback: a registered handler tag plus its
/// serialized arguments.
///
/// Workflows outlive the process that defined them, so callbacks cannot be
/// captured closures; they are descriptors resolved through a
/// [`HandlerRegistry`] at invocation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerRef {
    pub handler: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl HandlerRef {
    pub fn new(handler: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            handler: handler.into(),
            args,
        }
    }
}

/// Converts a handler descriptor to and from the opaque string stored on the
/// workflow record. The core never inspects the encoded form.
pub trait CallbackCodec: Send + Sync {
    fn encode(&self, handler: &HandlerRef) -> Result<String>;
    fn decode(&self, encoded: &str) -> Result<HandlerRef>;
}

/// Default codec: plain JSON round-trip.
pub struct JsonCallbackCodec;

impl CallbackCodec for JsonCallbackCodec {
    fn encode(&self, handler: &HandlerRef) -> Result<String> {
        serde_json::to_string(handler).context("Failed to encode callback descriptor")
    }

    fn decode(&self, encoded: &str) -> Result<HandlerRef> {
        serde_json::from_str(encoded).context("Failed to decode callback descriptor")
    }
}

/// Scheduling outcome handed to a terminal handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub status: WorkflowStatus,
    pub processed_count: usize,
    pub failed_count: usize,
}

type Handler = Box<dyn Fn(WorkflowOutcome, serde_json::Value) -> Result<()> + Send + Sync>;

/// Maps handler tags to invocable functions.
///
/// Embedders register their handlers once at startup; the runtime resolves
/// decoded descriptors against the registry when a workflow reaches a
/// terminal state.
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler under a tag. Re-registering a tag replaces the
    /// prior handler.
    pub fn register<F>(&self, tag: impl Into<String>, handler: F)
    where
        F: Fn(WorkflowOutcome, serde_json::Value) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(tag.into(), Box::new(handler));
    }

    /// Resolve and invoke a handler descriptor.
    pub fn invoke(&self, handler_ref: &HandlerRef, outcome: WorkflowOutcome) -> WorkflowResult<()> {
        let handlers = self.handlers.lock().unwrap();
        let handler = handlers
            .get(&handler_ref.handler)
            .ok_or_else(|| WorkflowError::UnknownHandler {
                tag: handler_ref.handler.clone(),
            })?;

        handler(outcome, handler_ref.args.clone())
            .map_err(|source| WorkflowError::Callback { source })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn outcome() -> WorkflowOutcome {
        WorkflowOutcome {
            workflow_id: WorkflowId::new(),
            name: "test".to_string(),
            status: WorkflowStatus::Succeeded,
            processed_count: 1,
            failed_count: 0,
        }
    }

    #[test]
    fn test_codec_round_trip() {
        let codec = JsonCallbackCodec;
        let handler = HandlerRef::new("notify", serde_json::json!({"channel": "ops"}));

        let encoded = codec.encode(&handler).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, handler);
    }

    #[test]
    fn test_registered_handler_receives_args() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = calls.clone();

        registry.register("notify", move |_, args| {
            assert_eq!(args["channel"], "ops");
            calls_in_handler.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let handler = HandlerRef::new("notify", serde_json::json!({"channel": "ops"}));
        registry.invoke(&handler, outcome()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_handler_errors() {
        let registry = HandlerRegistry::new();
        let handler = HandlerRef::new("missing", serde_json::Value::Null);

        let err = registry.invoke(&handler, outcome()).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownHandler { .. }));
    }

    #[test]
    fn test_handler_failure_is_reported() {
        let registry = HandlerRegistry::new();
        registry.register("broken", |_, _| anyhow::bail!("boom"));

        let handler = HandlerRef::new("broken", serde_json::Value::Null);
        let err = registry.invoke(&handler, outcome()).unwrap_err();
        assert!(matches!(err, WorkflowError::Callback { .. }));
    }
}
