// Core types and functionality for the Trellis workflow orchestrator

pub mod builder;
pub mod callbacks;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod graph;
pub mod ids;
pub mod job;
pub mod runtime;
pub mod storage;
pub mod types;

pub use builder::WorkflowDefinition;
pub use callbacks::{CallbackCodec, HandlerRef, HandlerRegistry, JsonCallbackCodec, WorkflowOutcome};
pub use dispatch::JobDispatcher;
pub use error::{WorkflowError, WorkflowResult};
pub use events::{EventLog, WorkflowEvent, WorkflowEventKind};
pub use graph::DependencyGraph;
pub use ids::{SequentialStepIds, StepIdGenerator};
pub use job::{JobStamp, PayloadJob, WorkflowJob};
pub use runtime::WorkflowRuntime;
pub use types::*;
