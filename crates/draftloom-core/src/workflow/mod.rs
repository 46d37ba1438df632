//! Checkpointed step workflow for one generation task.
//!
//! # Architecture
//!
//! ```text
//! WorkflowState ──► WorkflowExecutor ──► step 1..8 ──► CheckpointStore
//!                         │                               (snapshot per step)
//!                    Orchestrator ──► TextGenerator
//!                         │
//!                    ProgressSink
//! ```

pub mod executor;
pub mod progress;
pub mod schema;

pub use executor::{assemble, extract_key_requirements, WorkflowExecutor};
pub use progress::{ChannelProgress, NoopProgress, ProgressEvent, ProgressSink};
pub use schema::{
    AssembledSection, DocumentSummary, StepReports, WorkflowState, WorkflowStatus, WorkflowStep,
};
