//! Draftloom Core: hierarchical document generation with checkpointed resume.
//!
//! A source document goes through an eight-step workflow: parse, outline,
//! section tree, leaf content, parent summaries, differentiation, validation
//! and assembly. Leaf sections are written concurrently under one shared
//! limiter; parents are summarized bottom-up from their children. Every step
//! boundary is checkpointed to SQLite so an interrupted task resumes without
//! repeating finished work.
//!
//! The crate has no CLI or HTTP dependency; `draftloom-cli` drives it.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod generation;
pub mod models;
pub mod orchestration;
pub mod outline;
pub mod store;
pub mod tree;
pub mod validation;
pub mod workflow;

// Convenience re-exports
pub use config::DraftConfig;
pub use db::Database;
pub use dispatcher::{SubmitRequest, TaskDispatcher};
pub use error::{DraftError, GenerationCallError};
pub use generation::{HttpTextGenerator, TextGenerator};
pub use orchestration::{CancelFlag, Orchestrator};
pub use tree::{NodeId, NodeStatus, SectionTree};
pub use workflow::{WorkflowExecutor, WorkflowState, WorkflowStatus, WorkflowStep};
