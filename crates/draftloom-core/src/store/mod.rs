pub mod checkpoint_store;
pub mod task_store;

pub use checkpoint_store::{CheckpointStore, SqliteCheckpointStore};
pub use task_store::TaskStore;
