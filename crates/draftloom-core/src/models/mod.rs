pub mod checkpoint;
pub mod task;

pub use checkpoint::*;
pub use task::*;
