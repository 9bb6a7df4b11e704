// Shared task queue: producers add work, agents claim it, the router assigns it

pub mod board;
pub mod types;

pub use board::TaskBoard;
pub use types::{sort_by_priority, Task, TaskCollection, TaskStatus};
