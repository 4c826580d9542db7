pub mod pool;
pub mod work;

pub use pool::WorkerPool;
pub use work::{WorkContext, WorkItem, WorkOutcome};
