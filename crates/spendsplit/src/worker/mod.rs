pub mod job;
pub mod pool;

pub use job::{Job, JobOutcome, JobStatus, NewJob};
pub use pool::WorkerPool;
