pub mod cancellation;
pub mod error_context;
pub mod follower;
pub mod runner;
pub mod status;
pub mod types;

pub use runner::{ProcessTaskRunner, TaskRunner};
pub use status::StatusSource;
pub use types::{RunErrorType, RunOptions, RunOutcome, TaskStatus};
