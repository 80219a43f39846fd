pub mod context;
pub mod decision;
pub mod scheduler;
pub mod types;

pub use scheduler::AgentScheduler;
pub use types::AgentRuntime;
