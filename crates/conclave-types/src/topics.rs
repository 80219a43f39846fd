//! Well-known topics produced by the core itself. User configs may define any other topic.

pub const ISSUE_OPENED: &str = "ISSUE_OPENED";
pub const AGENT_STARTED: &str = "AGENT_STARTED";
pub const AGENT_OUTPUT: &str = "AGENT_OUTPUT";
pub const AGENT_ERROR: &str = "AGENT_ERROR";
pub const AGENT_MAX_ITERATIONS: &str = "AGENT_MAX_ITERATIONS";
pub const AGENT_SCHEMA_WARNING: &str = "AGENT_SCHEMA_WARNING";
pub const PROCESS_SPAWNED: &str = "PROCESS_SPAWNED";
pub const TASK_ID_ASSIGNED: &str = "TASK_ID_ASSIGNED";
pub const CLUSTER_OPERATIONS: &str = "CLUSTER_OPERATIONS";
pub const CLUSTER_OPERATIONS_FAILED: &str = "CLUSTER_OPERATIONS_FAILED";
pub const CLUSTER_OPERATIONS_VALIDATION_FAILED: &str = "CLUSTER_OPERATIONS_VALIDATION_FAILED";
pub const CLUSTER_COMPLETE: &str = "CLUSTER_COMPLETE";
pub const CLUSTER_FAILED: &str = "CLUSTER_FAILED";
