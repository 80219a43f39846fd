pub mod agent;
pub mod cluster;
pub mod error;
pub mod hook;
pub mod message;
pub mod settings;
pub mod topics;
pub mod trigger;

pub use agent::{
    coverage_gaps, AgentConfig, AgentHooks, AgentRunState, ContextSource, ContextStrategy,
    IterationSpec, ModelLevel, ModelRule, OutputFormat, PromptConfig, PromptRule,
};
pub use cluster::{
    AgentEntry, ClusterConfig, ClusterOperation, ClusterRecord, ClusterState, InputSource,
    IssueRef, OperationAction, SubClusterEntry,
};
pub use error::{sanitize_error_text, ConclaveError, ErrorKind};
pub use hook::{Hook, HookAction, MessageTemplate, TemplateContent};
pub use message::{Message, MessageContent, MessageQuery};
pub use settings::Settings;
pub use trigger::{ScriptSource, Trigger, TriggerAction};
