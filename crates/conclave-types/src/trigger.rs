use serde::{Deserialize, Serialize};

use crate::hook::Hook;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    ExecuteTask,
    StopCluster,
}

/// A user-supplied sandboxed expression, evaluated by the hook engine. Never executed here;
/// this crate only carries the source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptSource {
    pub script: String,
}

impl ScriptSource {
    pub fn new(script: impl Into<String>) -> Self {
        Self { script: script.into() }
    }
}

/// A subscription declaration on an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub topic: String,
    pub action: TriggerAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logic: Option<ScriptSource>,
    #[serde(rename = "onComplete", skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<Hook>,
}

impl Trigger {
    pub fn new(topic: impl Into<String>, action: TriggerAction) -> Self {
        Self {
            topic: topic.into(),
            action,
            logic: None,
            on_complete: None,
        }
    }
}
