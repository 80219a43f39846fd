use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trigger::ScriptSource;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    PublishMessage,
}

/// A message template, the body of a hook's `config`. Strings anywhere in `content` may carry
/// `{{...}}` placeholders, substituted by the hook engine before publish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageTemplate {
    pub topic: String,
    #[serde(default)]
    pub content: TemplateContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TemplateContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `{action, config?, transform?, logic?}` — turns an agent execution into zero or one
/// outbound messages. See the hook engine for evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hook {
    pub action: HookAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<MessageTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<ScriptSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logic: Option<ScriptSource>,
}

impl Hook {
    pub fn publish(config: MessageTemplate) -> Self {
        Self {
            action: HookAction::PublishMessage,
            config: Some(config),
            transform: None,
            logic: None,
        }
    }
}
