use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content carried by a [`Message`]. Either field may be absent; both present is legal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            data: None,
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            text: None,
            data: Some(data),
        }
    }

    /// Looks up a dotted path against `data`, e.g. `"criteriaResults.0.status"`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let data = self.data.as_ref()?;
        path.split('.').try_fold(data, |value, segment| {
            if let Ok(index) = segment.parse::<usize>() {
                value.get(index)
            } else {
                value.get(segment)
            }
        })
    }
}

/// The unit of exchange on a cluster's Ledger. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: u64,
    pub cluster_id: String,
    pub topic: String,
    pub sender: String,
    /// Milliseconds since the Unix epoch; monotone within a cluster (ties broken by `id`).
    pub timestamp: i64,
    pub content: MessageContent,
}

impl Message {
    /// Builds a message missing its `id`/`timestamp`; the Ledger assigns both on append.
    pub fn seed(cluster_id: impl Into<String>, topic: impl Into<String>, content: MessageContent) -> Self {
        Self {
            id: 0,
            cluster_id: cluster_id.into(),
            topic: topic.into(),
            sender: "system".to_string(),
            timestamp: 0,
            content,
        }
    }

    pub fn from_agent(
        cluster_id: impl Into<String>,
        sender: impl Into<String>,
        topic: impl Into<String>,
        content: MessageContent,
    ) -> Self {
        Self {
            id: 0,
            cluster_id: cluster_id.into(),
            topic: topic.into(),
            sender: sender.into(),
            timestamp: 0,
            content,
        }
    }
}

/// Parameters accepted by [`crate::MessageQuery`]-style ledger lookups.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub topic: Option<String>,
    pub sender: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

impl MessageQuery {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        if let Some(topic) = &self.topic {
            if &message.topic != topic {
                return false;
            }
        }
        if let Some(sender) = &self.sender {
            if &message.sender != sender {
                return false;
            }
        }
        if let Some(since) = self.since {
            if message.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if message.timestamp > until {
                return false;
            }
        }
        true
    }
}
