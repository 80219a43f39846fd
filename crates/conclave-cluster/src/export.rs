//! Renders a cluster's message history as `json` (byte-for-byte from the Ledger) or `markdown`
//! (header, message log, plus "Could Not Validate" / "Cannot Validate Yet" sections scanned from
//! `VALIDATION_RESULT` messages) — the same criteria-scanning idiom `conclave_scheduler::context`
//! uses to surface unverifiable criteria to validators.

use conclave_types::{ClusterState, Message};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

#[derive(Serialize)]
pub struct JsonExport<'a> {
    pub cluster_id: &'a str,
    pub state: ClusterState,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    pub messages: &'a [Message],
}

fn criteria_block(messages: &[Message], status: &str) -> Vec<(u64, String)> {
    let mut entries = Vec::new();
    for message in messages {
        if message.topic != "VALIDATION_RESULT" {
            continue;
        }
        let Some(data) = &message.content.data else { continue };
        let Some(Value::Array(results)) = data.get("criteriaResults") else { continue };
        for result in results {
            if result.get("status").and_then(Value::as_str) != Some(status) {
                continue;
            }
            let reason = result
                .get("reason")
                .and_then(Value::as_str)
                .filter(|r| !r.is_empty())
                .unwrap_or("No reason provided")
                .to_string();
            entries.push((message.id, reason));
        }
    }
    entries
}

pub fn render_json(cluster_id: &str, state: ClusterState, created_at: i64, messages: &[Message]) -> Value {
    serde_json::to_value(JsonExport { cluster_id, state, created_at, messages }).expect("export shape is always serializable")
}

pub fn render_markdown(cluster_id: &str, state: ClusterState, created_at: i64, messages: &[Message]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Cluster {cluster_id}\n\n"));
    out.push_str(&format!("State: `{state:?}`  \nCreated: {created_at}\n\n"));

    out.push_str("## Message Log\n\n");
    for message in messages {
        let text = message
            .content
            .text
            .clone()
            .or_else(|| message.content.data.as_ref().map(|data| data.to_string()))
            .unwrap_or_default();
        out.push_str(&format!("- `{}` [{}] {}: {}\n", message.id, message.topic, message.sender, text));
    }

    let could_not_validate = criteria_block(messages, "CANNOT_VALIDATE");
    if !could_not_validate.is_empty() {
        out.push_str("\n## Could Not Validate\n\n");
        for (id, reason) in could_not_validate {
            out.push_str(&format!("- `{id}`: {reason}\n"));
        }
    }

    let cannot_validate_yet = criteria_block(messages, "CANNOT_VALIDATE_YET");
    if !cannot_validate_yet.is_empty() {
        out.push_str("\n## Cannot Validate Yet\n\n");
        for (id, reason) in cannot_validate_yet {
            out.push_str(&format!("- `{id}`: {reason}\n"));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_types::MessageContent;

    fn msg(id: u64, topic: &str, data: Value) -> Message {
        Message { id, cluster_id: "c1".to_string(), topic: topic.to_string(), sender: "v".to_string(), timestamp: id as i64, content: MessageContent::data(data) }
    }

    #[test]
    fn markdown_includes_could_not_validate_with_default_reason() {
        let messages = vec![msg(1, "VALIDATION_RESULT", serde_json::json!({"criteriaResults": [{"criterion": "perf", "status": "CANNOT_VALIDATE"}]}))];
        let rendered = render_markdown("c1", ClusterState::Stopped, 0, &messages);
        assert!(rendered.contains("Could Not Validate"));
        assert!(rendered.contains("No reason provided"));
    }

    #[test]
    fn markdown_omits_sections_with_no_matching_criteria() {
        let messages = vec![msg(1, "ISSUE_OPENED", serde_json::json!({}))];
        let rendered = render_markdown("c1", ClusterState::Running, 0, &messages);
        assert!(!rendered.contains("Could Not Validate"));
        assert!(!rendered.contains("Cannot Validate Yet"));
    }

    #[test]
    fn json_export_round_trips_through_serde() {
        let messages = vec![msg(1, "ISSUE_OPENED", serde_json::json!({"title": "x"}))];
        let value = render_json("c1", ClusterState::Running, 42, &messages);
        assert_eq!(value["cluster_id"], "c1");
        assert_eq!(value["createdAt"], 42);
        assert_eq!(value["messages"][0]["id"], 1);
    }
}
