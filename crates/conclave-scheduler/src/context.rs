//! Builds the prompt string handed to the task runner, in the order the contract specifies:
//! base prompt, an optional unverifiable-criteria section for validators, each configured
//! context source's most-recent messages, then the triggering message itself.

use std::collections::BTreeSet;

use conclave_ledger::Ledger;
use conclave_types::{AgentConfig, Message, MessageQuery};
use serde_json::Value;

const VALIDATION_RESULT_TOPIC: &str = "VALIDATION_RESULT";
const CANNOT_VALIDATE: &str = "CANNOT_VALIDATE";

async fn unverifiable_criteria(ledger: &Ledger, since: i64) -> Vec<String> {
    let messages = ledger
        .query(&MessageQuery {
            topic: Some(VALIDATION_RESULT_TOPIC.to_string()),
            since: Some(since),
            ..Default::default()
        })
        .await;

    let mut criteria = BTreeSet::new();
    for message in &messages {
        let Some(data) = &message.content.data else { continue };
        let Some(Value::Array(results)) = data.get("criteriaResults") else { continue };
        for result in results {
            let is_unverifiable = result.get("status").and_then(Value::as_str) == Some(CANNOT_VALIDATE);
            if let (true, Some(name)) = (is_unverifiable, result.get("criterion").and_then(Value::as_str)) {
                criteria.insert(name.to_string());
            }
        }
    }
    criteria.into_iter().collect()
}

fn format_message(message: &Message) -> String {
    let text = message
        .content
        .text
        .clone()
        .or_else(|| message.content.data.as_ref().map(|data| data.to_string()))
        .unwrap_or_default();
    format!("[{}] {}", message.topic, text)
}

/// Assembles the full context string for one execution.
pub async fn assemble_context(
    ledger: &Ledger,
    agent: &AgentConfig,
    prompt: &str,
    triggering_message: &Message,
    cluster_created_at: i64,
) -> String {
    let mut sections = vec![prompt.to_string()];

    if agent.is_validator() {
        let criteria = unverifiable_criteria(ledger, cluster_created_at).await;
        if !criteria.is_empty() {
            let mut section = String::from("Permanently Unverifiable Criteria:\n");
            for criterion in criteria {
                section.push_str("- ");
                section.push_str(&criterion);
                section.push('\n');
            }
            sections.push(section);
        }
    }

    if let Some(strategy) = &agent.context_strategy {
        for source in &strategy.sources {
            let messages = ledger
                .query(&MessageQuery {
                    topic: Some(source.topic.clone()),
                    limit: Some(source.amount),
                    ..Default::default()
                })
                .await;
            if messages.is_empty() {
                continue;
            }
            let formatted: Vec<String> = messages.iter().map(format_message).collect();
            sections.push(formatted.join("\n"));
        }
    }

    sections.push(format_message(triggering_message));
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_types::{AgentHooks, ContextSource, ContextStrategy, MessageContent, Trigger, TriggerAction};

    fn validator_agent() -> AgentConfig {
        AgentConfig {
            id: "v".to_string(),
            role: "validator".to_string(),
            triggers: vec![Trigger::new("CHECK", TriggerAction::ExecuteTask)],
            prompt: Some("validate the patch".to_string()),
            prompt_config: None,
            model_level: None,
            model_rules: Vec::new(),
            json_schema: None,
            output_format: Default::default(),
            context_strategy: Some(ContextStrategy {
                sources: vec![ContextSource { topic: "AGENT_OUTPUT".to_string(), amount: 2, strategy: None }],
            }),
            hooks: AgentHooks::default(),
            max_iterations: 1,
            max_retries: 0,
            timeout_ms: 1000,
            enable_liveness_check: false,
        }
    }

    #[tokio::test]
    async fn injects_unverifiable_criteria_section_for_validators() {
        let ledger = Ledger::new("c1");
        let data = serde_json::json!({"criteriaResults": [{"criterion": "perf", "status": "CANNOT_VALIDATE"}]});
        ledger.append(ledger.seed_message("VALIDATION_RESULT", MessageContent::data(data))).await.unwrap();

        let trigger_msg = ledger.seed_message("CHECK", MessageContent::text("go"));
        let context = assemble_context(&ledger, &validator_agent(), "validate the patch", &trigger_msg, 0).await;

        assert!(context.contains("Permanently Unverifiable Criteria"));
        assert!(context.contains("perf"));
    }

    #[tokio::test]
    async fn non_validator_never_sees_the_criteria_section() {
        let ledger = Ledger::new("c1");
        let data = serde_json::json!({"criteriaResults": [{"criterion": "perf", "status": "CANNOT_VALIDATE"}]});
        ledger.append(ledger.seed_message("VALIDATION_RESULT", MessageContent::data(data))).await.unwrap();

        let mut worker = validator_agent();
        worker.role = "implementation".to_string();
        let trigger_msg = ledger.seed_message("CHECK", MessageContent::text("go"));
        let context = assemble_context(&ledger, &worker, "implement it", &trigger_msg, 0).await;

        assert!(!context.contains("Permanently Unverifiable Criteria"));
    }
}
