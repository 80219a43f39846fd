//! Pure configuration-resolution helpers — no I/O, no sandbox, nothing async — kept separate
//! from [`crate::scheduler`] so the precedence rules are easy to unit test on their own.

use conclave_types::{AgentConfig, ModelLevel};

/// First matching `modelRules` entry for `iteration`, else `modelLevel`, else `None` (cluster
/// default applies at the call site).
pub fn resolve_model(agent: &AgentConfig, iteration: u32) -> Option<ModelLevel> {
    agent
        .model_rules
        .iter()
        .find(|rule| rule.iterations.matches(iteration))
        .map(|rule| rule.model)
        .or(agent.model_level)
}

/// First matching `promptConfig.rules` entry for `iteration`, else the agent's static `prompt`.
pub fn resolve_prompt(agent: &AgentConfig, iteration: u32) -> Option<String> {
    agent
        .prompt_config
        .as_ref()
        .and_then(|config| config.rules.iter().find(|rule| rule.iterations.matches(iteration)))
        .map(|rule| rule.prompt.clone())
        .or_else(|| agent.prompt.clone())
}

pub fn exceeds_iteration_cap(agent: &AgentConfig, tentative_iteration: u32) -> bool {
    tentative_iteration > agent.max_iterations
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_types::{IterationSpec, ModelRule, PromptConfig, PromptRule, Trigger, TriggerAction};

    fn agent() -> AgentConfig {
        AgentConfig {
            id: "a".to_string(),
            role: "worker".to_string(),
            triggers: vec![Trigger::new("START", TriggerAction::ExecuteTask)],
            prompt: Some("default prompt".to_string()),
            prompt_config: Some(PromptConfig {
                rules: vec![PromptRule {
                    iterations: IterationSpec::Exact(2),
                    prompt: "second-iteration prompt".to_string(),
                }],
            }),
            model_level: Some(ModelLevel::Level1),
            model_rules: vec![ModelRule {
                iterations: IterationSpec::Plus(3),
                model: ModelLevel::Level3,
            }],
            json_schema: None,
            output_format: Default::default(),
            context_strategy: None,
            hooks: Default::default(),
            max_iterations: 5,
            max_retries: 0,
            timeout_ms: 30_000,
            enable_liveness_check: false,
        }
    }

    #[test]
    fn model_rule_wins_over_static_level_when_it_matches() {
        assert_eq!(resolve_model(&agent(), 4), Some(ModelLevel::Level3));
    }

    #[test]
    fn falls_back_to_static_level_outside_any_rule() {
        assert_eq!(resolve_model(&agent(), 1), Some(ModelLevel::Level1));
    }

    #[test]
    fn prompt_rule_wins_on_exact_iteration_match() {
        assert_eq!(resolve_prompt(&agent(), 2).as_deref(), Some("second-iteration prompt"));
    }

    #[test]
    fn falls_back_to_static_prompt_otherwise() {
        assert_eq!(resolve_prompt(&agent(), 1).as_deref(), Some("default prompt"));
    }

    #[test]
    fn iteration_cap_is_exclusive_of_max() {
        assert!(!exceeds_iteration_cap(&agent(), 5));
        assert!(exceeds_iteration_cap(&agent(), 6));
    }
}
