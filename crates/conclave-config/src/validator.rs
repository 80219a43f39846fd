use std::collections::{HashMap, HashSet};

use conclave_types::{
    coverage_gaps, AgentConfig, ClusterConfig, Hook, IterationSpec, TriggerAction,
};
use serde_json::Value;

use crate::report::{IssueCategory, ValidationReport};
use crate::template_scan;

const SEED_TOPIC: &str = "ISSUE_OPENED";

/// Validates `typed` (already-parsed configuration) together with `raw` (the original JSON,
/// needed only for the model-discipline check, which must see fields serde silently dropped).
pub fn validate(raw: &Value, typed: &ClusterConfig) -> ValidationReport {
    validate_at(raw, typed, "")
}

fn validate_at(raw: &Value, typed: &ClusterConfig, path: &str) -> ValidationReport {
    let mut report = ValidationReport::default();

    let agents: Vec<&AgentConfig> = typed.top_level_agents().collect();

    check_structure(&agents, path, &mut report);
    check_topic_reachability(&agents, path, &mut report);
    check_completion_presence(&agents, path, &mut report);
    check_cycles(&agents, path, &mut report);
    check_iteration_coverage(&agents, path, &mut report);
    check_template_variables(&agents, path, &mut report);
    check_role_references(&agents, path, &mut report);
    check_hook_shape(&agents, path, &mut report);
    check_model_discipline(raw, path, &mut report);

    // Sub-cluster descent (#10): recurse with a path-prefixed message on every nested config.
    // Indexed over the full `agents[]` list (not the sub-cluster-only subsequence) so the path
    // and the raw lookup line up with a mix of leaf agents and sub-clusters.
    let raw_agents = raw.get("agents").and_then(Value::as_array);
    for (index, entry) in typed.agents.iter().enumerate() {
        let conclave_types::AgentEntry::SubCluster(sub) = entry else {
            continue;
        };
        let child_path = format!("{path}agents[{index}].config.");
        let raw_sub = raw_agents
            .and_then(|entries| entries.get(index))
            .and_then(|entry| entry.get("config"))
            .cloned()
            .unwrap_or(Value::Null);
        report.merge(validate_at(&raw_sub, &sub.config, &child_path));
    }

    report
}

fn agent_hooks(agent: &AgentConfig) -> Vec<&Hook> {
    let mut hooks = Vec::new();
    for trigger in &agent.triggers {
        if let Some(hook) = &trigger.on_complete {
            hooks.push(hook);
        }
    }
    if let Some(hook) = &agent.hooks.on_complete {
        hooks.push(hook);
    }
    if let Some(hook) = &agent.hooks.on_error {
        hooks.push(hook);
    }
    hooks
}

fn check_structure(agents: &[&AgentConfig], path: &str, report: &mut ValidationReport) {
    let mut seen_ids = HashSet::new();
    for agent in agents {
        if agent.id.is_empty() {
            report.error(IssueCategory::Structure, path, "agent is missing an id");
        } else if !seen_ids.insert(agent.id.clone()) {
            report.error(
                IssueCategory::Structure,
                format!("{path}agents[{}]", agent.id),
                format!("duplicate agent id `{}`", agent.id),
            );
        }
        if agent.role.is_empty() {
            report.error(
                IssueCategory::Structure,
                format!("{path}agents[{}]", agent.id),
                "agent is missing a role",
            );
        }
        if agent.triggers.is_empty() {
            report.error(
                IssueCategory::Structure,
                format!("{path}agents[{}]", agent.id),
                "agent has no triggers",
            );
        }
        for trigger in &agent.triggers {
            if let Some(logic) = &trigger.logic {
                if let Err(err) = evalexpr::build_operator_tree::<evalexpr::DefaultNumericTypes>(&logic.script) {
                    report.error(
                        IssueCategory::Structure,
                        format!("{path}agents[{}].triggers[{}]", agent.id, trigger.topic),
                        format!("trigger logic does not parse: {err}"),
                    );
                }
            }
        }
    }
}

fn topics_produced_by(agent: &AgentConfig) -> Vec<String> {
    agent_hooks(agent)
        .into_iter()
        .filter_map(|hook| hook.config.as_ref().map(|cfg| cfg.topic.clone()))
        .collect()
}

fn check_topic_reachability(agents: &[&AgentConfig], path: &str, report: &mut ValidationReport) {
    let mut produced: HashSet<String> = agents.iter().flat_map(|a| topics_produced_by(a)).collect();
    produced.insert(SEED_TOPIC.to_string());
    let consumed: HashSet<String> = agents
        .iter()
        .flat_map(|a| a.triggers.iter().map(|t| t.topic.clone()))
        .collect();

    for agent in agents {
        let own_topics: HashSet<String> = topics_produced_by(agent).into_iter().collect();
        for trigger in &agent.triggers {
            if !produced.contains(&trigger.topic) {
                report.error(
                    IssueCategory::TopicReachability,
                    format!("{path}agents[{}].triggers[{}]", agent.id, trigger.topic),
                    format!("topic `{}` is never produced and is not the seed topic", trigger.topic),
                );
            }
            if own_topics.contains(&trigger.topic) && trigger.logic.is_none() {
                report.error(
                    IssueCategory::TopicReachability,
                    format!("{path}agents[{}].triggers[{}]", agent.id, trigger.topic),
                    format!(
                        "agent `{}` both triggers on and produces `{}` with no escape logic",
                        agent.id, trigger.topic
                    ),
                );
            }
        }
    }

    for topic in &produced {
        if topic != SEED_TOPIC && !consumed.contains(topic) {
            report.warn(
                IssueCategory::TopicReachability,
                path,
                format!("topic `{topic}` is produced but never consumed"),
            );
        }
    }
}

fn check_completion_presence(agents: &[&AgentConfig], path: &str, report: &mut ValidationReport) {
    let count = agents
        .iter()
        .flat_map(|a| a.triggers.iter())
        .filter(|t| t.action == TriggerAction::StopCluster)
        .count();
    if count == 0 {
        report.error(IssueCategory::CompletionPresence, path, "no trigger has action `stop_cluster`");
    } else if count > 1 {
        report.error(
            IssueCategory::CompletionPresence,
            path,
            format!("{count} triggers have action `stop_cluster`, expected at most one"),
        );
    }
}

fn check_cycles(agents: &[&AgentConfig], path: &str, report: &mut ValidationReport) {
    // edge: trigger-topic -> produced-topic, for every agent (excludes self-loops; those are
    // handled by the self-trigger rule in topic reachability).
    let mut edges: HashMap<String, Vec<(String, bool)>> = HashMap::new();
    for agent in agents {
        let produced = topics_produced_by(agent);
        for trigger in &agent.triggers {
            for out_topic in &produced {
                if out_topic == &trigger.topic {
                    continue;
                }
                edges
                    .entry(trigger.topic.clone())
                    .or_default()
                    .push((out_topic.clone(), trigger.logic.is_some()));
            }
        }
    }

    let nodes: Vec<String> = edges.keys().cloned().collect();
    for start in &nodes {
        if let Some(cycle_has_escape) = find_cycle(start, &edges) {
            if cycle_has_escape {
                report.warn(
                    IssueCategory::Cycles,
                    path,
                    format!("topic `{start}` participates in a cycle with an escape trigger"),
                );
            } else {
                report.error(
                    IssueCategory::Cycles,
                    path,
                    format!("topic `{start}` participates in a cycle with no escape trigger"),
                );
            }
        }
    }
}

/// DFS back to `start`; returns `Some(true)` if a cycle through `start` was found and at least
/// one edge along it carries an escape `logic`, `Some(false)` if found with no escape anywhere,
/// `None` if no cycle exists.
fn find_cycle(start: &str, edges: &HashMap<String, Vec<(String, bool)>>) -> Option<bool> {
    let mut stack = vec![(start.to_string(), false)];
    let mut visited = HashSet::new();
    while let Some((node, has_escape)) = stack.pop() {
        let Some(next_edges) = edges.get(&node) else {
            continue;
        };
        for (next, escape) in next_edges {
            let escape_so_far = has_escape || *escape;
            if next == start {
                return Some(escape_so_far);
            }
            if visited.insert(next.clone()) {
                stack.push((next.clone(), escape_so_far));
            }
        }
    }
    None
}

fn check_iteration_coverage(agents: &[&AgentConfig], path: &str, report: &mut ValidationReport) {
    for agent in agents {
        if !agent.model_rules.is_empty() {
            verify_coverage(
                &agent.model_rules,
                agent.max_iterations,
                |rule| rule.iterations,
                &format!("{path}agents[{}].modelRules", agent.id),
                report,
            );
        }
        if let Some(prompt_config) = &agent.prompt_config {
            if !prompt_config.rules.is_empty() {
                verify_coverage(
                    &prompt_config.rules,
                    agent.max_iterations,
                    |rule| rule.iterations,
                    &format!("{path}agents[{}].promptConfig", agent.id),
                    report,
                );
            }
        }
    }
}

fn verify_coverage<T>(
    rules: &[T],
    max_iterations: u32,
    iterations_of: impl Fn(&T) -> IterationSpec,
    path: &str,
    report: &mut ValidationReport,
) {
    let gaps = coverage_gaps(rules, max_iterations, &iterations_of);
    if !gaps.is_empty() {
        report.error(
            IssueCategory::IterationCoverage,
            path,
            format!("iterations {gaps:?} are not covered by any rule"),
        );
    }
    if !rules.iter().any(|rule| iterations_of(rule).is_catch_all()) {
        report.error(
            IssueCategory::IterationCoverage,
            path,
            "no catch-all rule (`all` or `N+`) is present",
        );
    }
}

fn check_template_variables(agents: &[&AgentConfig], path: &str, report: &mut ValidationReport) {
    for agent in agents {
        if !matches!(
            agent.output_format,
            conclave_types::OutputFormat::Json | conclave_types::OutputFormat::StreamJson
        ) {
            continue;
        }
        let Some(schema) = &agent.json_schema else {
            continue;
        };
        let properties: HashSet<String> = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();

        let mut used = HashSet::new();
        for hook in agent_hooks(agent) {
            if let Some(config) = &hook.config {
                if let Some(text) = &config.content.text {
                    used.extend(template_scan::result_fields_in_template(text));
                }
            }
            if let Some(transform) = &hook.transform {
                used.extend(template_scan::result_fields_in_script(&transform.script));
            }
            if let Some(logic) = &hook.logic {
                used.extend(template_scan::result_fields_in_script(&logic.script));
            }
        }

        for field in &used {
            if !properties.contains(field) {
                report.error(
                    IssueCategory::TemplateVariables,
                    format!("{path}agents[{}]", agent.id),
                    format!("`{{{{result.{field}}}}}` has no matching schema property"),
                );
            }
        }
        for property in &properties {
            if !used.contains(property) {
                report.warn(
                    IssueCategory::TemplateVariables,
                    format!("{path}agents[{}]", agent.id),
                    format!("schema property `{property}` is never referenced by a hook"),
                );
            }
        }
    }
}

fn check_role_references(agents: &[&AgentConfig], path: &str, report: &mut ValidationReport) {
    let known_roles: HashSet<String> = agents.iter().map(|a| a.role.clone()).collect();
    for agent in agents {
        for hook in agent_hooks(agent) {
            for script in [hook.transform.as_ref(), hook.logic.as_ref()].into_iter().flatten() {
                for role in template_scan::role_references(&script.script) {
                    if !known_roles.contains(&role) && !template_scan::has_zero_length_fallback(&script.script) {
                        report.error(
                            IssueCategory::RoleReferences,
                            format!("{path}agents[{}]", agent.id),
                            format!("`getAgentsByRole(\"{role}\")` does not resolve to a configured role"),
                        );
                    }
                }
            }
        }
        for trigger in &agent.triggers {
            if let Some(logic) = &trigger.logic {
                for role in template_scan::role_references(&logic.script) {
                    if !known_roles.contains(&role) && !template_scan::has_zero_length_fallback(&logic.script) {
                        report.error(
                            IssueCategory::RoleReferences,
                            format!("{path}agents[{}]", agent.id),
                            format!("`getAgentsByRole(\"{role}\")` does not resolve to a configured role"),
                        );
                    }
                }
            }
        }
    }
}

fn check_hook_shape(agents: &[&AgentConfig], path: &str, report: &mut ValidationReport) {
    for agent in agents {
        for hook in agent_hooks(agent) {
            if let Some(transform) = &hook.transform {
                let script = &transform.script;
                if !(script.contains("topic") && script.contains("content")) {
                    report.error(
                        IssueCategory::HookShape,
                        format!("{path}agents[{}]", agent.id),
                        "transform script does not statically show a `{topic, content}` return shape",
                    );
                }
            }
        }
    }
}

fn check_model_discipline(raw: &Value, path: &str, report: &mut ValidationReport) {
    let Some(agents) = raw.get("agents").and_then(Value::as_array) else {
        return;
    };
    for (index, entry) in agents.iter().enumerate() {
        if entry.get("model").is_some() {
            let id = entry.get("id").and_then(Value::as_str).unwrap_or("?");
            report.error(
                IssueCategory::ModelDiscipline,
                format!("{path}agents[{index}]"),
                format!("agent `{id}` declares a raw `model` field; use `modelLevel` or `modelRules`"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: Value) -> (Value, ClusterConfig) {
        let typed: ClusterConfig = serde_json::from_value(raw.clone()).expect("valid config fixture");
        (raw, typed)
    }

    fn minimal_cluster() -> Value {
        serde_json::json!({
            "agents": [
                {
                    "id": "implementer",
                    "role": "implementer",
                    "triggers": [
                        {"topic": "ISSUE_OPENED", "action": "execute_task"}
                    ],
                    "hooks": {
                        "onComplete": {
                            "action": "publish_message",
                            "config": {"topic": "AGENT_OUTPUT", "content": {"text": "done"}}
                        }
                    }
                },
                {
                    "id": "closer",
                    "role": "closer",
                    "triggers": [
                        {"topic": "AGENT_OUTPUT", "action": "stop_cluster"}
                    ]
                }
            ]
        })
    }

    #[test]
    fn minimal_cluster_is_valid() {
        let (raw, typed) = parse(minimal_cluster());
        let report = validate(&raw, &typed);
        assert!(report.valid(), "unexpected errors: {:?}", report.errors);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut raw = minimal_cluster();
        raw["agents"][1]["id"] = serde_json::json!("implementer");
        let (raw, typed) = parse(raw);
        let report = validate(&raw, &typed);
        assert!(report.errors.iter().any(|e| e.category == IssueCategory::Structure));
    }

    #[test]
    fn missing_stop_cluster_trigger_is_an_error() {
        let mut raw = minimal_cluster();
        raw["agents"][1]["triggers"][0]["action"] = serde_json::json!("execute_task");
        let (raw, typed) = parse(raw);
        let report = validate(&raw, &typed);
        assert!(report
            .errors
            .iter()
            .any(|e| e.category == IssueCategory::CompletionPresence));
    }

    #[test]
    fn raw_model_field_is_flagged_even_though_typed_struct_drops_it() {
        let mut raw = minimal_cluster();
        raw["agents"][0]["model"] = serde_json::json!("gpt-4");
        let (raw, typed) = parse(raw);
        let report = validate(&raw, &typed);
        assert!(report
            .errors
            .iter()
            .any(|e| e.category == IssueCategory::ModelDiscipline));
    }

    #[test]
    fn iteration_rules_without_catch_all_are_flagged() {
        let mut raw = minimal_cluster();
        raw["agents"][0]["maxIterations"] = serde_json::json!(3);
        raw["agents"][0]["modelRules"] = serde_json::json!([
            {"iterations": "1", "model": "level1"},
            {"iterations": "2", "model": "level2"}
        ]);
        let (raw, typed) = parse(raw);
        let report = validate(&raw, &typed);
        assert!(report
            .errors
            .iter()
            .any(|e| e.category == IssueCategory::IterationCoverage));
    }

    #[test]
    fn cycle_without_escape_logic_is_an_error() {
        let raw = serde_json::json!({
            "agents": [
                {
                    "id": "a",
                    "role": "a",
                    "triggers": [{"topic": "ISSUE_OPENED", "action": "execute_task"}],
                    "hooks": {"onComplete": {"action": "publish_message", "config": {"topic": "B_DONE"}}}
                },
                {
                    "id": "b",
                    "role": "b",
                    "triggers": [{"topic": "B_DONE", "action": "execute_task"}],
                    "hooks": {"onComplete": {"action": "publish_message", "config": {"topic": "A_AGAIN"}}}
                },
                {
                    "id": "a2",
                    "role": "a2",
                    "triggers": [{"topic": "A_AGAIN", "action": "execute_task"}],
                    "hooks": {"onComplete": {"action": "publish_message", "config": {"topic": "B_DONE"}}}
                },
                {
                    "id": "closer",
                    "role": "closer",
                    "triggers": [{"topic": "A_AGAIN", "action": "stop_cluster"}]
                }
            ]
        });
        let (raw, typed) = parse(raw);
        let report = validate(&raw, &typed);
        assert!(report.errors.iter().any(|e| e.category == IssueCategory::Cycles));
    }

    #[test]
    fn sub_cluster_issues_are_reported_with_a_prefixed_path() {
        let raw = serde_json::json!({
            "agents": [
                {
                    "type": "subcluster",
                    "config": {
                        "agents": [
                            {
                                "id": "nested",
                                "role": "nested",
                                "triggers": [{"topic": "ISSUE_OPENED", "action": "stop_cluster"}]
                            },
                            {
                                "id": "nested",
                                "role": "nested-dup",
                                "triggers": [{"topic": "ISSUE_OPENED", "action": "execute_task"}]
                            }
                        ]
                    }
                }
            ]
        });
        let (raw, typed) = parse(raw);
        let report = validate(&raw, &typed);
        assert!(report
            .errors
            .iter()
            .any(|e| e.category == IssueCategory::Structure && e.path.starts_with("agents[0].config.")));
    }
}
