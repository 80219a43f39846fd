//! Turns a completed agent execution into zero or one outbound messages.

use std::time::Duration;

use conclave_types::{ErrorKind, Hook, Message, MessageContent};
use evalexpr::Value as ExprValue;
use serde_json::Value as JsonValue;

use crate::sandbox::{self, ScriptBindings, SCRIPT_BUDGET};
use crate::template::{self, TemplateBindings};

pub struct FireContext<'a> {
    pub agent_id: &'a str,
    pub cluster_id: &'a str,
    pub iteration: u32,
    pub triggering_message: Option<&'a Message>,
    pub result: Option<&'a JsonValue>,
}

/// Runs `script` under the sandbox's wall-clock budget on a blocking thread, so a pathological
/// script cannot stall the async runtime even though evalexpr itself has no loop construct to
/// run away with.
async fn run_script(script: String, bindings_of: impl FnOnce() -> (Option<JsonValue>, Option<Message>, u32, String) + Send + 'static) -> Result<ExprValue, ErrorKind> {
    let handle = tokio::task::spawn_blocking(move || {
        let (result, message, iteration, cluster_id) = bindings_of();
        let bindings = ScriptBindings {
            result: result.as_ref(),
            message: message.as_ref(),
            iteration,
            cluster_id: &cluster_id,
        };
        sandbox::evaluate_sync(script.as_str(), &bindings)
    });
    match tokio::time::timeout(SCRIPT_BUDGET, handle).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(eval_err))) => {
            tracing::warn!(error = %eval_err, "hook script raised an error");
            Err(ErrorKind::HookScriptError)
        }
        Ok(Err(join_err)) => {
            tracing::warn!(error = %join_err, "hook script task panicked");
            Err(ErrorKind::HookScriptError)
        }
        Err(_elapsed) => {
            tracing::warn!(budget_ms = SCRIPT_BUDGET.as_millis() as u64, "hook script exceeded its wall-clock budget");
            Err(ErrorKind::HookScriptError)
        }
    }
}

fn tuple_to_message(value: ExprValue) -> Option<(String, Option<String>)> {
    match value {
        ExprValue::Tuple(items) if items.len() == 2 => {
            let topic = match &items[0] {
                ExprValue::String(s) => s.clone(),
                _ => return None,
            };
            let text = match &items[1] {
                ExprValue::String(s) => Some(s.clone()),
                ExprValue::Empty => None,
                other => Some(other.to_string()),
            };
            Some((topic, text))
        }
        ExprValue::Empty => None,
        _ => None,
    }
}

fn bindings_snapshot(ctx: &FireContext) -> (Option<JsonValue>, Option<Message>, u32, String) {
    (
        ctx.result.cloned(),
        ctx.triggering_message.cloned(),
        ctx.iteration,
        ctx.cluster_id.to_string(),
    )
}

/// Evaluates `hook` against `ctx`, returning the outbound message to publish (`sender` left for
/// the caller to stamp), or `None` if the hook suppressed, failed, or had nothing to say.
pub async fn fire(hook: &Hook, ctx: &FireContext<'_>) -> Option<Message> {
    let produced = if let Some(logic) = &hook.logic {
        let ctx_owned = bindings_snapshot(ctx);
        match run_script(logic.script.clone(), move || ctx_owned).await {
            Ok(value) => tuple_to_message(value),
            Err(_) => None,
        }
    } else {
        None
    };

    let produced = match produced {
        Some(hit) => Some(hit),
        None => {
            if let Some(transform) = &hook.transform {
                let ctx_owned = bindings_snapshot(ctx);
                match run_script(transform.script.clone(), move || ctx_owned).await {
                    Ok(value) => tuple_to_message(value),
                    Err(_) => return None,
                }
            } else {
                None
            }
        }
    };

    let (topic, text) = match produced {
        Some(hit) => hit,
        None => {
            if hook.logic.is_some() || hook.transform.is_some() {
                // A logic/transform script ran and explicitly suppressed (returned empty).
                if hook.config.is_none() {
                    return None;
                }
            }
            let config = hook.config.as_ref()?;
            let bindings = TemplateBindings {
                cluster_id: ctx.cluster_id,
                iteration: ctx.iteration,
                result: ctx.result,
            };
            match template::render(config, &bindings) {
                Ok((topic, content, warns)) => {
                    for warning in warns {
                        tracing::warn!(%warning, "hook template warning");
                    }
                    (topic, content.text)
                }
                Err(_) => return None,
            }
        }
    };

    Some(Message::from_agent(ctx.cluster_id, ctx.agent_id, &topic, MessageContent::text(text.unwrap_or_default())))
}

/// Documents the budget used by [`run_script`] so callers outside this crate (the scheduler's
/// trigger-predicate evaluation) can share the same constant.
pub fn script_budget() -> Duration {
    SCRIPT_BUDGET
}

/// Evaluates a trigger's `logic.script` as a boolean predicate under the same sandboxed budget
/// `fire` uses. A script error or a non-boolean result both count as `false` (drop the message)
/// rather than failing the caller — predicates are opt-in filters, not a hard dependency.
pub async fn evaluate_predicate(script: &str, ctx: &FireContext<'_>) -> bool {
    let ctx_owned = bindings_snapshot(ctx);
    let script = script.to_string();
    match run_script(script, move || ctx_owned).await {
        Ok(ExprValue::Boolean(value)) => value,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_types::{HookAction, MessageTemplate, ScriptSource, TemplateContent};

    #[tokio::test]
    async fn config_template_is_used_when_no_scripts_present() {
        let hook = Hook {
            action: HookAction::PublishMessage,
            config: Some(MessageTemplate {
                topic: "DONE".to_string(),
                content: TemplateContent { text: Some("iteration {{iteration}}".to_string()), data: None },
            }),
            transform: None,
            logic: None,
        };
        let ctx = FireContext {
            agent_id: "worker",
            cluster_id: "c1",
            iteration: 4,
            triggering_message: None,
            result: None,
        };
        let message = fire(&hook, &ctx).await.unwrap();
        assert_eq!(message.topic, "DONE");
        assert_eq!(message.content.text.as_deref(), Some("iteration 4"));
        assert_eq!(message.sender, "worker");
    }

    #[tokio::test]
    async fn transform_script_suppresses_on_empty_tuple() {
        let hook = Hook {
            action: HookAction::PublishMessage,
            config: None,
            transform: Some(ScriptSource::new("()")),
            logic: None,
        };
        let ctx = FireContext {
            agent_id: "worker",
            cluster_id: "c1",
            iteration: 1,
            triggering_message: None,
            result: None,
        };
        assert!(fire(&hook, &ctx).await.is_none());
    }

    #[tokio::test]
    async fn transform_script_produces_a_message() {
        let hook = Hook {
            action: HookAction::PublishMessage,
            config: None,
            transform: Some(ScriptSource::new(r#"("RETRY", "try again")"#)),
            logic: None,
        };
        let ctx = FireContext {
            agent_id: "worker",
            cluster_id: "c1",
            iteration: 1,
            triggering_message: None,
            result: None,
        };
        let message = fire(&hook, &ctx).await.unwrap();
        assert_eq!(message.topic, "RETRY");
        assert_eq!(message.content.text.as_deref(), Some("try again"));
    }

    #[tokio::test]
    async fn logic_script_wins_over_transform_when_it_produces_a_message() {
        let hook = Hook {
            action: HookAction::PublishMessage,
            config: None,
            transform: Some(ScriptSource::new(r#"("FROM_TRANSFORM", "nope")"#)),
            logic: Some(ScriptSource::new(r#"("FROM_LOGIC", "yes")"#)),
        };
        let ctx = FireContext {
            agent_id: "worker",
            cluster_id: "c1",
            iteration: 1,
            triggering_message: None,
            result: None,
        };
        let message = fire(&hook, &ctx).await.unwrap();
        assert_eq!(message.topic, "FROM_LOGIC");
    }
}
