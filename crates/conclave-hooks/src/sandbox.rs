//! Evaluation context for `logic`/`transform` scripts.
//!
//! Scripts are plain `evalexpr` expressions, not a full JS-like engine (the design explicitly
//! does not require one). Config authors write member-access sugar — `result.approved`,
//! `cluster.id`, `message.topic` — which [`rewrite`] flattens into the `__`-joined identifiers
//! actually bound in the [`evalexpr::HashMapContext`], since evalexpr expressions have no member
//! access operator. A script that wants to produce a message literal returns a two-element tuple
//! `(topic, text)`; returning `()` suppresses.

use std::time::Duration;

use conclave_types::Message;
use evalexpr::{ContextWithMutableVariables, HashMapContext, Value as ExprValue};
use serde_json::Value as JsonValue;

/// Wall-clock budget for a single script evaluation.
pub const SCRIPT_BUDGET: Duration = Duration::from_millis(100);

pub struct ScriptBindings<'a> {
    pub result: Option<&'a JsonValue>,
    pub message: Option<&'a Message>,
    pub iteration: u32,
    pub cluster_id: &'a str,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Rewrites `base.field.field2` sugar for `base ∈ {result, cluster, message}` into
/// `base__field__field2`, the identifier shape the context below actually binds.
fn rewrite(script: &str) -> String {
    const BASES: [&str; 3] = ["result", "cluster", "message"];
    let mut out = String::with_capacity(script.len());
    let mut i = 0;
    while i < script.len() {
        let mut matched = false;
        for base in BASES {
            if !script[i..].starts_with(base) {
                continue;
            }
            let boundary_ok = i == 0 || !is_ident_char(script[..i].chars().next_back().unwrap());
            let after = &script[i + base.len()..];
            if !boundary_ok || !after.starts_with('.') {
                continue;
            }
            let mut j = i + base.len();
            let mut flat = base.to_string();
            while script[j..].starts_with('.') {
                j += 1;
                let start = j;
                while j < script.len() && is_ident_char(script[j..].chars().next().unwrap()) {
                    j += script[j..].chars().next().unwrap().len_utf8();
                }
                flat.push_str("__");
                flat.push_str(&script[start..j]);
            }
            out.push_str(&flat);
            i = j;
            matched = true;
            break;
        }
        if !matched {
            let ch = script[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

fn flatten_json(prefix: &str, value: &JsonValue, context: &mut HashMapContext) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                flatten_json(&format!("{prefix}__{key}"), child, context);
            }
        }
        JsonValue::Array(items) => {
            let _ = context.set_value(format!("{prefix}__length"), ExprValue::Int(items.len() as i64));
            for (index, item) in items.iter().enumerate() {
                flatten_json(&format!("{prefix}__{index}"), item, context);
            }
        }
        JsonValue::String(s) => {
            let _ = context.set_value(prefix.to_string(), ExprValue::String(s.clone()));
        }
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                let _ = context.set_value(prefix.to_string(), ExprValue::Int(i));
            } else if let Some(f) = n.as_f64() {
                let _ = context.set_value(prefix.to_string(), ExprValue::Float(f));
            }
        }
        JsonValue::Bool(b) => {
            let _ = context.set_value(prefix.to_string(), ExprValue::Boolean(*b));
        }
        JsonValue::Null => {
            let _ = context.set_value(prefix.to_string(), ExprValue::Empty);
        }
    }
}

fn build_context(bindings: &ScriptBindings) -> HashMapContext {
    let mut context = HashMapContext::new();
    let _ = context.set_value("iteration".to_string(), ExprValue::Int(bindings.iteration as i64));
    let _ = context.set_value("cluster__id".to_string(), ExprValue::String(bindings.cluster_id.to_string()));
    if let Some(message) = bindings.message {
        let _ = context.set_value("message__topic".to_string(), ExprValue::String(message.topic.clone()));
        let _ = context.set_value("message__sender".to_string(), ExprValue::String(message.sender.clone()));
    }
    if let Some(result) = bindings.result {
        flatten_json("result", result, &mut context);
    }
    context
}

/// Evaluates `script` synchronously against `bindings`. Callers needing the wall-clock budget
/// enforced should run this inside `tokio::time::timeout` + `spawn_blocking` (see `engine.rs`);
/// evalexpr has no loop construct a script can run away with, so this alone is already bounded
/// in practice, but the budget is still enforced at the call site per the sandbox contract.
pub fn evaluate_sync(script: &str, bindings: &ScriptBindings) -> Result<ExprValue, evalexpr::EvalexprError> {
    let rewritten = rewrite(script);
    let context = build_context(bindings);
    evalexpr::eval_with_context(&rewritten, &context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_dotted_member_access() {
        assert_eq!(rewrite("result.approved == true"), "result__approved == true");
        assert_eq!(rewrite("result.path.to.field"), "result__path__to__field");
        assert_eq!(rewrite("cluster.id"), "cluster__id");
    }

    #[test]
    fn leaves_unrelated_identifiers_untouched() {
        assert_eq!(rewrite("iteration > 2"), "iteration > 2");
    }

    #[test]
    fn evaluates_predicate_against_flattened_result() {
        let result = serde_json::json!({"approved": true});
        let bindings = ScriptBindings {
            result: Some(&result),
            message: None,
            iteration: 1,
            cluster_id: "c1",
        };
        let value = evaluate_sync("result.approved == true", &bindings).unwrap();
        assert_eq!(value, ExprValue::Boolean(true));
    }

    #[test]
    fn evaluates_tuple_literal_for_message_production() {
        let bindings = ScriptBindings {
            result: None,
            message: None,
            iteration: 3,
            cluster_id: "c1",
        };
        let value = evaluate_sync(r#"("RETRY", "go again")"#, &bindings).unwrap();
        match value {
            ExprValue::Tuple(items) => assert_eq!(items.len(), 2),
            other => panic!("expected tuple, got {other:?}"),
        }
    }
}
