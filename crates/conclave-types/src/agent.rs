use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hook::Hook;
use crate::trigger::Trigger;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ModelLevel {
    Level1,
    Level2,
    Level3,
}

/// `"all" | "N" | "N-M" | "N+"` — a half-open or closed range of 1-based iteration numbers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum IterationSpec {
    All,
    Exact(u32),
    Range(u32, u32),
    Plus(u32),
}

impl IterationSpec {
    pub fn matches(&self, iteration: u32) -> bool {
        match self {
            IterationSpec::All => true,
            IterationSpec::Exact(n) => *n == iteration,
            IterationSpec::Range(lo, hi) => iteration >= *lo && iteration <= *hi,
            IterationSpec::Plus(n) => iteration >= *n,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, IterationSpec::All | IterationSpec::Plus(_))
    }
}

impl FromStr for IterationSpec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(IterationSpec::All);
        }
        if let Some(prefix) = trimmed.strip_suffix('+') {
            let n: u32 = prefix
                .parse()
                .map_err(|_| format!("invalid iteration spec `{raw}`"))?;
            return Ok(IterationSpec::Plus(n));
        }
        if let Some((lo, hi)) = trimmed.split_once('-') {
            let lo: u32 = lo
                .trim()
                .parse()
                .map_err(|_| format!("invalid iteration spec `{raw}`"))?;
            let hi: u32 = hi
                .trim()
                .parse()
                .map_err(|_| format!("invalid iteration spec `{raw}`"))?;
            if lo > hi {
                return Err(format!("iteration range `{raw}` is inverted"));
            }
            return Ok(IterationSpec::Range(lo, hi));
        }
        let n: u32 = trimmed
            .parse()
            .map_err(|_| format!("invalid iteration spec `{raw}`"))?;
        Ok(IterationSpec::Exact(n))
    }
}

impl TryFrom<String> for IterationSpec {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IterationSpec> for String {
    fn from(value: IterationSpec) -> Self {
        match value {
            IterationSpec::All => "all".to_string(),
            IterationSpec::Exact(n) => n.to_string(),
            IterationSpec::Range(lo, hi) => format!("{lo}-{hi}"),
            IterationSpec::Plus(n) => format!("{n}+"),
        }
    }
}

/// Returns every iteration in `1..=max` not covered by exactly one rule's `iterations` spec.
/// Iterations covered by more than one non-catch-all rule are not flagged as gaps; the caller
/// resolves precedence by taking the first match.
pub fn coverage_gaps<T>(rules: &[T], max: u32, iterations_of: impl Fn(&T) -> IterationSpec) -> Vec<u32> {
    (1..=max.max(1))
        .filter(|i| !rules.iter().any(|rule| iterations_of(rule).matches(*i)))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelRule {
    pub iterations: IterationSpec,
    pub model: ModelLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptRule {
    pub iterations: IterationSpec,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptConfig {
    pub rules: Vec<PromptRule>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    StreamJson,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextSource {
    pub topic: String,
    pub amount: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextStrategy {
    pub sources: Vec<ContextSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentHooks {
    #[serde(rename = "onComplete", skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<Hook>,
    #[serde(rename = "onError", skip_serializing_if = "Option::is_none")]
    pub on_error: Option<Hook>,
}

fn default_max_iterations() -> u32 {
    1
}

fn default_max_retries() -> u32 {
    0
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// A configured cluster participant. Runtime state (`iteration`, `currentTaskId`, `state`) is
/// tracked separately by the scheduler, not here — this is the static, validated configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub id: String,
    pub role: String,
    pub triggers: Vec<Trigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(rename = "promptConfig", skip_serializing_if = "Option::is_none")]
    pub prompt_config: Option<PromptConfig>,
    #[serde(rename = "modelLevel", skip_serializing_if = "Option::is_none")]
    pub model_level: Option<ModelLevel>,
    #[serde(rename = "modelRules", default)]
    pub model_rules: Vec<ModelRule>,
    #[serde(rename = "jsonSchema", skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    #[serde(rename = "outputFormat", default)]
    pub output_format: OutputFormat,
    #[serde(rename = "contextStrategy", skip_serializing_if = "Option::is_none")]
    pub context_strategy: Option<ContextStrategy>,
    #[serde(default)]
    pub hooks: AgentHooks,
    #[serde(rename = "maxIterations", default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(rename = "maxRetries", default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(rename = "enableLivenessCheck", default)]
    pub enable_liveness_check: bool,
}

impl AgentConfig {
    pub fn is_validator(&self) -> bool {
        self.role.eq_ignore_ascii_case("validator")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunState {
    Idle,
    Running,
    Stopped,
}
