use serde::{Deserialize, Serialize};

use crate::agent::ModelLevel;

/// User settings consumed at cluster start. The file format itself belongs to an external
/// settings adapter; this struct is the shape the core reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(rename = "maxLevel", skip_serializing_if = "Option::is_none")]
    pub max_level: Option<ModelLevel>,
    #[serde(rename = "minLevel", skip_serializing_if = "Option::is_none")]
    pub min_level: Option<ModelLevel>,
    #[serde(rename = "defaultProvider", skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    #[serde(rename = "strictSchema", default)]
    pub strict_schema: bool,
    #[serde(rename = "autoCheckUpdates", default)]
    pub auto_check_updates: bool,
    #[serde(rename = "dockerMounts", default)]
    pub docker_mounts: Vec<String>,
    #[serde(rename = "dockerEnvPassthrough", default)]
    pub docker_env_passthrough: Vec<String>,
    #[serde(rename = "defaultIssueSource", skip_serializing_if = "Option::is_none")]
    pub default_issue_source: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_level: None,
            min_level: None,
            default_provider: None,
            strict_schema: false,
            auto_check_updates: true,
            docker_mounts: Vec::new(),
            docker_env_passthrough: Vec::new(),
            default_issue_source: None,
        }
    }
}

impl Settings {
    /// Returns `Err` naming the offending level when `level` falls outside `[minLevel, maxLevel]`.
    pub fn check_model_ceiling(&self, level: ModelLevel) -> Result<(), String> {
        if let Some(max) = self.max_level {
            if level > max {
                return Err(format!("model level {level:?} exceeds configured ceiling {max:?}"));
            }
        }
        if let Some(min) = self.min_level {
            if level < min {
                return Err(format!("model level {level:?} is below configured floor {min:?}"));
            }
        }
        Ok(())
    }
}
