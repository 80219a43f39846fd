use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Structure,
    TopicReachability,
    CompletionPresence,
    Cycles,
    IterationCoverage,
    TemplateVariables,
    RoleReferences,
    HookShape,
    ModelDiscipline,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub category: IssueCategory,
    /// Dot/bracket path to the offending node, prefixed for nested sub-clusters
    /// (e.g. `agents[2].config.agents[0]`).
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(category: IssueCategory, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn error(&mut self, category: IssueCategory, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(category, path, message));
    }

    pub fn warn(&mut self, category: IssueCategory, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::new(category, path, message));
    }
}
