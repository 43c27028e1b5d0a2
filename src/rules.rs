//! Analysis rules
//!
//! A [`Rule`] turns document text into an ordered list of findings and may
//! know how to fix the text a finding covers. The shipped rule kind is
//! [`PatternRule`], a regular expression with a message template and an
//! optional case transform.

use lazy_static::lazy_static;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::diagnostics::{DiagnosticSeverity, RuleDiagnostic};
use crate::text::LineIndex;

lazy_static! {
    /// `{{ match }}` with any inner spacing
    static ref MATCH_PLACEHOLDER: Regex = Regex::new(r"\{\{\s*match\s*\}\}").unwrap();
}

/// Error types for rule construction and evaluation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    #[error("Duplicate rule id: {0}")]
    DuplicateRule(String),

    #[error("Rule {rule} failed: {message}")]
    Failed { rule: String, message: String },

    #[error("Rule {0} panicked")]
    Panicked(String),

    #[error("Rule {rule} timed out after {timeout_ms}ms")]
    TimedOut { rule: String, timeout_ms: u64 },
}

/// Replacement offered for the text a finding covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickFix {
    pub title: String,
    pub replacement: String,
}

/// A pluggable, stateless analysis step
#[tower_lsp::async_trait]
pub trait Rule: Send + Sync {
    /// Stable identifier, echoed on every diagnostic the rule produces
    fn id(&self) -> &str;

    /// Findings for `text`, in document order
    async fn evaluate(&self, text: &str) -> Result<Vec<RuleDiagnostic>, RuleError>;

    /// Fix for the text covered by one of this rule's findings
    fn fix(&self, _covered: &str) -> Option<QuickFix> {
        None
    }
}

/// Text transform applied by a pattern rule's quick fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixTransform {
    Lowercase,
    Uppercase,
    None,
}

impl FixTransform {
    pub fn apply(&self, text: &str) -> Option<String> {
        match self {
            FixTransform::Lowercase => Some(text.to_lowercase()),
            FixTransform::Uppercase => Some(text.to_uppercase()),
            FixTransform::None => None,
        }
    }
}

/// A pattern rule definition loaded from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRuleConfig {
    /// Unique identifier for the rule
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Regular expression pattern
    pub pattern: String,

    /// Message template, `{{ match }}` is replaced with the matched text
    pub message: String,

    /// Severity level when matched
    #[serde(default = "default_severity")]
    pub severity: DiagnosticSeverity,

    #[serde(default = "default_fix")]
    pub fix: FixTransform,

    /// Code action title for the fix
    #[serde(default)]
    pub fix_title: Option<String>,

    /// Whether this rule is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_severity() -> DiagnosticSeverity {
    DiagnosticSeverity::Warning
}

fn default_fix() -> FixTransform {
    FixTransform::None
}

fn default_true() -> bool {
    true
}

impl PatternRuleConfig {
    /// Flags words of two or more uppercase letters and offers to lowercase them
    pub fn uppercase_word() -> Self {
        Self {
            id: "uppercase-word".to_string(),
            name: "Uppercase word".to_string(),
            pattern: r"\b[A-Z]{2,}\b".to_string(),
            message: "{{ match }} is all uppercase.".to_string(),
            severity: DiagnosticSeverity::Warning,
            fix: FixTransform::Lowercase,
            fix_title: Some("Fix to lower case".to_string()),
            enabled: true,
        }
    }
}

/// A compiled pattern rule ready for matching
pub struct PatternRule {
    config: PatternRuleConfig,
    regex: Regex,
}

impl PatternRule {
    /// Compile a pattern for efficient matching
    pub fn new(config: PatternRuleConfig) -> Result<Self, RuleError> {
        let regex = Regex::new(&config.pattern)
            .map_err(|e| RuleError::InvalidRegex(format!("{}: {}", config.id, e)))?;

        Ok(Self { config, regex })
    }

    fn render_message(&self, matched: &str) -> String {
        MATCH_PLACEHOLDER
            .replace_all(&self.config.message, NoExpand(matched))
            .into_owned()
    }
}

#[tower_lsp::async_trait]
impl Rule for PatternRule {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn evaluate(&self, text: &str) -> Result<Vec<RuleDiagnostic>, RuleError> {
        let index = LineIndex::new(text);

        Ok(self
            .regex
            .find_iter(text)
            .filter(|m| !m.as_str().is_empty())
            .map(|m| {
                RuleDiagnostic::new(
                    index.range_of(m.start(), m.end()),
                    self.config.severity,
                    self.render_message(m.as_str()),
                )
            })
            .collect())
    }

    fn fix(&self, covered: &str) -> Option<QuickFix> {
        let replacement = self.config.fix.apply(covered)?;
        let title = self
            .config
            .fix_title
            .clone()
            .unwrap_or_else(|| format!("Fix {}", self.config.id));

        Some(QuickFix { title, replacement })
    }
}

/// Registered rules in evaluation order
#[derive(Default, Clone)]
pub struct RuleSet {
    rules: Vec<Arc<dyn Rule>>,
    by_id: HashMap<String, Arc<dyn Rule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile enabled pattern rules, keeping their order
    pub fn from_patterns(configs: &[PatternRuleConfig]) -> Result<Self, RuleError> {
        let mut set = Self::new();
        for config in configs.iter().filter(|c| c.enabled) {
            set.register(Arc::new(PatternRule::new(config.clone())?))?;
        }
        Ok(set)
    }

    pub fn register(&mut self, rule: Arc<dyn Rule>) -> Result<(), RuleError> {
        let id = rule.id().to_string();
        if self.by_id.contains_key(&id) {
            return Err(RuleError::DuplicateRule(id));
        }
        self.by_id.insert(id, Arc::clone(&rule));
        self.rules.push(rule);
        Ok(())
    }

    /// Get a rule by ID
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Rule>> {
        self.by_id.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Rule>> {
        self.rules.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
