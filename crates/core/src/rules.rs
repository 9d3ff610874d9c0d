//! Versioned guardrail rule set shared by the safety guardrail, the tool
//! invoker and the output validator.
//!
//! The rules are plain data: loaded once at start-up (built-in defaults or a
//! TOML file) and validated before any component compiles them. Changing a
//! keyword list never requires touching prompt text or validation code.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RULES_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardrailRules {
    pub version: u32,
    /// Applied in order; later patterns see text already redacted by earlier ones.
    pub pii: Vec<PiiRule>,
    pub sensitive_topics: BTreeMap<String, Vec<String>>,
    pub injection_markers: Vec<String>,
    pub prompt_markers: Vec<String>,
    pub banned_phrases: Vec<String>,
    pub absolute_terms: Vec<String>,
    pub sources_marker: String,
    pub tool_params: ToolParamRules,
    pub limits: TextLimits,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PiiRule {
    pub name: String,
    pub pattern: String,
}

impl PiiRule {
    pub fn placeholder(&self) -> String {
        format!("[REDACTED_{}]", self.name.to_ascii_uppercase())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolParamRules {
    pub account_id_pattern: String,
    pub month_pattern: String,
    pub max_window_days: u32,
    pub max_search_results: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextLimits {
    pub max_query_chars: usize,
    pub min_answer_chars: usize,
    pub max_answer_chars: usize,
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("could not read rules file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse rules file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("unsupported rules version {found} (expected {RULES_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("rule `{name}` has an invalid pattern: {source}")]
    InvalidPattern { name: String, source: regex::Error },
    #[error("rules validation failed: {0}")]
    Validation(String),
}

impl Default for GuardrailRules {
    fn default() -> Self {
        Self::builtin()
    }
}

impl GuardrailRules {
    pub fn builtin() -> Self {
        let pii = [
            ("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
            ("credit_card", r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b"),
            ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
            ("phone", r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b"),
        ]
        .into_iter()
        .map(|(name, pattern)| PiiRule { name: name.to_string(), pattern: pattern.to_string() })
        .collect();

        let topics: [(&str, &[&str]); 4] = [
            ("data_breach", &["breach", "hacked", "compromised", "data leak"]),
            ("legal", &["lawsuit", "lawyer", "legal action", "sue", "attorney"]),
            (
                "billing_dispute",
                &["refund", "billing error", "unauthorized charge", "disputed charge", "chargeback", "overcharged"],
            ),
            (
                "account_termination",
                &["cancel subscription", "cancel my subscription", "close account", "close my account", "delete account", "delete my account"],
            ),
        ];
        let sensitive_topics = topics
            .into_iter()
            .map(|(category, keywords)| {
                (category.to_string(), keywords.iter().map(|k| (*k).to_string()).collect())
            })
            .collect();

        Self {
            version: RULES_VERSION,
            pii,
            sensitive_topics,
            injection_markers: strings(&["{{", "}}", "{%", "<script", "javascript:"]),
            prompt_markers: strings(&["```", "SYSTEM:", "Assistant:"]),
            banned_phrases: strings(&[
                "I apologize for the confusion",
                "Let me check that for you",
                "I'm just an AI",
                "I don't have access to",
            ]),
            absolute_terms: strings(&["always", "never", "guaranteed", "impossible", "100%"]),
            sources_marker: "Sources:".to_string(),
            tool_params: ToolParamRules {
                account_id_pattern: r"^A\d{3}$".to_string(),
                month_pattern: r"^\d{4}-\d{2}$".to_string(),
                max_window_days: 365,
                max_search_results: 20,
            },
            limits: TextLimits { max_query_chars: 500, min_answer_chars: 10, max_answer_chars: 2500 },
        }
    }

    /// Built-in rules when `path` is `None`, otherwise the file's rules.
    pub fn load(path: Option<&Path>) -> Result<Self, RulesError> {
        let rules = match path {
            Some(path) => read_rules(path)?,
            None => Self::builtin(),
        };
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), RulesError> {
        if self.version != RULES_VERSION {
            return Err(RulesError::UnsupportedVersion { found: self.version });
        }
        if self.pii.is_empty() {
            return Err(RulesError::Validation("at least one pii rule is required".to_string()));
        }
        for rule in &self.pii {
            if rule.name.trim().is_empty() {
                return Err(RulesError::Validation("pii rule names must not be empty".to_string()));
            }
            compile(&rule.name, &rule.pattern)?;
        }
        if self.sensitive_topics.is_empty() {
            return Err(RulesError::Validation(
                "at least one sensitive topic category is required".to_string(),
            ));
        }
        for (category, keywords) in &self.sensitive_topics {
            if keywords.iter().all(|keyword| keyword.trim().is_empty()) {
                return Err(RulesError::Validation(format!(
                    "sensitive topic `{category}` has no keywords"
                )));
            }
        }
        if self.sources_marker.trim().is_empty() {
            return Err(RulesError::Validation("sources_marker must not be empty".to_string()));
        }
        compile("tool_params.account_id_pattern", &self.tool_params.account_id_pattern)?;
        compile("tool_params.month_pattern", &self.tool_params.month_pattern)?;
        if self.tool_params.max_window_days == 0 || self.tool_params.max_search_results == 0 {
            return Err(RulesError::Validation(
                "tool_params limits must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_query_chars == 0
            || self.limits.min_answer_chars >= self.limits.max_answer_chars
        {
            return Err(RulesError::Validation(
                "limits must satisfy max_query_chars > 0 and min_answer_chars < max_answer_chars"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Compiles a rule pattern, naming the rule in the error.
pub fn compile(name: &str, pattern: &str) -> Result<Regex, RulesError> {
    Regex::new(pattern)
        .map_err(|source| RulesError::InvalidPattern { name: name.to_string(), source })
}

fn read_rules(path: &Path) -> Result<GuardrailRules, RulesError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| RulesError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str::<GuardrailRules>(&raw)
        .map_err(|source| RulesError::ParseFile { path: path.to_path_buf(), source })
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{GuardrailRules, RulesError, RULES_VERSION};

    #[test]
    fn builtin_rules_validate_and_cover_required_categories() {
        let rules = GuardrailRules::load(None).expect("builtin rules should validate");
        let pii_names = rules.pii.iter().map(|rule| rule.name.as_str()).collect::<Vec<_>>();
        for required in ["email", "phone", "ssn", "credit_card"] {
            assert!(pii_names.contains(&required), "missing pii rule {required}");
        }
        for category in ["data_breach", "legal", "billing_dispute", "account_termination"] {
            assert!(rules.sensitive_topics.contains_key(category), "missing topic {category}");
        }
        assert_eq!(rules.pii[0].placeholder(), "[REDACTED_EMAIL]");
    }

    #[test]
    fn rules_file_round_trips_through_toml() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("guardrails.toml");
        let mut rules = GuardrailRules::builtin();
        rules.banned_phrases.push("As a large language model".to_string());
        let encoded = toml::to_string(&rules).expect("rules should encode");
        fs::write(&path, encoded).expect("rules file should be written");

        let loaded = GuardrailRules::load(Some(&path)).expect("rules file should load");
        assert_eq!(loaded, rules);
    }

    #[test]
    fn invalid_pattern_names_the_rule() {
        let mut rules = GuardrailRules::builtin();
        rules.pii[1].pattern = "(unclosed".to_string();
        match rules.validate() {
            Err(RulesError::InvalidPattern { name, .. }) => assert_eq!(name, "credit_card"),
            other => panic!("expected invalid pattern error, got {other:?}"),
        }
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut rules = GuardrailRules::builtin();
        rules.version = RULES_VERSION + 1;
        assert!(matches!(rules.validate(), Err(RulesError::UnsupportedVersion { .. })));
    }

    #[test]
    fn empty_topic_keywords_are_rejected() {
        let mut rules = GuardrailRules::builtin();
        rules.sensitive_topics.insert("legal".to_string(), vec![" ".to_string()]);
        assert!(matches!(rules.validate(), Err(RulesError::Validation(_))));
    }
}
