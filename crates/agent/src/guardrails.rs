//! Input-side safety checks: PII redaction, sensitive-topic detection,
//! injection markers and query normalization.
//!
//! Detection is regex/keyword based and best effort. The guardrail never
//! touches conversation state; it returns a [`SafetyOutcome`] and the routing
//! runtime decides what to do with it.

use nova_core::domain::evidence::EvidenceTag;
use nova_core::rules::{compile, GuardrailRules, RulesError};
use regex::Regex;

#[derive(Debug)]
struct PiiDetector {
    name: String,
    pattern: Regex,
    placeholder: String,
}

#[derive(Debug)]
struct TopicDetector {
    category: String,
    keywords: Vec<Regex>,
}

#[derive(Debug)]
pub struct SafetyGuardrail {
    pii: Vec<PiiDetector>,
    topics: Vec<TopicDetector>,
    injection_markers: Vec<String>,
    prompt_markers: Vec<String>,
    max_query_chars: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SafetyOutcome {
    pub sanitized: String,
    /// Distinct PII types found, in rule order.
    pub pii_types: Vec<String>,
    pub topics: Vec<String>,
    pub injection_warnings: Vec<String>,
    /// Set when any sensitive topic matched; only the router reads it.
    pub force_escalate: bool,
}

impl SafetyOutcome {
    /// Ledger tags for the findings: one per PII type, then one per topic.
    pub fn evidence_tags(&self) -> Vec<EvidenceTag> {
        self.pii_types
            .iter()
            .map(EvidenceTag::pii_redacted)
            .chain(self.topics.iter().map(EvidenceTag::sensitive_topic))
            .collect()
    }
}

impl SafetyGuardrail {
    pub fn new(rules: &GuardrailRules) -> Result<Self, RulesError> {
        let pii = rules
            .pii
            .iter()
            .map(|rule| {
                Ok(PiiDetector {
                    name: rule.name.clone(),
                    pattern: compile(&rule.name, &rule.pattern)?,
                    placeholder: rule.placeholder(),
                })
            })
            .collect::<Result<Vec<_>, RulesError>>()?;

        let topics = rules
            .sensitive_topics
            .iter()
            .map(|(category, keywords)| {
                let keywords = keywords
                    .iter()
                    .map(|keyword| keyword.trim())
                    .filter(|keyword| !keyword.is_empty())
                    .map(|keyword| compile(category, &keyword_pattern(keyword)))
                    .collect::<Result<Vec<_>, RulesError>>()?;
                Ok(TopicDetector { category: category.clone(), keywords })
            })
            .collect::<Result<Vec<_>, RulesError>>()?;

        Ok(Self {
            pii,
            topics,
            injection_markers: rules
                .injection_markers
                .iter()
                .map(|marker| marker.to_ascii_lowercase())
                .collect(),
            prompt_markers: rules.prompt_markers.clone(),
            max_query_chars: rules.limits.max_query_chars,
        })
    }

    pub fn inspect(&self, raw: &str) -> SafetyOutcome {
        let collapsed = collapse_whitespace(raw);

        let injection_warnings = self.detect_injection(raw);
        let (redacted, pii_types) = self.redact(&collapsed);
        // Topics are matched after redaction so keywords inside PII never count.
        let topics = self.detect_topics(&redacted);
        let sanitized = self.normalize(&redacted);

        SafetyOutcome {
            sanitized,
            pii_types,
            force_escalate: !topics.is_empty(),
            topics,
            injection_warnings,
        }
    }

    fn detect_topics(&self, text: &str) -> Vec<String> {
        self.topics
            .iter()
            .filter(|topic| topic.keywords.iter().any(|keyword| keyword.is_match(text)))
            .map(|topic| topic.category.clone())
            .collect()
    }

    fn detect_injection(&self, raw: &str) -> Vec<String> {
        let lowered = raw.to_ascii_lowercase();
        self.injection_markers
            .iter()
            .filter(|marker| lowered.contains(marker.as_str()))
            .map(|marker| format!("possible injection marker `{marker}` in query"))
            .collect()
    }

    fn redact(&self, text: &str) -> (String, Vec<String>) {
        let mut redacted = text.to_string();
        let mut found = Vec::new();
        for detector in &self.pii {
            if detector.pattern.is_match(&redacted) {
                redacted =
                    detector.pattern.replace_all(&redacted, detector.placeholder.as_str()).into_owned();
                if !found.contains(&detector.name) {
                    found.push(detector.name.clone());
                }
            }
        }
        (redacted, found)
    }

    fn normalize(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for marker in &self.prompt_markers {
            cleaned = cleaned.replace(marker.as_str(), "");
        }
        let cleaned = collapse_whitespace(&cleaned);
        cleaned.chars().take(self.max_query_chars).collect::<String>().trim().to_string()
    }
}

/// Whole-word, case-insensitive keyword match that tolerates a plural suffix.
fn keyword_pattern(keyword: &str) -> String {
    let escaped = regex::escape(keyword).replace(' ', r"\s+");
    format!(r"(?i)\b{escaped}(?:s|es)?\b")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
