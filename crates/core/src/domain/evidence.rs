//! Evidence tags and the append-only ledger that carries them through a run.
//!
//! Every tag belongs to exactly one [`EvidenceFamily`]. The string form keeps
//! the reserved prefixes (`doc:`, `tool:`, `safety:pii_redacted:`,
//! `safety:sensitive_topic_detected:`) so serialized results stay readable,
//! but consumers inside the workspace match on the enum, never on prefixes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DOC_PREFIX: &str = "doc:";
const TOOL_PREFIX: &str = "tool:";
const PII_PREFIX: &str = "safety:pii_redacted:";
const TOPIC_PREFIX: &str = "safety:sensitive_topic_detected:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceFamily {
    Document,
    ToolResult,
    PiiRedaction,
    SensitiveTopic,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EvidenceTag {
    Document { name: String },
    ToolResult { tool: String, params: String },
    PiiRedaction { pii_type: String },
    SensitiveTopic { category: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EvidenceParseError {
    #[error("evidence tag `{0}` does not belong to a known family")]
    UnknownFamily(String),
    #[error("evidence tag `{0}` has an empty payload")]
    EmptyPayload(String),
}

impl EvidenceTag {
    pub fn document(name: impl Into<String>) -> Self {
        Self::Document { name: name.into() }
    }

    /// Builds a tool tag with parameters rendered as sorted `key=value` pairs.
    pub fn tool_result(tool: impl Into<String>, params: &BTreeMap<String, String>) -> Self {
        let params =
            params.iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>().join(",");
        Self::ToolResult { tool: tool.into(), params }
    }

    pub fn pii_redacted(pii_type: impl Into<String>) -> Self {
        Self::PiiRedaction { pii_type: pii_type.into() }
    }

    pub fn sensitive_topic(category: impl Into<String>) -> Self {
        Self::SensitiveTopic { category: category.into() }
    }

    pub fn family(&self) -> EvidenceFamily {
        match self {
            Self::Document { .. } => EvidenceFamily::Document,
            Self::ToolResult { .. } => EvidenceFamily::ToolResult,
            Self::PiiRedaction { .. } => EvidenceFamily::PiiRedaction,
            Self::SensitiveTopic { .. } => EvidenceFamily::SensitiveTopic,
        }
    }
}

impl fmt::Display for EvidenceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document { name } => write!(f, "{DOC_PREFIX}{name}"),
            Self::ToolResult { tool, params } => write!(f, "{TOOL_PREFIX}{tool}:{params}"),
            Self::PiiRedaction { pii_type } => write!(f, "{PII_PREFIX}{pii_type}"),
            Self::SensitiveTopic { category } => write!(f, "{TOPIC_PREFIX}{category}"),
        }
    }
}

impl FromStr for EvidenceTag {
    type Err = EvidenceParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let non_empty = |payload: &str| {
            if payload.is_empty() {
                Err(EvidenceParseError::EmptyPayload(raw.to_string()))
            } else {
                Ok(payload.to_string())
            }
        };

        // Longer safety prefixes first; `doc:` and `tool:` cannot shadow them.
        if let Some(payload) = raw.strip_prefix(TOPIC_PREFIX) {
            return Ok(Self::SensitiveTopic { category: non_empty(payload)? });
        }
        if let Some(payload) = raw.strip_prefix(PII_PREFIX) {
            return Ok(Self::PiiRedaction { pii_type: non_empty(payload)? });
        }
        if let Some(payload) = raw.strip_prefix(DOC_PREFIX) {
            return Ok(Self::Document { name: non_empty(payload)? });
        }
        if let Some(payload) = raw.strip_prefix(TOOL_PREFIX) {
            let (tool, params) = payload.split_once(':').unwrap_or((payload, ""));
            return Ok(Self::ToolResult { tool: non_empty(tool)?, params: params.to_string() });
        }

        Err(EvidenceParseError::UnknownFamily(raw.to_string()))
    }
}

impl From<EvidenceTag> for String {
    fn from(tag: EvidenceTag) -> Self {
        tag.to_string()
    }
}

impl TryFrom<String> for EvidenceTag {
    type Error = EvidenceParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A tag plus the text that backs it (passage or formatted tool output), when
/// there is one. Safety tags carry no content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub tag: EvidenceTag,
    pub content: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    entries: Vec<EvidenceEntry>,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, tag: EvidenceTag) {
        self.entries.push(EvidenceEntry { tag, content: None });
    }

    pub fn record_with_content(&mut self, tag: EvidenceTag, content: impl Into<String>) {
        self.entries.push(EvidenceEntry { tag, content: Some(content.into()) });
    }

    pub fn entries(&self) -> &[EvidenceEntry] {
        &self.entries
    }

    pub fn tags(&self) -> impl Iterator<Item = &EvidenceTag> {
        self.entries.iter().map(|entry| &entry.tag)
    }

    pub fn has_family(&self, family: EvidenceFamily) -> bool {
        self.tags().any(|tag| tag.family() == family)
    }

    pub fn count_family(&self, family: EvidenceFamily) -> usize {
        self.tags().filter(|tag| tag.family() == family).count()
    }

    pub fn contents(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| entry.content.as_deref())
    }

    pub fn sensitive_topics(&self) -> Vec<&str> {
        self.tags()
            .filter_map(|tag| match tag {
                EvidenceTag::SensitiveTopic { category } => Some(category.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tag_strings(&self) -> Vec<String> {
        self.tags().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
