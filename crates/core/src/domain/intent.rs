use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::evidence::EvidenceFamily;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    #[serde(rename = "FAQ")]
    Faq,
    DataLookup,
    Escalation,
}

impl Intent {
    pub const ALL: [Intent; 3] = [Intent::Faq, Intent::DataLookup, Intent::Escalation];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Faq => "FAQ",
            Self::DataLookup => "DataLookup",
            Self::Escalation => "Escalation",
        }
    }

    /// Parses a completion-service reply into an intent label.
    ///
    /// Matching is case-insensitive and ignores surrounding quotes, punctuation
    /// and separators, so `"dataLookup."`, `data_lookup` and `Data Lookup` all
    /// resolve to [`Intent::DataLookup`]. Only the first non-empty line is
    /// considered. Anything else is `None`; callers decide the fallback.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let first_line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
        let normalized = first_line
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        let normalized = normalized.strip_prefix("intent").unwrap_or(&normalized);
        match normalized {
            "faq" => Some(Self::Faq),
            "datalookup" => Some(Self::DataLookup),
            "escalation" | "escalate" => Some(Self::Escalation),
            _ => None,
        }
    }

    /// Evidence family an answer for this intent must be grounded in.
    pub fn expected_evidence(&self) -> Option<EvidenceFamily> {
        match self {
            Self::Faq => Some(EvidenceFamily::Document),
            Self::DataLookup => Some(EvidenceFamily::ToolResult),
            Self::Escalation => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
