//! Post-synthesis checks. Every finding is a warning; nothing here blocks the
//! answer or touches the intent.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::LazyLock;

use nova_core::domain::evidence::{EvidenceFamily, EvidenceLedger};
use nova_core::domain::intent::Intent;
use nova_core::domain::state::ConversationState;
use nova_core::rules::{compile, GuardrailRules, RulesError, TextLimits};
use regex::Regex;
use rust_decimal::Decimal;

pub const DISCLAIMER: &str =
    "*Note: This response may be incomplete. Please contact support for assistance.*";

static CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})+|\d+)(\.\d+)?").expect("valid currency regex")
});
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").expect("valid number regex"));
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("valid date regex"));
static UNSAFE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(/?)\s*(script|iframe|style|object|embed)\b[^>]*>").expect("valid markup regex")
});
static JAVASCRIPT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").expect("valid url regex"));
static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));

const STRONG_CLAIMS: [&str; 2] = ["definitely", "certainly"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    /// The expected evidence family (and, for FAQ, the sources marker) is present.
    pub grounded: bool,
    pub intent_match: bool,
    pub warnings: Vec<String>,
    /// Sanitized answer, with the disclaimer appended when ungrounded.
    pub answer: String,
}

pub struct OutputValidator {
    banned_phrases: Vec<String>,
    absolute_terms: Vec<(String, Regex)>,
    sources_marker: String,
    limits: TextLimits,
}

impl OutputValidator {
    pub fn new(rules: &GuardrailRules) -> Result<Self, RulesError> {
        let absolute_terms = rules
            .absolute_terms
            .iter()
            .map(|term| Ok((term.to_lowercase(), compile("absolute_terms", &term_pattern(term))?)))
            .collect::<Result<Vec<_>, RulesError>>()?;
        Ok(Self {
            banned_phrases: rules.banned_phrases.clone(),
            absolute_terms,
            sources_marker: rules.sources_marker.clone(),
            limits: rules.limits.clone(),
        })
    }

    pub fn validate(&self, intent: Intent, answer: &str, evidence: &EvidenceLedger) -> ValidationReport {
        let mut warnings = Vec::new();
        let lowered = answer.to_lowercase();

        if answer.trim().chars().count() < self.limits.min_answer_chars {
            warnings.push("Answer is too short or empty".to_string());
        }
        if answer.chars().count() > self.limits.max_answer_chars {
            warnings.push("Answer is excessively long".to_string());
        }
        for phrase in &self.banned_phrases {
            if lowered.contains(&phrase.to_lowercase()) {
                warnings.push(format!("Contains banned phrase: {phrase}"));
            }
        }

        let grounded = match intent {
            Intent::Faq => {
                let has_docs = evidence.has_family(EvidenceFamily::Document);
                if !has_docs {
                    warnings.push("FAQ answer is not grounded in any document evidence".to_string());
                }
                let cites = answer.contains(&self.sources_marker);
                if !cites {
                    warnings.push("FAQ answer missing explicit source citations".to_string());
                }
                has_docs && cites
            }
            Intent::DataLookup => {
                let has_tools = evidence.has_family(EvidenceFamily::ToolResult);
                if !has_tools {
                    warnings.push("DataLookup answer is not grounded in any tool evidence".to_string());
                }
                has_tools
            }
            Intent::Escalation => true,
        };

        let intent_match = match intent.expected_evidence() {
            Some(family) => evidence.has_family(family),
            None => lowered.contains("support") || lowered.contains("contact"),
        };
        if !intent_match {
            warnings.push("Answer-intent mismatch detected".to_string());
        }

        warnings.extend(self.hallucination_warnings(answer, &lowered, evidence));

        let topics = evidence.sensitive_topics();
        if !topics.is_empty() && intent != Intent::Escalation {
            warnings.push(format!(
                "Sensitive topic detected ({}) but intent is {intent}; escalation recommended",
                topics.join(", ")
            ));
        }

        let mut revised = sanitize(answer);
        if !grounded && !revised.is_empty() {
            revised = format!("{revised}\n\n{DISCLAIMER}");
        }

        ValidationReport { grounded, intent_match, warnings, answer: revised }
    }

    /// Validates the state's answer, records warnings and applies the single
    /// permitted revision when the text changed.
    pub fn review(&self, state: &mut ConversationState) -> ValidationReport {
        let intent = state.intent().unwrap_or(Intent::Escalation);
        let answer = state.answer().unwrap_or_default().to_string();
        let report = self.validate(intent, &answer, &state.evidence);

        for warning in &report.warnings {
            state.record_warning(warning.clone());
        }
        if state.answer().is_some() && report.answer != answer {
            if let Err(error) = state.revise_answer(report.answer.clone()) {
                state.record_error(error.to_string());
            }
        }
        report
    }

    fn hallucination_warnings(&self, answer: &str, lowered: &str, evidence: &EvidenceLedger) -> Vec<String> {
        let mut warnings = Vec::new();
        let evidence_text = evidence
            .contents()
            .map(str::to_string)
            .chain(evidence.tag_strings())
            .collect::<Vec<_>>()
            .join("\n");
        let evidence_lowered = evidence_text.to_lowercase();

        // Amounts must come from evidence content; tag parameters like
        // `account_id=A001` would otherwise vouch for `$1`.
        let known_numbers = evidence
            .contents()
            .flat_map(|content| NUMBER.find_iter(content))
            .filter_map(|found| normalize_amount(found.as_str()))
            .collect::<BTreeSet<_>>();
        let mut flagged = BTreeSet::new();
        for amount in CURRENCY.find_iter(answer) {
            let digits = amount.as_str().trim_start_matches('$').trim();
            let Some(value) = normalize_amount(digits) else { continue };
            if !known_numbers.contains(&value) && flagged.insert(value) {
                warnings.push(format!(
                    "Answer contains amount {} not found in evidence",
                    amount.as_str()
                ));
            }
        }

        for date in ISO_DATE.find_iter(answer) {
            if !evidence_text.contains(date.as_str()) {
                warnings.push(format!("Answer contains date {} not found in evidence", date.as_str()));
            }
        }

        for (term, pattern) in &self.absolute_terms {
            if pattern.is_match(answer) && !evidence_lowered.contains(term) {
                warnings.push(format!("Contains absolute statement: '{term}'"));
            }
        }

        if STRONG_CLAIMS.iter().any(|claim| lowered.contains(claim)) && evidence.len() < 2 {
            warnings.push("Strong claim without sufficient evidence".to_string());
        }

        warnings
    }
}

/// Neutralizes markup that could render downstream and collapses blank-line
/// runs. Applied to every answer.
pub fn sanitize(text: &str) -> String {
    let neutralized = UNSAFE_TAG.replace_all(text, "[$1$2]");
    let neutralized = JAVASCRIPT_URL.replace_all(&neutralized, "");
    let trimmed_lines = neutralized.lines().map(str::trim_end).collect::<Vec<_>>().join("\n");
    BLANK_RUN.replace_all(&trimmed_lines, "\n\n").trim().to_string()
}

fn term_pattern(term: &str) -> String {
    let escaped = regex::escape(term);
    let leading = if term.starts_with(|ch: char| ch.is_alphanumeric()) { r"\b" } else { "" };
    let trailing = if term.ends_with(|ch: char| ch.is_alphanumeric()) { r"\b" } else { "" };
    format!("(?i){leading}{escaped}{trailing}")
}

fn normalize_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(&raw.replace(',', "")).ok().map(|value| value.normalize())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use nova_core::domain::evidence::{EvidenceLedger, EvidenceTag};
    use nova_core::domain::intent::Intent;
    use nova_core::domain::state::ConversationState;
    use nova_core::rules::GuardrailRules;

    use super::{sanitize, OutputValidator, DISCLAIMER};

    fn validator() -> OutputValidator {
        OutputValidator::new(&GuardrailRules::builtin()).expect("builtin rules compile")
    }

    fn pricing_ledger() -> EvidenceLedger {
        let mut ledger = EvidenceLedger::new();
        ledger.record_with_content(
            EvidenceTag::document("pricing_plans.md"),
            "The Pro plan costs $99 per month, billed on 2025-11-01.",
        );
        ledger
    }

    #[test]
    fn grounded_faq_answer_has_no_findings() {
        let report = validator().validate(
            Intent::Faq,
            "The Pro plan costs $99.00 per month.\n\nSources: pricing_plans.md",
            &pricing_ledger(),
        );
        assert!(report.grounded);
        assert!(report.intent_match);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert!(!report.answer.contains(DISCLAIMER));
    }

    #[test]
    fn faq_without_documents_or_marker_is_flagged_and_disclaimed() {
        let report = validator().validate(Intent::Faq, "Pro is a popular plan for teams.", &EvidenceLedger::new());
        assert!(!report.grounded);
        assert!(!report.intent_match);
        assert!(report.warnings.iter().any(|w| w.contains("not grounded in any document")));
        assert!(report.warnings.iter().any(|w| w.contains("missing explicit source citations")));
        assert!(report.answer.ends_with(DISCLAIMER));
    }

    #[test]
    fn faq_with_documents_but_no_marker_is_ungrounded() {
        let report = validator().validate(Intent::Faq, "The Pro plan costs $99 per month.", &pricing_ledger());
        assert!(!report.grounded);
        assert!(report.intent_match);
        assert_eq!(report.warnings, vec!["FAQ answer missing explicit source citations"]);
    }

    #[test]
    fn data_lookup_requires_tool_evidence() {
        let mut ledger = EvidenceLedger::new();
        let params = BTreeMap::from([("account_id".to_string(), "A001".to_string())]);
        ledger.record_with_content(EvidenceTag::tool_result("invoice_status", &params), "- Overdue: $1200.50");

        let grounded = validator().validate(Intent::DataLookup, "You have $1,200.50 overdue.", &ledger);
        assert!(grounded.grounded);
        assert!(grounded.warnings.is_empty(), "{:?}", grounded.warnings);

        let ungrounded = validator().validate(Intent::DataLookup, "I could not find that account.", &EvidenceLedger::new());
        assert!(!ungrounded.grounded);
        assert!(ungrounded.warnings.iter().any(|w| w.contains("not grounded in any tool evidence")));
    }

    #[test]
    fn tag_parameters_do_not_vouch_for_amounts() {
        let mut ledger = EvidenceLedger::new();
        let params = BTreeMap::from([("account_id".to_string(), "A001".to_string())]);
        ledger.record_with_content(EvidenceTag::tool_result("invoice_status", &params), "- Overdue: $1200.50");

        let report = validator().validate(Intent::DataLookup, "You owe $1 today.", &ledger);
        assert!(
            report.warnings.contains(&"Answer contains amount $1 not found in evidence".to_string()),
            "{:?}",
            report.warnings
        );
    }

    #[test]
    fn hallucination_heuristics_compare_against_evidence() {
        let report = validator().validate(
            Intent::Faq,
            "Pro costs $149 and renews on 2026-01-01. It is always available.\n\nSources: pricing_plans.md",
            &pricing_ledger(),
        );
        assert!(report.warnings.contains(&"Answer contains amount $149 not found in evidence".to_string()));
        assert!(report.warnings.contains(&"Answer contains date 2026-01-01 not found in evidence".to_string()));
        assert!(report.warnings.contains(&"Contains absolute statement: 'always'".to_string()));
    }

    #[test]
    fn absolute_terms_match_whole_words_only() {
        let report = validator().validate(
            Intent::Faq,
            "Nevertheless the Pro plan costs $99.\n\nSources: pricing_plans.md",
            &pricing_ledger(),
        );
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn banned_phrases_and_length_limits() {
        let report = validator().validate(Intent::Escalation, "I'm just an AI, contact support.", &EvidenceLedger::new());
        assert_eq!(report.warnings, vec!["Contains banned phrase: I'm just an AI"]);

        let short = validator().validate(Intent::Escalation, "ok", &EvidenceLedger::new());
        assert!(short.warnings.contains(&"Answer is too short or empty".to_string()));

        let long = "support ".repeat(400);
        let long = validator().validate(Intent::Escalation, &long, &EvidenceLedger::new());
        assert!(long.warnings.contains(&"Answer is excessively long".to_string()));
    }

    #[test]
    fn sensitive_topic_without_escalation_recommends_it() {
        let mut ledger = pricing_ledger();
        ledger.record(EvidenceTag::sensitive_topic("billing_dispute"));
        let report = validator().validate(
            Intent::Faq,
            "The Pro plan costs $99.\n\nSources: pricing_plans.md",
            &ledger,
        );
        assert_eq!(
            report.warnings,
            vec!["Sensitive topic detected (billing_dispute) but intent is FAQ; escalation recommended"]
        );
    }

    #[test]
    fn sanitize_neutralizes_markup_and_blank_runs() {
        let cleaned = sanitize("  Hello <script>alert(1)</script>\n\n\n\nclick javascript:void(0)  \n");
        assert_eq!(cleaned, "Hello [script]alert(1)[/script]\n\nclick void(0)");
    }

    #[test]
    fn review_records_warnings_and_revises_once() {
        let mut state = ConversationState::new("What is the pricing?", None);
        state.assign_intent(Intent::Faq).expect("intent");
        state.set_answer("Pro is popular.\n\n\n\nAsk us anything.".to_string()).expect("answer");

        let report = validator().review(&mut state);

        assert!(!report.grounded);
        assert_eq!(state.warnings, report.warnings);
        assert_eq!(
            state.answer(),
            Some(format!("Pro is popular.\n\nAsk us anything.\n\n{DISCLAIMER}").as_str())
        );
        assert!(state.errors.is_empty());
    }
}
