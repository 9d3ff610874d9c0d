use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::evidence::{EvidenceLedger, EvidenceTag};
use crate::domain::intent::Intent;
use crate::errors::DomainError;
use crate::routing::Transition;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EscalationReason {
    SensitiveTopic { categories: Vec<String> },
    EmptyQuery,
    Classified,
    ClassifierFallback,
    RoutingFault,
    SynthesisFailed,
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SensitiveTopic { categories } => {
                write!(f, "sensitive topic detected ({})", categories.join(", "))
            }
            Self::EmptyQuery => f.write_str("query was empty"),
            Self::Classified => f.write_str("classified as escalation"),
            Self::ClassifierFallback => f.write_str("intent could not be established"),
            Self::RoutingFault => f.write_str("routing invariant violated"),
            Self::SynthesisFailed => f.write_str("answer could not be synthesized"),
        }
    }
}

/// The single mutable record threaded through one pipeline run.
///
/// Lives for exactly one query. Mutation goes through methods so the
/// lifecycle rules hold: the original query is never rewritten, the intent is
/// assigned once (later changes only escalate), evidence is append-only and
/// the answer can be revised at most once and never cleared.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationState {
    correlation_id: String,
    query: String,
    sanitized_query: Option<String>,
    pub account_context: Option<String>,
    pub history: Vec<String>,
    intent: Option<Intent>,
    escalation_reason: Option<EscalationReason>,
    pub evidence: EvidenceLedger,
    answer: Option<String>,
    answer_revised: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    trace: Vec<Transition>,
}

impl ConversationState {
    pub fn new(query: impl Into<String>, account_context: Option<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            query: query.into(),
            sanitized_query: None,
            account_context: account_context
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            history: Vec::new(),
            intent: None,
            escalation_reason: None,
            evidence: EvidenceLedger::new(),
            answer: None,
            answer_revised: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            trace: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn original_query(&self) -> &str {
        &self.query
    }

    pub fn sanitized_query(&self) -> Option<&str> {
        self.sanitized_query.as_deref()
    }

    /// Text every stage after Safety works on.
    pub fn effective_query(&self) -> &str {
        self.sanitized_query.as_deref().unwrap_or(&self.query)
    }

    pub fn set_sanitized_query(&mut self, sanitized: String) -> Result<(), DomainError> {
        if self.sanitized_query.is_some() {
            return Err(DomainError::InvariantViolation(
                "sanitized query is produced once per run".to_string(),
            ));
        }
        self.sanitized_query = Some(sanitized);
        Ok(())
    }

    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    pub fn assign_intent(&mut self, intent: Intent) -> Result<(), DomainError> {
        if let Some(current) = self.intent {
            return Err(DomainError::InvariantViolation(format!(
                "intent already assigned as {current}, refusing {intent}"
            )));
        }
        self.intent = Some(intent);
        Ok(())
    }

    /// Forces the run to Escalation. The only way an assigned intent changes.
    pub fn escalate(&mut self, reason: EscalationReason) {
        self.intent = Some(Intent::Escalation);
        if self.escalation_reason.is_none() {
            self.escalation_reason = Some(reason);
        }
    }

    pub fn escalation_reason(&self) -> Option<&EscalationReason> {
        self.escalation_reason.as_ref()
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    pub fn set_answer(&mut self, answer: String) -> Result<(), DomainError> {
        if self.answer.is_some() {
            return Err(DomainError::InvariantViolation(
                "answer already produced for this run".to_string(),
            ));
        }
        self.answer = Some(answer);
        Ok(())
    }

    /// Replaces the answer after validation. Allowed once, and only when an
    /// answer exists.
    pub fn revise_answer(&mut self, answer: String) -> Result<(), DomainError> {
        if self.answer.is_none() {
            return Err(DomainError::InvariantViolation(
                "cannot revise an answer that was never produced".to_string(),
            ));
        }
        if self.answer_revised {
            return Err(DomainError::InvariantViolation(
                "answer may only be revised once".to_string(),
            ));
        }
        self.answer = Some(answer);
        self.answer_revised = true;
        Ok(())
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn record_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn record_transition(&mut self, transition: Transition) {
        self.trace.push(transition);
    }

    pub fn trace(&self) -> &[Transition] {
        &self.trace
    }

    /// The boundary record handed to API/CLI consumers.
    pub fn to_result(&self) -> ConversationResult {
        ConversationResult {
            intent: self.intent.unwrap_or(Intent::Escalation),
            answer: self.answer.clone().unwrap_or_default(),
            evidence: self.evidence.tags().cloned().collect(),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationResult {
    pub intent: Intent,
    pub answer: String,
    pub evidence: Vec<EvidenceTag>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
