use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::intent::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Start,
    Safety,
    Route,
    Retrieve,
    Tools,
    Escalate,
    Synthesize,
    Validate,
    End,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageEvent {
    RunStarted,
    SafetyChecked { force_escalate: bool },
    Classified { intent: Intent, force_escalate: bool },
    EvidenceCollected,
    HandOffIssued,
    AnswerSynthesized,
    AnswerValidated,
    /// An invariant broke mid-run; production runs degrade to a hand-off.
    Fault,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: PipelineStage,
    pub to: PipelineStage,
    pub event: StageEvent,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("invalid transition from {stage:?} using event {event:?}")]
    InvalidTransition { stage: PipelineStage, event: StageEvent },
}

/// Stage reached out of `Route`. The safety override wins over any label.
pub fn route_for(intent: Intent, force_escalate: bool) -> PipelineStage {
    if force_escalate {
        return PipelineStage::Escalate;
    }
    match intent {
        Intent::Faq => PipelineStage::Retrieve,
        Intent::DataLookup => PipelineStage::Tools,
        Intent::Escalation => PipelineStage::Escalate,
    }
}

/// `Start → Safety → Route → {Retrieve | Tools | Escalate} → Synthesize →
/// Validate → End`, with `Escalate → End` bypassing synthesis.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable;

impl RoutingTable {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_stage(&self) -> PipelineStage {
        PipelineStage::Start
    }

    pub fn apply(
        &self,
        current: PipelineStage,
        event: &StageEvent,
    ) -> Result<Transition, RoutingError> {
        use PipelineStage::{End, Escalate, Retrieve, Route, Safety, Start, Synthesize, Tools, Validate};
        use StageEvent::{
            AnswerSynthesized, AnswerValidated, Classified, EvidenceCollected, Fault,
            HandOffIssued, RunStarted, SafetyChecked,
        };

        let to = match (current, event) {
            (Start, RunStarted) => Safety,
            (Safety, SafetyChecked { .. }) => Route,
            (Route, Classified { intent, force_escalate }) => route_for(*intent, *force_escalate),
            (Retrieve, EvidenceCollected) | (Tools, EvidenceCollected) => Synthesize,
            (Escalate, HandOffIssued) => End,
            (Synthesize, AnswerSynthesized) => Validate,
            (Validate, AnswerValidated) => End,
            (Escalate, Fault) => End,
            (End, _) => {
                return Err(RoutingError::InvalidTransition { stage: current, event: event.clone() })
            }
            (_, Fault) => Escalate,
            _ => {
                return Err(RoutingError::InvalidTransition { stage: current, event: event.clone() })
            }
        };

        Ok(Transition { from: current, to, event: event.clone() })
    }

    pub fn apply_with_audit<S>(
        &self,
        current: PipelineStage,
        event: &StageEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Transition, RoutingError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(transition) => {
                sink.emit(
                    AuditEvent::new(
                        audit.correlation_id.clone(),
                        "routing.transition_applied",
                        AuditCategory::Routing,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", transition.from))
                    .with_metadata("to", format!("{:?}", transition.to))
                    .with_metadata("event", event_label(&transition.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.correlation_id.clone(),
                        "routing.transition_rejected",
                        AuditCategory::Routing,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn event_label(event: &StageEvent) -> String {
    match event {
        StageEvent::Classified { intent, force_escalate } => {
            format!("Classified({intent}, force_escalate={force_escalate})")
        }
        StageEvent::SafetyChecked { force_escalate } => {
            format!("SafetyChecked(force_escalate={force_escalate})")
        }
        other => format!("{other:?}"),
    }
}
