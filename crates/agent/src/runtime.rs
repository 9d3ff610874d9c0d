//! Drives one query through the routing table:
//! `Start → Safety → Route → {Retrieve | Tools | Escalate} → Synthesize →
//! Validate → End`.
//!
//! The runtime is the only place that moves between stages or changes the
//! intent after classification. Components report back; the runtime decides.
//! No collaborator failure escapes [`AssistantRuntime::run`]: every error is
//! recorded on the state and the run continues with what it has.

use std::sync::Arc;

use anyhow::{Context, Result};
use nova_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use nova_core::config::AppConfig;
use nova_core::domain::intent::Intent;
use nova_core::domain::state::{ConversationState, EscalationReason};
use nova_core::routing::{PipelineStage, RoutingTable, StageEvent};
use nova_core::rules::GuardrailRules;

use crate::classifier::{Classification, IntentClassifier};
use crate::guardrails::SafetyGuardrail;
use crate::llm::{HttpLlmClient, LlmClient};
use crate::prompts::PromptLibrary;
use crate::retriever::EvidenceRetriever;
use crate::synthesizer::AnswerSynthesizer;
use crate::tools::{ParamValidator, ToolInvoker, ToolPlanner, ToolRegistry};
use crate::validator::OutputValidator;

const AUDIT_ACTOR: &str = "assistant-runtime";

pub const HAND_OFF_MESSAGE: &str = "This request needs attention from our support team, so I'm \
handing it over to a specialist.

How to reach us:
- Email: support@novacrm.com
- Phone: 1-800-NOVA-CRM
- Submit a ticket through your account portal

Please include your account ID or company name, a description of the request, and any relevant \
dates or transaction IDs. High-priority requests receive a response within 2 hours, standard \
requests within 24 hours.";

/// External collaborators the runtime is assembled from.
pub struct Collaborators {
    pub llm: Arc<dyn LlmClient>,
    pub retriever: EvidenceRetriever,
    pub tools: Arc<ToolRegistry>,
    pub planner: ToolPlanner,
    pub audit: Arc<dyn AuditSink>,
}

pub struct AssistantRuntime {
    guardrail: SafetyGuardrail,
    classifier: IntentClassifier,
    retriever: EvidenceRetriever,
    invoker: ToolInvoker,
    synthesizer: AnswerSynthesizer,
    validator: OutputValidator,
    routing: RoutingTable,
    audit: Arc<dyn AuditSink>,
}

/// Findings handed from Safety to Route within one run.
#[derive(Default)]
struct SafetySignal {
    force_escalate: bool,
    topics: Vec<String>,
}

impl AssistantRuntime {
    pub fn new(rules: &GuardrailRules, collaborators: Collaborators) -> Result<Self> {
        let prompts = Arc::new(PromptLibrary::new()?);
        let Collaborators { llm, retriever, tools, planner, audit } = collaborators;
        Ok(Self {
            guardrail: SafetyGuardrail::new(rules).context("guardrail rules are invalid")?,
            classifier: IntentClassifier::new(llm.clone(), prompts.clone()),
            retriever,
            invoker: ToolInvoker::new(
                tools,
                ParamValidator::new(rules).context("tool parameter rules are invalid")?,
                planner,
            ),
            synthesizer: AnswerSynthesizer::new(llm, prompts, rules.sources_marker.clone()),
            validator: OutputValidator::new(rules).context("validator rules are invalid")?,
            routing: RoutingTable::new(),
            audit,
        })
    }

    /// Builds the HTTP/filesystem adapters named in the config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let rules = config.load_rules().context("failed to load guardrail rules")?;
        let collaborators = Collaborators {
            llm: Arc::new(HttpLlmClient::from_config(config)?),
            retriever: EvidenceRetriever::from_config(config)?,
            tools: Arc::new(ToolRegistry::from_config(config)?),
            planner: ToolPlanner::today(),
            audit: Arc::new(TracingAuditSink),
        };
        Self::new(&rules, collaborators)
    }

    pub fn tool_registry(&self) -> &ToolRegistry {
        self.invoker.registry()
    }

    pub async fn run(
        &self,
        query: &str,
        account_context: Option<String>,
        history: Vec<String>,
    ) -> ConversationState {
        self.run_state(ConversationState::new(query, account_context).with_history(history)).await
    }

    pub async fn run_state(&self, mut state: ConversationState) -> ConversationState {
        let audit = AuditContext::new(state.correlation_id(), AUDIT_ACTOR);
        let mut signal = SafetySignal::default();
        let mut stage = self.routing.initial_stage();
        let mut event = StageEvent::RunStarted;

        tracing::info!(
            event_name = "pipeline.run.started",
            correlation_id = %state.correlation_id(),
            has_account_context = state.account_context.is_some(),
            history_turns = state.history.len(),
            "pipeline run started"
        );

        loop {
            let transition =
                match self.routing.apply_with_audit(stage, &event, self.audit.as_ref(), &audit) {
                    Ok(transition) => transition,
                    Err(error) => {
                        state.record_error(format!("routing error: {error}"));
                        match self.routing.apply_with_audit(
                            stage,
                            &StageEvent::Fault,
                            self.audit.as_ref(),
                            &audit,
                        ) {
                            Ok(transition) => transition,
                            Err(_) => break,
                        }
                    }
                };

            if transition.event == StageEvent::Fault {
                state.escalate(EscalationReason::RoutingFault);
            }
            stage = transition.to;
            state.record_transition(transition);
            if stage.is_terminal() {
                break;
            }
            event = self.execute(stage, &mut state, &mut signal).await;
        }

        tracing::info!(
            event_name = "pipeline.run.completed",
            correlation_id = %state.correlation_id(),
            intent = %state.intent().unwrap_or(Intent::Escalation),
            evidence = state.evidence.len(),
            errors = state.errors.len(),
            warnings = state.warnings.len(),
            "pipeline run completed"
        );
        state
    }

    async fn execute(
        &self,
        stage: PipelineStage,
        state: &mut ConversationState,
        signal: &mut SafetySignal,
    ) -> StageEvent {
        match stage {
            PipelineStage::Safety => self.safety(state, signal),
            PipelineStage::Route => self.route(state, signal).await,
            PipelineStage::Retrieve => {
                let report = self.retriever.collect(state).await;
                tracing::info!(
                    event_name = "pipeline.retrieve.completed",
                    correlation_id = %state.correlation_id(),
                    passages = report.passages.len(),
                    source = report.source.unwrap_or("none"),
                    "retrieval completed"
                );
                StageEvent::EvidenceCollected
            }
            PipelineStage::Tools => {
                let outcomes = self.invoker.collect(state).await;
                tracing::info!(
                    event_name = "pipeline.tools.completed",
                    correlation_id = %state.correlation_id(),
                    planned = outcomes.len(),
                    succeeded = outcomes.iter().filter(|outcome| outcome.succeeded()).count(),
                    "tool invocation completed"
                );
                StageEvent::EvidenceCollected
            }
            PipelineStage::Escalate => self.escalate(state),
            PipelineStage::Synthesize => {
                if let Some(answer) = self.synthesizer.synthesize(state).await {
                    if let Err(error) = state.set_answer(answer) {
                        state.record_error(error.to_string());
                        return StageEvent::Fault;
                    }
                }
                StageEvent::AnswerSynthesized
            }
            PipelineStage::Validate => {
                let report = self.validator.review(state);
                self.audit.emit(
                    AuditEvent::new(
                        state.correlation_id(),
                        "validation.answer_reviewed",
                        AuditCategory::Validation,
                        AUDIT_ACTOR,
                        if report.grounded { AuditOutcome::Success } else { AuditOutcome::Rejected },
                    )
                    .with_metadata("grounded", report.grounded.to_string())
                    .with_metadata("intent_match", report.intent_match.to_string())
                    .with_metadata("warnings", report.warnings.len().to_string()),
                );
                if state.answer().is_none() {
                    tracing::warn!(
                        event_name = "pipeline.validate.escalated",
                        correlation_id = %state.correlation_id(),
                        "no answer was synthesized, escalating"
                    );
                    state.escalate(EscalationReason::SynthesisFailed);
                }
                StageEvent::AnswerValidated
            }
            PipelineStage::Start | PipelineStage::End => StageEvent::Fault,
        }
    }

    fn safety(&self, state: &mut ConversationState, signal: &mut SafetySignal) -> StageEvent {
        let outcome = self.guardrail.inspect(state.original_query());

        for tag in outcome.evidence_tags() {
            state.evidence.record(tag);
        }
        for warning in &outcome.injection_warnings {
            state.record_warning(warning.clone());
        }
        if let Err(error) = state.set_sanitized_query(outcome.sanitized.clone()) {
            state.record_error(error.to_string());
            return StageEvent::Fault;
        }

        if !outcome.pii_types.is_empty() {
            tracing::info!(
                event_name = "pipeline.safety.pii_redacted",
                correlation_id = %state.correlation_id(),
                pii_types = %outcome.pii_types.join(","),
                "redacted personal data from query"
            );
        }
        if outcome.force_escalate {
            tracing::warn!(
                event_name = "pipeline.safety.sensitive_topic",
                correlation_id = %state.correlation_id(),
                topics = %outcome.topics.join(","),
                "sensitive topic detected, forcing escalation"
            );
        }
        if !outcome.pii_types.is_empty() || outcome.force_escalate {
            self.audit.emit(
                AuditEvent::new(
                    state.correlation_id(),
                    "safety.findings_recorded",
                    AuditCategory::Safety,
                    AUDIT_ACTOR,
                    AuditOutcome::Success,
                )
                .with_metadata("pii_types", outcome.pii_types.join(","))
                .with_metadata("topics", outcome.topics.join(","))
                .with_metadata("force_escalate", outcome.force_escalate.to_string()),
            );
        }

        signal.force_escalate = outcome.force_escalate;
        signal.topics = outcome.topics;
        StageEvent::SafetyChecked { force_escalate: signal.force_escalate }
    }

    async fn route(&self, state: &mut ConversationState, signal: &SafetySignal) -> StageEvent {
        if signal.force_escalate {
            state.escalate(EscalationReason::SensitiveTopic { categories: signal.topics.clone() });
            return self.classified(state, Intent::Escalation, true);
        }

        if state.effective_query().trim().is_empty() {
            state.record_error("Query is empty");
            state.escalate(EscalationReason::EmptyQuery);
            return self.classified(state, Intent::Escalation, false);
        }

        let classification = self.classifier.classify(state.effective_query(), &state.history).await;
        match classification {
            Classification::Labelled(Intent::Escalation) => {
                state.escalate(EscalationReason::Classified);
            }
            Classification::Labelled(intent) => {
                if let Err(error) = state.assign_intent(intent) {
                    state.record_error(error.to_string());
                    return StageEvent::Fault;
                }
            }
            Classification::Unparseable { raw } => {
                state.record_error(format!("Router error: unrecognised intent label `{raw}`"));
                state.escalate(EscalationReason::ClassifierFallback);
            }
            Classification::Failed { error } => {
                state.record_error(format!("Router error: {error}"));
                state.escalate(EscalationReason::ClassifierFallback);
            }
        }

        let intent = state.intent().unwrap_or(Intent::Escalation);
        self.classified(state, intent, false)
    }

    fn classified(&self, state: &ConversationState, intent: Intent, force_escalate: bool) -> StageEvent {
        tracing::info!(
            event_name = "pipeline.route.classified",
            correlation_id = %state.correlation_id(),
            intent = %intent,
            force_escalate,
            "query classified"
        );
        StageEvent::Classified { intent, force_escalate }
    }

    fn escalate(&self, state: &mut ConversationState) -> StageEvent {
        if state.escalation_reason().is_none() {
            state.escalate(EscalationReason::Classified);
        }
        let issued = match state.answer() {
            None => state.set_answer(HAND_OFF_MESSAGE.to_string()),
            Some(_) => state.revise_answer(HAND_OFF_MESSAGE.to_string()),
        };
        if let Err(error) = issued {
            state.record_error(error.to_string());
        }

        let reason = state.escalation_reason().map(ToString::to_string).unwrap_or_default();
        tracing::info!(
            event_name = "pipeline.escalate.hand_off",
            correlation_id = %state.correlation_id(),
            reason = %reason,
            "handed off to human support"
        );
        self.audit.emit(
            AuditEvent::new(
                state.correlation_id(),
                "escalation.hand_off_issued",
                AuditCategory::Routing,
                AUDIT_ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("reason", reason),
        );
        StageEvent::HandOffIssued
    }
}
