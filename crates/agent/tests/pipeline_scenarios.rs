//! End-to-end runs of the assistant pipeline against deterministic stub
//! collaborators: a scripted completion service, a fixed vector index and
//! recording data tools.

use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use nova_agent::llm::{CompletionRequest, LlmClient};
use nova_agent::retriever::{DocumentSearch, EvidenceRetriever, KnowledgeBaseSearch, Passage};
use nova_agent::tools::{DataTool, Tool, ToolPlanner, ToolRegistry};
use nova_agent::{AssistantRuntime, Collaborators, HAND_OFF_MESSAGE};
use nova_core::audit::InMemoryAuditSink;
use nova_core::domain::evidence::{EvidenceFamily, EvidenceTag};
use nova_core::domain::intent::Intent;
use nova_core::domain::state::{ConversationState, EscalationReason};
use nova_core::routing::PipelineStage;
use nova_core::rules::GuardrailRules;
use serde_json::{json, Value};
use tempfile::TempDir;

/// Replies to classification requests (the ones carrying worked examples)
/// with `label`, and to synthesis requests with `answer`.
struct ScriptedLlm {
    label: Option<&'static str>,
    answer: &'static str,
    inputs: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(label: &'static str, answer: &'static str) -> Arc<Self> {
        Arc::new(Self { label: Some(label), answer, inputs: Mutex::new(Vec::new()) })
    }

    fn unreachable_classifier(answer: &'static str) -> Arc<Self> {
        Arc::new(Self { label: None, answer, inputs: Mutex::new(Vec::new()) })
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.lock().expect("inputs lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.inputs.lock().expect("inputs lock").push(request.input.clone());
        if request.examples.is_empty() {
            return Ok(self.answer.to_string());
        }
        match self.label {
            Some(label) => Ok(label.to_string()),
            None => bail!("completion service timed out"),
        }
    }
}

enum StubIndex {
    Hits(Vec<Passage>),
    Down,
}

#[async_trait]
impl DocumentSearch for StubIndex {
    fn source_name(&self) -> &'static str {
        "vector_index"
    }

    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>> {
        match self {
            Self::Hits(passages) => Ok(passages.clone()),
            Self::Down => bail!("connection refused"),
        }
    }
}

struct RecordingTool {
    tool: DataTool,
    reply: Value,
    calls: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &'static str {
        self.tool.as_str()
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        self.calls.lock().expect("calls lock").push(input);
        Ok(self.reply.clone())
    }
}

struct Harness {
    runtime: AssistantRuntime,
    llm: Arc<ScriptedLlm>,
    tool_calls: Arc<Mutex<Vec<Value>>>,
}

impl Harness {
    fn build(llm: Arc<ScriptedLlm>, retriever: EvidenceRetriever) -> Self {
        let tool_calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::default();
        registry.register(RecordingTool {
            tool: DataTool::InvoiceStatus,
            reply: json!({
                "invoice_count": 1,
                "summary": {"total": 99.0, "paid": 99.0, "overdue": 0, "pending": 0},
                "invoices": [{"invoice_id": "INV-2025-10-A001", "period_start": "2025-10-01",
                              "period_end": "2025-10-31", "amount": 99.0, "status": "Paid",
                              "due_on": "2025-11-15"}]
            }),
            calls: tool_calls.clone(),
        });

        let runtime = AssistantRuntime::new(
            &GuardrailRules::builtin(),
            Collaborators {
                llm: llm.clone(),
                retriever,
                tools: Arc::new(registry),
                planner: ToolPlanner::new(NaiveDate::from_ymd_opt(2025, 10, 15).expect("valid date")),
                audit: Arc::new(InMemoryAuditSink::default()),
            },
        )
        .expect("runtime should build");

        Self { runtime, llm, tool_calls }
    }

    fn with_index(llm: Arc<ScriptedLlm>, index: StubIndex) -> Self {
        Self::build(llm, EvidenceRetriever::new(Some(Arc::new(index)), None, 5))
    }

    async fn ask(&self, query: &str, account: Option<&str>) -> ConversationState {
        self.runtime.run(query, account.map(str::to_string), Vec::new()).await
    }
}

fn pricing_index() -> StubIndex {
    StubIndex::Hits(vec![Passage::new(
        "pricing_plans.md",
        "The Pro plan costs $99 per month and includes 50,000 API calls.",
    )])
}

const PRICING_ANSWER: &str = "The Pro plan costs $99 per month.\n\nSources: pricing_plans.md";

fn assert_linear(state: &ConversationState) {
    let trace = state.trace();
    assert_eq!(trace.first().map(|step| step.from), Some(PipelineStage::Start));
    assert_eq!(trace.last().map(|step| step.to), Some(PipelineStage::End));
    for pair in trace.windows(2) {
        assert_eq!(pair[0].to, pair[1].from, "trace must be contiguous: {trace:?}");
    }
    let mut visited = BTreeSet::new();
    for step in trace {
        assert!(visited.insert(format!("{:?}", step.to)), "stage revisited: {trace:?}");
    }
}

#[tokio::test]
async fn faq_query_is_answered_from_the_vector_index() {
    let harness = Harness::with_index(ScriptedLlm::new("FAQ", PRICING_ANSWER), pricing_index());

    let state = harness.ask("What is the pricing?", None).await;
    let result = state.to_result();

    assert_eq!(result.intent, Intent::Faq);
    assert_eq!(result.evidence, vec![EvidenceTag::document("pricing_plans.md")]);
    assert!(result.warnings.is_empty(), "unexpected warnings: {:?}", result.warnings);
    assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);
    assert!(result.answer.starts_with(PRICING_ANSWER));
    assert!(result.answer.ends_with("Evidence:\n- doc:pricing_plans.md"));
    assert_linear(&state);
}

#[tokio::test]
async fn data_lookup_invokes_the_invoice_tool_for_the_account() {
    let harness = Harness::with_index(
        ScriptedLlm::new("DataLookup", "Your October invoice of $99.00 is paid."),
        StubIndex::Hits(Vec::new()),
    );

    let state = harness.ask("Show invoices for A001", Some("A001")).await;
    let result = state.to_result();

    assert_eq!(result.intent, Intent::DataLookup);
    assert_eq!(result.evidence.len(), 1);
    assert_eq!(result.evidence[0].to_string(), "tool:invoice_status:account_id=A001");
    assert!(result.warnings.is_empty(), "unexpected warnings: {:?}", result.warnings);
    assert_eq!(
        harness.tool_calls.lock().expect("calls lock").as_slice(),
        &[json!({"account_id": "A001"})]
    );
    assert_linear(&state);
}

#[tokio::test]
async fn sensitive_topic_forces_escalation_over_the_classifier() {
    let harness = Harness::with_index(ScriptedLlm::new("FAQ", PRICING_ANSWER), pricing_index());

    let state = harness.ask("I'm filing a lawsuit", None).await;
    let result = state.to_result();

    assert_eq!(result.intent, Intent::Escalation);
    assert!(result.evidence.contains(&EvidenceTag::sensitive_topic("legal")));
    assert_eq!(result.answer, HAND_OFF_MESSAGE);
    assert!(!result.answer.contains("lawsuit"));
    assert!(harness.llm.inputs().is_empty(), "classifier should not be consulted");
    assert!(matches!(
        state.escalation_reason(),
        Some(EscalationReason::SensitiveTopic { categories }) if categories == &["legal".to_string()]
    ));
    let stages = state.trace().iter().map(|step| step.to).collect::<Vec<_>>();
    assert!(!stages.contains(&PipelineStage::Synthesize));
    assert_linear(&state);
}

#[tokio::test]
async fn pii_is_redacted_before_any_collaborator_sees_it() {
    let harness = Harness::with_index(ScriptedLlm::new("FAQ", PRICING_ANSWER), pricing_index());

    let state = harness.ask("My email is a@b.com, what's my plan?", None).await;

    assert!(state.evidence.tags().any(|tag| tag == &EvidenceTag::pii_redacted("email")));
    let sanitized = state.sanitized_query().expect("sanitized query");
    assert!(!sanitized.contains("a@b.com"));
    assert!(sanitized.contains("[REDACTED_EMAIL]"));
    assert_eq!(state.original_query(), "My email is a@b.com, what's my plan?");
    for input in harness.llm.inputs() {
        assert!(!input.contains("a@b.com"), "leaked into completion input: {input}");
    }
}

#[tokio::test]
async fn empty_query_completes_as_escalation_with_an_answer() {
    let harness = Harness::with_index(ScriptedLlm::new("FAQ", PRICING_ANSWER), pricing_index());

    let state = harness.ask("", None).await;
    let result = state.to_result();

    assert_eq!(result.intent, Intent::Escalation);
    assert!(!result.answer.is_empty());
    assert_eq!(state.escalation_reason(), Some(&EscalationReason::EmptyQuery));
    assert!(result.errors.contains(&"Query is empty".to_string()));
    assert!(harness.llm.inputs().is_empty());
    assert_linear(&state);
}

#[tokio::test]
async fn malformed_account_id_is_rejected_before_the_tool_runs() {
    let harness = Harness::with_index(
        ScriptedLlm::new("DataLookup", "I could not find invoice data for that account."),
        StubIndex::Hits(Vec::new()),
    );

    let state = harness.ask("Show invoices for XYZ123", Some("XYZ123")).await;
    let result = state.to_result();

    assert_eq!(result.intent, Intent::DataLookup);
    assert!(!state.evidence.has_family(EvidenceFamily::ToolResult));
    assert!(harness.tool_calls.lock().expect("calls lock").is_empty());
    assert!(result.errors.iter().any(|error| error.contains("Invalid account_id format: XYZ123")));
    assert!(result
        .warnings
        .contains(&"DataLookup answer is not grounded in any tool evidence".to_string()));
    assert!(result.answer.contains("may be incomplete"));
    assert_linear(&state);
}

#[tokio::test]
async fn unavailable_index_falls_back_to_keyword_search() {
    let kb = TempDir::new().expect("tempdir");
    fs::write(
        kb.path().join("api_keys.md"),
        "# API keys\n\nRotate an API key from Settings, then API Keys.\n\nKeys never expire.",
    )
    .expect("write kb file");
    let retriever = EvidenceRetriever::new(
        Some(Arc::new(StubIndex::Down)),
        Some(Arc::new(KnowledgeBaseSearch::new(kb.path()))),
        5,
    );
    let harness = Harness::build(
        ScriptedLlm::new("FAQ", "Rotate it under Settings.\n\nSources: api_keys.md"),
        retriever,
    );

    let state = harness.ask("How do I rotate an API key?", None).await;
    let result = state.to_result();

    assert_eq!(result.intent, Intent::Faq);
    assert_eq!(result.evidence, vec![EvidenceTag::document("api_keys.md")]);
    assert_eq!(result.errors, vec!["Retrieval error: vector_index: connection refused".to_string()]);
    assert!(result.warnings.is_empty(), "unexpected warnings: {:?}", result.warnings);
}

#[tokio::test]
async fn classifier_outage_fails_open_to_escalation() {
    let harness = Harness::with_index(ScriptedLlm::unreachable_classifier("unused"), pricing_index());

    let state = harness.ask("What is the pricing?", None).await;
    let result = state.to_result();

    assert_eq!(result.intent, Intent::Escalation);
    assert_eq!(state.escalation_reason(), Some(&EscalationReason::ClassifierFallback));
    assert_eq!(result.answer, HAND_OFF_MESSAGE);
    assert!(result.errors.iter().any(|error| error.contains("completion service timed out")));
}

#[tokio::test]
async fn repeated_runs_yield_identical_intent_evidence_and_warnings() {
    let harness = Harness::with_index(
        ScriptedLlm::new("FAQ", "Pro is always $149.\n\nSources: pricing_plans.md"),
        pricing_index(),
    );

    let first = harness.ask("My email is a@b.com, what is the pricing?", None).await.to_result();
    let second = harness.ask("My email is a@b.com, what is the pricing?", None).await.to_result();

    assert!(!first.warnings.is_empty());
    assert_eq!(first.intent, second.intent);
    assert_eq!(first.evidence, second.evidence);
    assert_eq!(first.warnings, second.warnings);
    assert_eq!(first.answer, second.answer);
}
