use std::sync::Arc;

use anyhow::Result;
use nova_core::domain::evidence::EvidenceFamily;
use nova_core::domain::intent::Intent;
use nova_core::domain::state::ConversationState;

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::PromptLibrary;

const NO_EVIDENCE_CONTEXT: &str = "No information is available for this question.";

/// Turns the collected evidence into the answer text. Grounding is not
/// enforced here; the validator checks whatever the service produced.
pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    sources_marker: String,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptLibrary>, sources_marker: impl Into<String>) -> Self {
        Self { llm, prompts, sources_marker: sources_marker.into() }
    }

    /// Returns the answer with its `Evidence:` appendix, or `None` after
    /// recording the failure in `errors`.
    pub async fn synthesize(&self, state: &mut ConversationState) -> Option<String> {
        let request = match self.request(state) {
            Ok(request) => request,
            Err(error) => {
                state.record_error(format!("Synthesis error: {error:#}"));
                return None;
            }
        };

        match self.llm.complete(&request).await {
            Ok(text) if !text.trim().is_empty() => Some(with_appendix(text.trim(), state)),
            Ok(_) => {
                state.record_error("Synthesis error: completion service returned an empty answer");
                None
            }
            Err(error) => {
                state.record_error(format!("Synthesis error: {error:#}"));
                None
            }
        }
    }

    fn request(&self, state: &ConversationState) -> Result<CompletionRequest> {
        let intent = state.intent().unwrap_or(Intent::Escalation);
        let context = evidence_context(state);
        let insufficient = context.is_none();
        let instructions = self.prompts.synthesis_instructions(&self.sources_marker, insufficient)?;
        let input = self.prompts.synthesis_input(
            intent.label(),
            state.effective_query(),
            context.as_deref().unwrap_or(NO_EVIDENCE_CONTEXT),
        )?;
        Ok(CompletionRequest::new(instructions, input))
    }
}

/// Passages and tool summaries, each headed by its tag. Safety tags carry no
/// content and never reach the completion service.
fn evidence_context(state: &ConversationState) -> Option<String> {
    let sections = state
        .evidence
        .entries()
        .iter()
        .filter(|entry| {
            matches!(entry.tag.family(), EvidenceFamily::Document | EvidenceFamily::ToolResult)
        })
        .filter_map(|entry| entry.content.as_deref().map(|content| format!("[{}]\n{content}", entry.tag)))
        .collect::<Vec<_>>();
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

fn with_appendix(answer: &str, state: &ConversationState) -> String {
    let tags = state.evidence.tag_strings();
    if tags.is_empty() {
        return answer.to_string();
    }
    let listed = tags.iter().map(|tag| format!("- {tag}")).collect::<Vec<_>>().join("\n");
    format!("{answer}\n\nEvidence:\n{listed}")
}
