use std::sync::Arc;

use anyhow::Result;
use nova_core::domain::intent::Intent;

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::PromptLibrary;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Labelled(Intent),
    /// The service answered but no allowed label could be parsed.
    Unparseable { raw: String },
    /// The service call itself failed.
    Failed { error: String },
}

impl Classification {
    /// Intent to route on. Anything short of a clean label fails open to
    /// Escalation.
    pub fn intent(&self) -> Intent {
        match self {
            Self::Labelled(intent) => *intent,
            Self::Unparseable { .. } | Self::Failed { .. } => Intent::Escalation,
        }
    }

    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::Labelled(_))
    }
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptLibrary>) -> Self {
        Self { llm, prompts }
    }

    pub async fn classify(&self, query: &str, history: &[String]) -> Classification {
        let request = match self.request(query, history) {
            Ok(request) => request,
            Err(error) => return Classification::Failed { error: format!("{error:#}") },
        };

        match self.llm.complete(&request).await {
            Ok(raw) => match Intent::parse_label(&raw) {
                Some(intent) => Classification::Labelled(intent),
                None => Classification::Unparseable { raw: raw.chars().take(80).collect() },
            },
            Err(error) => Classification::Failed { error: format!("{error:#}") },
        }
    }

    fn request(&self, query: &str, history: &[String]) -> Result<CompletionRequest> {
        Ok(CompletionRequest::new(
            self.prompts.classifier_instructions()?,
            self.prompts.classifier_input(query, history)?,
        )
        .with_examples(self.prompts.classifier_examples()))
    }
}
