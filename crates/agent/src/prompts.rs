use anyhow::{Context as _, Result};
use tera::{Context, Tera};

use crate::llm::FewShotExample;

const CLASSIFIER_INSTRUCTIONS: &str = "classifier_instructions.txt";
const CLASSIFIER_INPUT: &str = "classifier_input.txt";
const SYNTHESIS_INSTRUCTIONS: &str = "synthesis_instructions.txt";
const SYNTHESIS_INPUT: &str = "synthesis_input.txt";

const TEMPLATES: [(&str, &str); 4] = [
    (
        CLASSIFIER_INSTRUCTIONS,
        "You route customer questions for the NovaCRM support assistant.\n\
Reply with exactly one label and nothing else:\n\
- FAQ: product, pricing, feature or how-to questions answerable from documentation.\n\
- DataLookup: questions about a specific account's plan, invoices, tickets or usage.\n\
- Escalation: complaints, disputes, legal or security matters, or anything needing a human.",
    ),
    (
        CLASSIFIER_INPUT,
        "{% if history %}Earlier in this conversation:\n\
{% for turn in history %}- {{ turn }}\n{% endfor %}\n{% endif %}Query: {{ query }}",
    ),
    (
        SYNTHESIS_INSTRUCTIONS,
        "You are the NovaCRM support assistant. Answer using only the evidence supplied in the \
context. Never invent prices, dates or account figures.\n\
Structure the answer as:\n\
1. A direct answer in one or two sentences.\n\
2. Supporting details as short bullet points.\n\
3. A line starting with `{{ sources_marker }}` listing the documents or tools used.\n\
4. Caveats, if the context is incomplete.\n\
{% if insufficient %}The context does not contain the requested data. Say so plainly and suggest \
checking the account identifier or contacting support.\n{% endif %}",
    ),
    (
        SYNTHESIS_INPUT,
        "Intent: {{ intent }}\nQuestion: {{ query }}\n\nContext:\n{{ context }}",
    ),
];

/// Prompt wording rendered through Tera. Wording is not part of any
/// validation contract; only the sources marker is shared with the validator.
pub struct PromptLibrary {
    tera: Tera,
}

impl PromptLibrary {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.to_vec()).context("failed to register prompt templates")?;
        Ok(Self { tera })
    }

    pub fn classifier_instructions(&self) -> Result<String> {
        self.render(CLASSIFIER_INSTRUCTIONS, &Context::new())
    }

    pub fn classifier_examples(&self) -> Vec<FewShotExample> {
        [
            ("What is the price of the Pro plan?", "FAQ"),
            ("How do I configure SSO?", "FAQ"),
            ("Show invoices for A001", "DataLookup"),
            ("What was our API usage last month?", "DataLookup"),
            ("I was charged twice and want my money back", "Escalation"),
            ("I need to speak to a manager", "Escalation"),
        ]
        .into_iter()
        .map(|(input, output)| FewShotExample::new(input, output))
        .collect()
    }

    pub fn classifier_input(&self, query: &str, history: &[String]) -> Result<String> {
        let mut context = Context::new();
        context.insert("query", query);
        context.insert("history", history);
        self.render(CLASSIFIER_INPUT, &context)
    }

    pub fn synthesis_instructions(&self, sources_marker: &str, insufficient: bool) -> Result<String> {
        let mut context = Context::new();
        context.insert("sources_marker", sources_marker);
        context.insert("insufficient", &insufficient);
        self.render(SYNTHESIS_INSTRUCTIONS, &context)
    }

    pub fn synthesis_input(&self, intent: &str, query: &str, evidence: &str) -> Result<String> {
        let mut context = Context::new();
        context.insert("intent", intent);
        context.insert("query", query);
        context.insert("context", evidence);
        self.render(SYNTHESIS_INPUT, &context)
    }

    fn render(&self, name: &str, context: &Context) -> Result<String> {
        self.tera.render(name, context).with_context(|| format!("failed to render prompt `{name}`"))
    }
}
