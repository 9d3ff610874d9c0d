use nova_core::config::LoadOptions;
use nova_core::domain::state::ConversationResult;
use serde::Serialize;

use crate::commands::{async_runtime, load_runtime, CommandResult};

const RULE: &str = "================================================================================";

#[derive(Debug, Serialize)]
pub struct AskOutput<'a> {
    pub query: &'a str,
    pub correlation_id: &'a str,
    #[serde(flatten)]
    pub result: ConversationResult,
}

pub fn run(
    options: LoadOptions,
    query: &str,
    account: Option<String>,
    history: Vec<String>,
    json: bool,
) -> CommandResult {
    let (_, runtime) = match load_runtime("ask", options) {
        Ok(loaded) => loaded,
        Err(failure) => return failure,
    };
    let executor = match async_runtime("ask", false) {
        Ok(executor) => executor,
        Err(failure) => return failure,
    };

    let state = executor.block_on(runtime.run(query, account, history));
    let result = state.to_result();

    let output = if json {
        let payload =
            AskOutput { query, correlation_id: state.correlation_id(), result };
        match serde_json::to_string_pretty(&payload) {
            Ok(output) => output,
            Err(error) => {
                return CommandResult::failure("ask", "serialization", error.to_string(), 1)
            }
        }
    } else {
        render_markdown(&result)
    };

    CommandResult { exit_code: 0, output }
}

pub fn render_markdown(result: &ConversationResult) -> String {
    let mut lines = vec![
        RULE.to_string(),
        "NovaCRM Assistant Response".to_string(),
        format!("Intent: {}", result.intent),
        RULE.to_string(),
        String::new(),
        "## Answer".to_string(),
        String::new(),
    ];
    if result.answer.is_empty() {
        lines.push("No answer generated".to_string());
    } else {
        lines.push(result.answer.clone());
    }

    let mut section = |title: &str, intro: Option<&str>, items: Vec<String>| {
        if items.is_empty() {
            return;
        }
        lines.push(String::new());
        lines.push(format!("## {title}"));
        lines.push(String::new());
        if let Some(intro) = intro {
            lines.push(intro.to_string());
        }
        lines.extend(items.into_iter().map(|item| format!("- {item}")));
    };
    section("Evidence", None, result.evidence.iter().map(ToString::to_string).collect());
    section(
        "Notes",
        Some("The following issues occurred during processing:"),
        result.errors.clone(),
    );
    section("Warnings", None, result.warnings.clone());

    lines.push(RULE.to_string());
    lines.join("\n")
}
