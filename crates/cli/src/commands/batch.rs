use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use nova_core::config::LoadOptions;
use nova_core::domain::evidence::EvidenceFamily;
use nova_core::domain::intent::Intent;
use nova_core::domain::state::ConversationResult;
use serde::{Deserialize, Serialize};

use crate::commands::{async_runtime, load_runtime, CommandResult, EXIT_INPUT};

/// One line of a batch file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BatchItem {
    pub query: String,
    #[serde(default)]
    pub account_context: Option<String>,
    #[serde(default)]
    pub history: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub query: String,
    pub correlation_id: String,
    #[serde(flatten)]
    pub result: ConversationResult,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Tasks that panicked or were cancelled; they have no result entry.
    pub failed: usize,
    pub intents: BTreeMap<String, usize>,
    /// FAQ and DataLookup answers considered for grounding.
    pub grounding_checked: usize,
    pub grounded: usize,
    pub grounded_ratio: f64,
    pub average_evidence: f64,
    pub with_errors: usize,
}

#[derive(Debug, Serialize)]
struct BatchReport<'a> {
    summary: &'a BatchSummary,
    results: &'a [BatchEntry],
}

pub fn run(options: LoadOptions, file: &Path, json: bool) -> CommandResult {
    let raw = match fs::read_to_string(file) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "batch",
                "input",
                format!("could not read `{}`: {error}", file.display()),
                EXIT_INPUT,
            )
        }
    };
    let items = match parse_batch(&raw) {
        Ok(items) => items,
        Err(message) => return CommandResult::failure("batch", "input", message, EXIT_INPUT),
    };

    let (_, runtime) = match load_runtime("batch", options) {
        Ok(loaded) => loaded,
        Err(failure) => return failure,
    };
    let executor = match async_runtime("batch", true) {
        Ok(executor) => executor,
        Err(failure) => return failure,
    };

    let runtime = Arc::new(runtime);
    let (entries, failed) = executor.block_on(async move {
        let handles = items
            .into_iter()
            .map(|item| {
                let runtime = Arc::clone(&runtime);
                tokio::spawn(async move {
                    let state = runtime.run(&item.query, item.account_context, item.history).await;
                    BatchEntry {
                        query: item.query,
                        correlation_id: state.correlation_id().to_string(),
                        result: state.to_result(),
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut entries = Vec::with_capacity(handles.len());
        let mut failed = 0;
        for handle in handles {
            match handle.await {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    failed += 1;
                    tracing::error!(
                        event_name = "cli.batch.task_failed",
                        error = %error,
                        "batch query task did not complete"
                    );
                }
            }
        }
        (entries, failed)
    });

    let summary = summarize(&entries, failed);
    let output = if json {
        match serde_json::to_string_pretty(&BatchReport { summary: &summary, results: &entries }) {
            Ok(output) => output,
            Err(error) => {
                return CommandResult::failure("batch", "serialization", error.to_string(), 1)
            }
        }
    } else {
        render_summary(&summary, &entries)
    };

    CommandResult { exit_code: 0, output }
}

/// Parses JSONL, skipping blank lines. Errors name the offending line.
pub fn parse_batch(raw: &str) -> Result<Vec<BatchItem>, String> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<BatchItem>(line)
                .map_err(|error| format!("line {}: {error}", index + 1))
        })
        .collect()
}

/// FAQ counts as grounded with document evidence and a sources marker;
/// DataLookup with tool evidence. Escalations are not counted. `failed`
/// tasks count toward the total but contribute no result.
pub fn summarize(entries: &[BatchEntry], failed: usize) -> BatchSummary {
    let mut summary =
        BatchSummary { total: entries.len() + failed, failed, ..BatchSummary::default() };
    let mut evidence_total = 0usize;

    for entry in entries {
        let result = &entry.result;
        *summary.intents.entry(result.intent.label().to_string()).or_default() += 1;
        evidence_total += result.evidence.len();
        if !result.errors.is_empty() {
            summary.with_errors += 1;
        }

        let has = |family: EvidenceFamily| result.evidence.iter().any(|tag| tag.family() == family);
        let grounded = match result.intent {
            Intent::Faq => {
                has(EvidenceFamily::Document) && result.answer.to_lowercase().contains("sources:")
            }
            Intent::DataLookup => has(EvidenceFamily::ToolResult),
            Intent::Escalation => continue,
        };
        summary.grounding_checked += 1;
        if grounded {
            summary.grounded += 1;
        }
    }

    if summary.grounding_checked > 0 {
        summary.grounded_ratio = summary.grounded as f64 / summary.grounding_checked as f64;
    }
    if !entries.is_empty() {
        summary.average_evidence = evidence_total as f64 / entries.len() as f64;
    }
    summary
}

fn render_summary(summary: &BatchSummary, entries: &[BatchEntry]) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 8);
    for (index, entry) in entries.iter().enumerate() {
        lines.push(format!(
            "{:>3}. [{}] {} (evidence: {}, errors: {}, warnings: {})",
            index + 1,
            entry.result.intent,
            entry.query,
            entry.result.evidence.len(),
            entry.result.errors.len(),
            entry.result.warnings.len(),
        ));
    }
    lines.push(String::new());
    lines.push(format!("queries: {}", summary.total));
    for (intent, count) in &summary.intents {
        lines.push(format!("- {intent}: {count}"));
    }
    lines.push(format!(
        "grounded: {}/{} ({:.1}%)",
        summary.grounded,
        summary.grounding_checked,
        summary.grounded_ratio * 100.0
    ));
    lines.push(format!("average evidence per query: {:.2}", summary.average_evidence));
    lines.push(format!("queries with errors: {}", summary.with_errors));
    if summary.failed > 0 {
        lines.push(format!("queries that did not complete: {}", summary.failed));
    }
    lines.join("\n")
}
