use std::fs;
use std::path::Path;

use nova_agent::guardrails::SafetyGuardrail;
use nova_agent::validator::OutputValidator;
use nova_core::config::{AppConfig, LoadOptions};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 5] =
    ["guardrail_rules", "llm_provider", "knowledge_base", "vector_index", "tools_service"];

/// Local readiness only: nothing here opens a network connection.
pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_guardrail_rules(&config));
            checks.push(check_llm_provider(&config));
            checks.push(check_knowledge_base(&config.retrieval.knowledge_base_dir));
            checks.push(check_vector_index(&config));
            checks.push(check_tools_service(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(DEPENDENT_CHECKS.iter().map(|&name| {
                DoctorCheck::skipped(name, "skipped because configuration did not load")
            }));
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_fail { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_fail {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_guardrail_rules(config: &AppConfig) -> DoctorCheck {
    let rules = match config.load_rules() {
        Ok(rules) => rules,
        Err(error) => return DoctorCheck::fail("guardrail_rules", error.to_string()),
    };
    if let Err(error) = SafetyGuardrail::new(&rules) {
        return DoctorCheck::fail("guardrail_rules", format!("safety patterns: {error}"));
    }
    if let Err(error) = OutputValidator::new(&rules) {
        return DoctorCheck::fail("guardrail_rules", format!("validator terms: {error}"));
    }

    let origin = config
        .guardrails
        .rules_path
        .as_ref()
        .map(|path| format!("`{}`", path.display()))
        .unwrap_or_else(|| "builtin defaults".to_string());
    DoctorCheck::pass(
        "guardrail_rules",
        format!(
            "{} PII patterns, {} sensitive topics compiled from {origin}",
            rules.pii.len(),
            rules.sensitive_topics.len()
        ),
    )
}

fn check_llm_provider(config: &AppConfig) -> DoctorCheck {
    let key = if config.llm.api_key.is_some() { "api key set" } else { "no api key" };
    DoctorCheck::pass(
        "llm_provider",
        format!(
            "{} model `{}` at `{}` ({key})",
            config.llm.provider.as_str(),
            config.llm.model,
            config.llm_base_url()
        ),
    )
}

fn check_knowledge_base(dir: &Path) -> DoctorCheck {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            return DoctorCheck::fail(
                "knowledge_base",
                format!("cannot read `{}`: {error}", dir.display()),
            )
        }
    };

    let documents = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "md"))
        .count();
    if documents == 0 {
        return DoctorCheck::fail(
            "knowledge_base",
            format!("no markdown documents in `{}`", dir.display()),
        );
    }

    DoctorCheck::pass("knowledge_base", format!("{documents} documents in `{}`", dir.display()))
}

fn check_vector_index(config: &AppConfig) -> DoctorCheck {
    match config.retrieval.vector_index_url.as_deref() {
        Some(url) => DoctorCheck::pass(
            "vector_index",
            format!("configured at `{url}` (top_k {})", config.retrieval.top_k),
        ),
        None => DoctorCheck::skipped("vector_index", "not configured; keyword search only"),
    }
}

fn check_tools_service(config: &AppConfig) -> DoctorCheck {
    match config.tools.base_url.as_deref() {
        Some(url) => DoctorCheck::pass("tools_service", format!("configured at `{url}`")),
        None => DoctorCheck::skipped(
            "tools_service",
            "not configured; data lookups will record tool failures",
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{check_knowledge_base, CheckStatus};

    #[test]
    fn knowledge_base_counts_markdown_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("pricing_plans.md"), "# Pricing").expect("write doc");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write note");

        let check = check_knowledge_base(dir.path());
        assert_eq!(check.status, CheckStatus::Pass);
        assert!(check.details.starts_with("1 documents"), "{}", check.details);
    }

    #[test]
    fn missing_knowledge_base_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let check = check_knowledge_base(&dir.path().join("absent"));
        assert_eq!(check.status, CheckStatus::Fail);
    }
}
