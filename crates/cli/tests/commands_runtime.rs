use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use nova_cli::commands::{ask, batch, config, doctor};
use nova_core::config::LoadOptions;
use serde_json::Value;

#[test]
fn ask_escalates_an_empty_query_without_calling_collaborators() {
    with_env(&[], || {
        let result = ask::run(LoadOptions::default(), "   ", None, Vec::new(), true);
        assert_eq!(result.exit_code, 0, "empty query is handled, not a command failure");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["intent"], "Escalation");
        assert_eq!(payload["errors"][0], "Query is empty");
        assert!(payload["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(payload["answer"].as_str().is_some_and(|answer| answer.contains("support")));
    });
}

#[test]
fn ask_hands_off_sensitive_topics_in_markdown() {
    with_env(&[], || {
        let result = ask::run(
            LoadOptions::default(),
            "We think there was a data breach on our account",
            Some("A001".to_string()),
            Vec::new(),
            false,
        );
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("Intent: Escalation"));
        assert!(result.output.contains("- safety:sensitive_topic_detected:data_breach"));
    });
}

#[test]
fn ask_returns_config_failure_for_unknown_provider() {
    with_env(&[("NOVA_LLM_PROVIDER", "mystery")], || {
        let result = ask::run(LoadOptions::default(), "What is the pricing?", None, Vec::new(), true);
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "ask");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn hosted_provider_without_key_is_a_config_failure() {
    with_env(&[("NOVA_LLM_PROVIDER", "openai")], || {
        let result = ask::run(LoadOptions::default(), "What is the pricing?", None, Vec::new(), true);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("NOVA_LLM_API_KEY"), "{message}");
    });
}

#[test]
fn config_output_attributes_env_sources_and_redacts_keys() {
    with_env(
        &[
            ("NOVA_LLM_PROVIDER", "anthropic"),
            ("NOVA_LLM_API_KEY", "sk-ant-secret-value"),
            ("NOVA_RETRIEVAL_TOP_K", "3"),
        ],
        || {
            let output = config::run(LoadOptions::default());

            assert!(output.contains("- llm.provider = anthropic (source: env (NOVA_LLM_PROVIDER))"));
            assert!(output.contains("- llm.api_key = sk-*** (source: env (NOVA_LLM_API_KEY))"));
            assert!(output.contains("- retrieval.top_k = 3 (source: env (NOVA_RETRIEVAL_TOP_K))"));
            assert!(output.contains("- server.port = 8080 (source: default)"));
            assert!(!output.contains("secret-value"), "api key must never be printed");
        },
    );
}

#[test]
fn config_output_attributes_file_sources() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nova.toml");
        fs::write(&path, "[retrieval]\ntop_k = 4\n").expect("write config");

        let output = config::run(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        let expected = format!("- retrieval.top_k = 4 (source: file ({}))", path.display());
        assert!(output.contains(&expected), "{output}");
        assert!(output.contains("- llm.provider = ollama (source: default)"));
    });
}

#[test]
fn doctor_reports_each_check_as_json() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("pricing_plans.md"), "# Pricing\n\nPro costs $99.").expect("write doc");
        let kb = dir.path().display().to_string();

        with_extra_env(&[("NOVA_RETRIEVAL_KNOWLEDGE_BASE_DIR", &kb)], || {
            let result = doctor::run(LoadOptions::default(), true);
            assert_eq!(result.exit_code, 0, "{}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["overall_status"], "pass");
            let names = payload["checks"]
                .as_array()
                .map(|checks| checks.iter().filter_map(|check| check["name"].as_str()).collect::<Vec<_>>())
                .unwrap_or_default();
            assert_eq!(
                names,
                [
                    "config_validation",
                    "guardrail_rules",
                    "llm_provider",
                    "knowledge_base",
                    "vector_index",
                    "tools_service"
                ]
            );
            assert_eq!(payload["checks"][4]["status"], "skipped");
        });
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[("NOVA_SERVER_PORT", "not-a-port")], || {
        let result = doctor::run(LoadOptions::default(), false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation:"));
        assert!(result.output.contains("- [skip] tools_service: skipped because configuration did not load"));
    });
}

#[test]
fn batch_runs_every_line_and_summarizes() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queries.jsonl");
        fs::write(
            &path,
            "{\"query\": \"\"}\n\n{\"query\": \"I want to sue you over this lawsuit\", \"account_context\": \"A002\"}\n",
        )
        .expect("write batch");

        let result = batch::run(LoadOptions::default(), &path, true);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["summary"]["total"], 2);
        assert_eq!(payload["summary"]["intents"]["Escalation"], 2);
        assert_eq!(payload["summary"]["grounding_checked"], 0);
        assert_eq!(payload["summary"]["with_errors"], 1);
        assert_eq!(payload["summary"]["failed"], 0);
        assert_eq!(payload["results"].as_array().map(Vec::len), Some(2));
    });
}

#[test]
fn batch_rejects_malformed_lines_before_running() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queries.jsonl");
        fs::write(&path, "{\"query\": \"ok\"}\n{query: broken}\n").expect("write batch");

        let result = batch::run(LoadOptions::default(), &path, true);
        assert_eq!(result.exit_code, 4);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "input");
        assert!(payload["message"].as_str().is_some_and(|message| message.starts_with("line 2:")));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

const ENV_KEYS: [&str; 20] = [
    "NOVA_LLM_PROVIDER",
    "NOVA_LLM_API_KEY",
    "NOVA_LLM_BASE_URL",
    "NOVA_LLM_MODEL",
    "NOVA_LLM_TEMPERATURE",
    "NOVA_LLM_TIMEOUT_SECS",
    "NOVA_RETRIEVAL_VECTOR_INDEX_URL",
    "NOVA_RETRIEVAL_KNOWLEDGE_BASE_DIR",
    "NOVA_RETRIEVAL_TOP_K",
    "NOVA_TOOLS_BASE_URL",
    "NOVA_TOOLS_TIMEOUT_SECS",
    "NOVA_GUARDRAILS_RULES_PATH",
    "NOVA_SERVER_BIND_ADDRESS",
    "NOVA_SERVER_PORT",
    "NOVA_LOGGING_LEVEL",
    "NOVA_LOGGING_FORMAT",
    "NOVA_LOG_LEVEL",
    "NOVA_LOG_FORMAT",
    "NOVA_RETRIEVAL_TIMEOUT_SECS",
    "NOVA_SERVER_GRACEFUL_SHUTDOWN_SECS",
];

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let previous_values: Vec<(&str, Option<String>)> =
        ENV_KEYS.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &ENV_KEYS {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

/// Sets more variables while the lock from [`with_env`] is already held.
fn with_extra_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    for (key, value) in vars {
        env::set_var(key, value);
    }
    test_fn();
}
