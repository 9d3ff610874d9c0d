use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use nova_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use secrecy::ExposeSecret;
use toml::Value;

/// One reported field: dotted key, primary env var, effective value.
struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run(options: LoadOptions) -> String {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = vec![
        Field::new("llm.provider", "NOVA_LLM_PROVIDER", config.llm.provider.as_str()),
        Field::new("llm.model", "NOVA_LLM_MODEL", config.llm.model.as_str()),
        Field::new("llm.base_url", "NOVA_LLM_BASE_URL", config.llm_base_url()),
        Field::new(
            "llm.api_key",
            "NOVA_LLM_API_KEY",
            config
                .llm
                .api_key
                .as_ref()
                .map(|key| redact_token(key.expose_secret()))
                .unwrap_or_else(|| "<unset>".to_string()),
        ),
        Field::new("llm.temperature", "NOVA_LLM_TEMPERATURE", config.llm.temperature.to_string()),
        Field::new("llm.timeout_secs", "NOVA_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        Field::new(
            "retrieval.vector_index_url",
            "NOVA_RETRIEVAL_VECTOR_INDEX_URL",
            config.retrieval.vector_index_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "retrieval.knowledge_base_dir",
            "NOVA_RETRIEVAL_KNOWLEDGE_BASE_DIR",
            config.retrieval.knowledge_base_dir.display().to_string(),
        ),
        Field::new("retrieval.top_k", "NOVA_RETRIEVAL_TOP_K", config.retrieval.top_k.to_string()),
        Field::new(
            "tools.base_url",
            "NOVA_TOOLS_BASE_URL",
            config.tools.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("tools.timeout_secs", "NOVA_TOOLS_TIMEOUT_SECS", config.tools.timeout_secs.to_string()),
        Field::new(
            "guardrails.rules_path",
            "NOVA_GUARDRAILS_RULES_PATH",
            config
                .guardrails
                .rules_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<builtin>".to_string()),
        ),
        Field::new("server.bind_address", "NOVA_SERVER_BIND_ADDRESS", config.server.bind_address.as_str()),
        Field::new("server.port", "NOVA_SERVER_PORT", config.server.port.to_string()),
        Field::new("logging.level", "NOVA_LOGGING_LEVEL", config.logging.level.as_str()),
        Field::new("logging.format", "NOVA_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.into_iter().map(|field| {
        let source = field_source(
            field.key,
            Some(field.env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        render_line(field.key, &field.value, source)
    }));
    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from(DEFAULT_CONFIG_FILE);
    if root.exists() {
        return Some(root);
    }

    let nested = Path::new("config").join(DEFAULT_CONFIG_FILE);
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
        if let Some(alias) = legacy_alias(env_key) {
            if env::var_os(alias).is_some() {
                return format!("env ({alias})");
            }
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn legacy_alias(env_key: &str) -> Option<&'static str> {
    match env_key {
        "NOVA_LOGGING_LEVEL" => Some("NOVA_LOG_LEVEL"),
        "NOVA_LOGGING_FORMAT" => Some("NOVA_LOG_FORMAT"),
        _ => None,
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognisable key prefix (`sk-`, `sk-ant-`) and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
