pub mod format;
pub mod invoker;
pub mod planner;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use nova_core::config::AppConfig;
use serde_json::{Map, Value};

pub use invoker::{ParamValidator, ToolCallResult, ToolInvoker, ToolOutcome};
pub use planner::ToolPlanner;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataTool {
    AccountLookup,
    InvoiceStatus,
    TicketSummary,
    UsageReport,
    KbSearch,
}

impl DataTool {
    pub const ALL: [DataTool; 5] = [
        DataTool::AccountLookup,
        DataTool::InvoiceStatus,
        DataTool::TicketSummary,
        DataTool::UsageReport,
        DataTool::KbSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountLookup => "account_lookup",
            Self::InvoiceStatus => "invoice_status",
            Self::TicketSummary => "ticket_summary",
            Self::UsageReport => "usage_report",
            Self::KbSearch => "kb_search",
        }
    }

    /// Parameters sent as JSON numbers rather than strings.
    fn is_numeric_param(&self, key: &str) -> bool {
        matches!((self, key), (Self::TicketSummary, "window_days") | (Self::KbSearch, "k"))
    }
}

impl fmt::Display for DataTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataTool {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == value)
            .ok_or_else(|| anyhow!("unknown data tool `{value}`"))
    }
}

/// A planned tool invocation. Parameters are kept as strings until the
/// invoker has validated them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub tool: DataTool,
    pub params: BTreeMap<String, String>,
}

impl ToolCall {
    pub fn new(tool: DataTool) -> Self {
        Self { tool, params: BTreeMap::new() }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn to_json(&self) -> Value {
        let body = self
            .params
            .iter()
            .map(|(key, value)| {
                let value = if self.tool.is_numeric_param(key) {
                    value.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::from(value.as_str()))
                } else {
                    Value::from(value.as_str())
                };
                (key.clone(), value)
            })
            .collect::<Map<_, _>>();
        Value::Object(body)
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, input: Value) -> Result<Value>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    /// Registers an [`HttpDataTool`] per data tool when `tools.base_url` is set.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::default();
        if let Some(base_url) = &config.tools.base_url {
            let timeout = Duration::from_secs(config.tools.timeout_secs);
            for tool in DataTool::ALL {
                registry.register(HttpDataTool::new(tool, base_url, timeout)?);
            }
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self.tools.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Data tool served over HTTP: `POST {base_url}/tools/{name}` with the
/// parameters as the JSON body. A JSON `error` field is an invocation failure.
pub struct HttpDataTool {
    tool: DataTool,
    url: String,
    client: reqwest::Client,
}

impl HttpDataTool {
    pub fn new(tool: DataTool, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build data tool HTTP client")?;
        Ok(Self {
            tool,
            url: format!("{}/tools/{}", base_url.trim_end_matches('/'), tool.as_str()),
            client,
        })
    }
}

#[async_trait]
impl Tool for HttpDataTool {
    fn name(&self) -> &'static str {
        self.tool.as_str()
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(&input)
            .send()
            .await
            .with_context(|| format!("data tool service at {} is unreachable", self.url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} returned HTTP {status}", self.tool);
        }
        let payload: Value = response.json().await.context("data tool response was not JSON")?;
        reject_error_payload(payload)
    }
}

fn reject_error_payload(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        match payload.get("explanation").and_then(Value::as_str) {
            Some(explanation) => bail!("{error} ({explanation})"),
            None => bail!("{error}"),
        }
    }
    Ok(payload)
}
