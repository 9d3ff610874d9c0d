use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use nova_core::config::{AppConfig, LlmProvider};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FewShotExample {
    pub input: String,
    pub output: String,
}

impl FewShotExample {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self { input: input.into(), output: output.into() }
    }
}

/// One call to the completion service: fixed instructions, optional worked
/// examples, and the input to act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    pub instructions: String,
    pub examples: Vec<FewShotExample>,
    pub input: String,
}

impl CompletionRequest {
    pub fn new(instructions: impl Into<String>, input: impl Into<String>) -> Self {
        Self { instructions: instructions.into(), examples: Vec::new(), input: input.into() }
    }

    pub fn with_examples(mut self, examples: Vec<FewShotExample>) -> Self {
        self.examples = examples;
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Completion client speaking the OpenAI-compatible chat API (OpenAI, Ollama)
/// or the Anthropic Messages API.
pub struct HttpLlmClient {
    provider: LlmProvider,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm.timeout_secs))
            .build()
            .context("failed to build completion HTTP client")?;

        Ok(Self {
            provider: config.llm.provider,
            base_url: config.llm_base_url().trim_end_matches('/').to_string(),
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            api_key: config.llm.api_key.clone(),
            client,
        })
    }

    async fn complete_chat(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut call =
            self.client.post(&url).json(&chat_body(request, &self.model, self.temperature));
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key.expose_secret());
        }

        let response = call.send().await.with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("completion service returned HTTP {status}");
        }
        let payload: Value = response.json().await.context("completion response was not JSON")?;
        chat_text(&payload)
    }

    async fn complete_messages(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/messages", self.base_url);
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("anthropic provider requires llm.api_key"))?;

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&messages_body(request, &self.model, self.temperature))
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("completion service returned HTTP {status}");
        }
        let payload: Value = response.json().await.context("completion response was not JSON")?;
        messages_text(&payload)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAi | LlmProvider::Ollama => self.complete_chat(request).await,
            LlmProvider::Anthropic => self.complete_messages(request).await,
        }
    }
}

fn example_turns(request: &CompletionRequest) -> Vec<Value> {
    let mut turns = Vec::with_capacity(request.examples.len() * 2 + 1);
    for example in &request.examples {
        turns.push(json!({"role": "user", "content": example.input}));
        turns.push(json!({"role": "assistant", "content": example.output}));
    }
    turns.push(json!({"role": "user", "content": request.input}));
    turns
}

fn chat_body(request: &CompletionRequest, model: &str, temperature: f32) -> Value {
    let mut messages = vec![json!({"role": "system", "content": request.instructions})];
    messages.extend(example_turns(request));
    json!({
        "model": model,
        "temperature": temperature,
        "messages": messages,
    })
}

fn messages_body(request: &CompletionRequest, model: &str, temperature: f32) -> Value {
    json!({
        "model": model,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "temperature": temperature,
        "system": request.instructions,
        "messages": example_turns(request),
    })
}

fn chat_text(payload: &Value) -> Result<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("completion response had no choices[0].message.content"))
}

fn messages_text(payload: &Value) -> Result<String> {
    let blocks = payload
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("completion response had no content blocks"))?;
    let text = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        bail!("completion response had no text content");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{chat_body, chat_text, messages_body, messages_text, CompletionRequest, FewShotExample};

    fn request() -> CompletionRequest {
        CompletionRequest::new("Classify the query.", "Show invoices for A001")
            .with_examples(vec![FewShotExample::new("What is the pricing?", "FAQ")])
    }

    #[test]
    fn chat_body_puts_instructions_first_and_examples_as_turns() {
        let body = chat_body(&request(), "gpt-4o-mini", 0.0);
        let messages = body["messages"].as_array().expect("messages array");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "What is the pricing?");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "Show invoices for A001");
    }

    #[test]
    fn messages_body_carries_system_separately() {
        let body = messages_body(&request(), "claude-3-5-haiku", 0.0);
        assert_eq!(body["system"], "Classify the query.");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn response_text_is_extracted_per_api_shape() {
        let chat = json!({"choices": [{"message": {"role": "assistant", "content": "FAQ"}}]});
        assert_eq!(chat_text(&chat).expect("chat text"), "FAQ");

        let messages = json!({"content": [{"type": "text", "text": "DataLookup"}]});
        assert_eq!(messages_text(&messages).expect("messages text"), "DataLookup");

        assert!(chat_text(&json!({"choices": []})).is_err());
        assert!(messages_text(&json!({"content": []})).is_err());
    }
}
