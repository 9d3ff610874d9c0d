//! Assistant runtime - the support pipeline that turns a customer query into
//! a validated, evidence-backed answer.
//!
//! # Architecture
//!
//! Each query runs once through a fixed pipeline (see `runtime`):
//! 1. **Safety** (`guardrails`) - redact PII, detect sensitive topics and
//!    injection markers, normalize the query
//! 2. **Route** (`classifier`) - label the query FAQ, DataLookup or Escalation
//! 3. **Evidence** (`retriever` for FAQ, `tools` for DataLookup)
//! 4. **Synthesize** (`synthesizer`) - compose the answer from evidence
//! 5. **Validate** (`validator`) - grounding, hallucination and tone checks
//!
//! Escalation skips 4 and 5 and returns a fixed hand-off message.
//!
//! # Key Types
//!
//! - `AssistantRuntime` - owns the routing loop and is the only intent authority
//! - `LlmClient` - completion service (OpenAI, Anthropic, Ollama over HTTP)
//! - `DocumentSearch` - vector index and keyword fallback
//! - `Tool` - data-lookup tools behind the tool service
//!
//! # Safety Principle
//!
//! The completion service only classifies and phrases. Which evidence exists,
//! which tools may run and whether an answer counts as grounded are decided
//! deterministically here.

pub mod classifier;
pub mod guardrails;
pub mod llm;
pub mod prompts;
pub mod retriever;
pub mod runtime;
pub mod synthesizer;
pub mod tools;
pub mod validator;

pub use runtime::{AssistantRuntime, Collaborators, HAND_OFF_MESSAGE};
