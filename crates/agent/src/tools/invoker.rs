use std::sync::Arc;

use nova_core::domain::evidence::EvidenceTag;
use nova_core::domain::state::ConversationState;
use nova_core::rules::{compile, GuardrailRules, RulesError};
use regex::Regex;
use serde_json::Value;

use super::format::summarize;
use super::{DataTool, ToolCall, ToolPlanner, ToolRegistry};

/// Shape checks run on every planned call before anything is sent.
#[derive(Clone, Debug)]
pub struct ParamValidator {
    account_id: Regex,
    month: Regex,
    max_window_days: u32,
    max_search_results: u32,
}

impl ParamValidator {
    pub fn new(rules: &GuardrailRules) -> Result<Self, RulesError> {
        Ok(Self {
            account_id: compile("tool_params.account_id_pattern", &rules.tool_params.account_id_pattern)?,
            month: compile("tool_params.month_pattern", &rules.tool_params.month_pattern)?,
            max_window_days: rules.tool_params.max_window_days,
            max_search_results: rules.tool_params.max_search_results,
        })
    }

    /// Returns every problem found; an empty list means the call may run.
    pub fn validate(&self, call: &ToolCall) -> Vec<String> {
        let mut errors = Vec::new();
        let account_id = call.param("account_id");

        match call.tool {
            DataTool::AccountLookup => {
                if account_id.is_none() && call.param("company").is_none() {
                    errors.push("account_lookup requires either account_id or company parameter".to_string());
                }
            }
            DataTool::InvoiceStatus => {
                if account_id.is_none() {
                    errors.push("invoice_status requires account_id parameter".to_string());
                }
                if let Some(period) = call.param("period") {
                    if !self.month.is_match(period) {
                        errors.push(format!("Invalid period format: {period}"));
                    }
                }
            }
            DataTool::TicketSummary => {
                if account_id.is_none() {
                    errors.push("ticket_summary requires account_id parameter".to_string());
                }
                if let Some(days) = call.param("window_days") {
                    if let Some(error) = bounded("window_days", days, self.max_window_days) {
                        errors.push(error);
                    }
                }
            }
            DataTool::UsageReport => {
                if account_id.is_none() || call.param("month").is_none() {
                    errors.push("usage_report requires account_id and month parameters".to_string());
                }
                if let Some(month) = call.param("month") {
                    if !self.month.is_match(month) {
                        errors.push(format!("Invalid month format: {month}"));
                    }
                }
            }
            DataTool::KbSearch => {
                if call.param("query").map_or(true, |query| query.trim().is_empty()) {
                    errors.push("kb_search requires query parameter".to_string());
                }
                if let Some(k) = call.param("k") {
                    if let Some(error) = bounded("k", k, self.max_search_results) {
                        errors.push(error);
                    }
                }
            }
        }

        if call.tool != DataTool::KbSearch {
            if let Some(account_id) = account_id {
                if !self.account_id.is_match(account_id) {
                    errors.push(format!("Invalid account_id format: {account_id}"));
                }
            }
        }

        errors
    }
}

fn bounded(name: &str, raw: &str, max: u32) -> Option<String> {
    match raw.trim().parse::<i64>() {
        Ok(value) if (1..=i64::from(max)).contains(&value) => None,
        Ok(_) => Some(format!("{name} must be between 1 and {max}")),
        Err(_) => Some(format!("{name} must be an integer")),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolCallResult {
    /// Failed validation; the tool was never invoked.
    Rejected(Vec<String>),
    Failed(String),
    Succeeded(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub call: ToolCall,
    pub result: ToolCallResult,
}

impl ToolOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.result, ToolCallResult::Succeeded(_))
    }
}

/// Plans, validates and runs the data tools for one DataLookup run. Each
/// call is attempted exactly once.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    validator: ParamValidator,
    planner: ToolPlanner,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, validator: ParamValidator, planner: ToolPlanner) -> Self {
        Self { registry, validator, planner }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn collect(&self, state: &mut ConversationState) -> Vec<ToolOutcome> {
        let calls = self.planner.plan(state.effective_query(), state.account_context.as_deref());
        if calls.is_empty() {
            state.record_error("No data tool matched the request");
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self.invoke(&call).await;
            match &result {
                ToolCallResult::Rejected(problems) => {
                    tracing::warn!(
                        event_name = "pipeline.tools.rejected",
                        correlation_id = %state.correlation_id(),
                        tool = %call.tool,
                        problems = problems.len(),
                        "tool call failed parameter validation"
                    );
                    state.record_error(format!(
                        "Invalid parameters for {}: {}",
                        call.tool,
                        problems.join("; ")
                    ));
                }
                ToolCallResult::Failed(error) => {
                    tracing::warn!(
                        event_name = "pipeline.tools.failed",
                        correlation_id = %state.correlation_id(),
                        tool = %call.tool,
                        error = %error,
                        "tool invocation failed"
                    );
                    state.record_error(format!("Tool {} failed: {error}", call.tool));
                }
                ToolCallResult::Succeeded(payload) => {
                    tracing::info!(
                        event_name = "pipeline.tools.succeeded",
                        correlation_id = %state.correlation_id(),
                        tool = %call.tool,
                        "tool invocation succeeded"
                    );
                    state.evidence.record_with_content(
                        EvidenceTag::tool_result(call.tool.as_str(), &call.params),
                        summarize(call.tool, payload),
                    );
                }
            }
            outcomes.push(ToolOutcome { call, result });
        }
        outcomes
    }

    async fn invoke(&self, call: &ToolCall) -> ToolCallResult {
        let problems = self.validator.validate(call);
        if !problems.is_empty() {
            return ToolCallResult::Rejected(problems);
        }
        let Some(tool) = self.registry.get(call.tool.as_str()) else {
            return ToolCallResult::Failed("no tool service is registered".to_string());
        };
        match tool.execute(call.to_json()).await {
            Ok(payload) => ToolCallResult::Succeeded(payload),
            Err(error) => ToolCallResult::Failed(format!("{error:#}")),
        }
    }
}
