use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use nova_agent::AssistantRuntime;
use nova_core::domain::state::ConversationResult;
use nova_core::errors::InterfaceError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Longest accepted query, in characters. The guardrails apply their own
/// tighter limit to what reaches the completion service.
pub const MAX_QUERY_CHARS: usize = 4_000;

#[derive(Clone)]
pub struct QueryState {
    runtime: Arc<AssistantRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub account_context: Option<String>,
    #[serde(default)]
    pub history: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub correlation_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub result: ConversationResult,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: &'static str,
    correlation_id: String,
}

/// Maps interface errors onto HTTP responses without leaking internal detail.
pub struct ApiError(InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        warn!(
            event_name = "server.query.rejected",
            correlation_id = %self.0.correlation_id(),
            error = %self.0,
            "query request rejected"
        );
        let body = ErrorBody {
            error: kind,
            message: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(runtime: Arc<AssistantRuntime>) -> Router {
    Router::new().route("/query", post(answer_query)).with_state(QueryState { runtime })
}

pub async fn answer_query(
    State(state): State<QueryState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError(InterfaceError::BadRequest {
            message: rejection.body_text(),
            correlation_id: Uuid::new_v4().to_string(),
        })
    })?;

    let length = request.query.chars().count();
    if length > MAX_QUERY_CHARS {
        return Err(ApiError(InterfaceError::BadRequest {
            message: format!("query has {length} characters; the limit is {MAX_QUERY_CHARS}"),
            correlation_id: Uuid::new_v4().to_string(),
        }));
    }

    let conversation =
        state.runtime.run(&request.query, request.account_context, request.history).await;
    let result = conversation.to_result();
    info!(
        event_name = "server.query.answered",
        correlation_id = %conversation.correlation_id(),
        intent = %result.intent,
        evidence = result.evidence.len(),
        errors = result.errors.len(),
        "query answered"
    );

    Ok(Json(QueryResponse {
        query: request.query,
        correlation_id: conversation.correlation_id().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        result,
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::query::{router, MAX_QUERY_CHARS};
    use crate::test_support::runtime_with_tools;

    async fn post_query(body: Body) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .expect("request should build");
        let response =
            router(runtime_with_tools()).oneshot(request).await.expect("router should respond");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        let payload = serde_json::from_slice(&bytes).expect("response should be json");
        (status, payload)
    }

    #[tokio::test]
    async fn sensitive_query_returns_escalation_record() {
        let (status, payload) = post_query(Body::from(
            json!({"query": "I am going to sue NovaCRM", "account_context": "A001"}).to_string(),
        ))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["intent"], "Escalation");
        assert_eq!(payload["query"], "I am going to sue NovaCRM");
        assert_eq!(payload["evidence"][0], "safety:sensitive_topic_detected:legal");
        assert!(payload["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(payload["timestamp"].as_str().is_some());
        assert_eq!(payload["errors"], json!([]));
    }

    #[tokio::test]
    async fn data_lookup_query_carries_tool_evidence() {
        let (status, payload) = post_query(Body::from(
            json!({"query": "Show my invoices for October 2025", "account_context": "A001"})
                .to_string(),
        ))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["intent"], "DataLookup");
        let evidence = payload["evidence"].as_array().cloned().unwrap_or_default();
        assert!(
            evidence.iter().any(|tag| tag.as_str().is_some_and(|tag| tag.starts_with("tool:invoice_status:"))),
            "{evidence:?}"
        );
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (status, payload) = post_query(Body::from("{\"query\": ")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["error"], "bad_request");
        assert_eq!(
            payload["message"],
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[tokio::test]
    async fn oversized_query_is_rejected_before_the_pipeline_runs() {
        let query = "a".repeat(MAX_QUERY_CHARS + 1);
        let (status, payload) = post_query(Body::from(json!({ "query": query }).to_string())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(payload["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
    }
}
