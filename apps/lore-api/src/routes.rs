use axum::{
	Json, Router,
	body::Bytes,
	extract::State,
	http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;
use serde_json::Value;

use lore_service::{AskRequest, AskResponse, Error as ServiceError, RequestContext};

use crate::state::AppState;

pub const MODEL_OVERRIDE_HEADER: &str = "x-model-override";
pub const PROMPT_VERSION_HEADER: &str = "x-prompt-version";
pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACE_ID_HEADER: &str = "x-trace-id";

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/healthz", get(health))
		.route("/ask", post(ask))
		.route("/feedback", post(feedback))
		.route("/metrics", get(metrics))
		.with_state(state)
}

async fn health() -> Json<Value> {
	Json(serde_json::json!({ "ok": true, "service": "lore-api", "version": lore_cli::VERSION }))
}

async fn ask(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Json<AskResponse>, ApiError> {
	// A body that is not JSON at all falls through to the empty request and fails on the
	// missing question.
	let mut request = match serde_json::from_slice::<Value>(&body) {
		Ok(value) => AskRequest::from_json(value)?,
		Err(_) => AskRequest::default(),
	};

	if let Some(model) = header_value(&headers, MODEL_OVERRIDE_HEADER) {
		request.model = Some(model);
	}
	if let Some(version) = header_value(&headers, PROMPT_VERSION_HEADER) {
		request.prompt_version = Some(version);
	}

	let ctx = request_context(&headers);
	let response = state.service.ask(request, &ctx).await?;

	Ok(Json(response))
}

async fn feedback(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
	let payload: Value = serde_json::from_slice(&body).map_err(|err| {
		ApiError::new(StatusCode::BAD_REQUEST, "invalid_json", Some(err.to_string()))
	})?;
	let record = state.service.feedback.append(payload).await?;

	tracing::info!(
		path = %state.service.feedback.path().display(),
		fields = record.as_object().map(|map| map.len()).unwrap_or_default(),
		"Feedback recorded."
	);

	Ok(Json(serde_json::json!({ "ok": true })))
}

async fn metrics(State(state): State<AppState>) -> Response {
	([(CONTENT_TYPE, METRICS_CONTENT_TYPE)], state.service.metrics.encode()).into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
	headers
		.get(name)
		.and_then(|value| value.to_str().ok())
		.map(str::trim)
		.filter(|value| !value.is_empty())
		.map(str::to_string)
}

/// Prefers the W3C `traceparent` trace id, then a plain `X-Trace-Id`.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
	let trace_id = header_value(headers, TRACEPARENT_HEADER)
		.and_then(|value| traceparent_trace_id(&value))
		.or_else(|| header_value(headers, TRACE_ID_HEADER));

	RequestContext { trace_id }
}

fn traceparent_trace_id(value: &str) -> Option<String> {
	let trace_id = value.split('-').nth(1)?;

	if trace_id.len() != 32
		|| !trace_id.bytes().all(|byte| byte.is_ascii_hexdigit())
		|| trace_id.bytes().all(|byte| byte == b'0')
	{
		return None;
	}

	Some(trace_id.to_ascii_lowercase())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	detail: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error: String,
	detail: Option<String>,
}
impl ApiError {
	fn new(status: StatusCode, error: impl Into<String>, detail: Option<String>) -> Self {
		Self { status, error: error.into(), detail }
	}
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { message } => {
				Self::new(StatusCode::BAD_REQUEST, message, None)
			},
			ServiceError::Guardrail { code } => Self::new(StatusCode::BAD_REQUEST, code, None),
			ServiceError::Retrieval { message } => {
				Self::new(StatusCode::BAD_GATEWAY, "retrieval_failed", Some(message))
			},
			ServiceError::Generation { detail } => {
				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "llm_failed", Some(detail))
			},
			ServiceError::Feedback { message } => {
				tracing::error!(error = message.as_str(), "Feedback write failed.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "feedback_write_failed", None)
			},
			err @ (ServiceError::Provider { .. }
			| ServiceError::Timeout { .. }
			| ServiceError::Init { .. }) => {
				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", Some(err.to_string()))
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error: self.error, detail: self.detail };

		(self.status, Json(body)).into_response()
	}
}
