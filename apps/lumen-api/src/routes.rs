use axum::{
	Json, Router,
	extract::{Query, State},
	http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use lumen_service::{
	AnswerPayload, AnswerRequest, Error as ServiceError, FeedbackRequest, FeedbackResponse,
	HistoryEntry, HistoryRequest,
};

use crate::state::AppState;

pub const THREAD_ID_HEADER: &str = "x-thread-id";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/ask", post(ask))
		.route("/v1/history", get(history))
		.route("/v1/feedback", post(feedback))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

/// Always 200: failures surface as the canonical failure payload.
async fn ask(
	State(state): State<AppState>,
	Json(payload): Json<AnswerRequest>,
) -> (HeaderMap, Json<AnswerPayload>) {
	let response = state.service.answer(payload).await;
	let mut headers = HeaderMap::new();

	match HeaderValue::from_str(&response.thread_id) {
		Ok(value) => {
			headers.insert(HeaderName::from_static(THREAD_ID_HEADER), value);
		},
		Err(err) => tracing::warn!(error = %err, "Thread id is not a valid header value."),
	}

	(headers, Json(response.payload))
}

async fn history(
	State(state): State<AppState>,
	Query(query): Query<HistoryRequest>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
	let response = state.service.history(query).await?;

	Ok(Json(response))
}

async fn feedback(
	State(state): State<AppState>,
	Json(payload): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ApiError> {
	let response = state.service.submit_feedback(payload).await?;

	Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}
impl ApiError {
	fn new(status: StatusCode, error_code: &str, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.to_string(), message: message.into(), fields: None }
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { message } =>
				Self::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_REQUEST", message),
			ServiceError::Unavailable { message } => {
				tracing::error!(error = %message, "Request failed because storage is unavailable.");

				Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", "Storage is unavailable.")
			},
			ServiceError::Provider { message } => {
				tracing::error!(error = %message, "Request failed with a provider error.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR", "Provider error.")
			},
			ServiceError::Storage { message } => {
				tracing::error!(error = %message, "Request failed with a storage error.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", "Storage error.")
			},
			ServiceError::Qdrant { message } => {
				tracing::error!(error = %message, "Request failed with a Qdrant error.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "QDRANT_ERROR", "Search index error.")
			},
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}
