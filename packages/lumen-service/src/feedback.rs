use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use lumen_storage::models::FeedbackRow;

use crate::{Error, LumenService, Result};

/// A user's reaction to one answer. `text` and `date` (RFC 3339) are required.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FeedbackRequest {
	#[serde(default)]
	pub text: Option<String>,
	#[serde(default)]
	pub date: Option<String>,
	#[serde(default, alias = "fid")]
	pub emoji: Option<String>,
	#[serde(default)]
	pub question: Option<String>,
	#[serde(default)]
	pub response: Option<String>,
	#[serde(default, alias = "responseTime")]
	pub response_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FeedbackResponse {
	pub success: bool,
	pub message: String,
}

impl LumenService {
	pub async fn submit_feedback(&self, req: FeedbackRequest) -> Result<FeedbackResponse> {
		let row = feedback_row(req)?;

		self.backends.feedback.insert_feedback(&row).await?;

		tracing::info!(feedback_id = %row.feedback_id, "Feedback recorded.");

		Ok(FeedbackResponse { success: true, message: "Feedback recorded.".to_string() })
	}
}

fn feedback_row(req: FeedbackRequest) -> Result<FeedbackRow> {
	let text = req.text.filter(|text| !text.trim().is_empty()).ok_or_else(|| {
		Error::InvalidRequest { message: "text is required.".to_string() }
	})?;
	let raw_date = req
		.date
		.ok_or_else(|| Error::InvalidRequest { message: "date is required.".to_string() })?;
	let date = OffsetDateTime::parse(raw_date.trim(), &Rfc3339).map_err(|err| {
		Error::InvalidRequest { message: format!("date must be an RFC 3339 timestamp: {err}.") }
	})?;

	if req.response_time.is_some_and(|value| !value.is_finite() || value < 0.0) {
		return Err(Error::InvalidRequest {
			message: "response_time must be a finite number of zero or greater.".to_string(),
		});
	}

	Ok(FeedbackRow {
		feedback_id: Uuid::new_v4(),
		text,
		date,
		emoji: req.emoji,
		question: req.question,
		response: req.response,
		response_time: req.response_time,
	})
}
