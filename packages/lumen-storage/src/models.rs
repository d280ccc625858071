use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatTurn {
	pub turn_id: Uuid,
	pub user_id: String,
	pub thread_id: String,
	pub question: String,
	pub answer: String,
	/// Epoch seconds.
	pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentKey {
	pub source_id: String,
	pub locator: i64,
}

#[derive(Debug, Clone)]
pub struct MetricSpanRow {
	pub span_id: Uuid,
	pub name: String,
	pub tags: Value,
	pub start_time: OffsetDateTime,
	pub end_time: Option<OffsetDateTime>,
	pub duration_seconds: Option<f64>,
	pub message: String,
	pub result: Option<String>,
	pub error: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedbackRow {
	pub feedback_id: Uuid,
	pub text: String,
	pub date: OffsetDateTime,
	pub emoji: Option<String>,
	pub question: Option<String>,
	pub response: Option<String>,
	pub response_time: Option<f64>,
}
