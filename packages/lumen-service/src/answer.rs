use std::time::Instant;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use lumen_config::RetrievalFailurePolicy;
use lumen_storage::models::ChatTurn;

use crate::{
	ContextVerdict, GenerationPrompt, LumenService, RetrievalFailure, RetrievalOutcome, SpanClose,
	SpanHandle, prompt,
};

pub const FAILURE_TEXT: &str = "Something went wrong.";

const SPAN_NAME: &str = "answer";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AnswerRequest {
	pub question: String,
	pub user_id: String,
	#[serde(default)]
	pub thread_id: Option<String>,
}

/// What the caller receives: the answer text, or the canonical failure payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum AnswerPayload {
	Answer { text: String },
	Failure { text: String, files: Vec<Value>, annotations: Vec<Value> },
}
impl AnswerPayload {
	pub fn failure() -> Self {
		Self::Failure { text: FAILURE_TEXT.to_string(), files: Vec::new(), annotations: Vec::new() }
	}

	pub fn is_failure(&self) -> bool {
		matches!(self, Self::Failure { .. })
	}

	pub fn text(&self) -> &str {
		match self {
			Self::Answer { text } | Self::Failure { text, .. } => text,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerResponse {
	/// The thread the turn belongs to; freshly generated when the request had none.
	pub thread_id: String,
	pub payload: AnswerPayload,
}

/// Progress of one `answer` call. A failure records the last state reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStage {
	Start,
	HistoryLoaded,
	Classified,
	NoContext,
	Retrieved,
	Generated,
	Persisted,
	Done,
}
impl AnswerStage {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Start => "start",
			Self::HistoryLoaded => "history_loaded",
			Self::Classified => "classified",
			Self::NoContext => "no_context",
			Self::Retrieved => "retrieved",
			Self::Generated => "generated",
			Self::Persisted => "persisted",
			Self::Done => "done",
		}
	}
}

struct AnswerFailure {
	stage: AnswerStage,
	message: String,
}

struct Answered {
	text: String,
	roundtrips: u32,
	tokens: u64,
	retrieval_tokens: u32,
	context_needed: bool,
}

impl LumenService {
	/// Answers one question within a conversation thread.
	///
	/// Never fails: every handled error yields the canonical failure payload and is recorded on
	/// the request's telemetry span.
	pub async fn answer(&self, req: AnswerRequest) -> AnswerResponse {
		let started = Instant::now();
		let thread_id = req
			.thread_id
			.as_deref()
			.map(str::trim)
			.filter(|id| !id.is_empty())
			.map(str::to_string)
			.unwrap_or_else(|| Uuid::new_v4().to_string());
		let history = self
			.transcript
			.recent(&req.user_id, &thread_id, self.cfg.conversation.max_history_length)
			.await;
		let history = prompt::render_history(
			history.iter().map(|entry| (entry.question.as_str(), entry.answer.as_str())),
		);
		// Dropping `answer` mid-flight (client disconnect) closes the span through the guard.
		let guard = self.telemetry.open_guarded(SPAN_NAME, span_tags(&req, &thread_id));
		let span = guard.handle();

		span.add_message(&req.question);
		span.add_tag("stage", AnswerStage::HistoryLoaded.as_str());

		let outcome = self.run_answer(&req.question, history, span).await;
		let payload = match outcome {
			Ok(answered) => {
				self.transcript
					.append(&ChatTurn {
						turn_id: Uuid::new_v4(),
						user_id: req.user_id.clone(),
						thread_id: thread_id.clone(),
						question: req.question.clone(),
						answer: answered.text.clone(),
						ts: OffsetDateTime::now_utc().unix_timestamp(),
					})
					.await;

				let mut tags = Map::new();

				tags.insert("roundtrips".to_string(), Value::from(answered.roundtrips));
				tags.insert("tokens".to_string(), Value::from(answered.tokens));
				tags.insert("retrieval_tokens".to_string(), Value::from(answered.retrieval_tokens));
				tags.insert("context_needed".to_string(), Value::from(answered.context_needed));
				tags.insert("stage".to_string(), Value::from(AnswerStage::Done.as_str()));

				self.telemetry.close(
					span,
					SpanClose {
						duration: Some(started.elapsed()),
						result: Some(answered.text.clone()),
						error: None,
						tags,
					},
				);

				if let Err(err) = self.telemetry.flush(self.backends.spans.as_ref()).await {
					tracing::warn!(error = %err, "Metric flush after answer failed.");
				}

				AnswerPayload::Answer { text: answered.text }
			},
			Err(failure) => {
				tracing::error!(
					error = %failure.message,
					stage = failure.stage.as_str(),
					user_id = %req.user_id,
					thread_id = %thread_id,
					question = %req.question,
					"Failed to answer question."
				);

				let mut tags = Map::new();

				tags.insert("stage".to_string(), Value::from(failure.stage.as_str()));

				self.telemetry.close(
					span,
					SpanClose {
						duration: Some(started.elapsed()),
						result: None,
						error: Some(failure.message),
						tags,
					},
				);

				AnswerPayload::failure()
			},
		};

		AnswerResponse { thread_id, payload }
	}

	async fn run_answer(
		&self,
		question: &str,
		history: String,
		span: &SpanHandle,
	) -> Result<Answered, AnswerFailure> {
		let mut stage = AnswerStage::HistoryLoaded;
		let mut roundtrips = 0_u32;
		let verdict = self
			.providers
			.classifier
			.classify(&self.cfg.providers.llm, question)
			.await
			.map_err(|err| AnswerFailure { stage, message: err.to_string() })?;

		roundtrips += 1;
		stage = advance(span, AnswerStage::Classified);

		let mut retrieval_tokens = 0;
		let context = match verdict {
			ContextVerdict::NoContextNeeded => {
				stage = advance(span, AnswerStage::NoContext);

				prompt::NO_CONTEXT_REQUIRED.to_string()
			},
			ContextVerdict::NeedsContext => {
				roundtrips += 1;

				match self.search(question).await {
					RetrievalOutcome::Found { fragments, approx_tokens } => {
						stage = advance(span, AnswerStage::Retrieved);
						retrieval_tokens = approx_tokens;

						span.add_message(&format!("retrieved {} fragments", fragments.len()));

						if fragments.is_empty() {
							prompt::NO_CONTEXT_FOUND.to_string()
						} else {
							let documents = serde_json::to_string(&fragments).map_err(|err| {
								AnswerFailure { stage, message: err.to_string() }
							})?;

							format!("{}{documents}", prompt::CONTEXT_PREFIX)
						}
					},
					RetrievalOutcome::Failed(RetrievalFailure::Embedding(_)) => {
						stage = advance(span, AnswerStage::NoContext);

						prompt::NO_CONTEXT_FOUND.to_string()
					},
					RetrievalOutcome::Failed(RetrievalFailure::Backend(message)) => {
						if self.cfg.retrieval.failure_policy != RetrievalFailurePolicy::FailOpen {
							return Err(AnswerFailure { stage, message });
						}

						tracing::warn!(error = %message, "Retrieval failed. Answering without context.");

						stage = advance(span, AnswerStage::NoContext);

						prompt::NO_CONTEXT_FOUND.to_string()
					},
				}
			},
		};
		let prompt = GenerationPrompt {
			purpose: self.cfg.assistant.purpose.clone(),
			context,
			history,
			question: question.to_string(),
		};

		roundtrips += 1;

		let generation = self
			.providers
			.generation
			.generate(&self.cfg.providers.llm, &prompt)
			.await
			.map_err(|err| AnswerFailure { stage, message: err.to_string() })?
			.ok_or_else(|| AnswerFailure {
				stage,
				message: "Generation returned no response.".to_string(),
			})?;

		Ok(Answered {
			text: generation.answer_text,
			roundtrips,
			tokens: generation.total_tokens,
			retrieval_tokens,
			context_needed: verdict.needs_context(),
		})
	}
}

/// Records `next` on the span so an aborted answer still reports how far it got.
fn advance(span: &SpanHandle, next: AnswerStage) -> AnswerStage {
	span.add_tag("stage", next.as_str());

	next
}

fn span_tags(req: &AnswerRequest, thread_id: &str) -> Map<String, Value> {
	let mut tags = Map::new();

	tags.insert("user_id".to_string(), Value::from(req.user_id.as_str()));
	tags.insert("thread_id".to_string(), Value::from(thread_id));
	tags.insert("question".to_string(), Value::from(req.question.as_str()));

	tags
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn failure_payload_shape() {
		let json = serde_json::to_value(AnswerPayload::failure()).expect("serialize failed");

		assert_eq!(
			json,
			serde_json::json!({ "text": "Something went wrong.", "files": [], "annotations": [] })
		);
	}

	#[test]
	fn answer_payload_carries_only_text() {
		let payload = AnswerPayload::Answer { text: "Hi there!".to_string() };
		let json = serde_json::to_value(&payload).expect("serialize failed");

		assert_eq!(json, serde_json::json!({ "text": "Hi there!" }));
		assert!(!payload.is_failure());
		assert_eq!(payload.text(), "Hi there!");
	}
}
