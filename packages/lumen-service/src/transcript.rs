use std::sync::Arc;

use lumen_storage::models::ChatTurn;

use crate::{Error, LumenService, Result, TurnBackend};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
	pub question: String,
	pub answer: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HistoryRequest {
	pub user_id: String,
	pub thread_id: String,
}

/// Bounded per-thread conversation memory.
///
/// Neither operation surfaces an error: an unreachable store gets one reconnect attempt, after
/// which writes are dropped and reads come back empty.
#[derive(Clone)]
pub struct TranscriptStore {
	backend: Arc<dyn TurnBackend>,
}
impl TranscriptStore {
	pub fn new(backend: Arc<dyn TurnBackend>) -> Self {
		Self { backend }
	}

	pub async fn append(&self, turn: &ChatTurn) {
		if !self.ensure_available().await {
			tracing::warn!(
				user_id = %turn.user_id,
				thread_id = %turn.thread_id,
				"Dropping conversation turn because the transcript store is unavailable."
			);

			return;
		}

		if let Err(err) = self.backend.insert_turn(turn).await {
			tracing::error!(
				error = %err,
				user_id = %turn.user_id,
				thread_id = %turn.thread_id,
				"Failed to persist conversation turn."
			);
		}
	}

	/// The last `limit` turns of a thread in chronological order.
	pub async fn recent(&self, user_id: &str, thread_id: &str, limit: u32) -> Vec<HistoryEntry> {
		if limit == 0 {
			return Vec::new();
		}
		if !self.ensure_available().await {
			tracing::warn!(
				user_id,
				thread_id,
				"Returning empty history because the transcript store is unavailable."
			);

			return Vec::new();
		}

		match self.backend.find_thread_turns(user_id, thread_id, limit).await {
			Ok(turns) => {
				let skip = turns.len().saturating_sub(limit as usize);

				turns
					.into_iter()
					.skip(skip)
					.map(|turn| HistoryEntry { question: turn.question, answer: turn.answer })
					.collect()
			},
			Err(err) => {
				tracing::error!(error = %err, user_id, thread_id, "Failed to read conversation history.");

				Vec::new()
			},
		}
	}

	async fn ensure_available(&self) -> bool {
		if self.backend.is_available().await {
			return true;
		}

		tracing::warn!("Transcript store is unavailable. Attempting to reconnect.");

		match self.backend.reconnect().await {
			Ok(()) => true,
			Err(err) => {
				tracing::warn!(error = %err, "Transcript store reconnect failed.");

				false
			},
		}
	}
}

impl LumenService {
	pub async fn history(&self, req: HistoryRequest) -> Result<Vec<HistoryEntry>> {
		if req.user_id.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "user_id must be non-empty.".to_string() });
		}
		if req.thread_id.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "thread_id must be non-empty.".to_string(),
			});
		}

		Ok(self
			.transcript
			.recent(&req.user_id, &req.thread_id, self.cfg.conversation.max_history_length)
			.await)
	}
}
