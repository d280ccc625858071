use std::{
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

use tokio::time;

use crate::{Result, TurnBackend};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
	pub users: usize,
	pub deleted: usize,
}

/// Keeps stored history bounded independently of the read-time trim.
///
/// The sweep is per user across all of that user's threads, so a user never keeps more than
/// `max_history_length` turns in total after a pass.
pub struct RetentionMaintainer {
	turns: Arc<dyn TurnBackend>,
	max_history_length: u32,
	sleep_interval: Duration,
	prepared: AtomicBool,
}
impl RetentionMaintainer {
	pub fn new(
		turns: Arc<dyn TurnBackend>,
		max_history_length: u32,
		sleep_interval: Duration,
	) -> Self {
		Self { turns, max_history_length, sleep_interval, prepared: AtomicBool::new(false) }
	}

	pub fn from_config(cfg: &lumen_config::Config, turns: Arc<dyn TurnBackend>) -> Self {
		Self::new(
			turns,
			cfg.conversation.max_history_length,
			Duration::from_secs(cfg.maintenance.sleep_interval_secs),
		)
	}

	/// Prepares the backend on first success, then sweeps.
	///
	/// Preparation is retried on every call until it succeeds, so a store that is down at startup
	/// only delays the first sweep.
	pub async fn prepare_and_sweep(&self) -> Result<SweepReport> {
		if !self.prepared.load(Ordering::SeqCst) {
			self.ensure_available().await?;
			self.turns.prepare().await?;
			self.prepared.store(true, Ordering::SeqCst);

			tracing::info!("Transcript store prepared for retention sweeps.");
		}

		self.sweep_once().await
	}

	pub async fn sweep_once(&self) -> Result<SweepReport> {
		self.ensure_available().await?;

		let mut report = SweepReport::default();

		for user_id in self.turns.distinct_user_ids().await? {
			let turns = self.turns.find_user_turns(&user_id).await?;

			report.users += 1;

			for turn in turns.into_iter().skip(self.max_history_length as usize) {
				if self.turns.delete_turn(turn.turn_id).await? {
					report.deleted += 1;
				}
			}
		}

		Ok(report)
	}

	pub async fn run(&self) {
		loop {
			match self.prepare_and_sweep().await {
				Ok(report) => tracing::info!(
					users = report.users,
					deleted = report.deleted,
					"Chat history sweep finished."
				),
				Err(err) => tracing::error!(
					error = %err,
					"Chat history sweep failed. Unconstrained chat history may result."
				),
			}

			time::sleep(self.sleep_interval).await;
		}
	}

	async fn ensure_available(&self) -> Result<()> {
		if self.turns.is_available().await {
			return Ok(());
		}

		tracing::warn!("Transcript store is unavailable. Attempting to reconnect before sweep.");

		self.turns.reconnect().await
	}
}
