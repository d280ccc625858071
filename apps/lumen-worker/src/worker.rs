use color_eyre::Result;

use lumen_service::RetentionMaintainer;

pub async fn sweep_once(maintainer: &RetentionMaintainer) -> Result<()> {
	let report = maintainer.prepare_and_sweep().await?;

	tracing::info!(users = report.users, deleted = report.deleted, "Chat history sweep finished.");

	Ok(())
}

/// Sweeps on the configured interval until interrupted.
pub async fn run_worker(maintainer: RetentionMaintainer) -> Result<()> {
	tracing::info!("Retention worker started.");

	tokio::select! {
		_ = maintainer.run() => {},
		signal = tokio::signal::ctrl_c() => {
			signal?;

			tracing::info!("Shutdown signal received. Stopping retention worker.");
		},
	}

	Ok(())
}
