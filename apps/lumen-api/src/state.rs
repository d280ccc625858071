use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;

use lumen_service::LumenService;
use lumen_storage::{db::Db, qdrant::QdrantStore};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<LumenService>,
}
impl AppState {
	pub async fn new(config: lumen_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let qdrant = QdrantStore::new(&config.storage.qdrant)?;
		let service = LumenService::new(config, Arc::new(db), Arc::new(qdrant));

		Ok(Self::from_service(service))
	}

	pub fn from_service(service: LumenService) -> Self {
		Self { service: Arc::new(service) }
	}

	/// Periodically persists closed telemetry spans until the handle is aborted.
	pub fn spawn_flush_loop(&self) -> JoinHandle<()> {
		let telemetry = self.service.telemetry.clone();
		let sink = self.service.backends.spans.clone();
		let interval = Duration::from_secs(self.service.cfg.telemetry.flush_interval_secs);

		tokio::spawn(telemetry.run_flush_loop(sink, interval))
	}

	pub async fn flush_telemetry(&self) -> lumen_service::Result<usize> {
		self.service.telemetry.flush(self.service.backends.spans.as_ref()).await
	}
}
