pub mod worker;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lumen_cli::ConfigArgs;
use lumen_service::RetentionMaintainer;
use lumen_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = lumen_cli::VERSION,
	rename_all = "kebab",
	styles = lumen_cli::styles(),
)]
pub struct Args {
	#[command(flatten)]
	pub config: ConfigArgs,
	/// Run a single retention sweep and exit.
	#[arg(long)]
	pub once: bool,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = lumen_config::load(&args.config.config)?;
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	// Lazy so an unreachable Postgres delays sweeps instead of stopping the worker.
	let db = Db::connect_lazy(&config.storage.postgres)?;
	let maintainer = RetentionMaintainer::from_config(&config, Arc::new(db));

	if args.once {
		return worker::sweep_once(&maintainer).await;
	}

	worker::run_worker(maintainer).await
}
