use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::{sync::RwLock, time};

use crate::{Error, Result, schema};

/// Owned Postgres connector shared by every component that touches the database.
///
/// The pool sits behind a lock so a failed health probe can swap in a freshly
/// established pool without callers holding on to a dead one.
pub struct Db {
	cfg: lumen_config::Postgres,
	pool: RwLock<PgPool>,
}
impl Db {
	pub async fn connect(cfg: &lumen_config::Postgres) -> Result<Self> {
		let pool = open_pool(cfg).await?;

		Ok(Self { cfg: cfg.clone(), pool: RwLock::new(pool) })
	}

	/// Connects on first use instead of up front, so a process can start while Postgres is down.
	pub fn connect_lazy(cfg: &lumen_config::Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect_lazy(&cfg.dsn)?;

		Ok(Self::from_pool(cfg, pool))
	}

	/// Wraps an existing pool, e.g. a lazily connected one.
	pub fn from_pool(cfg: &lumen_config::Postgres, pool: PgPool) -> Self {
		Self { cfg: cfg.clone(), pool: RwLock::new(pool) }
	}

	pub async fn pool(&self) -> PgPool {
		self.pool.read().await.clone()
	}

	pub async fn ping(&self) -> bool {
		let pool = self.pool().await;

		sqlx::query("SELECT 1").execute(&pool).await.is_ok()
	}

	/// Replaces the pool with a newly established one, retrying per the configured policy.
	pub async fn reconnect(&self) -> Result<()> {
		let fresh = open_pool(&self.cfg).await?;

		*self.pool.write().await = fresh;

		tracing::info!("Postgres pool re-established.");

		Ok(())
	}

	pub async fn ensure_schema(&self) -> Result<()> {
		let sql = schema::render_schema();
		let lock_id: i64 = 5_871_203;
		let pool = self.pool().await;
		// Advisory locks are held per connection. Use a single transaction so the lock is scoped to
		// one connection and automatically released when the transaction ends.
		let mut tx = pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(lock_id).execute(&mut *tx).await?;

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}
}

async fn open_pool(cfg: &lumen_config::Postgres) -> Result<PgPool> {
	let attempts = cfg.connect_attempts.max(1);
	let mut last_err = None;

	for attempt in 1..=attempts {
		match PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await {
			Ok(pool) => return Ok(pool),
			Err(err) => {
				tracing::warn!(error = %err, attempt, attempts, "Postgres connection attempt failed.");

				last_err = Some(err);
			},
		}

		if attempt < attempts {
			time::sleep(Duration::from_millis(cfg.connect_backoff_ms)).await;
		}
	}

	let reason = last_err.map(|err| err.to_string()).unwrap_or_else(|| "no attempt made".to_string());

	Err(Error::Unavailable(format!("Postgres unreachable after {attempts} attempts: {reason}.")))
}
