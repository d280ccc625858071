use crate::{Result, db::Db, models::FragmentKey};

pub async fn fragment_text(db: &Db, key: &FragmentKey) -> Result<Option<String>> {
	let pool = db.pool().await;
	let text = sqlx::query_scalar::<_, String>(
		"SELECT text FROM knowledge_fragments WHERE source_id = $1 AND locator = $2",
	)
	.bind(key.source_id.as_str())
	.bind(key.locator)
	.fetch_optional(&pool)
	.await?;

	Ok(text)
}

/// Ingestion lives outside this service; this is the write path it (and tests) use.
pub async fn upsert_fragment(db: &Db, key: &FragmentKey, text: &str) -> Result<()> {
	let pool = db.pool().await;

	sqlx::query(
		"\
INSERT INTO knowledge_fragments (source_id, locator, text)
VALUES ($1, $2, $3)
ON CONFLICT (source_id, locator) DO UPDATE SET text = EXCLUDED.text",
	)
	.bind(key.source_id.as_str())
	.bind(key.locator)
	.bind(text)
	.execute(&pool)
	.await?;

	Ok(())
}
