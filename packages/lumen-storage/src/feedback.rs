use crate::{Result, db::Db, models::FeedbackRow};

pub async fn insert_feedback(db: &Db, row: &FeedbackRow) -> Result<()> {
	let pool = db.pool().await;

	sqlx::query(
		"\
INSERT INTO feedback (feedback_id, text, date, emoji, question, response, response_time)
VALUES ($1, $2, $3, $4, $5, $6, $7)",
	)
	.bind(row.feedback_id)
	.bind(row.text.as_str())
	.bind(row.date)
	.bind(row.emoji.as_deref())
	.bind(row.question.as_deref())
	.bind(row.response.as_deref())
	.bind(row.response_time)
	.execute(&pool)
	.await?;

	Ok(())
}

pub async fn list_feedback(db: &Db, limit: i64) -> Result<Vec<FeedbackRow>> {
	let pool = db.pool().await;
	let rows = sqlx::query_as::<_, FeedbackRow>(
		"\
SELECT feedback_id, text, date, emoji, question, response, response_time
FROM feedback
ORDER BY created_at DESC
LIMIT $1",
	)
	.bind(limit)
	.fetch_all(&pool)
	.await?;

	Ok(rows)
}
