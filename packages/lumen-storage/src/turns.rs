use uuid::Uuid;

use crate::{Result, db::Db, models::ChatTurn};

pub async fn insert_turn(db: &Db, turn: &ChatTurn) -> Result<()> {
	let pool = db.pool().await;

	sqlx::query(
		"\
INSERT INTO chat_turns (turn_id, user_id, thread_id, question, answer, ts)
VALUES ($1, $2, $3, $4, $5, $6)",
	)
	.bind(turn.turn_id)
	.bind(turn.user_id.as_str())
	.bind(turn.thread_id.as_str())
	.bind(turn.question.as_str())
	.bind(turn.answer.as_str())
	.bind(turn.ts)
	.execute(&pool)
	.await?;

	Ok(())
}

/// Most recent `limit` turns of one thread, oldest first.
pub async fn recent_thread_turns(
	db: &Db,
	user_id: &str,
	thread_id: &str,
	limit: i64,
) -> Result<Vec<ChatTurn>> {
	let pool = db.pool().await;
	let rows = sqlx::query_as::<_, ChatTurn>(
		"\
SELECT turn_id, user_id, thread_id, question, answer, ts
FROM (
	SELECT turn_id, user_id, thread_id, question, answer, ts, seq
	FROM chat_turns
	WHERE user_id = $1 AND thread_id = $2
	ORDER BY ts DESC, seq DESC
	LIMIT $3
) recent
ORDER BY ts ASC, seq ASC",
	)
	.bind(user_id)
	.bind(thread_id)
	.bind(limit)
	.fetch_all(&pool)
	.await?;

	Ok(rows)
}

/// Every turn of a user across all threads, newest first.
pub async fn list_user_turns(db: &Db, user_id: &str) -> Result<Vec<ChatTurn>> {
	let pool = db.pool().await;
	let rows = sqlx::query_as::<_, ChatTurn>(
		"\
SELECT turn_id, user_id, thread_id, question, answer, ts
FROM chat_turns
WHERE user_id = $1
ORDER BY ts DESC, seq DESC",
	)
	.bind(user_id)
	.fetch_all(&pool)
	.await?;

	Ok(rows)
}

pub async fn delete_turn(db: &Db, turn_id: Uuid) -> Result<bool> {
	let pool = db.pool().await;
	let result =
		sqlx::query("DELETE FROM chat_turns WHERE turn_id = $1").bind(turn_id).execute(&pool).await?;

	Ok(result.rows_affected() > 0)
}

pub async fn distinct_user_ids(db: &Db) -> Result<Vec<String>> {
	let pool = db.pool().await;
	let ids = sqlx::query_scalar::<_, String>(
		"SELECT DISTINCT user_id FROM chat_turns ORDER BY user_id",
	)
	.fetch_all(&pool)
	.await?;

	Ok(ids)
}
