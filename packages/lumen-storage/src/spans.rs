use sqlx::{Postgres, QueryBuilder};

use crate::{Result, db::Db, models::MetricSpanRow};

/// Writes a batch of finished spans in one statement.
///
/// Span ids are the primary key, so replaying a batch after a partial failure is harmless.
pub async fn insert_spans(db: &Db, spans: &[MetricSpanRow]) -> Result<u64> {
	if spans.is_empty() {
		return Ok(0);
	}

	let pool = db.pool().await;
	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"INSERT INTO metric_spans (span_id, name, tags, start_time, end_time, duration_seconds, \
		 message, result, error) ",
	);

	builder.push_values(spans, |mut row, span| {
		row.push_bind(span.span_id)
			.push_bind(span.name.as_str())
			.push_bind(&span.tags)
			.push_bind(span.start_time)
			.push_bind(span.end_time)
			.push_bind(span.duration_seconds)
			.push_bind(span.message.as_str())
			.push_bind(span.result.as_deref())
			.push_bind(span.error.as_deref());
	});
	builder.push(" ON CONFLICT (span_id) DO NOTHING");

	let result = builder.build().execute(&pool).await?;

	Ok(result.rows_affected())
}
