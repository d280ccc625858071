use uuid::Uuid;

use lumen_storage::{
	db::Db,
	feedback, fragments,
	models::{ChatTurn, FeedbackRow, FragmentKey, MetricSpanRow},
	qdrant::QdrantStore,
	spans, turns,
};

use crate::{
	BoxFuture, FeedbackSink, FragmentLookup, FragmentSearch, Result, SpanSink, TurnBackend,
};

impl TurnBackend for Db {
	fn is_available(&self) -> BoxFuture<'_, bool> {
		Box::pin(self.ping())
	}

	fn reconnect(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { Ok(Db::reconnect(self).await?) })
	}

	fn prepare(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { Ok(self.ensure_schema().await?) })
	}

	fn insert_turn<'a>(&'a self, turn: &'a ChatTurn) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(turns::insert_turn(self, turn).await?) })
	}

	fn find_thread_turns<'a>(
		&'a self,
		user_id: &'a str,
		thread_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<ChatTurn>>> {
		Box::pin(async move {
			Ok(turns::recent_thread_turns(self, user_id, thread_id, i64::from(limit)).await?)
		})
	}

	fn find_user_turns<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Vec<ChatTurn>>> {
		Box::pin(async move { Ok(turns::list_user_turns(self, user_id).await?) })
	}

	fn delete_turn(&self, turn_id: Uuid) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move { Ok(turns::delete_turn(self, turn_id).await?) })
	}

	fn distinct_user_ids(&self) -> BoxFuture<'_, Result<Vec<String>>> {
		Box::pin(async move { Ok(turns::distinct_user_ids(self).await?) })
	}
}

impl FragmentLookup for Db {
	fn fragment_text<'a>(&'a self, key: &'a FragmentKey) -> BoxFuture<'a, Result<Option<String>>> {
		Box::pin(async move { Ok(fragments::fragment_text(self, key).await?) })
	}
}

impl SpanSink for Db {
	fn write_spans<'a>(&'a self, batch: &'a [MetricSpanRow]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let written = spans::insert_spans(self, batch).await?;

			tracing::debug!(written, batch = batch.len(), "Metric spans persisted.");

			Ok(())
		})
	}
}

impl FeedbackSink for Db {
	fn insert_feedback<'a>(&'a self, row: &'a FeedbackRow) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(feedback::insert_feedback(self, row).await?) })
	}
}

impl FragmentSearch for QdrantStore {
	fn nearest(
		&self,
		vector: Vec<f32>,
		num_candidates: u32,
		limit: u32,
	) -> BoxFuture<'_, Result<Vec<FragmentKey>>> {
		Box::pin(async move { Ok(self.nearest_fragments(vector, num_candidates, limit).await?) })
	}
}
