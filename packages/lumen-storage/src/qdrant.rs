use std::collections::HashMap;

use qdrant_client::qdrant::{Query, QueryPointsBuilder, SearchParamsBuilder, Value, value::Kind};

use crate::{Result, models::FragmentKey};

pub const DENSE_VECTOR_NAME: &str = "dense";
pub const SOURCE_ID_KEY: &str = "source_id";
pub const LOCATOR_KEY: &str = "locator";

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &lumen_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Nearest fragments in the order Qdrant ranks them.
	///
	/// `num_candidates` widens the HNSW beam (`ef`); `limit` caps the result. Points whose payload
	/// lacks a source id or locator are skipped.
	pub async fn nearest_fragments(
		&self,
		vector: Vec<f32>,
		num_candidates: u32,
		limit: u32,
	) -> Result<Vec<FragmentKey>> {
		let search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.using(DENSE_VECTOR_NAME)
			.params(SearchParamsBuilder::default().hnsw_ef(u64::from(num_candidates)))
			.with_payload(true)
			.with_vectors(false)
			.limit(u64::from(limit));
		let response = self.client.query(search).await?;
		let mut keys = Vec::with_capacity(response.result.len());

		for point in response.result {
			match fragment_key(&point.payload) {
				Some(key) => keys.push(key),
				None => tracing::warn!(
					collection = %self.collection,
					"Skipping fragment point without source_id or locator payload."
				),
			}
		}

		Ok(keys)
	}
}

pub fn fragment_key(payload: &HashMap<String, Value>) -> Option<FragmentKey> {
	let source_id = match &payload.get(SOURCE_ID_KEY)?.kind {
		Some(Kind::StringValue(text)) if !text.is_empty() => text.clone(),
		_ => return None,
	};
	let locator = match &payload.get(LOCATOR_KEY)?.kind {
		Some(Kind::IntegerValue(value)) => *value,
		Some(Kind::DoubleValue(value)) if value.fract() == 0.0 => *value as i64,
		_ => return None,
	};

	Some(FragmentKey { source_id, locator })
}
