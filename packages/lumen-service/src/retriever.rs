use lumen_storage::models::FragmentKey;

use crate::{EmbeddingFailure, LumenService};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RetrievedFragment {
	pub source_id: String,
	pub locator: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
	Found { fragments: Vec<RetrievedFragment>, approx_tokens: u32 },
	Failed(RetrievalFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalFailure {
	/// The question could not be embedded. Treated as "no context", never as an error.
	Embedding(EmbeddingFailure),
	/// Search or hydration failed.
	Backend(String),
}

impl LumenService {
	/// Two-phase lookup: vector similarity for fragment keys, then text hydration per key.
	///
	/// Fragments keep Qdrant's order. A fragment whose text is missing stays in the result
	/// without `text`.
	pub async fn search(&self, question: &str) -> RetrievalOutcome {
		let vector =
			match self.providers.embedding.embed(&self.cfg.providers.embedding, question).await {
				Ok(vector) => vector,
				Err(failure) => {
					tracing::warn!(error = %failure, "Embedding failed. Continuing without context.");

					return RetrievalOutcome::Failed(RetrievalFailure::Embedding(failure));
				},
			};
		let retrieval = &self.cfg.retrieval;
		let keys = match self
			.backends
			.search
			.nearest(vector, retrieval.num_candidates, retrieval.limit)
			.await
		{
			Ok(keys) => keys,
			Err(err) => {
				tracing::error!(error = %err, "Similarity search failed.");

				return RetrievalOutcome::Failed(RetrievalFailure::Backend(err.to_string()));
			},
		};
		let mut fragments = Vec::with_capacity(keys.len());

		for key in keys {
			match self.backends.lookup.fragment_text(&key).await {
				Ok(text) => {
					if text.is_none() {
						tracing::debug!(
							source_id = %key.source_id,
							locator = key.locator,
							"Fragment text not found."
						);
					}

					let FragmentKey { source_id, locator } = key;

					fragments.push(RetrievedFragment { source_id, locator, text });
				},
				Err(err) => {
					tracing::error!(
						error = %err,
						source_id = %key.source_id,
						locator = key.locator,
						"Fragment hydration failed."
					);

					return RetrievalOutcome::Failed(RetrievalFailure::Backend(err.to_string()));
				},
			}
		}

		RetrievalOutcome::Found { fragments, approx_tokens: retrieval.approx_token_cost }
	}
}
