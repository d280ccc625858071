pub mod answer;
pub mod backends;
pub mod feedback;
pub mod maintenance;
pub mod prompt;
pub mod retriever;
pub mod telemetry;
pub mod transcript;

mod error;

pub use answer::{AnswerPayload, AnswerRequest, AnswerResponse, AnswerStage};
pub use error::{Error, Result};
pub use feedback::{FeedbackRequest, FeedbackResponse};
pub use lumen_providers::embedding::EmbeddingFailure;
pub use maintenance::{RetentionMaintainer, SweepReport};
pub use prompt::{ContextVerdict, GenerationPrompt};
pub use retriever::{RetrievalFailure, RetrievalOutcome, RetrievedFragment};
pub use telemetry::{SpanClose, SpanHandle, TelemetryRecorder};
pub use transcript::{HistoryEntry, HistoryRequest, TranscriptStore};

use std::{future::Future, pin::Pin, sync::Arc};

use uuid::Uuid;

use lumen_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use lumen_providers::{chat, embedding};
use lumen_storage::{
	db::Db,
	models::{ChatTurn, FeedbackRow, FragmentKey, MetricSpanRow},
	qdrant::QdrantStore,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	/// A vector of `cfg.dimensions` values, or the reason there is none.
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		question: &'a str,
	) -> BoxFuture<'a, Result<Vec<f32>, EmbeddingFailure>>;
}

/// Decides whether a question needs retrieved context before generation.
pub trait ClassifierProvider
where
	Self: Send + Sync,
{
	fn classify<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		question: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<ContextVerdict>>;
}

pub trait GenerationProvider
where
	Self: Send + Sync,
{
	/// `Ok(None)` means the model produced no usable response.
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		prompt: &'a GenerationPrompt,
	) -> BoxFuture<'a, color_eyre::Result<Option<Generation>>>;
}

/// Persistent home of conversation turns.
pub trait TurnBackend
where
	Self: Send + Sync,
{
	fn is_available(&self) -> BoxFuture<'_, bool>;

	fn reconnect(&self) -> BoxFuture<'_, Result<()>>;

	/// One-time setup before the first sweep, such as schema bootstrap.
	fn prepare(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async { Ok(()) })
	}

	fn insert_turn<'a>(&'a self, turn: &'a ChatTurn) -> BoxFuture<'a, Result<()>>;

	/// The most recent `limit` turns of a thread, oldest first.
	fn find_thread_turns<'a>(
		&'a self,
		user_id: &'a str,
		thread_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<ChatTurn>>>;

	/// Every turn of a user across threads, newest first.
	fn find_user_turns<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Vec<ChatTurn>>>;

	fn delete_turn(&self, turn_id: Uuid) -> BoxFuture<'_, Result<bool>>;

	fn distinct_user_ids(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

pub trait FragmentSearch
where
	Self: Send + Sync,
{
	fn nearest(
		&self,
		vector: Vec<f32>,
		num_candidates: u32,
		limit: u32,
	) -> BoxFuture<'_, Result<Vec<FragmentKey>>>;
}

pub trait FragmentLookup
where
	Self: Send + Sync,
{
	fn fragment_text<'a>(&'a self, key: &'a FragmentKey) -> BoxFuture<'a, Result<Option<String>>>;
}

pub trait SpanSink
where
	Self: Send + Sync,
{
	fn write_spans<'a>(&'a self, batch: &'a [MetricSpanRow]) -> BoxFuture<'a, Result<()>>;
}

pub trait FeedbackSink
where
	Self: Send + Sync,
{
	fn insert_feedback<'a>(&'a self, row: &'a FeedbackRow) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
	pub answer_text: String,
	pub total_tokens: u64,
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub classifier: Arc<dyn ClassifierProvider>,
	pub generation: Arc<dyn GenerationProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		classifier: Arc<dyn ClassifierProvider>,
		generation: Arc<dyn GenerationProvider>,
	) -> Self {
		Self { embedding, classifier, generation }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), classifier: provider.clone(), generation: provider }
	}
}

#[derive(Clone)]
pub struct Backends {
	pub turns: Arc<dyn TurnBackend>,
	pub search: Arc<dyn FragmentSearch>,
	pub lookup: Arc<dyn FragmentLookup>,
	pub spans: Arc<dyn SpanSink>,
	pub feedback: Arc<dyn FeedbackSink>,
}
impl Backends {
	/// Postgres for turns, fragment text, spans and feedback; Qdrant for similarity search.
	pub fn postgres(db: Arc<Db>, qdrant: Arc<QdrantStore>) -> Self {
		Self {
			turns: db.clone(),
			search: qdrant,
			lookup: db.clone(),
			spans: db.clone(),
			feedback: db,
		}
	}
}

pub struct LumenService {
	pub cfg: Config,
	pub backends: Backends,
	pub providers: Providers,
	pub transcript: TranscriptStore,
	pub telemetry: Arc<TelemetryRecorder>,
}
impl LumenService {
	pub fn new(cfg: Config, db: Arc<Db>, qdrant: Arc<QdrantStore>) -> Self {
		Self::with_parts(cfg, Backends::postgres(db, qdrant), Providers::default())
	}

	pub fn with_parts(cfg: Config, backends: Backends, providers: Providers) -> Self {
		let transcript = TranscriptStore::new(backends.turns.clone());
		let telemetry = Arc::new(TelemetryRecorder::new(cfg.telemetry.max_buffered_spans as usize));

		Self { cfg, backends, providers, transcript, telemetry }
	}
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		question: &'a str,
	) -> BoxFuture<'a, Result<Vec<f32>, EmbeddingFailure>> {
		Box::pin(embedding::embed_question(cfg, question))
	}
}

impl ClassifierProvider for DefaultProviders {
	fn classify<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		question: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<ContextVerdict>> {
		Box::pin(async move {
			let messages = prompt::classifier_messages(question);
			let completion = chat::complete(cfg, &messages).await?.ok_or_else(|| {
				color_eyre::eyre::eyre!("Context classifier returned no response.")
			})?;

			Ok(ContextVerdict::from_model_text(&completion.content))
		})
	}
}

impl GenerationProvider for DefaultProviders {
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		prompt: &'a GenerationPrompt,
	) -> BoxFuture<'a, color_eyre::Result<Option<Generation>>> {
		Box::pin(async move {
			let messages = prompt.messages();
			let completion = chat::complete(cfg, &messages).await?;

			Ok(completion.map(|completion| Generation {
				answer_text: completion.content,
				total_tokens: completion.total_tokens,
			}))
		})
	}
}
