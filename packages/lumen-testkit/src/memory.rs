//! In-memory backends and scripted providers for tests that run without Postgres, Qdrant or a
//! model endpoint.

use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex, MutexGuard,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
};

use color_eyre::eyre;
use uuid::Uuid;

use lumen_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use lumen_service::{
	Backends, BoxFuture, ClassifierProvider, ContextVerdict, EmbeddingFailure, EmbeddingProvider,
	Error, FeedbackSink, FragmentLookup, FragmentSearch, Generation, GenerationPrompt,
	GenerationProvider, LumenService, Providers, Result, SpanSink, TurnBackend,
};
use lumen_storage::models::{ChatTurn, FeedbackRow, FragmentKey, MetricSpanRow};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}

fn unavailable(what: &str) -> Error {
	Error::Unavailable { message: format!("{what} is offline.") }
}

/// Turn store with switchable availability. Insertion order breaks timestamp ties.
pub struct MemoryTurnStore {
	turns: Mutex<Vec<ChatTurn>>,
	available: AtomicBool,
	reconnect_succeeds: AtomicBool,
	reconnects: AtomicUsize,
	prepares: AtomicUsize,
}
impl MemoryTurnStore {
	pub fn new() -> Self {
		Self {
			turns: Mutex::new(Vec::new()),
			available: AtomicBool::new(true),
			reconnect_succeeds: AtomicBool::new(true),
			reconnects: AtomicUsize::new(0),
			prepares: AtomicUsize::new(0),
		}
	}

	/// Takes the store offline. `recoverable` decides whether a reconnect brings it back.
	pub fn go_offline(&self, recoverable: bool) {
		self.available.store(false, Ordering::SeqCst);
		self.reconnect_succeeds.store(recoverable, Ordering::SeqCst);
	}

	pub fn reconnects(&self) -> usize {
		self.reconnects.load(Ordering::SeqCst)
	}

	pub fn prepares(&self) -> usize {
		self.prepares.load(Ordering::SeqCst)
	}

	pub fn len(&self) -> usize {
		lock(&self.turns).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn all(&self) -> Vec<ChatTurn> {
		lock(&self.turns).clone()
	}

	pub fn seed(&self, user_id: &str, thread_id: &str, question: &str, answer: &str, ts: i64) {
		lock(&self.turns).push(ChatTurn {
			turn_id: Uuid::new_v4(),
			user_id: user_id.to_string(),
			thread_id: thread_id.to_string(),
			question: question.to_string(),
			answer: answer.to_string(),
			ts,
		});
	}

	fn check(&self) -> Result<()> {
		if self.available.load(Ordering::SeqCst) { Ok(()) } else { Err(unavailable("Turn store")) }
	}
}
impl Default for MemoryTurnStore {
	fn default() -> Self {
		Self::new()
	}
}
impl TurnBackend for MemoryTurnStore {
	fn is_available(&self) -> BoxFuture<'_, bool> {
		Box::pin(async move { self.available.load(Ordering::SeqCst) })
	}

	fn reconnect(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			self.reconnects.fetch_add(1, Ordering::SeqCst);

			if self.reconnect_succeeds.load(Ordering::SeqCst) {
				self.available.store(true, Ordering::SeqCst);

				Ok(())
			} else {
				Err(unavailable("Turn store"))
			}
		})
	}

	fn prepare(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			self.check()?;
			self.prepares.fetch_add(1, Ordering::SeqCst);

			Ok(())
		})
	}

	fn insert_turn<'a>(&'a self, turn: &'a ChatTurn) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.check()?;

			lock(&self.turns).push(turn.clone());

			Ok(())
		})
	}

	fn find_thread_turns<'a>(
		&'a self,
		user_id: &'a str,
		thread_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<ChatTurn>>> {
		Box::pin(async move {
			self.check()?;

			let mut turns = lock(&self.turns)
				.iter()
				.filter(|turn| turn.user_id == user_id && turn.thread_id == thread_id)
				.cloned()
				.collect::<Vec<_>>();

			turns.sort_by_key(|turn| turn.ts);

			let skip = turns.len().saturating_sub(limit as usize);

			Ok(turns.split_off(skip))
		})
	}

	fn find_user_turns<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Vec<ChatTurn>>> {
		Box::pin(async move {
			self.check()?;

			let mut turns = lock(&self.turns)
				.iter()
				.filter(|turn| turn.user_id == user_id)
				.cloned()
				.collect::<Vec<_>>();

			turns.sort_by_key(|turn| turn.ts);
			turns.reverse();

			Ok(turns)
		})
	}

	fn delete_turn(&self, turn_id: Uuid) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move {
			self.check()?;

			let mut turns = lock(&self.turns);
			let before = turns.len();

			turns.retain(|turn| turn.turn_id != turn_id);

			Ok(turns.len() < before)
		})
	}

	fn distinct_user_ids(&self) -> BoxFuture<'_, Result<Vec<String>>> {
		Box::pin(async move {
			self.check()?;

			let mut ids = lock(&self.turns).iter().map(|turn| turn.user_id.clone()).collect::<Vec<_>>();

			ids.sort();
			ids.dedup();

			Ok(ids)
		})
	}
}

/// Fixed similarity results plus a fragment text table.
#[derive(Default)]
pub struct MemoryFragments {
	hits: Mutex<Vec<FragmentKey>>,
	texts: Mutex<HashMap<FragmentKey, String>>,
	search_fails: AtomicBool,
	lookup_fails: AtomicBool,
	searches: Mutex<Vec<(u32, u32)>>,
}
impl MemoryFragments {
	pub fn set_hits(&self, hits: Vec<FragmentKey>) {
		*lock(&self.hits) = hits;
	}

	pub fn insert_text(&self, key: FragmentKey, text: &str) {
		lock(&self.texts).insert(key, text.to_string());
	}

	pub fn fail_search(&self, fail: bool) {
		self.search_fails.store(fail, Ordering::SeqCst);
	}

	pub fn fail_lookup(&self, fail: bool) {
		self.lookup_fails.store(fail, Ordering::SeqCst);
	}

	/// `(num_candidates, limit)` of every search issued so far.
	pub fn searches(&self) -> Vec<(u32, u32)> {
		lock(&self.searches).clone()
	}
}
impl FragmentSearch for MemoryFragments {
	fn nearest(
		&self,
		_vector: Vec<f32>,
		num_candidates: u32,
		limit: u32,
	) -> BoxFuture<'_, Result<Vec<FragmentKey>>> {
		Box::pin(async move {
			lock(&self.searches).push((num_candidates, limit));

			if self.search_fails.load(Ordering::SeqCst) {
				return Err(Error::Qdrant { message: "Search index is offline.".to_string() });
			}

			Ok(lock(&self.hits).iter().take(limit as usize).cloned().collect())
		})
	}
}
impl FragmentLookup for MemoryFragments {
	fn fragment_text<'a>(&'a self, key: &'a FragmentKey) -> BoxFuture<'a, Result<Option<String>>> {
		Box::pin(async move {
			if self.lookup_fails.load(Ordering::SeqCst) {
				return Err(unavailable("Fragment store"));
			}

			Ok(lock(&self.texts).get(key).cloned())
		})
	}
}

#[derive(Default)]
pub struct MemorySpanSink {
	rows: Mutex<Vec<MetricSpanRow>>,
	fails: AtomicBool,
}
impl MemorySpanSink {
	pub fn rows(&self) -> Vec<MetricSpanRow> {
		lock(&self.rows).clone()
	}

	pub fn fail(&self, fail: bool) {
		self.fails.store(fail, Ordering::SeqCst);
	}
}
impl SpanSink for MemorySpanSink {
	fn write_spans<'a>(&'a self, batch: &'a [MetricSpanRow]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if self.fails.load(Ordering::SeqCst) {
				return Err(unavailable("Span sink"));
			}

			lock(&self.rows).extend_from_slice(batch);

			Ok(())
		})
	}
}

#[derive(Default)]
pub struct MemoryFeedbackSink {
	rows: Mutex<Vec<FeedbackRow>>,
	fails: AtomicBool,
}
impl MemoryFeedbackSink {
	pub fn rows(&self) -> Vec<FeedbackRow> {
		lock(&self.rows).clone()
	}

	pub fn fail(&self, fail: bool) {
		self.fails.store(fail, Ordering::SeqCst);
	}
}
impl FeedbackSink for MemoryFeedbackSink {
	fn insert_feedback<'a>(&'a self, row: &'a FeedbackRow) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if self.fails.load(Ordering::SeqCst) {
				return Err(Error::Storage { message: "Feedback table is offline.".to_string() });
			}

			lock(&self.rows).push(row.clone());

			Ok(())
		})
	}
}

/// Returns a constant vector of the configured dimension, or fails on demand.
pub struct StubEmbedding {
	pub vector_dim: u32,
	fails: AtomicBool,
	calls: AtomicUsize,
}
impl StubEmbedding {
	pub fn new(vector_dim: u32) -> Self {
		Self { vector_dim, fails: AtomicBool::new(false), calls: AtomicUsize::new(0) }
	}

	pub fn fail(&self, fail: bool) {
		self.fails.store(fail, Ordering::SeqCst);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl EmbeddingProvider for StubEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		_question: &'a str,
	) -> BoxFuture<'a, std::result::Result<Vec<f32>, EmbeddingFailure>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let fails = self.fails.load(Ordering::SeqCst);
		let vector = vec![0.1; self.vector_dim as usize];

		Box::pin(async move {
			if fails {
				return Err(EmbeddingFailure::Request("Embedding endpoint timed out.".to_string()));
			}

			Ok(vector)
		})
	}
}

/// Answers with the reply text a model would give; the verdict goes through the same mapping the
/// HTTP classifier uses.
pub struct ScriptedClassifier {
	reply: Mutex<Option<String>>,
	calls: AtomicUsize,
}
impl ScriptedClassifier {
	pub fn new(reply: &str) -> Self {
		Self { reply: Mutex::new(Some(reply.to_string())), calls: AtomicUsize::new(0) }
	}

	pub fn reply_with(&self, reply: &str) {
		*lock(&self.reply) = Some(reply.to_string());
	}

	/// Makes every following call fail.
	pub fn break_down(&self) {
		*lock(&self.reply) = None;
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl ClassifierProvider for ScriptedClassifier {
	fn classify<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_question: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<ContextVerdict>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let reply = lock(&self.reply).clone();

		Box::pin(async move {
			let reply = reply.ok_or_else(|| eyre::eyre!("Classifier endpoint is down."))?;

			Ok(ContextVerdict::from_model_text(&reply))
		})
	}
}

#[derive(Debug, Clone)]
pub enum GenerationScript {
	Reply { text: String, total_tokens: u64 },
	NoResponse,
	Fail(String),
	/// Never completes; for cancelling an answer mid-generation.
	Stall,
}

/// Plays back a scripted generation outcome and records every prompt it saw.
pub struct ScriptedGeneration {
	script: Mutex<GenerationScript>,
	prompts: Mutex<Vec<GenerationPrompt>>,
}
impl ScriptedGeneration {
	pub fn new(script: GenerationScript) -> Self {
		Self { script: Mutex::new(script), prompts: Mutex::new(Vec::new()) }
	}

	pub fn replying(text: &str, total_tokens: u64) -> Self {
		Self::new(GenerationScript::Reply { text: text.to_string(), total_tokens })
	}

	pub fn set_script(&self, script: GenerationScript) {
		*lock(&self.script) = script;
	}

	pub fn prompts(&self) -> Vec<GenerationPrompt> {
		lock(&self.prompts).clone()
	}
}
impl GenerationProvider for ScriptedGeneration {
	fn generate<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		prompt: &'a GenerationPrompt,
	) -> BoxFuture<'a, color_eyre::Result<Option<Generation>>> {
		lock(&self.prompts).push(prompt.clone());

		let script = lock(&self.script).clone();

		Box::pin(async move {
			match script {
				GenerationScript::Reply { text, total_tokens } =>
					Ok(Some(Generation { answer_text: text, total_tokens })),
				GenerationScript::NoResponse => Ok(None),
				GenerationScript::Fail(message) => Err(eyre::eyre!(message)),
				GenerationScript::Stall => std::future::pending().await,
			}
		})
	}
}

/// Every in-memory part wired together, with handles kept for assertions.
pub struct MemoryHarness {
	pub turns: Arc<MemoryTurnStore>,
	pub fragments: Arc<MemoryFragments>,
	pub spans: Arc<MemorySpanSink>,
	pub feedback: Arc<MemoryFeedbackSink>,
	pub embedding: Arc<StubEmbedding>,
	pub classifier: Arc<ScriptedClassifier>,
	pub generation: Arc<ScriptedGeneration>,
}
impl MemoryHarness {
	/// Defaults to a classifier that never asks for context and a generator answering "Hi there!".
	pub fn new(cfg: &Config) -> Self {
		Self {
			turns: Arc::new(MemoryTurnStore::new()),
			fragments: Arc::new(MemoryFragments::default()),
			spans: Arc::new(MemorySpanSink::default()),
			feedback: Arc::new(MemoryFeedbackSink::default()),
			embedding: Arc::new(StubEmbedding::new(cfg.storage.qdrant.vector_dim)),
			classifier: Arc::new(ScriptedClassifier::new("this question does not need context")),
			generation: Arc::new(ScriptedGeneration::replying("Hi there!", 42)),
		}
	}

	pub fn backends(&self) -> Backends {
		Backends {
			turns: self.turns.clone(),
			search: self.fragments.clone(),
			lookup: self.fragments.clone(),
			spans: self.spans.clone(),
			feedback: self.feedback.clone(),
		}
	}

	pub fn providers(&self) -> Providers {
		Providers::new(self.embedding.clone(), self.classifier.clone(), self.generation.clone())
	}

	pub fn service(&self, cfg: Config) -> LumenService {
		LumenService::with_parts(cfg, self.backends(), self.providers())
	}
}
