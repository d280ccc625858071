use lumen_config::{Config, RetrievalFailurePolicy};
use lumen_service::{
	AnswerPayload, AnswerRequest, LumenService, RetrievalFailure, RetrievalOutcome,
	RetrievedFragment, prompt, telemetry::ABORTED_ERROR,
};
use lumen_storage::models::FragmentKey;
use lumen_testkit::memory::{GenerationScript, MemoryHarness};

fn config() -> Config {
	lumen_testkit::sample_config().expect("Sample config must load.")
}

fn harness() -> (MemoryHarness, LumenService) {
	let cfg = config();
	let harness = MemoryHarness::new(&cfg);
	let service = harness.service(cfg);

	(harness, service)
}

fn ask(question: &str, user_id: &str, thread_id: Option<&str>) -> AnswerRequest {
	AnswerRequest {
		question: question.to_string(),
		user_id: user_id.to_string(),
		thread_id: thread_id.map(str::to_string),
	}
}

fn acme_key() -> FragmentKey {
	FragmentKey { source_id: "acme.pdf".to_string(), locator: 3 }
}

#[tokio::test]
async fn greeting_skips_retrieval_and_records_turn() {
	let (harness, service) = harness();
	let response = service.answer(ask("hello", "u1", None)).await;

	assert_eq!(response.payload, AnswerPayload::Answer { text: "Hi there!".to_string() });
	assert!(uuid::Uuid::parse_str(&response.thread_id).is_ok());
	assert_eq!(harness.embedding.calls(), 0);
	assert!(harness.fragments.searches().is_empty());

	let prompts = harness.generation.prompts();

	assert_eq!(prompts.len(), 1);
	assert_eq!(prompts[0].context, prompt::NO_CONTEXT_REQUIRED);
	assert_eq!(prompts[0].question, "hello");

	let turns = harness.turns.all();

	assert_eq!(turns.len(), 1);
	assert_eq!(turns[0].thread_id, response.thread_id);
	assert_eq!(turns[0].answer, "Hi there!");

	let spans = harness.spans.rows();

	assert_eq!(spans.len(), 1);
	assert_eq!(spans[0].name, "answer");
	assert_eq!(spans[0].tags["user_id"], "u1");
	assert_eq!(spans[0].tags["thread_id"], response.thread_id.as_str());
	assert_eq!(spans[0].tags["context_needed"], false);
	assert_eq!(spans[0].tags["tokens"], 42);
	assert_eq!(spans[0].tags["roundtrips"], 2);
	assert_eq!(spans[0].result.as_deref(), Some("Hi there!"));
	assert!(spans[0].error.is_none());
	assert!(spans[0].message.starts_with("hello"));
	assert_eq!(service.telemetry.pending(), 0);
}

#[tokio::test]
async fn factual_question_uses_hydrated_fragments() {
	let (harness, service) = harness();

	harness.classifier.reply_with("This question needs context");
	harness.fragments.set_hits(vec![acme_key()]);
	harness.fragments.insert_text(acme_key(), "Acme contact: contact@acme.com");
	harness.generation.set_script(GenerationScript::Reply {
		text: "The company email is contact@acme.com".to_string(),
		total_tokens: 120,
	});

	let response = service.answer(ask("What is the email of Acme?", "u1", Some("t1"))).await;

	assert_eq!(response.thread_id, "t1");
	assert_eq!(response.payload.text(), "The company email is contact@acme.com");
	assert_eq!(harness.fragments.searches(), vec![(100, 5)]);

	let context = &harness.generation.prompts()[0].context;

	assert!(context.starts_with(prompt::CONTEXT_PREFIX));
	assert!(context.contains("contact@acme.com"));
	assert!(context.contains("acme.pdf"));

	let spans = harness.spans.rows();

	assert_eq!(spans[0].tags["context_needed"], true);
	assert_eq!(spans[0].tags["retrieval_tokens"], 100);
}

#[tokio::test]
async fn generation_failure_returns_canonical_payload_without_persisting() {
	let (harness, service) = harness();

	harness.generation.set_script(GenerationScript::Fail("model overloaded".to_string()));

	let response = service.answer(ask("hello", "u1", Some("t1"))).await;

	assert_eq!(response.payload, AnswerPayload::failure());
	assert!(harness.turns.is_empty());
	assert_eq!(service.telemetry.pending(), 1);

	harness.generation.set_script(GenerationScript::NoResponse);

	let response = service.answer(ask("hello again", "u1", Some("t1"))).await;

	assert!(response.payload.is_failure());
	assert!(harness.turns.is_empty());

	service.telemetry.flush(harness.spans.as_ref()).await.expect("Flush must succeed.");

	let spans = harness.spans.rows();

	assert_eq!(spans.len(), 2);
	assert!(spans.iter().all(|span| span.error.is_some() && span.result.is_none()));
	assert!(spans.iter().all(|span| span.tags["stage"] == "no_context"));
}

#[tokio::test]
async fn classifier_failure_is_handled() {
	let (harness, service) = harness();

	harness.classifier.break_down();

	let response = service.answer(ask("hello", "u1", None)).await;

	assert!(response.payload.is_failure());
	assert!(harness.generation.prompts().is_empty());
}

#[tokio::test]
async fn unavailable_store_still_answers_without_history() {
	let (harness, service) = harness();

	harness.turns.seed("u1", "t1", "hi", "hello", 1);
	harness.turns.go_offline(false);

	let response = service.answer(ask("hello", "u1", Some("t1"))).await;

	assert_eq!(response.payload.text(), "Hi there!");
	assert!(harness.generation.prompts()[0].history.is_empty());
	// One reconnect for the read, one for the write.
	assert_eq!(harness.turns.reconnects(), 2);
	assert_eq!(harness.turns.len(), 1);
}

#[tokio::test]
async fn history_is_passed_to_generation() {
	let (harness, service) = harness();

	harness.turns.seed("u1", "t1", "hi", "hello", 1);
	harness.turns.seed("u1", "t1", "who are you?", "an assistant", 2);
	harness.turns.seed("u1", "t2", "other thread", "ignored", 3);

	service.answer(ask("thanks", "u1", Some("t1"))).await;

	assert_eq!(
		harness.generation.prompts()[0].history,
		"Question: hi\nAnswer: hello\n\nQuestion: who are you?\nAnswer: an assistant\n\n"
	);
}

#[tokio::test]
async fn blank_thread_id_gets_a_fresh_one() {
	let (_harness, service) = harness();
	let response = service.answer(ask("hello", "u1", Some("   "))).await;

	assert!(uuid::Uuid::parse_str(&response.thread_id).is_ok());
}

#[tokio::test]
async fn embedding_failure_means_no_context() {
	let (harness, service) = harness();

	harness.classifier.reply_with("This question needs context");
	harness.embedding.fail(true);

	assert!(matches!(
		service.search("What is the email of Acme?").await,
		RetrievalOutcome::Failed(RetrievalFailure::Embedding(_))
	));

	let response = service.answer(ask("What is the email of Acme?", "u1", None)).await;

	assert!(!response.payload.is_failure());
	assert_eq!(harness.generation.prompts()[0].context, prompt::NO_CONTEXT_FOUND);
	assert!(harness.fragments.searches().is_empty());
}

#[tokio::test]
async fn search_failure_follows_failure_policy() {
	let cfg = config();
	let harness = MemoryHarness::new(&cfg);

	harness.classifier.reply_with("This question needs context");
	harness.fragments.fail_search(true);

	let closed = harness.service(cfg.clone());
	let response = closed.answer(ask("What is the email of Acme?", "u1", None)).await;

	assert!(response.payload.is_failure());

	let mut open_cfg = cfg;

	open_cfg.retrieval.failure_policy = RetrievalFailurePolicy::FailOpen;

	let open = harness.service(open_cfg);
	let response = open.answer(ask("What is the email of Acme?", "u1", None)).await;

	assert!(!response.payload.is_failure());
	assert_eq!(harness.generation.prompts().last().map(|p| p.context.as_str()), Some(prompt::NO_CONTEXT_FOUND));
}

#[tokio::test]
async fn hydration_miss_keeps_fragment_without_text() {
	let (harness, service) = harness();
	let missing = FragmentKey { source_id: "old.pdf".to_string(), locator: 9 };

	harness.fragments.set_hits(vec![acme_key(), missing]);
	harness.fragments.insert_text(acme_key(), "Acme contact: contact@acme.com");

	let RetrievalOutcome::Found { fragments, approx_tokens } = service.search("acme email").await
	else {
		panic!("Search must succeed.");
	};

	assert_eq!(approx_tokens, 100);
	assert_eq!(
		fragments,
		vec![
			RetrievedFragment {
				source_id: "acme.pdf".to_string(),
				locator: 3,
				text: Some("Acme contact: contact@acme.com".to_string()),
			},
			RetrievedFragment { source_id: "old.pdf".to_string(), locator: 9, text: None },
		]
	);

	let json = serde_json::to_value(&fragments[1]).expect("Serialize failed.");

	assert!(json.get("text").is_none());
}

#[tokio::test]
async fn empty_search_uses_no_context_sentinel() {
	let (harness, service) = harness();

	harness.classifier.reply_with("needs context");

	let response = service.answer(ask("Who founded Initech?", "u1", None)).await;

	assert!(!response.payload.is_failure());
	assert_eq!(harness.generation.prompts()[0].context, prompt::NO_CONTEXT_FOUND);
}

#[tokio::test]
async fn cancelled_answers_leave_no_open_spans() {
	let mut cfg = config();

	cfg.telemetry.max_buffered_spans = 2;

	let harness = MemoryHarness::new(&cfg);
	let service = harness.service(cfg);

	harness.generation.set_script(GenerationScript::Stall);

	for n in 0..10 {
		let pending = service.answer(ask(&format!("question {n}"), "u1", Some("t1")));

		assert!(
			tokio::time::timeout(std::time::Duration::from_millis(5), pending).await.is_err()
		);
	}

	assert!(service.telemetry.pending() <= 2);
	assert!(harness.turns.is_empty());

	let flushed = service.telemetry.flush(harness.spans.as_ref()).await.expect("Flush must succeed.");
	let spans = harness.spans.rows();

	assert_eq!(flushed, spans.len());
	assert!(!spans.is_empty());
	assert!(spans.iter().all(|span| span.error.as_deref() == Some(ABORTED_ERROR)));
	assert!(spans.iter().all(|span| span.tags["stage"] == "no_context"));
	assert_eq!(service.telemetry.pending(), 0);
}
