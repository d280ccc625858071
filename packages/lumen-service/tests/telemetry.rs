use std::{collections::HashSet, sync::Arc};

use serde_json::Map;

use lumen_service::{SpanClose, TelemetryRecorder};
use lumen_testkit::memory::MemorySpanSink;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_flushes_never_lose_or_duplicate_spans() {
	let recorder = Arc::new(TelemetryRecorder::new(10_000));
	let sink = Arc::new(MemorySpanSink::default());
	let mut tasks = Vec::new();

	for worker in 0..8 {
		let recorder = recorder.clone();
		let sink = sink.clone();

		tasks.push(tokio::spawn(async move {
			let mut ids = Vec::new();

			for n in 0..50 {
				let span = recorder.open("answer", Map::new());

				span.add_message(&format!("worker {worker} request {n}"));
				ids.push(span.span_id());

				recorder.close(&span, SpanClose::default());

				if n % 5 == 0 {
					recorder.flush(sink.as_ref()).await.expect("Flush must succeed.");
				}
			}

			ids
		}));
	}

	let mut opened = HashSet::new();

	for task in tasks {
		opened.extend(task.await.expect("Task must finish."));
	}

	recorder.flush(sink.as_ref()).await.expect("Final flush must succeed.");

	let rows = sink.rows();
	let flushed = rows.iter().map(|row| row.span_id).collect::<HashSet<_>>();

	assert_eq!(rows.len(), 400);
	assert_eq!(flushed.len(), 400);
	assert_eq!(flushed, opened);
	assert_eq!(recorder.pending(), 0);
}

#[tokio::test]
async fn open_spans_survive_flushes_until_closed() {
	let recorder = TelemetryRecorder::new(100);
	let sink = MemorySpanSink::default();
	let long_running = recorder.open("answer", Map::new());

	for _ in 0..3 {
		let span = recorder.open("answer", Map::new());

		recorder.close(&span, SpanClose::default());
		recorder.flush(&sink).await.expect("Flush must succeed.");
	}

	assert_eq!(sink.rows().len(), 3);
	assert_eq!(recorder.pending(), 1);

	long_running.add_tag("late", true);
	recorder.close(&long_running, SpanClose::default());
	recorder.flush(&sink).await.expect("Flush must succeed.");

	let rows = sink.rows();

	assert_eq!(rows.len(), 4);
	assert_eq!(rows[3].span_id, long_running.span_id());
	assert_eq!(rows[3].tags["late"], true);
}

#[tokio::test]
async fn failing_sink_keeps_spans_for_the_next_flush() {
	let recorder = TelemetryRecorder::new(100);
	let sink = MemorySpanSink::default();
	let span = recorder.open("answer", Map::new());

	recorder.close(&span, SpanClose::default());
	sink.fail(true);

	assert!(recorder.flush(&sink).await.is_err());
	assert!(sink.rows().is_empty());

	sink.fail(false);

	assert_eq!(recorder.flush(&sink).await.expect("Flush must succeed."), 1);
	assert_eq!(recorder.flush(&sink).await.expect("Flush must succeed."), 0);
	assert_eq!(sink.rows().len(), 1);
}
