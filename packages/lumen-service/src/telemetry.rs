use std::{
	sync::{Arc, Mutex, MutexGuard},
	time::{Duration, Instant},
};

use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use lumen_storage::models::MetricSpanRow;

use crate::{Result, SpanSink};

/// Error recorded on a span whose owner went away before closing it.
pub const ABORTED_ERROR: &str = "Operation aborted before completion.";

/// Final values recorded when a span is closed.
#[derive(Debug, Default)]
pub struct SpanClose {
	/// Defaults to the time elapsed since the span was opened.
	pub duration: Option<Duration>,
	pub result: Option<String>,
	pub error: Option<String>,
	pub tags: Map<String, Value>,
}

#[derive(Debug)]
struct SpanState {
	span_id: Uuid,
	name: String,
	tags: Map<String, Value>,
	start_time: OffsetDateTime,
	started: Instant,
	message: String,
	finished: Option<Finished>,
}

#[derive(Debug)]
struct Finished {
	end_time: OffsetDateTime,
	duration_seconds: f64,
	result: Option<String>,
	error: Option<String>,
}

/// Owner's handle to one buffered span.
#[derive(Debug, Clone)]
pub struct SpanHandle(Arc<Mutex<SpanState>>);
impl SpanHandle {
	pub fn span_id(&self) -> Uuid {
		self.lock().span_id
	}

	pub fn is_closed(&self) -> bool {
		self.lock().finished.is_some()
	}

	pub fn add_tag(&self, key: &str, value: impl Into<Value>) {
		let mut state = self.lock();

		if state.finished.is_some() {
			tracing::debug!(span = %state.name, key, "Ignoring tag on a closed span.");

			return;
		}

		state.tags.insert(key.to_string(), value.into());
	}

	/// Appends to the span message, space separated.
	pub fn add_message(&self, text: &str) {
		let mut state = self.lock();

		if state.finished.is_some() {
			return;
		}
		if !state.message.is_empty() {
			state.message.push(' ');
		}

		state.message.push_str(text);
	}

	pub fn tag(&self, key: &str) -> Option<Value> {
		self.lock().tags.get(key).cloned()
	}

	fn lock(&self) -> MutexGuard<'_, SpanState> {
		self.0.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn to_row(&self) -> MetricSpanRow {
		let state = self.lock();
		let finished = state.finished.as_ref();

		MetricSpanRow {
			span_id: state.span_id,
			name: state.name.clone(),
			tags: Value::Object(state.tags.clone()),
			start_time: state.start_time,
			end_time: finished.map(|finished| finished.end_time),
			duration_seconds: finished.map(|finished| finished.duration_seconds),
			message: state.message.clone(),
			result: finished.and_then(|finished| finished.result.clone()),
			error: finished.and_then(|finished| finished.error.clone()),
		}
	}
}

/// Closes its span when dropped while still open, so an abandoned owner (a cancelled request)
/// still leaves a flushable span behind.
pub struct SpanGuard<'a> {
	recorder: &'a TelemetryRecorder,
	handle: SpanHandle,
}
impl SpanGuard<'_> {
	pub fn handle(&self) -> &SpanHandle {
		&self.handle
	}
}
impl Drop for SpanGuard<'_> {
	fn drop(&mut self) {
		if self.handle.is_closed() {
			return;
		}

		tracing::warn!(span_id = %self.handle.span_id(), "Span dropped while open. Closing it as aborted.");

		self.recorder.close(
			&self.handle,
			SpanClose { error: Some(ABORTED_ERROR.to_string()), ..SpanClose::default() },
		);
	}
}

/// Process-wide buffer of spans awaiting persistence.
///
/// Spans stay buffered from `open` until a flush after their `close`. The buffer lock is never
/// held across an await.
#[derive(Debug)]
pub struct TelemetryRecorder {
	buffer: Mutex<Vec<SpanHandle>>,
	max_buffered: usize,
}
impl TelemetryRecorder {
	pub fn new(max_buffered: usize) -> Self {
		Self { buffer: Mutex::new(Vec::new()), max_buffered: max_buffered.max(1) }
	}

	pub fn open(&self, name: &str, tags: Map<String, Value>) -> SpanHandle {
		let handle = SpanHandle(Arc::new(Mutex::new(SpanState {
			span_id: Uuid::new_v4(),
			name: name.to_string(),
			tags,
			start_time: OffsetDateTime::now_utc(),
			started: Instant::now(),
			message: String::new(),
			finished: None,
		})));
		let mut buffer = self.lock_buffer();

		buffer.push(handle.clone());

		self.enforce_bound(&mut buffer);

		handle
	}

	/// Like `open`, but the span is closed as aborted if the guard drops first.
	pub fn open_guarded(&self, name: &str, tags: Map<String, Value>) -> SpanGuard<'_> {
		SpanGuard { recorder: self, handle: self.open(name, tags) }
	}

	pub fn close(&self, handle: &SpanHandle, close: SpanClose) {
		let mut state = handle.lock();

		if state.finished.is_some() {
			tracing::warn!(span = %state.name, "Span closed twice. Keeping the first close.");

			return;
		}

		let duration = close.duration.unwrap_or_else(|| state.started.elapsed());

		state.tags.extend(close.tags);
		state.finished = Some(Finished {
			end_time: OffsetDateTime::now_utc(),
			duration_seconds: duration.as_secs_f64(),
			result: close.result,
			error: close.error,
		});
	}

	/// Number of spans currently buffered, open or closed.
	pub fn pending(&self) -> usize {
		self.lock_buffer().len()
	}

	/// Persists every closed span and removes it from the buffer.
	///
	/// Open spans are left for a later flush. When the sink rejects the batch, the spans go back
	/// into the buffer ahead of newer ones.
	pub async fn flush(&self, sink: &dyn SpanSink) -> Result<usize> {
		let batch = self.take_closed();

		if batch.is_empty() {
			return Ok(0);
		}

		let rows = batch.iter().map(SpanHandle::to_row).collect::<Vec<_>>();

		match sink.write_spans(&rows).await {
			Ok(()) => Ok(rows.len()),
			Err(err) => {
				tracing::warn!(error = %err, spans = rows.len(), "Metric flush failed. Re-queueing spans.");

				self.requeue(batch);

				Err(err)
			},
		}
	}

	pub async fn run_flush_loop(self: Arc<Self>, sink: Arc<dyn SpanSink>, interval: Duration) {
		loop {
			tokio::time::sleep(interval).await;

			match self.flush(sink.as_ref()).await {
				Ok(0) => {},
				Ok(flushed) => tracing::debug!(flushed, "Metric spans flushed."),
				Err(err) => tracing::warn!(error = %err, "Periodic metric flush failed."),
			}
		}
	}

	fn take_closed(&self) -> Vec<SpanHandle> {
		let mut buffer = self.lock_buffer();
		let (closed, open): (Vec<_>, Vec<_>) = buffer.drain(..).partition(SpanHandle::is_closed);

		*buffer = open;

		closed
	}

	fn requeue(&self, batch: Vec<SpanHandle>) {
		let mut buffer = self.lock_buffer();
		let newer = std::mem::replace(&mut *buffer, batch);

		buffer.extend(newer);

		self.enforce_bound(&mut buffer);
	}

	fn enforce_bound(&self, buffer: &mut Vec<SpanHandle>) {
		let mut excess = buffer.len().saturating_sub(self.max_buffered);

		if excess == 0 {
			return;
		}

		let mut dropped = 0_usize;

		buffer.retain(|handle| {
			if excess > 0 && handle.is_closed() {
				excess -= 1;
				dropped += 1;

				false
			} else {
				true
			}
		});

		if dropped > 0 {
			tracing::warn!(dropped, limit = self.max_buffered, "Metric buffer full. Dropped oldest closed spans.");
		}
	}

	fn lock_buffer(&self) -> MutexGuard<'_, Vec<SpanHandle>> {
		self.buffer.lock().unwrap_or_else(|err| err.into_inner())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicBool, Ordering};

	use super::*;
	use crate::{BoxFuture, Error};

	#[derive(Default)]
	struct RecordingSink {
		rows: Mutex<Vec<MetricSpanRow>>,
		fail: AtomicBool,
	}
	impl SpanSink for RecordingSink {
		fn write_spans<'a>(&'a self, batch: &'a [MetricSpanRow]) -> BoxFuture<'a, Result<()>> {
			Box::pin(async move {
				if self.fail.load(Ordering::SeqCst) {
					return Err(Error::Unavailable { message: "sink offline".to_string() });
				}

				self.rows.lock().expect("sink lock").extend_from_slice(batch);

				Ok(())
			})
		}
	}

	fn tags(user_id: &str) -> Map<String, Value> {
		let mut tags = Map::new();

		tags.insert("user_id".to_string(), Value::from(user_id));

		tags
	}

	#[tokio::test]
	async fn flush_takes_closed_spans_and_leaves_open_ones() {
		let recorder = TelemetryRecorder::new(16);
		let sink = RecordingSink::default();
		let closed = recorder.open("answer", tags("u1"));
		let open = recorder.open("answer", tags("u2"));

		closed.add_message("hello");
		closed.add_message("world");
		recorder.close(
			&closed,
			SpanClose { result: Some("hi".to_string()), ..SpanClose::default() },
		);

		assert_eq!(recorder.flush(&sink).await.expect("flush failed"), 1);
		assert_eq!(recorder.pending(), 1);

		let rows = sink.rows.lock().expect("sink lock").clone();

		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].span_id, closed.span_id());
		assert_eq!(rows[0].message, "hello world");
		assert_eq!(rows[0].result.as_deref(), Some("hi"));
		assert_eq!(rows[0].tags["user_id"], "u1");
		assert!(rows[0].end_time.is_some());

		recorder.close(&open, SpanClose::default());

		assert_eq!(recorder.flush(&sink).await.expect("flush failed"), 1);
		assert_eq!(recorder.pending(), 0);
	}

	#[tokio::test]
	async fn failed_flush_requeues_batch() {
		let recorder = TelemetryRecorder::new(16);
		let sink = RecordingSink::default();
		let span = recorder.open("answer", Map::new());

		recorder.close(&span, SpanClose::default());
		sink.fail.store(true, Ordering::SeqCst);

		assert!(recorder.flush(&sink).await.is_err());
		assert_eq!(recorder.pending(), 1);

		sink.fail.store(false, Ordering::SeqCst);

		assert_eq!(recorder.flush(&sink).await.expect("flush failed"), 1);
		assert_eq!(sink.rows.lock().expect("sink lock").len(), 1);
	}

	#[test]
	fn bound_drops_oldest_closed_spans_first() {
		let recorder = TelemetryRecorder::new(2);
		let first = recorder.open("answer", tags("first"));
		let second = recorder.open("answer", tags("second"));

		recorder.close(&second, SpanClose::default());

		let third = recorder.open("answer", tags("third"));
		let buffered = recorder.lock_buffer().iter().map(SpanHandle::span_id).collect::<Vec<_>>();

		assert_eq!(buffered, vec![first.span_id(), third.span_id()]);
	}

	#[test]
	fn dropped_guard_closes_open_span_as_aborted() {
		let recorder = TelemetryRecorder::new(4);
		let kept = {
			let guard = recorder.open_guarded("answer", tags("u1"));

			guard.handle().add_tag("stage", "classified");
			guard.handle().clone()
		};
		let row = kept.to_row();

		assert!(kept.is_closed());
		assert_eq!(row.error.as_deref(), Some(ABORTED_ERROR));
		assert_eq!(row.tags["stage"], "classified");

		let closed = {
			let guard = recorder.open_guarded("answer", tags("u2"));

			recorder.close(
				guard.handle(),
				SpanClose { result: Some("done".to_string()), ..SpanClose::default() },
			);
			guard.handle().clone()
		};

		assert_eq!(closed.to_row().result.as_deref(), Some("done"));
		assert!(closed.to_row().error.is_none());
	}

	#[test]
	fn close_merges_tags_and_ignores_later_mutation() {
		let recorder = TelemetryRecorder::new(4);
		let span = recorder.open("answer", tags("u1"));
		let mut extra = Map::new();

		extra.insert("roundtrips".to_string(), Value::from(2));
		recorder.close(
			&span,
			SpanClose {
				duration: Some(Duration::from_millis(1500)),
				tags: extra,
				..SpanClose::default()
			},
		);
		span.add_tag("late", true);

		let row = span.to_row();

		assert_eq!(row.tags["roundtrips"], 2);
		assert_eq!(row.tags["user_id"], "u1");
		assert!(row.tags.get("late").is_none());
		assert_eq!(row.duration_seconds, Some(1.5));
	}
}
