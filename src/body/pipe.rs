//! Bounded byte pipe between the pump and the body reader.
//!
//! The pipe is single-producer/single-consumer and deliberately tiny: the
//! pause and resume thresholds are both one byte, so any flushed-but-unread
//! byte parks the writer until the reader has released everything. That
//! strict hand-off is the back-pressure contract of the whole body pipeline:
//! at most one flush batch is ever in flight, and a slow reader propagates
//! all the way down to the socket because the pump stops reading the
//! transport while parked. Do not relax the thresholds.
//!
//! The writer stages bytes ([`PayloadSink::push`]) and publishes them with
//! [`flush`](PipeWriter::flush); the reader observes them as absolute-cursor
//! [`ReadSnapshot`]s and releases them with [`advance`](PipeReader::advance).

use crate::codec::PayloadSink;
use crate::protocol::BodyError;
use bytes::{Buf, Bytes, BytesMut};
use futures::future::poll_fn;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Poll, Waker};

/// Creates a pristine pipe with its writer and reader halves.
pub(crate) fn body_pipe() -> (BodyPipe, PipeWriter, PipeReader) {
    let shared = Arc::new(PipeShared { state: Mutex::new(PipeState::default()) });
    (BodyPipe { shared: shared.clone() }, PipeWriter { shared: shared.clone() }, PipeReader { shared })
}

/// Lifecycle handle over the pipe, used to reset it once both ends are done.
pub(crate) struct BodyPipe {
    shared: Arc<PipeShared>,
}

/// The pump's half: stage, flush, complete.
pub(crate) struct PipeWriter {
    shared: Arc<PipeShared>,
}

/// The body reader's half: read, advance, cancel, complete.
pub(crate) struct PipeReader {
    shared: Arc<PipeShared>,
}

struct PipeShared {
    state: Mutex<PipeState>,
}

#[derive(Default)]
struct PipeState {
    /// Written but not yet published bytes (writer side only)
    staged: BytesMut,
    /// Published, unreleased bytes
    unread: Bytes,
    /// Prefix of `unread` the reader has already examined
    examined: usize,
    /// Absolute stream position of `unread[0]`
    read_head: u64,
    writer_completed: bool,
    completion_error: Option<BodyError>,
    reader_completed: bool,
    cancel_requested: bool,
    read_waker: Option<Waker>,
    flush_waker: Option<Waker>,
}

/// Result of a writer flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlushOutcome {
    /// True when the reader side has completed and the bytes went nowhere
    pub is_completed: bool,
}

/// One observation of the pipe's readable state.
///
/// `data` re-offers every unreleased byte; `start`/`end` are absolute stream
/// positions, which makes advancing to the same cursor twice a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSnapshot {
    data: Bytes,
    start: u64,
    is_completed: bool,
    is_canceled: bool,
}

impl ReadSnapshot {
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Absolute stream position of the first byte of `data`.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Absolute stream position one past the last byte of `data`.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when the writer has completed; `data` may still hold the tail.
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    /// True when this read was woken by a pending-read cancel, not by data.
    pub fn is_canceled(&self) -> bool {
        self.is_canceled
    }
}

impl PipeShared {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PipeState {
    fn snapshot(&mut self, is_canceled: bool) -> ReadSnapshot {
        ReadSnapshot {
            data: self.unread.clone(),
            start: self.read_head,
            is_completed: self.writer_completed,
            is_canceled,
        }
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.flush_waker.take() {
            waker.wake();
        }
    }
}

impl PayloadSink for PipeWriter {
    fn push(&mut self, data: Bytes) {
        let mut state = self.shared.lock();
        if state.reader_completed {
            return;
        }
        state.staged.extend_from_slice(&data);
    }
}

impl PipeWriter {
    /// Publishes staged bytes to the reader, then parks until the reader has
    /// released everything (the resume threshold) or completed its side.
    pub async fn flush(&mut self) -> FlushOutcome {
        {
            let mut state = self.shared.lock();
            if state.reader_completed {
                state.staged.clear();
            } else if !state.staged.is_empty() {
                let staged = state.staged.split().freeze();
                state.unread = if state.unread.is_empty() {
                    staged
                } else {
                    let mut merged = BytesMut::with_capacity(state.unread.len() + staged.len());
                    merged.extend_from_slice(&state.unread);
                    merged.extend_from_slice(&staged);
                    merged.freeze()
                };
                state.wake_reader();
            }
        }

        poll_fn(|cx| {
            let mut state = self.shared.lock();
            if state.reader_completed {
                return Poll::Ready(FlushOutcome { is_completed: true });
            }
            if state.unread.is_empty() {
                return Poll::Ready(FlushOutcome { is_completed: false });
            }
            state.flush_waker = Some(cx.waker().clone());
            Poll::Pending
        })
        .await
    }

    /// Ends the writer side, with the one error this body will ever report.
    pub fn complete(&mut self, error: Option<BodyError>) {
        let mut state = self.shared.lock();
        state.writer_completed = true;
        state.completion_error = error;
        state.wake_reader();
        state.wake_writer();
    }
}

impl PipeReader {
    pub fn poll_read(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<ReadSnapshot, BodyError>> {
        let mut state = self.shared.lock();

        if state.cancel_requested {
            state.cancel_requested = false;
            let snapshot = state.snapshot(true);
            return Poll::Ready(Ok(snapshot));
        }
        if let Some(error) = &state.completion_error {
            return Poll::Ready(Err(error.clone()));
        }
        if state.unread.len() > state.examined || state.writer_completed {
            let snapshot = state.snapshot(false);
            return Poll::Ready(Ok(snapshot));
        }

        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Waits until bytes exist past the examined cursor, the writer
    /// completed, or a pending-read cancel fired.
    pub async fn read(&mut self) -> Result<ReadSnapshot, BodyError> {
        poll_fn(|cx| self.poll_read(cx)).await
    }

    /// Non-blocking read: `Ok(None)` when nothing new is observable.
    pub fn try_read(&mut self) -> Result<Option<ReadSnapshot>, BodyError> {
        let mut state = self.shared.lock();

        if state.cancel_requested {
            state.cancel_requested = false;
            let snapshot = state.snapshot(true);
            return Ok(Some(snapshot));
        }
        if let Some(error) = &state.completion_error {
            return Err(error.clone());
        }
        if state.unread.len() > state.examined || state.writer_completed {
            let snapshot = state.snapshot(false);
            return Ok(Some(snapshot));
        }

        Ok(None)
    }

    /// Releases `consumed` bytes and marks `examined` bytes as inspected,
    /// both relative to the current snapshot start. The next read completes
    /// only once data exists past the examined point (or the writer ends).
    ///
    /// # Panics
    /// If the cursors run outside the published bytes or cross each other.
    pub fn advance(&mut self, consumed: usize, examined: usize) {
        let mut state = self.shared.lock();
        assert!(
            consumed <= examined && examined <= state.unread.len(),
            "advance cursors out of range: consumed {consumed}, examined {examined}, readable {}",
            state.unread.len()
        );

        state.unread.advance(consumed);
        state.read_head += consumed as u64;
        // the examined cursor never moves backwards
        state.examined = std::cmp::max(state.examined.saturating_sub(consumed), examined - consumed);
        if state.unread.is_empty() {
            state.wake_writer();
        }
    }

    /// Wakes a suspended read with a canceled (not errored) result. A cancel
    /// with no read in flight applies to the next read.
    pub fn cancel_pending_read(&mut self) {
        let mut state = self.shared.lock();
        state.cancel_requested = true;
        state.wake_reader();
    }

    /// Ends the reader side; a parked writer flush resumes immediately.
    pub fn complete(&mut self) {
        let mut state = self.shared.lock();
        state.reader_completed = true;
        state.wake_writer();
    }
}

impl BodyPipe {
    /// Returns the pipe to pristine state for the next request.
    ///
    /// Only valid after both ends completed; enforced in debug builds.
    pub fn reset(&mut self) {
        let mut state = self.shared.lock();
        debug_assert!(state.writer_completed && state.reader_completed, "reset with an active pipe end");
        *state = PipeState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;
    use futures::FutureExt;
    use std::task::Context;

    #[test]
    fn read_parks_until_flush_publishes() {
        let (_pipe, mut writer, mut reader) = body_pipe();
        let mut cx = Context::from_waker(noop_waker_ref());

        assert!(matches!(reader.poll_read(&mut cx), Poll::Pending));

        writer.push(Bytes::from_static(b"hello"));
        // staged bytes are not observable before the flush
        assert!(matches!(reader.poll_read(&mut cx), Poll::Pending));
        assert_eq!(reader.try_read().unwrap(), None);

        assert!(writer.flush().now_or_never().is_none()); // parked: one unread byte pauses the writer

        let snapshot = match reader.poll_read(&mut cx) {
            Poll::Ready(Ok(snapshot)) => snapshot,
            other => panic!("unexpected poll result: {other:?}"),
        };
        assert_eq!(snapshot.data(), &Bytes::from_static(b"hello"));
        assert_eq!(snapshot.start(), 0);
        assert!(!snapshot.is_completed());
    }

    #[test]
    fn flush_resumes_only_when_fully_released() {
        let (_pipe, mut writer, mut reader) = body_pipe();

        writer.push(Bytes::from_static(b"abcd"));
        assert!(writer.flush().now_or_never().is_none());

        reader.advance(2, 2);
        // two unread bytes remain, writer stays parked
        assert!(writer.flush().now_or_never().is_none());

        reader.advance(2, 2);
        let outcome = writer.flush().now_or_never().expect("writer resumed");
        assert_eq!(outcome, FlushOutcome { is_completed: false });
    }

    #[test]
    fn examined_gates_the_next_read() {
        let (_pipe, mut writer, mut reader) = body_pipe();
        let mut cx = Context::from_waker(noop_waker_ref());

        writer.push(Bytes::from_static(b"abcd"));
        let _ = writer.flush().now_or_never();

        let snapshot = reader.try_read().unwrap().expect("data observable");
        assert_eq!(snapshot.data(), &Bytes::from_static(b"abcd"));

        // consume nothing, examine everything: no new read until more data
        reader.advance(0, 4);
        assert!(matches!(reader.poll_read(&mut cx), Poll::Pending));
        assert_eq!(reader.try_read().unwrap(), None);

        writer.push(Bytes::from_static(b"e"));
        let _ = writer.flush().now_or_never();
        let snapshot = reader.try_read().unwrap().expect("new data past examined");
        assert_eq!(snapshot.data(), &Bytes::from_static(b"abcde"));
        assert_eq!(snapshot.start(), 0);
    }

    #[test]
    fn snapshots_carry_absolute_cursors() {
        let (_pipe, mut writer, mut reader) = body_pipe();

        writer.push(Bytes::from_static(b"abc"));
        let _ = writer.flush().now_or_never();
        let snapshot = reader.try_read().unwrap().unwrap();
        assert_eq!((snapshot.start(), snapshot.end()), (0, 3));

        reader.advance(3, 3);
        writer.push(Bytes::from_static(b"de"));
        let _ = writer.flush().now_or_never();
        let snapshot = reader.try_read().unwrap().unwrap();
        assert_eq!((snapshot.start(), snapshot.end()), (3, 5));
    }

    #[test]
    fn completion_error_surfaces_on_every_read() {
        let (_pipe, mut writer, mut reader) = body_pipe();

        writer.complete(Some(BodyError::BadChunkSuffix));

        assert_eq!(reader.try_read(), Err(BodyError::BadChunkSuffix));
        assert_eq!(reader.read().now_or_never().unwrap(), Err(BodyError::BadChunkSuffix));
        assert_eq!(reader.try_read(), Err(BodyError::BadChunkSuffix));
    }

    #[test]
    fn clean_completion_reads_as_completed_snapshot() {
        let (_pipe, mut writer, mut reader) = body_pipe();

        writer.push(Bytes::from_static(b"tail"));
        let _ = writer.flush().now_or_never();
        writer.complete(None);

        let snapshot = reader.try_read().unwrap().unwrap();
        assert_eq!(snapshot.data(), &Bytes::from_static(b"tail"));
        assert!(snapshot.is_completed());

        reader.advance(4, 4);
        let snapshot = reader.try_read().unwrap().unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.is_completed());
    }

    #[test]
    fn cancel_applies_to_a_suspended_or_next_read() {
        let (_pipe, _writer, mut reader) = body_pipe();
        let mut cx = Context::from_waker(noop_waker_ref());

        assert!(matches!(reader.poll_read(&mut cx), Poll::Pending));

        reader.cancel_pending_read();
        let snapshot = reader.read().now_or_never().expect("woken by cancel").unwrap();
        assert!(snapshot.is_canceled());
        assert!(snapshot.is_empty());

        // the flag is one-shot
        assert!(matches!(reader.poll_read(&mut cx), Poll::Pending));
    }

    #[test]
    fn writes_after_reader_completion_are_discarded() {
        let (_pipe, mut writer, mut reader) = body_pipe();

        reader.complete();
        writer.push(Bytes::from_static(b"late"));
        let outcome = writer.flush().now_or_never().expect("no parking once reader is done");
        assert!(outcome.is_completed);
    }

    #[test]
    fn reset_restores_pristine_state() {
        let (mut pipe, mut writer, mut reader) = body_pipe();

        writer.push(Bytes::from_static(b"x"));
        let _ = writer.flush().now_or_never();
        writer.complete(None);
        let snapshot = reader.try_read().unwrap().unwrap();
        reader.advance(snapshot.len(), snapshot.len());
        reader.complete();

        pipe.reset();

        assert_eq!(reader.try_read().unwrap(), None);
        assert!(writer.flush().now_or_never().is_some());
    }

    #[test]
    #[should_panic(expected = "advance cursors out of range")]
    fn advance_past_readable_panics() {
        let (_pipe, mut writer, mut reader) = body_pipe();

        writer.push(Bytes::from_static(b"ab"));
        let _ = writer.flush().now_or_never();
        reader.advance(3, 3);
    }
}
