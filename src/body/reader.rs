use crate::body::pipe::{PipeReader, ReadSnapshot};
use crate::connection::TimeoutControl;
use crate::protocol::BodyError;
use futures::FutureExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The consumer half of the body pipeline.
///
/// Wraps the pipe reader and keeps the read-timing state: a read that has to
/// suspend opens a back-pressure window on the timeout controller, and every
/// completed read reports the newly observed bytes, with the re-offered
/// remainder of the previous snapshot subtracted (`already_timed_bytes`) so
/// nothing is counted twice.
pub(crate) struct BodyReader {
    pipe: PipeReader,
    timeout: Arc<dyn TimeoutControl>,
    timing_enabled: bool,
    /// True while a read-timing window is open
    backpressure: bool,
    /// Bytes of the current window that previous reads already reported
    already_timed_bytes: usize,
    /// Absolute position and length of the last returned snapshot
    window_start: u64,
    window_len: usize,
}

impl BodyReader {
    pub fn new(pipe: PipeReader, timeout: Arc<dyn TimeoutControl>, timing_enabled: bool) -> Self {
        Self {
            pipe,
            timeout,
            timing_enabled,
            backpressure: false,
            already_timed_bytes: 0,
            window_start: 0,
            window_len: 0,
        }
    }

    /// Non-blocking read; `Ok(None)` when nothing new is observable.
    pub fn try_read(&mut self) -> Result<Option<ReadSnapshot>, BodyError> {
        match self.pipe.try_read()? {
            Some(snapshot) => {
                self.observe(&snapshot);
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Waits until at least one byte is readable, the body completed, or the
    /// read is canceled.
    pub async fn read(&mut self, token: &CancellationToken) -> Result<ReadSnapshot, BodyError> {
        loop {
            let snapshot = match self.pipe.read().now_or_never() {
                Some(result) => self.settle(result)?,
                None => {
                    if self.timing_enabled {
                        self.backpressure = true;
                        self.timeout.start_timing_read();
                    }
                    let result = tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            // abort the suspended pipe read; the pump keeps
                            // running and the data stays readable
                            self.pipe.cancel_pending_read();
                            self.pipe.read().await
                        }
                        result = self.pipe.read() => result,
                    };
                    self.settle(result)?
                }
            };

            if snapshot.is_canceled() {
                return Err(BodyError::ReadCanceled);
            }
            if !snapshot.is_empty() || snapshot.is_completed() {
                return Ok(snapshot);
            }
        }
    }

    /// Releases bytes up to the absolute `consumed` cursor and marks bytes
    /// up to `examined` as inspected. Cursors come from the previous
    /// snapshot's `start()..=end()` range; re-advancing to the same cursor
    /// is a no-op.
    ///
    /// # Panics
    /// If the cursors fall outside the previous snapshot or cross each other.
    pub fn advance(&mut self, consumed: u64, examined: u64) {
        let start = self.window_start;
        let end = start + self.window_len as u64;
        assert!(
            consumed >= start && consumed <= examined && examined <= end,
            "advance cursors out of range: consumed {consumed}, examined {examined}, window {start}..{end}"
        );

        let consumed_delta = (consumed - start) as usize;
        let examined_delta = (examined - start) as usize;
        self.pipe.advance(consumed_delta, examined_delta);

        // the unconsumed remainder was already reported to the rate accounting
        self.already_timed_bytes = self.window_len - consumed_delta;
        self.window_len -= consumed_delta;
        self.window_start = consumed;
    }

    pub fn advance_to(&mut self, consumed: u64) {
        self.advance(consumed, consumed);
    }

    /// Completes the reader side. The pump is not stopped; its own writer
    /// completion ends the pipeline.
    pub fn complete(&mut self, error: Option<BodyError>) {
        if let Some(error) = error {
            debug!(%error, "request body reader completed with error");
        }
        self.pipe.complete();
    }

    fn settle(&mut self, result: Result<ReadSnapshot, BodyError>) -> Result<ReadSnapshot, BodyError> {
        match result {
            Ok(snapshot) => {
                self.observe(&snapshot);
                Ok(snapshot)
            }
            Err(error) => {
                self.close_timing_window();
                Err(error)
            }
        }
    }

    /// Accounts a completed read: report newly observed bytes and close any
    /// open timing window. The whole window counts as timed afterwards, so
    /// re-reading without advancing reports nothing new.
    fn observe(&mut self, snapshot: &ReadSnapshot) {
        let len = snapshot.len();
        self.timeout.bytes_read(len.saturating_sub(self.already_timed_bytes));
        self.already_timed_bytes = len;
        self.window_start = snapshot.start();
        self.window_len = len;
        self.close_timing_window();
    }

    fn close_timing_window(&mut self) {
        if self.backpressure {
            self.backpressure = false;
            self.timeout.stop_timing_read();
        }
    }
}
