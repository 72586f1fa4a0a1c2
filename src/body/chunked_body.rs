use crate::body::pipe::{body_pipe, BodyPipe, ReadSnapshot};
use crate::body::pump::Pump;
use crate::body::reader::BodyReader;
use crate::codec::ChunkParser;
use crate::connection::{ConnectionContext, TimeoutControl, TimeoutReason, TrailerParser, TransportRead};
use crate::protocol::{BodyError, BodyLimits};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// A chunked request body, from construction to pipe reset.
///
/// One instance is created per request with a chunked body. The decode pump
/// starts lazily on the first reader operation; the outer connection loop
/// ends the request with [`consume`](ChunkedRequestBody::consume) (drain an
/// unread remainder) and [`stop`](ChunkedRequestBody::stop) (tear down and
/// reset). Whether an error should close the connection is the caller's
/// decision, from [`keep_alive`](ChunkedRequestBody::keep_alive) and the
/// error kind.
pub struct ChunkedRequestBody<R, T> {
    reader: BodyReader,
    pipe: BodyPipe,
    pump: Option<Pump<R, T>>,
    pump_handle: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    context: Arc<dyn ConnectionContext>,
    timeout: Arc<dyn TimeoutControl>,
    drain_timeout: Duration,
    keep_alive: bool,
    started: bool,
    stopped: bool,
}

impl<R, T> ChunkedRequestBody<R, T>
where
    R: TransportRead + 'static,
    T: TrailerParser + 'static,
{
    pub fn new(
        transport: R,
        trailer_parser: T,
        context: Arc<dyn ConnectionContext>,
        timeout: Arc<dyn TimeoutControl>,
        limits: &BodyLimits,
        keep_alive: bool,
    ) -> Self {
        let (pipe, writer, reader) = body_pipe();
        let shutdown = CancellationToken::new();
        let parser = ChunkParser::new(limits.max_request_body_size, trailer_parser);
        let pump = Pump::new(transport, parser, writer, context.clone(), timeout.clone(), shutdown.clone());

        Self {
            reader: BodyReader::new(reader, timeout.clone(), limits.time_reads),
            pipe,
            pump: Some(pump),
            pump_handle: None,
            shutdown,
            context,
            timeout,
            drain_timeout: limits.drain_timeout,
            keep_alive,
            started: false,
            stopped: false,
        }
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// True once a reader operation has started the decode pump.
    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Non-blocking read. Starts the pump if needed.
    pub fn try_read(&mut self) -> Result<Option<ReadSnapshot>, BodyError> {
        self.ensure_started();
        self.reader.try_read()
    }

    /// Waits until at least one byte is readable, the body completed, or
    /// `token` fires. Starts the pump if needed.
    pub async fn read(&mut self, token: &CancellationToken) -> Result<ReadSnapshot, BodyError> {
        self.ensure_started();
        self.reader.read(token).await
    }

    /// Releases bytes up to the absolute `consumed` cursor of the previous
    /// snapshot.
    pub fn advance_to(&mut self, consumed: u64) {
        self.reader.advance_to(consumed);
    }

    /// Like [`advance_to`](Self::advance_to), with a separate examined
    /// cursor governing when the next read may complete.
    pub fn advance_to_examined(&mut self, consumed: u64, examined: u64) {
        self.reader.advance(consumed, examined);
    }

    /// Completes the reader surface. The pump keeps running; its writer
    /// completion ends the pipeline naturally.
    pub fn complete(&mut self, error: Option<BodyError>) {
        self.reader.complete(error);
    }

    /// Declared for surface parity; canceling reads of a request body is not
    /// supported.
    pub fn cancel_pending_read(&mut self) -> Result<(), BodyError> {
        Err(BodyError::unsupported("cancel_pending_read"))
    }

    /// Declared for surface parity; writer-completion callbacks are not
    /// supported.
    pub fn on_writer_completed(&mut self) -> Result<(), BodyError> {
        Err(BodyError::unsupported("on_writer_completed"))
    }

    /// Drains whatever the handler left unread, so the connection can be
    /// reused.
    ///
    /// Tries a non-blocking drain first and returns without arming any
    /// deadline when it already observes completion; only the slow path
    /// installs the bounded drain timeout. Bad-request errors found while
    /// draining are recorded on the connection; aborts are logged as a
    /// drain timeout.
    pub async fn consume(&mut self) {
        self.ensure_started();

        match self.reader.try_read() {
            Ok(Some(snapshot)) => {
                let completed = snapshot.is_completed();
                self.reader.advance_to(snapshot.end());
                if completed {
                    return;
                }
            }
            Ok(None) => {}
            Err(error) => {
                self.record_drain_error(&error);
                return;
            }
        }

        self.consume_awaited().await;
    }

    async fn consume_awaited(&mut self) {
        trace!(connection_id = self.context.connection_id(), "draining unread request body");
        self.timeout.set_timeout(self.drain_timeout, TimeoutReason::RequestBodyDrain);

        let token = CancellationToken::new();
        let result = loop {
            match self.reader.read(&token).await {
                Ok(snapshot) => {
                    let completed = snapshot.is_completed();
                    self.reader.advance_to(snapshot.end());
                    if completed {
                        break Ok(());
                    }
                }
                Err(error) => break Err(error),
            }
        };

        self.timeout.cancel_timeout();
        if let Err(error) = result {
            self.record_drain_error(&error);
        }
    }

    /// Tears the body down at request end.
    ///
    /// A body that was never read is a no-op. Otherwise the reader side is
    /// completed (which also releases a writer parked on back-pressure), the
    /// pump is canceled if still running, awaited, and the pipe reset for
    /// the next request.
    pub async fn stop(&mut self) {
        if !self.started || self.stopped {
            return;
        }
        self.stopped = true;

        self.reader.complete(None);

        if let Some(handle) = self.pump_handle.take() {
            if !handle.is_finished() {
                trace!(connection_id = self.context.connection_id(), "canceling request body pump");
                self.shutdown.cancel();
            }
            if let Err(join_error) = handle.await {
                error!(connection_id = self.context.connection_id(), %join_error, "request body pump task failed");
            }
        }

        self.pipe.reset();
    }

    fn ensure_started(&mut self) {
        if let Some(pump) = self.pump.take() {
            trace!(connection_id = self.context.connection_id(), "starting request body pump");
            self.started = true;
            self.pump_handle = Some(tokio::spawn(pump.run()));
        }
    }

    fn record_drain_error(&self, error: &BodyError) {
        if error.is_bad_request() {
            self.context.set_bad_request_state(error);
        } else {
            debug!(connection_id = self.context.connection_id(), %error, "request body drain timed out");
        }
    }
}
