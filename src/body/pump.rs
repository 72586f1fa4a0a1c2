use crate::body::pipe::PipeWriter;
use crate::codec::{ChunkParser, SegmentedBuf};
use crate::connection::{ConnectionContext, TimeoutControl, TrailerParser, TransportRead};
use crate::protocol::BodyError;
use futures::FutureExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// The producer task of the body pipeline.
///
/// Launched once per request, at the first reader operation. Reads the
/// transport, drives the chunk parser over each buffer, flushes decoded
/// payload into the pipe (parking under back-pressure), and advances the
/// transport cursors on every iteration. Exactly one error is captured and
/// reported through the pipe writer's completion.
pub(crate) struct Pump<R, T> {
    transport: R,
    parser: ChunkParser<T>,
    writer: PipeWriter,
    context: Arc<dyn ConnectionContext>,
    timeout: Arc<dyn TimeoutControl>,
    shutdown: CancellationToken,
}

impl<R, T> Pump<R, T>
where
    R: TransportRead,
    T: TrailerParser,
{
    pub fn new(
        transport: R,
        parser: ChunkParser<T>,
        writer: PipeWriter,
        context: Arc<dyn ConnectionContext>,
        timeout: Arc<dyn TimeoutControl>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { transport, parser, writer, context, timeout, shutdown }
    }

    /// Runs the pump to termination and completes the pipe writer.
    pub async fn run(mut self) {
        let result = self.pump().await;
        match &result {
            Ok(()) => trace!(connection_id = self.context.connection_id(), "request body pump finished"),
            Err(error) => {
                debug!(connection_id = self.context.connection_id(), %error, "request body pump failed")
            }
        }
        self.writer.complete(result.err());
    }

    async fn pump(&mut self) -> Result<(), BodyError> {
        let mut first_read = true;

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let read_result = if first_read {
                first_read = false;
                match self.transport.read().now_or_never() {
                    Some(result) => result?,
                    None => {
                        // the client may be holding the body back for 100 Continue
                        self.context.try_produce_continue();
                        tokio::select! {
                            biased;
                            _ = self.shutdown.cancelled() => return Ok(()),
                            result = self.transport.read() => result?,
                        }
                    }
                }
            } else {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Ok(()),
                    result = self.transport.read() => result?,
                }
            };

            if self.timeout.request_timed_out() {
                return Err(BodyError::RequestBodyTimeout);
            }
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let buffer = SegmentedBuf::new(&read_result.segments);
            match self.parser.parse(&buffer, &mut self.writer) {
                Ok(done) => {
                    self.writer.flush().await;
                    let (consumed, examined) = self.parser.cursors();
                    self.transport.advance_to(consumed, examined);

                    if done {
                        return Ok(());
                    }
                    if read_result.is_completed {
                        self.transport.on_input_or_output_completed();
                        return Err(BodyError::UnexpectedEndOfRequestContent);
                    }
                }
                Err(error) => {
                    // release what was decided before the error
                    let (consumed, examined) = self.parser.cursors();
                    self.transport.advance_to(consumed, examined);
                    return Err(error);
                }
            }
        }
    }
}
