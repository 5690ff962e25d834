//! Line-delimited transport for MCP.
//!
//! - Messages are UTF-8 encoded JSON-RPC, one per line
//! - Messages must not contain embedded newlines
//! - Responses are written followed by the configured delimiter
//! - stderr stays free for logging
//!
//! # Concurrency
//!
//! Frames are routed in arrival order, so the handshake state always
//! reflects every earlier message. Tool calls run as separate tasks and
//! their responses are written as they complete, so a slow tool never
//! stalls the read loop. A single writer task owns the output stream.

use std::future::Future;
use std::io;

use serde_json::json;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin,
    Stdout,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::mcp::protocol::{self, ErrorObject, JsonRpcError, Message};
use crate::mcp::server::{Dispatcher, Routed};

/// Default output delimiter.
pub const DEFAULT_DELIMITER: &str = "\n";

/// Default cap on a single inbound line.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// The transport the binary uses: stdin in, stdout out.
pub type StdioTransport = LineTransport<BufReader<Stdin>, Stdout>;

impl StdioTransport {
    /// Creates a transport over the process's stdin and stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

/// Newline-delimited JSON-RPC over any reader/writer pair.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    delimiter: String,
    max_message_bytes: usize,
    buffer: Vec<u8>,
}

enum ReadOutcome {
    Eof,
    Line,
    Oversized,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            delimiter: DEFAULT_DELIMITER.to_string(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            buffer: Vec::new(),
        }
    }

    /// Sets the delimiter written after each outgoing message.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Sets the longest accepted inbound line, excluding the newline.
    #[must_use]
    pub const fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    /// Serves one session until end of input or `shutdown` resolves.
    ///
    /// In-flight tool calls are allowed to finish and their responses are
    /// written before this returns. Yields the writer back once drained.
    ///
    /// # Errors
    ///
    /// Returns an error if reading input or writing output fails.
    pub async fn serve(
        mut self,
        dispatcher: &Dispatcher,
        shutdown: impl Future<Output = ()>,
    ) -> io::Result<W> {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(self.writer, self.delimiter, rx));

        tokio::pin!(shutdown);
        let read_result = loop {
            let outcome = tokio::select! {
                () = &mut shutdown => {
                    info!("Stopping line transport");
                    break Ok(());
                }
                outcome = read_frame(&mut self.reader, &mut self.buffer, self.max_message_bytes) => outcome,
            };

            match outcome {
                Ok(ReadOutcome::Eof) => {
                    info!("Input closed, shutting down");
                    break Ok(());
                }
                Ok(ReadOutcome::Oversized) => {
                    warn!(limit = self.max_message_bytes, "Rejected oversized message");
                    let error = ErrorObject::parse_error().with_data(json!({
                        "detail": format!("message exceeds {} bytes", self.max_message_bytes),
                    }));
                    queue(&tx, Message::response(None, None, Some(error)));
                }
                Ok(ReadOutcome::Line) => handle_line(dispatcher, &self.buffer, &tx),
                Err(e) => break Err(e),
            }
        };

        // The writer finishes once every in-flight call has dropped its sender.
        drop(tx);
        let writer = writer.await.map_err(io::Error::other)??;
        read_result.map(|()| writer)
    }
}

fn handle_line(dispatcher: &Dispatcher, line: &[u8], tx: &mpsc::UnboundedSender<Message>) {
    let Ok(text) = std::str::from_utf8(line) else {
        warn!("Rejected message that is not valid UTF-8");
        queue(tx, JsonRpcError::parse_error().into_message());
        return;
    };

    let text = text.trim();
    if text.is_empty() {
        return;
    }

    let message = match protocol::deserialize(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "Rejected malformed frame");
            queue(tx, e.into_message());
            return;
        }
    };

    match dispatcher.route(message) {
        Routed::Reply(reply) => queue(tx, reply),
        Routed::Silent => {}
        Routed::Call(call) => {
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(reply) = call.run().await {
                    queue(&tx, reply);
                }
            });
        }
    }
}

/// Hands a message to the writer task.
fn queue(tx: &mpsc::UnboundedSender<Message>, message: Message) {
    if tx.send(message).is_err() {
        debug!("Writer has stopped, dropping outgoing message");
    }
}

/// Reads one line into `buffer`, stripping the line ending.
///
/// Lines longer than `max` are discarded up to the next newline.
async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    max: usize,
) -> io::Result<ReadOutcome> {
    buffer.clear();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', buffer).await?;
    if read == 0 {
        return Ok(ReadOutcome::Eof);
    }

    if buffer.last() == Some(&b'\n') {
        buffer.pop();
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }
    } else if buffer.len() > max {
        discard_rest_of_line(reader).await?;
        return Ok(ReadOutcome::Oversized);
    }

    Ok(ReadOutcome::Line)
}

async fn discard_rest_of_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(pos) = chunk.iter().position(|b| *b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = chunk.len();
        reader.consume(len);
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    delimiter: String,
    mut rx: mpsc::UnboundedReceiver<Message>,
) -> io::Result<W> {
    while let Some(message) = rx.recv().await {
        let frame = match protocol::serialize(&message) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                continue;
            }
        };

        // Serialized JSON never contains a raw newline
        debug_assert!(!frame.contains('\n'));

        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(delimiter.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(writer)
}
