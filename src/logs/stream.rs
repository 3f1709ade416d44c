use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use log::{debug, info};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StageWatchError};

use super::parser::{dispatch, Dispatch, EventParser};
use super::types::LogEntry;

type ChunkStream = BoxStream<'static, reqwest::Result<Vec<u8>>>;

/// A single-pass stream of [`LogEntry`] values read from one open connection.
///
/// The connection is owned by the stream and released as soon as iteration
/// ends for any reason: a terminal event, a `problem` event, a transport
/// error, the overall timeout, cancellation, or the peer closing the
/// response. Dropping the stream early releases it as well.
///
/// When an overall timeout is set, the clock starts on the first read, so
/// the handshake performed by [`open`](crate::logs::WorkspaceLogs) is not
/// counted against it.
pub struct LogStream {
    endpoint: String,
    body: Option<ChunkStream>,
    lines: LineBuffer,
    parser: EventParser,
    pending: VecDeque<LogEntry>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl LogStream {
    pub(crate) fn from_response(
        endpoint: impl Into<String>,
        response: reqwest::Response,
        timeout: Option<Duration>,
    ) -> Self {
        let chunks = response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .boxed();
        Self::from_chunks(endpoint, chunks, timeout)
    }

    pub(crate) fn from_chunks(
        endpoint: impl Into<String>,
        chunks: ChunkStream,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            body: Some(chunks),
            lines: LineBuffer::default(),
            parser: EventParser::new(),
            pending: VecDeque::new(),
            timeout,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort iteration when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the underlying connection has been released.
    pub fn is_closed(&self) -> bool {
        self.body.is_none()
    }

    /// Release the connection. Entries already decoded are still returned.
    pub fn close(&mut self) {
        if self.body.take().is_some() {
            debug!("Closed log stream {}", self.endpoint);
        }
        self.lines.clear();
    }

    /// Read the next entry.
    ///
    /// Returns `None` once the stream has ended, either through a terminal
    /// event or because the server closed the connection. An error is
    /// returned at most once; the stream is closed afterwards.
    pub async fn next_entry(&mut self) -> Option<Result<LogEntry>> {
        if let Some(entry) = self.pending.pop_front() {
            return Some(Ok(entry));
        }

        if self.body.is_none() {
            return None;
        }

        if self.deadline.is_none() {
            self.deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        }

        loop {
            while let Some(line) = self.lines.next_line() {
                let line = String::from_utf8_lossy(&line);

                let Some(event) = self.parser.feed_line(&line) else {
                    continue;
                };

                match dispatch(event) {
                    Dispatch::Entries(entries) => {
                        self.pending.extend(entries);
                        if let Some(entry) = self.pending.pop_front() {
                            return Some(Ok(entry));
                        }
                    }
                    Dispatch::Terminate => {
                        debug!("Terminal event received on {}", self.endpoint);
                        self.close();
                        return None;
                    }
                    Dispatch::Fail(err) => {
                        self.close();
                        return Some(Err(err));
                    }
                    Dispatch::Skip => {}
                }
            }

            let body = self.body.as_mut()?;
            let deadline = self.deadline;

            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(StageWatchError::Cancelled),
                () = wait_until(deadline) => Err(StageWatchError::StreamTimeout(
                    self.timeout.unwrap_or_default(),
                )),
                chunk = body.next() => Ok(chunk),
            };

            match chunk {
                Ok(Some(Ok(bytes))) => self.lines.extend(&bytes),
                Ok(Some(Err(e))) => {
                    self.close();
                    return Some(Err(e.into()));
                }
                Ok(None) => {
                    debug!("Server closed log stream {}", self.endpoint);
                    self.close();
                    return None;
                }
                Err(err) => {
                    info!("Log stream {} aborted: {err}", self.endpoint);
                    self.close();
                    return Some(Err(err));
                }
            }
        }
    }

    /// Adapt into a lazy [`Stream`] of entries.
    pub fn into_stream(self) -> impl Stream<Item = Result<LogEntry>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            let item = stream.next_entry().await?;
            Some((item, stream))
        })
    }

    /// Drain the stream into a list, stopping after `max_entries` when given.
    ///
    /// Expiry of the overall timeout is not an error here: the entries read so
    /// far are returned. Every other failure propagates.
    pub async fn collect_entries(mut self, max_entries: Option<usize>) -> Result<Vec<LogEntry>> {
        let limit = max_entries.filter(|max| *max > 0);
        let mut entries = Vec::new();

        while let Some(item) = self.next_entry().await {
            match item {
                Ok(entry) => entries.push(entry),
                Err(StageWatchError::StreamTimeout(timeout)) => {
                    debug!(
                        "Stopped collecting {} after {timeout:?} with {} entries",
                        self.endpoint,
                        entries.len()
                    );
                    break;
                }
                Err(err) => return Err(err),
            }

            if limit.is_some_and(|max| entries.len() >= max) {
                break;
            }
        }

        self.close();
        Ok(entries)
    }
}

/// Splits raw bytes into lines ended by `\n`, `\r\n` or a lone `\r`.
///
/// Lines are handed out as bytes so a multibyte character split across
/// chunks is only decoded once complete.
#[derive(Debug, Default)]
struct LineBuffer {
    buffer: Vec<u8>,
    // last line ended in '\r'; a leading '\n' in the next chunk belongs to it
    after_cr: bool,
}

impl LineBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// The next complete line without its terminator.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        if self.after_cr {
            match self.buffer.first() {
                None => return None,
                Some(b'\n') => {
                    self.buffer.remove(0);
                }
                Some(_) => {}
            }
            self.after_cr = false;
        }

        let pos = self
            .buffer
            .iter()
            .position(|b| matches!(b, b'\r' | b'\n'))?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        self.after_cr = line.pop() == Some(b'\r');
        Some(line)
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.after_cr = false;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
