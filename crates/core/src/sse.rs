// crates/core/src/sse.rs
//! Event stream connector: opens the job's progress stream and turns the
//! raw body into typed [`StreamEvent`]s.
//!
//! Framing is newline-delimited. A line is only decoded once its terminator
//! has arrived; the unterminated tail of a chunk is buffered and completed by
//! the next one. Decoding works on bytes, so a multi-byte character split
//! across chunks is reassembled before it is read as UTF-8.
//!
//! Malformed frames are logged and dropped; they never end the stream. A
//! clean end of body is reported as the end of the event sequence and is
//! *not* a job outcome. The caller decides what it means.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use jobwatch_types::{JobId, SseFrame, StreamEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::JobApi;
use crate::error::ConnectorError;

/// Marker that prefixes structured frames.
const DATA_PREFIX: &str = "data:";

/// Lazy, finite, cancellable sequence of decoded events.
pub type EventSource = Pin<Box<dyn Stream<Item = Result<StreamEvent, ConnectorError>> + Send>>;

/// Longest line the decoder will hold. Longer lines are dropped whole.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Incremental line decoder for one stream.
#[derive(Debug)]
pub struct FrameDecoder {
    job_id: JobId,
    buf: Vec<u8>,
    max_frame: usize,
    /// Inside an oversized line; skip until its terminator.
    discarding: bool,
}

impl FrameDecoder {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            buf: Vec::new(),
            max_frame: MAX_FRAME_BYTES,
            discarding: false,
        }
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Feed one chunk and return every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let chunk = if self.discarding {
            match memchr::memchr(b'\n', chunk) {
                Some(pos) => {
                    self.discarding = false;
                    &chunk[pos + 1..]
                }
                None => return Vec::new(),
            }
        } else {
            chunk
        };
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = memchr::memchr(b'\n', &self.buf[start..]) {
            let end = start + offset;
            if offset > self.max_frame {
                warn!(job_id = %self.job_id, len = offset, "Dropping oversized stream frame");
            } else {
                let raw = &self.buf[start..end];
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                let line = String::from_utf8_lossy(raw);
                if let Some(event) = self.decode_line(&line) {
                    events.push(event);
                }
            }
            start = end + 1;
        }
        self.buf.drain(..start);

        if self.buf.len() > self.max_frame {
            warn!(job_id = %self.job_id, len = self.buf.len(), "Dropping oversized stream frame");
            self.buf.clear();
            self.discarding = true;
        }
        events
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn decode_line(&self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            return None;
        }

        if let Some(data) = line.strip_prefix(DATA_PREFIX) {
            let data = data.strip_prefix(' ').unwrap_or(data);
            return self.decode_data(data);
        }

        if line.starts_with(':') || line.contains("keep-alive") {
            debug!(job_id = %self.job_id, "Keep-alive received");
        }
        // `event:`, `id:`, `retry:` and anything else carry nothing we use.
        None
    }

    fn decode_data(&self, data: &str) -> Option<StreamEvent> {
        let frame: SseFrame = match serde_json::from_str(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, frame = %data, "Dropping malformed stream frame");
                return None;
            }
        };

        if let Some(other) = frame.job_id.as_ref().filter(|id| **id != self.job_id) {
            warn!(job_id = %self.job_id, frame_job_id = %other, "Dropping frame for a different job");
            return None;
        }

        match frame.into_event() {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Dropping unusable stream frame");
                None
            }
        }
    }
}

/// Opens event streams for a job and can abort them.
///
/// Every source handed out by [`connect`](Self::connect) observes the
/// connector's cancellation token: once [`cancel`](Self::cancel) is called any
/// in-flight read is abandoned and the underlying response body is dropped.
pub struct EventStreamConnector {
    api: Arc<dyn JobApi>,
    cancel: CancellationToken,
}

impl EventStreamConnector {
    /// The connector's token is a child of `parent`, so cancelling the owner
    /// also cancels every stream opened here.
    pub fn new(api: Arc<dyn JobApi>, parent: &CancellationToken) -> Self {
        Self {
            api,
            cancel: parent.child_token(),
        }
    }

    pub async fn connect(&self, job_id: &JobId) -> Result<EventSource, ConnectorError> {
        let token = self.cancel.clone();

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(Box::pin(futures_util::stream::empty())),
            opened = self.api.open_stream(job_id) => opened,
        };
        let mut body = opened.map_err(|source| ConnectorError::Open {
            job_id: job_id.clone(),
            source,
        })?;

        let job_id = job_id.clone();
        let source = async_stream::stream! {
            let mut decoder = FrameDecoder::new(job_id.clone());
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(job_id = %job_id, "Event stream cancelled");
                        break;
                    }
                    next = body.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => {
                        for event in decoder.push(&chunk) {
                            yield Ok(event);
                        }
                    }
                    Some(Err(source)) => {
                        yield Err(ConnectorError::Read { job_id: job_id.clone(), source });
                        break;
                    }
                    None => {
                        if decoder.pending() > 0 {
                            debug!(job_id = %job_id, bytes = decoder.pending(), "Discarding unterminated trailing frame");
                        }
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(source))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
