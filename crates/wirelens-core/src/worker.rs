//! Dedicated decode thread.
//!
//! Decoding a large payload can take long enough to stall an interactive
//! caller, so [`DecodeWorker`] runs decodes on its own OS thread. Requests
//! go in over one channel and replies come back over another. Only the
//! newest request matters: the thread skips requests that were superseded
//! while it was busy, and [`DecodeWorker::recv`] drops replies to anything
//! but the latest submission.

use crate::decode::{decode_protobuf, DecodeResult, DecoderConfig};
use crate::error::{Error, Result};
use crate::project::{project, Projection};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "wirelens-decode";

/// Identifier of a submitted request; ids increase with every submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Returns the raw id
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything needed to run one decode
#[derive(Debug, Clone, Default)]
pub struct DecodeRequest {
    /// Payload bytes
    pub bytes: Bytes,
    /// Optional `.proto` text; empty for schema-less decoding
    pub schema_text: String,
    /// Top-level message name; `None` selects the schema's first message
    pub message_name: Option<String>,
    /// Decoder settings
    pub config: DecoderConfig,
}

impl DecodeRequest {
    /// Creates a schema-less request for `bytes`
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            ..Self::default()
        }
    }

    /// Sets the schema text
    pub fn schema(mut self, text: impl Into<String>) -> Self {
        self.schema_text = text.into();
        self
    }

    /// Sets the top-level message name
    pub fn message(mut self, name: impl Into<String>) -> Self {
        self.message_name = Some(name.into());
        self
    }

    /// Sets the decoder settings
    pub fn config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Decodes and projects on the calling thread
    pub fn execute(&self, id: RequestId) -> DecodeReply {
        let result = decode_protobuf(
            &self.bytes,
            &self.schema_text,
            self.message_name.as_deref(),
            &self.config,
        );
        let projection = project(&result.fields);
        DecodeReply {
            id,
            result,
            projection,
        }
    }
}

/// Outcome of one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeReply {
    /// The request this answers
    pub id: RequestId,
    /// The decode result
    pub result: DecodeResult,
    /// The projection, when any field was decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Projection>,
}

/// Handle to the decode thread.
///
/// Dropping the handle closes the request channel and joins the thread.
#[derive(Debug)]
pub struct DecodeWorker {
    requests: Option<Sender<(RequestId, DecodeRequest)>>,
    replies: Receiver<DecodeReply>,
    handle: Option<JoinHandle<()>>,
    next_id: u64,
    pending: Option<RequestId>,
}

impl DecodeWorker {
    /// Starts the decode thread
    pub fn spawn() -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || serve(request_rx, reply_tx))
            .map_err(|_| Error::WorkerUnavailable)?;

        debug!("started {} thread", WORKER_THREAD_NAME);
        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            handle: Some(handle),
            next_id: 0,
            pending: None,
        })
    }

    /// Queues `request`, superseding any request still waiting
    pub fn submit(&mut self, request: DecodeRequest) -> Result<RequestId> {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let sender = self.requests.as_ref().ok_or(Error::WorkerUnavailable)?;
        sender
            .send((id, request))
            .map_err(|_| Error::WorkerUnavailable)?;

        trace!("submitted request {}", id);
        self.pending = Some(id);
        Ok(id)
    }

    /// Returns the id of the request whose reply is awaited
    pub fn pending(&self) -> Option<RequestId> {
        self.pending
    }

    /// Blocks for the reply to the latest request.
    ///
    /// Returns `None` if nothing is pending. Replies to older requests are
    /// discarded.
    pub fn recv(&mut self) -> Result<Option<DecodeReply>> {
        let Some(latest) = self.pending else {
            return Ok(None);
        };

        loop {
            let reply = self.replies.recv().map_err(|_| Error::WorkerUnavailable)?;
            if reply.id == latest {
                self.pending = None;
                return Ok(Some(reply));
            }
            trace!("discarding stale reply {}", reply.id);
        }
    }

    /// Returns the reply to the latest request if it is ready
    pub fn try_recv(&mut self) -> Result<Option<DecodeReply>> {
        let Some(latest) = self.pending else {
            return Ok(None);
        };

        loop {
            match self.replies.try_recv() {
                Ok(reply) if reply.id == latest => {
                    self.pending = None;
                    return Ok(Some(reply));
                }
                Ok(reply) => trace!("discarding stale reply {}", reply.id),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(Error::WorkerUnavailable),
            }
        }
    }

    /// Submits `request` and blocks for its reply
    pub fn decode(&mut self, request: DecodeRequest) -> Result<DecodeReply> {
        self.submit(request)?;
        self.recv()?.ok_or(Error::WorkerUnavailable)
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        drop(self.requests.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("{} thread panicked", WORKER_THREAD_NAME);
            }
        }
    }
}

fn serve(requests: Receiver<(RequestId, DecodeRequest)>, replies: Sender<DecodeReply>) {
    while let Ok(mut job) = requests.recv() {
        while let Ok(newer) = requests.try_recv() {
            trace!("request {} superseded by {}", job.0, newer.0);
            job = newer;
        }

        let (id, request) = job;
        if replies.send(request.execute(id)).is_err() {
            break;
        }
    }
    debug!("{} thread exiting", WORKER_THREAD_NAME);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, Instant};

    #[test]
    fn test_single_request() {
        let mut worker = DecodeWorker::spawn().unwrap();
        let request = DecodeRequest::new(vec![0x08, 0x96, 0x01])
            .schema("message Test { int32 id = 1; }");

        let reply = worker.decode(request).unwrap();
        assert_eq!(reply.id.get(), 0);
        assert_eq!(reply.result.fields.len(), 1);
        assert_eq!(reply.projection.unwrap().json, json!({ "id": 150 }));
        assert!(worker.pending().is_none());
    }

    #[test]
    fn test_latest_request_wins() {
        let mut worker = DecodeWorker::spawn().unwrap();
        let first = worker.submit(DecodeRequest::new(vec![0x08, 0x01])).unwrap();
        let second = worker.submit(DecodeRequest::new(vec![0x08, 0x02])).unwrap();
        let third = worker.submit(DecodeRequest::new(vec![0x08, 0x03])).unwrap();
        assert!(first < second && second < third);

        let reply = worker.recv().unwrap().unwrap();
        assert_eq!(reply.id, third);
        assert_eq!(
            reply.projection.unwrap().json,
            json!({ "unknown_field_1": 3 })
        );
        assert!(worker.recv().unwrap().is_none());
    }

    #[test]
    fn test_try_recv_eventually_ready() {
        let mut worker = DecodeWorker::spawn().unwrap();
        assert!(worker.try_recv().unwrap().is_none());

        let id = worker.submit(DecodeRequest::new(vec![0x08])).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let reply = loop {
            if let Some(reply) = worker.try_recv().unwrap() {
                break reply;
            }
            assert!(Instant::now() < deadline, "worker did not reply");
            thread::sleep(Duration::from_millis(5));
        };

        assert_eq!(reply.id, id);
        assert!(reply.result.is_partial());
        assert!(reply.projection.is_none());
    }

    #[test]
    fn test_execute_inline() {
        let request = DecodeRequest::new(vec![0x08, 0x05])
            .config(DecoderConfig::new().base_offset(10));
        let reply = request.execute(RequestId(7));
        assert_eq!(reply.id.to_string(), "#7");
        assert_eq!(
            reply.projection.unwrap().path_index["root.unknown_field_1"].start,
            10
        );
    }
}
