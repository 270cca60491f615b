use std::cell::Cell;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use http::{HeaderMap, StatusCode};
use thiserror::Error;

/// Header block travelling through a chain. Requests carry fields only;
/// responses (including local replies) additionally carry a status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    status: Option<StatusCode>,
    fields: HeaderMap,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A response head with the given status and no fields yet.
    pub fn response(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            fields: HeaderMap::new(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn fields(&self) -> &HeaderMap {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut HeaderMap {
        &mut self.fields
    }
}

impl From<HeaderMap> for Headers {
    fn from(fields: HeaderMap) -> Self {
        Self {
            status: None,
            fields,
        }
    }
}

/// Trailing header block, delivered after the last body byte.
pub type Trailers = HeaderMap;

/// Routing decision attached to the stream by the proxy. The chain core
/// never inspects it beyond handing it to filters.
pub trait Route {
    /// Name of the upstream this stream was routed to.
    fn upstream_name(&self) -> &str;
}

/// The downstream transport connection, as far as filters care about it.
pub trait Connection {
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Per-request bookkeeping shared between the stream and its filters.
///
/// Byte counters are updated as data clears each chain and reaches egress,
/// so a filter holding the stream open can observe progress.
#[derive(Debug)]
pub struct RequestInfo {
    start: Instant,
    bytes_received: Cell<u64>,
    bytes_sent: Cell<u64>,
}

impl RequestInfo {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            bytes_received: Cell::new(0),
            bytes_sent: Cell::new(0),
        }
    }

    pub fn duration(&self) -> Duration {
        self.start.elapsed()
    }

    /// Request-direction bytes that have cleared the receiver chain.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.get()
    }

    /// Response-direction bytes that have cleared the sender chain.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.get()
    }

    pub(crate) fn add_bytes_received(&self, n: u64) {
        self.bytes_received.set(self.bytes_received.get() + n);
    }

    pub(crate) fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.set(self.bytes_sent.get() + n);
    }
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a stream was torn down early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// A filter aborted the stream through its handle.
    FilterAborted,
    /// The transport failed underneath the stream.
    TransportFailure,
    /// The proxy timed the stream out.
    Timeout,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetReason::FilterAborted => f.write_str("filter aborted"),
            ResetReason::TransportFailure => f.write_str("transport failure"),
            ResetReason::Timeout => f.write_str("timeout"),
        }
    }
}

/// Errors surfaced to filters through their handles.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The handle outlived its stream.
    #[error("stream has been torn down")]
    Closed,
    /// The stream already produced a local reply; the decode path is over.
    #[error("stream already produced a local reply")]
    LocalReplyCommitted,
    /// The stream was reset and accepts no further work.
    #[error("stream was reset: {0}")]
    AlreadyReset(ResetReason),
}
