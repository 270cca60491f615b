//! Suspendable stream filter chains for layer-7 proxies.
//!
//! For each in-flight request the proxy creates one [`ActiveStream`]
//! owning two ordered filter chains: receiver filters see the request
//! (decode path), sender filters see the response (encode path). A filter
//! may observe or rewrite headers, body chunks and trailers, buffer
//! partial bodies, halt the chain and resume it later, or short-circuit
//! the request with a local reply — the stream keeps ordering and
//! end-of-stream delivery correct across all of it.
//!
//! The stream is single-threaded and cooperative: callbacks run
//! synchronously on the stream's worker. A filter deferring work to
//! another thread takes a [`RemoteResume`] along and the continue is
//! applied when the worker drains the stream's commands.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use filya::filters::HeaderUpsert;
//! use filya::{ActiveStream, BufferRef, Headers, StreamHost, Trailers};
//!
//! struct Sink;
//!
//! impl StreamHost for Sink {
//!     fn forward_request_headers(&mut self, headers: &Headers, _end_stream: bool) {
//!         assert_eq!(headers.fields().get("x-proxy").unwrap(), "filya");
//!     }
//!     fn forward_request_data(&mut self, _: &BufferRef, _: bool) {}
//!     fn forward_request_trailers(&mut self, _: &Trailers) {}
//!     fn forward_response_headers(&mut self, _: &Headers, _: bool) {}
//!     fn forward_response_data(&mut self, _: &BufferRef, _: bool) {}
//!     fn forward_response_trailers(&mut self, _: &Trailers) {}
//! }
//!
//! let stream = ActiveStream::new(1, Box::new(Sink));
//! stream.add_receiver_filter(Rc::new(RefCell::new(HeaderUpsert::new(
//!     "x-proxy".parse().unwrap(),
//!     "filya".parse().unwrap(),
//! ))));
//!
//! let halted = stream.receive_headers(Headers::new(), true);
//! assert!(!halted);
//! ```

pub mod buffer;
pub mod filter;
pub mod filters;
pub mod stream;
pub mod types;

pub use buffer::{BodyBuffer, BufferRef};
pub use filter::{
    DataStatus, HeadersStatus, StreamReceiverFilter, StreamSenderFilter, TrailersStatus,
};
pub use stream::handle::{ReceiverHandle, RemoteResume, SenderHandle, StreamCommand};
pub use stream::{ActiveStream, FilterStage, StreamHost};
pub use types::{
    Connection, Headers, RequestInfo, ResetReason, Route, StreamError, Trailers,
};
