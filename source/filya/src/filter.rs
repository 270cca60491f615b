//! User-facing filter traits and their status types.
//!
//! Every callback defaults to `Continue`, so a filter only implements the
//! stages it cares about.

use crate::buffer::BufferRef;
use crate::stream::handle::{ReceiverHandle, SenderHandle};
use crate::types::{Headers, Trailers};

/// Verdict of a headers-stage callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HeadersStatus {
    /// Keep iterating.
    Continue,
    /// Halt the chain at this filter until it resumes.
    StopIteration,
}

/// Verdict of a data-stage callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DataStatus {
    /// Keep iterating. From a stopped filter this triggers the resume
    /// protocol instead.
    Continue,
    /// Halt; accumulate this chunk in the chain's shared buffer.
    StopIterationAndBuffer,
    /// Like `StopIterationAndBuffer`, but ask the read source to apply
    /// watermark backpressure instead of growing the buffer unboundedly.
    StopIterationAndWatermark,
    /// Halt; discard body bytes while stopped.
    StopIterationNoBuffer,
}

/// Verdict of a trailers-stage callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrailersStatus {
    /// Keep iterating.
    Continue,
    /// Halt the chain at this filter until it resumes.
    StopIteration,
}

/// A filter on the decode (request) path.
#[allow(unused_variables)]
pub trait StreamReceiverFilter {
    /// Called once at chain installation with this filter's handle.
    fn set_decoder_callbacks(&mut self, callbacks: ReceiverHandle) {}

    /// Called with the request head. `end_stream` is true when the request
    /// has no body and no trailers.
    fn on_decode_headers(&mut self, headers: &mut Headers, end_stream: bool) -> HeadersStatus {
        HeadersStatus::Continue
    }

    /// Called for each body chunk reaching this filter. A stopped filter
    /// keeps receiving chunks; returning `Continue` from that state
    /// resumes the chain.
    fn on_decode_data(&mut self, data: &BufferRef, end_stream: bool) -> DataStatus {
        DataStatus::Continue
    }

    /// Called once with the request trailers, after the last body byte.
    fn on_decode_trailers(&mut self, trailers: &mut Trailers) -> TrailersStatus {
        TrailersStatus::Continue
    }
}

/// A filter on the encode (response) path.
#[allow(unused_variables)]
pub trait StreamSenderFilter {
    /// Called once at chain installation with this filter's handle.
    fn set_encoder_callbacks(&mut self, callbacks: SenderHandle) {}

    /// Called with the response head.
    fn on_append_headers(&mut self, headers: &mut Headers, end_stream: bool) -> HeadersStatus {
        HeadersStatus::Continue
    }

    /// Called for each response body chunk reaching this filter.
    fn on_append_data(&mut self, data: &BufferRef, end_stream: bool) -> DataStatus {
        DataStatus::Continue
    }

    /// Called once with the response trailers.
    fn on_append_trailers(&mut self, trailers: &mut Trailers) -> TrailersStatus {
        TrailersStatus::Continue
    }
}
