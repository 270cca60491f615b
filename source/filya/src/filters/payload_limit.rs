use http::header::{HeaderValue, CONTENT_LENGTH};
use http::StatusCode;

use crate::buffer::BufferRef;
use crate::filter::{DataStatus, HeadersStatus, StreamReceiverFilter};
use crate::stream::handle::ReceiverHandle;
use crate::types::Headers;

/// Rejects requests whose body exceeds a byte cap.
///
/// Bodies are buffered until end of stream so the decision is made on the
/// real size; a `Content-Length` that already exceeds the cap is rejected
/// before any body byte arrives.
pub struct PayloadLimit {
    max_bytes: usize,
    seen: usize,
    callbacks: Option<ReceiverHandle>,
}

impl PayloadLimit {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            seen: 0,
            callbacks: None,
        }
    }

    fn reject(&self) {
        let Some(callbacks) = &self.callbacks else {
            return;
        };
        let mut headers = Headers::response(StatusCode::PAYLOAD_TOO_LARGE);
        headers
            .fields_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        if let Err(err) = callbacks.append_headers(headers, true) {
            tracing::debug!("payload limit reply not sent: {err}");
        }
    }
}

impl StreamReceiverFilter for PayloadLimit {
    fn set_decoder_callbacks(&mut self, callbacks: ReceiverHandle) {
        self.callbacks = Some(callbacks);
    }

    fn on_decode_headers(&mut self, headers: &mut Headers, _end_stream: bool) -> HeadersStatus {
        let declared = headers
            .fields()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());

        if declared.is_some_and(|n| n > self.max_bytes) {
            tracing::debug!("request rejected up front: declared length {declared:?}");
            self.reject();
            return HeadersStatus::StopIteration;
        }
        HeadersStatus::Continue
    }

    fn on_decode_data(&mut self, data: &BufferRef, end_stream: bool) -> DataStatus {
        self.seen += data.borrow().len();
        if self.seen > self.max_bytes {
            tracing::debug!(
                "request rejected: {} bytes over the {} byte cap",
                self.seen,
                self.max_bytes
            );
            self.reject();
            return DataStatus::StopIterationNoBuffer;
        }
        if end_stream {
            DataStatus::Continue
        } else {
            DataStatus::StopIterationAndBuffer
        }
    }
}
