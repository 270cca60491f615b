use http::header::{HeaderName, HeaderValue};

use crate::filter::{HeadersStatus, StreamReceiverFilter};
use crate::types::Headers;

/// Adds or replaces a given request header key and value.
pub struct HeaderUpsert {
    key: HeaderName,
    value: HeaderValue,
}

impl HeaderUpsert {
    pub fn new(key: HeaderName, value: HeaderValue) -> Self {
        Self { key, value }
    }
}

impl StreamReceiverFilter for HeaderUpsert {
    fn on_decode_headers(&mut self, headers: &mut Headers, _end_stream: bool) -> HeadersStatus {
        if let Some(prev) = headers.fields_mut().insert(self.key.clone(), self.value.clone()) {
            tracing::debug!("Replaced header {}: {prev:?}", self.key);
        } else {
            tracing::debug!("Inserted header {}: {:?}", self.key, self.value);
        }
        HeadersStatus::Continue
    }
}
