//! Sender-chain (encode path) iteration and resumption. Symmetric with
//! the receiver chain, keyed off the response-direction state; local
//! replies from receiver filters enter through the same iteration.

use std::rc::Rc;

use crate::buffer::BufferRef;
use crate::filter::{DataStatus, HeadersStatus, TrailersStatus};
use crate::stream::{ActiveStream, FilterStage};
use crate::types::{Headers, Trailers};

impl ActiveStream {
    pub(crate) fn send_response_headers(
        self: &Rc<Self>,
        headers: Headers,
        end_stream: bool,
    ) -> bool {
        if end_stream {
            self.upstream_recv_done.set(true);
        }
        *self.down_resp_headers.borrow_mut() = Some(headers);
        self.append_headers_from(None, end_stream)
    }

    pub(crate) fn send_response_data(self: &Rc<Self>, data: &BufferRef, end_stream: bool) -> bool {
        if end_stream {
            self.upstream_recv_done.set(true);
        }
        self.append_data_from(None, data, end_stream)
    }

    pub(crate) fn send_response_trailers(self: &Rc<Self>, trailers: Trailers) -> bool {
        self.upstream_recv_done.set(true);
        *self.down_resp_trailers.borrow_mut() = Some(trailers);
        self.append_trailers_from(None)
    }

    pub(crate) fn append_headers_from(
        self: &Rc<Self>,
        from: Option<usize>,
        end_stream: bool,
    ) -> bool {
        let halted = self.run_encode_headers(from, end_stream);
        if !halted && !self.is_reset() {
            {
                let guard = self.down_resp_headers.borrow();
                if let Some(headers) = guard.as_ref() {
                    self.host
                        .borrow_mut()
                        .forward_response_headers(headers, end_stream);
                }
            }
            if end_stream {
                self.on_response_complete();
            }
        }
        halted
    }

    fn run_encode_headers(self: &Rc<Self>, from: Option<usize>, end_stream: bool) -> bool {
        let mut index = from.map_or(0, |i| i + 1);
        loop {
            let filter = {
                let filters = self.sender_filters.borrow();
                match filters.get(index) {
                    Some(entry) => entry.filter.clone(),
                    None => break,
                }
            };

            let Some(mut headers) = self.down_resp_headers.borrow_mut().take() else {
                return true;
            };

            self.stage_enter(FilterStage::ENCODE_HEADERS);
            let status = filter.borrow_mut().on_append_headers(&mut headers, end_stream);
            self.stage_exit(FilterStage::ENCODE_HEADERS);

            if !self.is_reset() {
                *self.down_resp_headers.borrow_mut() = Some(headers);
            }

            match status {
                HeadersStatus::StopIteration => {
                    self.sender_filters.borrow()[index].stopped.set(true);
                    tracing::trace!(
                        "stream {} sender filter {index} stopped at headers",
                        self.stream_id
                    );
                    return true;
                }
                HeadersStatus::Continue => {
                    self.sender_filters.borrow()[index]
                        .headers_continued
                        .set(true);
                }
            }

            if self.is_reset() {
                return true;
            }
            index += 1;
        }
        false
    }

    pub(crate) fn append_data_from(
        self: &Rc<Self>,
        from: Option<usize>,
        data: &BufferRef,
        end_stream: bool,
    ) -> bool {
        if self.is_reset() {
            return true;
        }
        let halted = self.run_encode_data(from, data, end_stream);
        if !halted && !self.is_reset() {
            self.count_response_bytes(data);
            self.host
                .borrow_mut()
                .forward_response_data(data, end_stream);
            if end_stream {
                self.on_response_complete();
            }
        }
        halted
    }

    fn run_encode_data(
        self: &Rc<Self>,
        from: Option<usize>,
        data: &BufferRef,
        end_stream: bool,
    ) -> bool {
        let mut index = from.map_or(0, |i| i + 1);
        loop {
            let filter = {
                let filters = self.sender_filters.borrow();
                match filters.get(index) {
                    Some(entry) => entry.filter.clone(),
                    None => break,
                }
            };

            self.stage_enter(FilterStage::ENCODE_DATA);
            let status = filter.borrow_mut().on_append_data(data, end_stream);
            self.stage_exit(FilterStage::ENCODE_DATA);

            match status {
                DataStatus::Continue => {
                    let was_stopped = self.sender_filters.borrow()[index].stopped.get();
                    if was_stopped {
                        self.buffer_response_data(data);
                        self.continue_sending_at(index);
                        return true;
                    }
                }
                DataStatus::StopIterationAndBuffer | DataStatus::StopIterationAndWatermark => {
                    self.sender_filters.borrow()[index].stopped.set(true);
                    let watermark = matches!(status, DataStatus::StopIterationAndWatermark);
                    self.set_sender_streaming(watermark);
                    self.buffer_response_data(data);
                    tracing::trace!(
                        "stream {} sender filter {index} stopped at data (watermark: {watermark})",
                        self.stream_id
                    );
                    return true;
                }
                DataStatus::StopIterationNoBuffer => {
                    let filters = self.sender_filters.borrow();
                    filters[index].stopped.set(true);
                    filters[index].stopped_no_buf.set(true);
                    drop(filters);
                    // make sure no data banked up
                    data.borrow_mut().reset();
                    tracing::trace!(
                        "stream {} sender filter {index} stopped at data (discarding)",
                        self.stream_id
                    );
                    return true;
                }
            }

            if self.is_reset() {
                return true;
            }
            index += 1;
        }
        false
    }

    pub(crate) fn append_trailers_from(self: &Rc<Self>, from: Option<usize>) -> bool {
        if self.is_reset() {
            return true;
        }
        let halted = self.run_encode_trailers(from);
        if !halted && !self.is_reset() {
            {
                let guard = self.down_resp_trailers.borrow();
                if let Some(trailers) = guard.as_ref() {
                    self.host.borrow_mut().forward_response_trailers(trailers);
                }
            }
            self.on_response_complete();
        }
        halted
    }

    fn run_encode_trailers(self: &Rc<Self>, from: Option<usize>) -> bool {
        let mut index = from.map_or(0, |i| i + 1);
        loop {
            let filter = {
                let filters = self.sender_filters.borrow();
                match filters.get(index) {
                    Some(entry) => entry.filter.clone(),
                    None => break,
                }
            };

            let Some(mut trailers) = self.down_resp_trailers.borrow_mut().take() else {
                return true;
            };

            self.stage_enter(FilterStage::ENCODE_TRAILERS);
            let status = filter.borrow_mut().on_append_trailers(&mut trailers);
            self.stage_exit(FilterStage::ENCODE_TRAILERS);

            if !self.is_reset() {
                *self.down_resp_trailers.borrow_mut() = Some(trailers);
            }

            match status {
                TrailersStatus::Continue => {
                    if self.sender_filters.borrow()[index].stopped.get() {
                        self.continue_sending_at(index);
                        return true;
                    }
                }
                TrailersStatus::StopIteration => {
                    tracing::trace!(
                        "stream {} sender filter {index} stopped at trailers",
                        self.stream_id
                    );
                    return true;
                }
            }

            if self.is_reset() {
                return true;
            }
            index += 1;
        }
        false
    }

    /// Resume protocol for a stopped sender filter.
    pub(crate) fn continue_sending_at(self: &Rc<Self>, index: usize) {
        if self.is_reset() {
            return;
        }

        let was_no_buf = {
            let filters = self.sender_filters.borrow();
            let Some(entry) = filters.get(index) else {
                return;
            };
            entry.stopped.set(false);
            entry.stopped_no_buf.get()
        };

        let has_buffered_body = self.send_body.borrow().has_buffer();
        let has_trailers = self.down_resp_trailers.borrow().is_some();

        tracing::trace!("stream {} sender filter {index} resuming", self.stream_id);

        let headers_continued = self.sender_filters.borrow()[index].headers_continued.get();
        if !headers_continued {
            self.sender_filters.borrow()[index]
                .headers_continued
                .set(true);
            let end_stream = self.upstream_recv_done.get() && !has_buffered_body && !has_trailers;
            self.append_headers_from(Some(index), end_stream);
        }

        if has_buffered_body || was_no_buf {
            if was_no_buf || !self.send_body.borrow().has_buffer() {
                self.send_body.borrow_mut().install_empty();
            }
            {
                let filters = self.sender_filters.borrow();
                if let Some(entry) = filters.get(index) {
                    entry.stopped_no_buf.set(false);
                }
            }
            self.send_body.borrow_mut().clear_marks();

            let end_stream = self.upstream_recv_done.get() && !has_trailers;
            let buf = self.send_body.borrow().buffer();
            if let Some(buf) = buf {
                let halted = self.append_data_from(Some(index), &buf, end_stream);
                if !halted {
                    self.set_sender_streaming(false);
                }
            }
        }

        if has_trailers {
            self.append_trailers_from(Some(index));
        }
    }

    /// Inject bytes into the encode path on behalf of filter `index`;
    /// mirrors the decode-side injection.
    pub(crate) fn add_encoded_data(self: &Rc<Self>, index: usize, data: &BufferRef, streaming: bool) {
        if self.is_reset() {
            return;
        }
        if self.filter_stage.get().contains(FilterStage::ENCODE_TRAILERS) {
            self.append_data_from(Some(index), data, false);
        } else {
            self.set_sender_streaming(streaming);
            self.buffer_response_data(data);
        }
    }
}
