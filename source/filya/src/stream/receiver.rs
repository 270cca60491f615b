//! Receiver-chain (decode path) iteration and resumption.

use std::rc::Rc;

use crate::buffer::BufferRef;
use crate::filter::{DataStatus, HeadersStatus, TrailersStatus};
use crate::stream::{ActiveStream, FilterStage};

impl ActiveStream {
    /// Run the headers stage starting after `from` (or at the chain
    /// head), forwarding to the host when the chain completes. Returns
    /// true when the chain halted.
    pub(crate) fn receive_headers_from(
        self: &Rc<Self>,
        from: Option<usize>,
        end_stream: bool,
    ) -> bool {
        let halted = self.run_decode_headers(from, end_stream);
        if !halted && !self.is_reset() && !self.local_process_done.get() {
            let guard = self.down_req_headers.borrow();
            if let Some(headers) = guard.as_ref() {
                self.host
                    .borrow_mut()
                    .forward_request_headers(headers, end_stream);
            }
        }
        halted
    }

    fn run_decode_headers(self: &Rc<Self>, from: Option<usize>, end_stream: bool) -> bool {
        let mut index = from.map_or(0, |i| i + 1);
        loop {
            let filter = {
                let filters = self.receiver_filters.borrow();
                match filters.get(index) {
                    Some(entry) => entry.filter.clone(),
                    None => break,
                }
            };

            // The pending headers leave their slot only for the duration
            // of the callback, so nested dispatch between callbacks sees
            // consistent state.
            let Some(mut headers) = self.down_req_headers.borrow_mut().take() else {
                return true;
            };

            self.stage_enter(FilterStage::DECODE_HEADERS);
            let status = filter.borrow_mut().on_decode_headers(&mut headers, end_stream);
            self.stage_exit(FilterStage::DECODE_HEADERS);

            if !self.is_reset() {
                *self.down_req_headers.borrow_mut() = Some(headers);
            }

            match status {
                HeadersStatus::StopIteration => {
                    self.receiver_filters.borrow()[index].stopped.set(true);
                    tracing::trace!(
                        "stream {} receiver filter {index} stopped at headers",
                        self.stream_id
                    );
                    return true;
                }
                HeadersStatus::Continue => {
                    self.receiver_filters.borrow()[index]
                        .headers_continued
                        .set(true);
                }
            }

            if self.is_reset() || self.local_process_done.get() {
                return true;
            }
            index += 1;
        }
        false
    }

    /// Run the data stage starting after `from`.
    pub(crate) fn receive_data_from(
        self: &Rc<Self>,
        from: Option<usize>,
        data: &BufferRef,
        end_stream: bool,
    ) -> bool {
        if self.local_process_done.get() {
            return false;
        }
        if self.is_reset() {
            return true;
        }
        let halted = self.run_decode_data(from, data, end_stream);
        if !halted && !self.is_reset() && !self.local_process_done.get() {
            self.count_request_bytes(data);
            self.host
                .borrow_mut()
                .forward_request_data(data, end_stream);
        }
        halted
    }

    fn run_decode_data(
        self: &Rc<Self>,
        from: Option<usize>,
        data: &BufferRef,
        end_stream: bool,
    ) -> bool {
        let mut index = from.map_or(0, |i| i + 1);
        loop {
            let filter = {
                let filters = self.receiver_filters.borrow();
                match filters.get(index) {
                    Some(entry) => entry.filter.clone(),
                    None => break,
                }
            };

            self.stage_enter(FilterStage::DECODE_DATA);
            let status = filter.borrow_mut().on_decode_data(data, end_stream);
            self.stage_exit(FilterStage::DECODE_DATA);

            match status {
                DataStatus::Continue => {
                    let was_stopped = self.receiver_filters.borrow()[index].stopped.get();
                    if was_stopped {
                        // The filter is releasing the chain: adopt the
                        // chunk it was handed and push the delayed stages
                        // through to the filters after it.
                        self.buffer_request_data(data);
                        self.continue_receiving_at(index);
                        return true;
                    }
                }
                DataStatus::StopIterationAndBuffer | DataStatus::StopIterationAndWatermark => {
                    self.receiver_filters.borrow()[index].stopped.set(true);
                    let watermark = matches!(status, DataStatus::StopIterationAndWatermark);
                    self.set_receiver_streaming(watermark);
                    self.buffer_request_data(data);
                    tracing::trace!(
                        "stream {} receiver filter {index} stopped at data (watermark: {watermark})",
                        self.stream_id
                    );
                    return true;
                }
                DataStatus::StopIterationNoBuffer => {
                    let filters = self.receiver_filters.borrow();
                    filters[index].stopped.set(true);
                    filters[index].stopped_no_buf.set(true);
                    drop(filters);
                    // make sure no data banked up
                    data.borrow_mut().reset();
                    tracing::trace!(
                        "stream {} receiver filter {index} stopped at data (discarding)",
                        self.stream_id
                    );
                    return true;
                }
            }

            if self.is_reset() || self.local_process_done.get() {
                return true;
            }
            index += 1;
        }
        false
    }

    /// Run the trailers stage starting after `from`.
    pub(crate) fn receive_trailers_from(self: &Rc<Self>, from: Option<usize>) -> bool {
        if self.local_process_done.get() {
            return false;
        }
        if self.is_reset() {
            return true;
        }
        let halted = self.run_decode_trailers(from);
        if !halted && !self.is_reset() && !self.local_process_done.get() {
            let guard = self.down_req_trailers.borrow();
            if let Some(trailers) = guard.as_ref() {
                self.host.borrow_mut().forward_request_trailers(trailers);
            }
        }
        halted
    }

    fn run_decode_trailers(self: &Rc<Self>, from: Option<usize>) -> bool {
        let mut index = from.map_or(0, |i| i + 1);
        loop {
            let filter = {
                let filters = self.receiver_filters.borrow();
                match filters.get(index) {
                    Some(entry) => entry.filter.clone(),
                    None => break,
                }
            };

            let Some(mut trailers) = self.down_req_trailers.borrow_mut().take() else {
                return true;
            };

            self.stage_enter(FilterStage::DECODE_TRAILERS);
            let status = filter.borrow_mut().on_decode_trailers(&mut trailers);
            self.stage_exit(FilterStage::DECODE_TRAILERS);

            if !self.is_reset() {
                *self.down_req_trailers.borrow_mut() = Some(trailers);
            }

            match status {
                TrailersStatus::Continue => {
                    if self.receiver_filters.borrow()[index].stopped.get() {
                        self.continue_receiving_at(index);
                        return true;
                    }
                }
                TrailersStatus::StopIteration => {
                    tracing::trace!(
                        "stream {} receiver filter {index} stopped at trailers",
                        self.stream_id
                    );
                    return true;
                }
            }

            if self.is_reset() || self.local_process_done.get() {
                return true;
            }
            index += 1;
        }
        false
    }

    /// Resume protocol for a stopped receiver filter: re-emit to the
    /// filters after it exactly the stages it had delayed, in order, with
    /// the end-of-stream flag reconstructed from the stream's state.
    pub(crate) fn continue_receiving_at(self: &Rc<Self>, index: usize) {
        if self.local_process_done.get() || self.is_reset() {
            return;
        }

        let was_no_buf = {
            let filters = self.receiver_filters.borrow();
            let Some(entry) = filters.get(index) else {
                return;
            };
            entry.stopped.set(false);
            entry.stopped_no_buf.get()
        };

        let has_buffered_body = self.recv_body.borrow().has_buffer();
        let has_trailers = self.down_req_trailers.borrow().is_some();

        tracing::trace!("stream {} receiver filter {index} resuming", self.stream_id);

        let headers_continued = self.receiver_filters.borrow()[index].headers_continued.get();
        if !headers_continued {
            self.receiver_filters.borrow()[index]
                .headers_continued
                .set(true);
            let end_stream =
                self.downstream_recv_done.get() && !has_buffered_body && !has_trailers;
            self.receive_headers_from(Some(index), end_stream);
        }

        if has_buffered_body || was_no_buf {
            if was_no_buf || !self.recv_body.borrow().has_buffer() {
                self.recv_body.borrow_mut().install_empty();
            }
            {
                let filters = self.receiver_filters.borrow();
                if let Some(entry) = filters.get(index) {
                    entry.stopped_no_buf.set(false);
                }
            }
            self.recv_body.borrow_mut().clear_marks();

            let end_stream = self.downstream_recv_done.get() && !has_trailers;
            let buf = self.recv_body.borrow().buffer();
            if let Some(buf) = buf {
                let halted = self.receive_data_from(Some(index), &buf, end_stream);
                if !halted {
                    // no filter below is holding data; lift backpressure
                    self.set_receiver_streaming(false);
                }
            }
        }

        if has_trailers {
            self.receive_trailers_from(Some(index));
        }
    }

    /// Inject bytes into the decode path on behalf of filter `index`.
    /// From inside the trailers stage this re-enters data iteration for
    /// the filters after the caller; in every other context the bytes
    /// land in the chain's shared buffer without iterating.
    pub(crate) fn add_decoded_data(self: &Rc<Self>, index: usize, data: &BufferRef, streaming: bool) {
        if self.is_reset() {
            return;
        }
        if self.filter_stage.get().contains(FilterStage::DECODE_TRAILERS) {
            self.receive_data_from(Some(index), data, false);
        } else {
            self.set_receiver_streaming(streaming);
            self.buffer_request_data(data);
        }
    }
}
