//! Per-request stream state and the dispatch entry points driven by the
//! proxy.
//!
//! One [`ActiveStream`] exists per in-flight request. It owns two ordered
//! filter chains (receiver/decode and sender/encode), the per-direction
//! body accumulation, and the stage bitset that keeps filter invocation
//! from recursing. Filters hold [`Weak`] back-references through their
//! handles, so dropping the proxy's [`Rc`] tears everything down
//! deterministically.
//!
//! All dispatch for a stream runs on one logical worker. A filter that
//! wants to resume from elsewhere posts a [`StreamCommand`] through the
//! stream's command channel and the worker applies it via
//! [`ActiveStream::drain_commands`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::sync::mpsc;

use crate::buffer::{BufferPolicy, BufferRef};
use crate::filter::{StreamReceiverFilter, StreamSenderFilter};
use crate::stream::handle::{ReceiverHandle, SenderHandle, StreamCommand};
use crate::types::{Connection, Headers, RequestInfo, ResetReason, Route, Trailers};

pub mod handle;
mod receiver;
mod sender;

/// Bitset over the six chain stages. At most one stage per direction is
/// marked while its callback runs; the injection entry points use it to
/// tell whether they are being called from inside an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterStage(u8);

impl FilterStage {
    pub const DECODE_HEADERS: FilterStage = FilterStage(1 << 0);
    pub const DECODE_DATA: FilterStage = FilterStage(1 << 1);
    pub const DECODE_TRAILERS: FilterStage = FilterStage(1 << 2);
    pub const ENCODE_HEADERS: FilterStage = FilterStage(1 << 3);
    pub const ENCODE_DATA: FilterStage = FilterStage(1 << 4);
    pub const ENCODE_TRAILERS: FilterStage = FilterStage(1 << 5);

    pub fn is_idle(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: FilterStage) -> bool {
        self.0 & other.0 != 0
    }

    fn insert(self, other: FilterStage) -> FilterStage {
        FilterStage(self.0 | other.0)
    }

    fn remove(self, other: FilterStage) -> FilterStage {
        FilterStage(self.0 & !other.0)
    }
}

/// The seam between the chain core and the surrounding proxy: where
/// payloads go once a chain completes, and how backpressure and resets
/// are surfaced.
///
/// `forward_request_*` fires when the receiver chain clears a stage (the
/// proxy sends the payload upstream); `forward_response_*` when the
/// sender chain clears one (the proxy writes downstream). Hosts must not
/// re-enter stream dispatch from inside these callbacks.
#[allow(unused_variables)]
pub trait StreamHost {
    fn forward_request_headers(&mut self, headers: &Headers, end_stream: bool);
    fn forward_request_data(&mut self, data: &BufferRef, end_stream: bool);
    fn forward_request_trailers(&mut self, trailers: &Trailers);

    fn forward_response_headers(&mut self, headers: &Headers, end_stream: bool);
    fn forward_response_data(&mut self, data: &BufferRef, end_stream: bool);
    fn forward_response_trailers(&mut self, trailers: &Trailers);

    /// Request-direction watermark mode flipped; the downstream read
    /// source should pause (`true`) or resume (`false`) reads.
    fn on_receive_watermark(&mut self, high: bool) {}

    /// Response-direction watermark mode flipped.
    fn on_send_watermark(&mut self, high: bool) {}

    fn on_stream_reset(&mut self, reason: ResetReason) {}
}

pub(crate) struct ReceiverEntry {
    pub(crate) stopped: Cell<bool>,
    pub(crate) stopped_no_buf: Cell<bool>,
    pub(crate) headers_continued: Cell<bool>,
    pub(crate) filter: Rc<RefCell<dyn StreamReceiverFilter>>,
}

impl ReceiverEntry {
    fn new(filter: Rc<RefCell<dyn StreamReceiverFilter>>) -> Self {
        Self {
            stopped: Cell::new(false),
            stopped_no_buf: Cell::new(false),
            headers_continued: Cell::new(false),
            filter,
        }
    }
}

pub(crate) struct SenderEntry {
    pub(crate) stopped: Cell<bool>,
    pub(crate) stopped_no_buf: Cell<bool>,
    pub(crate) headers_continued: Cell<bool>,
    pub(crate) filter: Rc<RefCell<dyn StreamSenderFilter>>,
}

impl SenderEntry {
    fn new(filter: Rc<RefCell<dyn StreamSenderFilter>>) -> Self {
        Self {
            stopped: Cell::new(false),
            stopped_no_buf: Cell::new(false),
            headers_continued: Cell::new(false),
            filter,
        }
    }
}

/// Per-request state container owning both filter chains.
pub struct ActiveStream {
    stream_id: u64,
    host: RefCell<Box<dyn StreamHost>>,
    route: RefCell<Option<Rc<dyn Route>>>,
    connection: RefCell<Option<Rc<dyn Connection>>>,
    request_info: Rc<RequestInfo>,

    pub(crate) receiver_filters: RefCell<Vec<ReceiverEntry>>,
    pub(crate) sender_filters: RefCell<Vec<SenderEntry>>,

    pub(crate) filter_stage: Cell<FilterStage>,

    pub(crate) down_req_headers: RefCell<Option<Headers>>,
    pub(crate) down_req_trailers: RefCell<Option<Trailers>>,
    pub(crate) recv_body: RefCell<BufferPolicy>,

    pub(crate) down_resp_headers: RefCell<Option<Headers>>,
    pub(crate) down_resp_trailers: RefCell<Option<Trailers>>,
    pub(crate) send_body: RefCell<BufferPolicy>,

    pub(crate) downstream_recv_done: Cell<bool>,
    pub(crate) upstream_recv_done: Cell<bool>,
    pub(crate) local_reply: Cell<bool>,
    pub(crate) local_process_done: Cell<bool>,
    pub(crate) buffer_limit: Cell<Option<usize>>,
    reset_reason: Cell<Option<ResetReason>>,

    commands_tx: mpsc::UnboundedSender<StreamCommand>,
    commands_rx: RefCell<mpsc::UnboundedReceiver<StreamCommand>>,
}

impl ActiveStream {
    pub fn new(stream_id: u64, host: Box<dyn StreamHost>) -> Rc<Self> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Rc::new(Self {
            stream_id,
            host: RefCell::new(host),
            route: RefCell::new(None),
            connection: RefCell::new(None),
            request_info: Rc::new(RequestInfo::new()),
            receiver_filters: RefCell::new(Vec::new()),
            sender_filters: RefCell::new(Vec::new()),
            filter_stage: Cell::new(FilterStage::default()),
            down_req_headers: RefCell::new(None),
            down_req_trailers: RefCell::new(None),
            recv_body: RefCell::new(BufferPolicy::new()),
            down_resp_headers: RefCell::new(None),
            down_resp_trailers: RefCell::new(None),
            send_body: RefCell::new(BufferPolicy::new()),
            downstream_recv_done: Cell::new(false),
            upstream_recv_done: Cell::new(false),
            local_reply: Cell::new(false),
            local_process_done: Cell::new(false),
            buffer_limit: Cell::new(None),
            reset_reason: Cell::new(None),
            commands_tx,
            commands_rx: RefCell::new(commands_rx),
        })
    }

    /// Install a receiver (decode-path) filter at the tail of the chain.
    /// The filter is handed its callbacks handle before any dispatch.
    pub fn add_receiver_filter(self: &Rc<Self>, filter: Rc<RefCell<dyn StreamReceiverFilter>>) {
        let index = self.receiver_filters.borrow().len();
        let handle = ReceiverHandle::new(Rc::downgrade(self), index, self.commands_tx.clone());
        filter.borrow_mut().set_decoder_callbacks(handle);
        self.receiver_filters
            .borrow_mut()
            .push(ReceiverEntry::new(filter));
    }

    /// Install a sender (encode-path) filter at the tail of the chain.
    pub fn add_sender_filter(self: &Rc<Self>, filter: Rc<RefCell<dyn StreamSenderFilter>>) {
        let index = self.sender_filters.borrow().len();
        let handle = SenderHandle::new(Rc::downgrade(self), index, self.commands_tx.clone());
        filter.borrow_mut().set_encoder_callbacks(handle);
        self.sender_filters
            .borrow_mut()
            .push(SenderEntry::new(filter));
    }

    /// Attach the routing decision once the router has made one.
    pub fn set_route(&self, route: Rc<dyn Route>) {
        *self.route.borrow_mut() = Some(route);
    }

    pub fn set_connection(&self, connection: Rc<dyn Connection>) {
        *self.connection.borrow_mut() = Some(connection);
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn request_info(&self) -> Rc<RequestInfo> {
        self.request_info.clone()
    }

    pub(crate) fn route(&self) -> Option<Rc<dyn Route>> {
        self.route.borrow().clone()
    }

    pub(crate) fn connection(&self) -> Option<Rc<dyn Connection>> {
        self.connection.borrow().clone()
    }

    /// True once a local reply has been fully written out; decode
    /// dispatch is suppressed from then on.
    pub fn local_process_done(&self) -> bool {
        self.local_process_done.get()
    }

    pub fn reset_reason(&self) -> Option<ResetReason> {
        self.reset_reason.get()
    }

    pub(crate) fn is_reset(&self) -> bool {
        self.reset_reason.get().is_some()
    }

    // Dispatch entry points, decode direction. Each returns true when the
    // chain halted (a filter stopped or short-circuited) and false when
    // the payload cleared the chain and reached the host.

    pub fn receive_headers(self: &Rc<Self>, headers: Headers, end_stream: bool) -> bool {
        if self.is_reset() {
            return true;
        }
        if self.local_process_done.get() {
            return false;
        }
        if end_stream {
            self.downstream_recv_done.set(true);
        }
        *self.down_req_headers.borrow_mut() = Some(headers);
        self.receive_headers_from(None, end_stream)
    }

    pub fn receive_data(self: &Rc<Self>, data: BufferRef, end_stream: bool) -> bool {
        if self.is_reset() {
            return true;
        }
        if end_stream {
            self.downstream_recv_done.set(true);
        }
        self.receive_data_from(None, &data, end_stream)
    }

    pub fn receive_trailers(self: &Rc<Self>, trailers: Trailers) -> bool {
        if self.is_reset() {
            return true;
        }
        if self.local_process_done.get() {
            return false;
        }
        self.downstream_recv_done.set(true);
        *self.down_req_trailers.borrow_mut() = Some(trailers);
        self.receive_trailers_from(None)
    }

    // Dispatch entry points, encode direction, fed by the proxy with the
    // upstream's response. Local replies enter the same iteration through
    // the receiver handles instead.

    pub fn append_headers(self: &Rc<Self>, headers: Headers, end_stream: bool) -> bool {
        if self.is_reset() || self.local_process_done.get() {
            return true;
        }
        self.send_response_headers(headers, end_stream)
    }

    pub fn append_data(self: &Rc<Self>, data: BufferRef, end_stream: bool) -> bool {
        if self.is_reset() || self.local_process_done.get() {
            return true;
        }
        self.send_response_data(&data, end_stream)
    }

    pub fn append_trailers(self: &Rc<Self>, trailers: Trailers) -> bool {
        if self.is_reset() || self.local_process_done.get() {
            return true;
        }
        self.send_response_trailers(trailers)
    }

    /// Terminal teardown: cancel both chains, release buffers, notify the
    /// host. In-flight callbacks finish; everything after is suppressed.
    pub fn reset(&self, reason: ResetReason) {
        if self.is_reset() {
            return;
        }
        tracing::debug!("stream {} reset: {reason}", self.stream_id);
        self.reset_reason.set(Some(reason));
        self.recv_body.borrow_mut().release();
        self.send_body.borrow_mut().release();
        *self.down_req_headers.borrow_mut() = None;
        *self.down_req_trailers.borrow_mut() = None;
        *self.down_resp_headers.borrow_mut() = None;
        *self.down_resp_trailers.borrow_mut() = None;
        self.host.borrow_mut().on_stream_reset(reason);
    }

    /// Apply resume commands posted from other workers. Returns how many
    /// commands were applied.
    pub fn drain_commands(self: &Rc<Self>) -> usize {
        let mut applied = 0;
        loop {
            let cmd = self.commands_rx.borrow_mut().try_recv();
            match cmd {
                Ok(cmd) => {
                    self.apply_command(cmd);
                    applied += 1;
                }
                Err(_) => break,
            }
        }
        applied
    }

    fn apply_command(self: &Rc<Self>, cmd: StreamCommand) {
        if self.is_reset() {
            return;
        }
        match cmd {
            StreamCommand::ContinueDecoding(index) => {
                if !self.local_process_done.get() {
                    self.continue_receiving_at(index);
                }
            }
            StreamCommand::ContinueEncoding(index) => {
                self.continue_sending_at(index);
            }
        }
    }

    // Stage bookkeeping shared by both chains.

    pub(crate) fn stage_enter(&self, bit: FilterStage) {
        let stage = self.filter_stage.get();
        debug_assert!(!stage.contains(bit), "stage re-entered while active");
        self.filter_stage.set(stage.insert(bit));
    }

    pub(crate) fn stage_exit(&self, bit: FilterStage) {
        self.filter_stage.set(self.filter_stage.get().remove(bit));
    }

    // Watermark-mode transitions, firing the host hook once per flip.

    pub(crate) fn set_receiver_streaming(&self, on: bool) {
        let changed = self.recv_body.borrow_mut().set_streaming(on);
        if changed {
            tracing::trace!("stream {} receive watermark -> {on}", self.stream_id);
            self.host.borrow_mut().on_receive_watermark(on);
        }
    }

    pub(crate) fn set_sender_streaming(&self, on: bool) {
        let changed = self.send_body.borrow_mut().set_streaming(on);
        if changed {
            tracing::trace!("stream {} send watermark -> {on}", self.stream_id);
            self.host.borrow_mut().on_send_watermark(on);
        }
    }

    /// Merge a chunk into the request-direction buffer, entering
    /// watermark mode when the soft limit is first crossed.
    pub(crate) fn buffer_request_data(&self, src: &BufferRef) {
        let crossed = self
            .recv_body
            .borrow_mut()
            .absorb(src, self.buffer_limit.get());
        if crossed {
            tracing::debug!(
                "stream {} request body over buffer limit, entering watermark mode",
                self.stream_id
            );
            self.set_receiver_streaming(true);
        }
    }

    pub(crate) fn buffer_response_data(&self, src: &BufferRef) {
        let crossed = self
            .send_body
            .borrow_mut()
            .absorb(src, self.buffer_limit.get());
        if crossed {
            tracing::debug!(
                "stream {} response body over buffer limit, entering watermark mode",
                self.stream_id
            );
            self.set_sender_streaming(true);
        }
    }

    /// The response's end of stream reached egress. For a local reply
    /// this closes the decode path for good.
    pub(crate) fn on_response_complete(&self) {
        if self.local_reply.get() && !self.local_process_done.get() {
            tracing::debug!("stream {} local reply fully emitted", self.stream_id);
            self.local_process_done.set(true);
        }
    }

    pub(crate) fn count_request_bytes(&self, data: &BufferRef) {
        self.request_info
            .add_bytes_received(data.borrow().len() as u64);
    }

    pub(crate) fn count_response_bytes(&self, data: &BufferRef) {
        self.request_info.add_bytes_sent(data.borrow().len() as u64);
    }
}
