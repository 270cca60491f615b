//! Body accumulation for one chain direction.
//!
//! Buffers are shared by pointer ([`BufferRef`]) because the same buffer
//! object flows both into filter callbacks and back out of the stream's
//! accumulation slot on resume; absorbing a buffer into itself must be a
//! no-op, which falls out of the pointer comparison in
//! [`BufferPolicy::absorb`].

use std::cell::RefCell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

/// A body buffer shared between the stream and whoever is currently
/// handling it.
pub type BufferRef = Rc<RefCell<BodyBuffer>>;

/// Byte container used for request and response bodies.
#[derive(Debug, Default)]
pub struct BodyBuffer {
    data: BytesMut,
}

impl BodyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(cap),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
        }
    }

    /// Wrap into the shared form handed to dispatch and filters.
    pub fn into_shared(self) -> BufferRef {
        Rc::new(RefCell::new(self))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Move all bytes out of `other` into this buffer.
    pub fn read_from(&mut self, other: &mut BodyBuffer) {
        self.data.unsplit(other.data.split());
    }

    /// Drop all buffered bytes.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take all buffered bytes out, leaving the buffer empty.
    pub fn drain(&mut self) -> Bytes {
        self.data.split().freeze()
    }
}

/// Accumulation state for one direction: the shared buffer (allocated on
/// first buffered byte), the watermark mode flag, and whether the soft
/// limit has been crossed during the current accumulation interval.
#[derive(Debug, Default)]
pub(crate) struct BufferPolicy {
    buf: Option<BufferRef>,
    streaming: bool,
    over_limit: bool,
}

impl BufferPolicy {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn has_buffer(&self) -> bool {
        self.buf.is_some()
    }

    pub(crate) fn buffer(&self) -> Option<BufferRef> {
        self.buf.clone()
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Flip the watermark mode; reports whether the value changed so the
    /// caller can fire the host hook exactly once per transition.
    pub(crate) fn set_streaming(&mut self, on: bool) -> bool {
        let changed = self.streaming != on;
        self.streaming = on;
        changed
    }

    /// Ensure an (empty) buffer exists, for the no-buffer resume path.
    pub(crate) fn install_empty(&mut self) {
        self.buf = Some(BodyBuffer::new().into_shared());
    }

    /// Merge `src` into the shared buffer, allocating it on first use.
    /// Absorbing the shared buffer into itself is a no-op. Returns true
    /// when this absorption pushed the accumulated size over `limit` for
    /// the first time.
    pub(crate) fn absorb(&mut self, src: &BufferRef, limit: Option<usize>) -> bool {
        match &self.buf {
            Some(dst) if Rc::ptr_eq(dst, src) => {}
            Some(dst) => {
                dst.borrow_mut().read_from(&mut src.borrow_mut());
            }
            None => {
                let mut dst = BodyBuffer::with_capacity(src.borrow().len());
                dst.read_from(&mut src.borrow_mut());
                self.buf = Some(dst.into_shared());
            }
        }

        let len = self.buf.as_ref().map_or(0, |b| b.borrow().len());
        if !self.over_limit && limit.is_some_and(|cap| len > cap) {
            self.over_limit = true;
            return true;
        }
        false
    }

    /// The stop interval ended; the next accumulation gets a fresh limit
    /// check.
    pub(crate) fn clear_marks(&mut self) {
        self.over_limit = false;
    }

    pub(crate) fn release(&mut self) {
        self.buf = None;
        self.streaming = false;
        self.over_limit = false;
    }
}
