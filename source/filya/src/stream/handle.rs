//! Callback surfaces handed to filters at chain installation.
//!
//! A handle holds a weak back-reference to the stream plus the filter's
//! position in its chain; the stream stays the single owner and handles
//! go inert once it is torn down. Handles are not `Send` — a filter that
//! leaves the worker takes a [`RemoteResume`] with it and the continue is
//! applied when the worker drains the stream's commands.

use std::rc::{Rc, Weak};

use tokio::sync::mpsc;

use crate::buffer::BufferRef;
use crate::stream::ActiveStream;
use crate::types::{Connection, Headers, RequestInfo, ResetReason, Route, StreamError, Trailers};

/// Resume command posted back to the stream's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    ContinueDecoding(usize),
    ContinueEncoding(usize),
}

/// Sendable resume trigger for a filter that deferred work off-worker.
#[derive(Debug, Clone)]
pub struct RemoteResume {
    tx: mpsc::UnboundedSender<StreamCommand>,
    command: StreamCommand,
}

impl RemoteResume {
    /// Queue the continue onto the stream's worker. It runs when the
    /// worker next calls [`ActiveStream::drain_commands`].
    pub fn resume(&self) -> Result<(), StreamError> {
        self.tx.send(self.command).map_err(|_| StreamError::Closed)
    }
}

macro_rules! impl_handle_common {
    ($handle:ident) => {
        impl $handle {
            fn stream(&self) -> Result<Rc<ActiveStream>, StreamError> {
                self.stream.upgrade().ok_or(StreamError::Closed)
            }

            pub fn stream_id(&self) -> Option<u64> {
                self.stream.upgrade().map(|s| s.stream_id())
            }

            pub fn route(&self) -> Option<Rc<dyn Route>> {
                self.stream.upgrade().and_then(|s| s.route())
            }

            pub fn connection(&self) -> Option<Rc<dyn Connection>> {
                self.stream.upgrade().and_then(|s| s.connection())
            }

            pub fn request_info(&self) -> Option<Rc<RequestInfo>> {
                self.stream.upgrade().map(|s| s.request_info())
            }

            /// Abort the entire stream.
            pub fn reset_stream(&self) -> Result<(), StreamError> {
                let stream = self.stream()?;
                if let Some(reason) = stream.reset_reason() {
                    return Err(StreamError::AlreadyReset(reason));
                }
                stream.reset(ResetReason::FilterAborted);
                Ok(())
            }
        }
    };
}

/// Callback surface for a filter on the decode path.
#[derive(Clone)]
pub struct ReceiverHandle {
    stream: Weak<ActiveStream>,
    index: usize,
    commands: mpsc::UnboundedSender<StreamCommand>,
}

impl_handle_common!(ReceiverHandle);

impl ReceiverHandle {
    pub(crate) fn new(
        stream: Weak<ActiveStream>,
        index: usize,
        commands: mpsc::UnboundedSender<StreamCommand>,
    ) -> Self {
        Self {
            stream,
            index,
            commands,
        }
    }

    /// Resume the chain after an earlier stop. Must run on the stream's
    /// worker; use [`Self::remote`] from anywhere else.
    pub fn continue_decoding(&self) -> Result<(), StreamError> {
        let stream = self.stream()?;
        if let Some(reason) = stream.reset_reason() {
            return Err(StreamError::AlreadyReset(reason));
        }
        if stream.local_process_done() {
            return Err(StreamError::LocalReplyCommitted);
        }
        stream.continue_receiving_at(self.index);
        Ok(())
    }

    /// The request-direction accumulated body, if any bytes are held.
    pub fn decoding_buffer(&self) -> Option<BufferRef> {
        self.stream
            .upgrade()
            .and_then(|s| s.recv_body.borrow().buffer())
    }

    /// Inject bytes into the decode path (stage-dependent, see
    /// [`crate::stream`] docs).
    pub fn add_decoded_data(&self, data: &BufferRef, streaming: bool) -> Result<(), StreamError> {
        let stream = self.stream()?;
        if let Some(reason) = stream.reset_reason() {
            return Err(StreamError::AlreadyReset(reason));
        }
        stream.add_decoded_data(self.index, data, streaming);
        Ok(())
    }

    /// Produce a local reply: short-circuit the upstream and answer the
    /// request from this filter. Starts the encode chain at its head.
    pub fn append_headers(&self, headers: Headers, end_stream: bool) -> Result<(), StreamError> {
        let stream = self.stream()?;
        if let Some(reason) = stream.reset_reason() {
            return Err(StreamError::AlreadyReset(reason));
        }
        if stream.local_process_done() {
            return Err(StreamError::LocalReplyCommitted);
        }
        tracing::debug!(
            "stream {} receiver filter {} producing a local reply",
            stream.stream_id(),
            self.index
        );
        stream.local_reply.set(true);
        stream.send_response_headers(headers, end_stream);
        Ok(())
    }

    /// Body for an in-progress local reply.
    pub fn append_data(&self, data: BufferRef, end_stream: bool) -> Result<(), StreamError> {
        let stream = self.stream()?;
        if let Some(reason) = stream.reset_reason() {
            return Err(StreamError::AlreadyReset(reason));
        }
        if stream.local_process_done() {
            return Err(StreamError::LocalReplyCommitted);
        }
        stream.send_response_data(&data, end_stream);
        Ok(())
    }

    /// Trailers closing an in-progress local reply.
    pub fn append_trailers(&self, trailers: Trailers) -> Result<(), StreamError> {
        let stream = self.stream()?;
        if let Some(reason) = stream.reset_reason() {
            return Err(StreamError::AlreadyReset(reason));
        }
        if stream.local_process_done() {
            return Err(StreamError::LocalReplyCommitted);
        }
        stream.send_response_trailers(trailers);
        Ok(())
    }

    pub fn set_decoder_buffer_limit(&self, limit: Option<usize>) {
        if let Some(stream) = self.stream.upgrade() {
            stream.buffer_limit.set(limit);
        }
    }

    pub fn decoder_buffer_limit(&self) -> Option<usize> {
        self.stream.upgrade().and_then(|s| s.buffer_limit.get())
    }

    /// A `Send` handle that posts this filter's continue onto the
    /// stream's worker.
    pub fn remote(&self) -> RemoteResume {
        RemoteResume {
            tx: self.commands.clone(),
            command: StreamCommand::ContinueDecoding(self.index),
        }
    }
}

/// Callback surface for a filter on the encode path.
#[derive(Clone)]
pub struct SenderHandle {
    stream: Weak<ActiveStream>,
    index: usize,
    commands: mpsc::UnboundedSender<StreamCommand>,
}

impl_handle_common!(SenderHandle);

impl SenderHandle {
    pub(crate) fn new(
        stream: Weak<ActiveStream>,
        index: usize,
        commands: mpsc::UnboundedSender<StreamCommand>,
    ) -> Self {
        Self {
            stream,
            index,
            commands,
        }
    }

    /// Resume the chain after an earlier stop.
    pub fn continue_encoding(&self) -> Result<(), StreamError> {
        let stream = self.stream()?;
        if let Some(reason) = stream.reset_reason() {
            return Err(StreamError::AlreadyReset(reason));
        }
        stream.continue_sending_at(self.index);
        Ok(())
    }

    /// The response-direction accumulated body, if any bytes are held.
    pub fn encoding_buffer(&self) -> Option<BufferRef> {
        self.stream
            .upgrade()
            .and_then(|s| s.send_body.borrow().buffer())
    }

    /// Inject bytes into the encode path (stage-dependent, see
    /// [`crate::stream`] docs).
    pub fn add_encoded_data(&self, data: &BufferRef, streaming: bool) -> Result<(), StreamError> {
        let stream = self.stream()?;
        if let Some(reason) = stream.reset_reason() {
            return Err(StreamError::AlreadyReset(reason));
        }
        stream.add_encoded_data(self.index, data, streaming);
        Ok(())
    }

    pub fn set_encoder_buffer_limit(&self, limit: Option<usize>) {
        if let Some(stream) = self.stream.upgrade() {
            stream.buffer_limit.set(limit);
        }
    }

    pub fn encoder_buffer_limit(&self) -> Option<usize> {
        self.stream.upgrade().and_then(|s| s.buffer_limit.get())
    }

    pub fn remote(&self) -> RemoteResume {
        RemoteResume {
            tx: self.commands.clone(),
            command: StreamCommand::ContinueEncoding(self.index),
        }
    }
}
