//! End-to-end chain scenarios driven through the public dispatch surface.

use std::cell::RefCell;
use std::rc::Rc;

use http::StatusCode;

use filya::{
    BufferRef, DataStatus, Headers, HeadersStatus, ReceiverHandle, ResetReason, SenderHandle,
    StreamReceiverFilter, StreamSenderFilter, Trailers, TrailersStatus,
};

use crate::common::{chunk, recording_stream, Event, ScriptedReceiver, ScriptedSender, Seen};

#[test]
fn pass_through_chain_delivers_everything_in_order() {
    let (stream, host) = recording_stream();
    let f1 = ScriptedReceiver::new().install(&stream);
    let f2 = ScriptedReceiver::new().install(&stream);

    assert!(!stream.receive_headers(Headers::new(), false));
    assert!(!stream.receive_data(chunk("abcdef"), false));
    assert!(!stream.receive_trailers(Trailers::new()));

    for probe in [&f1, &f2] {
        assert_eq!(
            *probe.seen.borrow(),
            vec![
                Seen::Headers { end: false },
                Seen::Data {
                    bytes: "abcdef".into(),
                    end: false
                },
                Seen::Trailers,
            ]
        );
    }

    assert_eq!(
        host.request_events(),
        vec![
            Event::ReqHeaders { end: false },
            Event::ReqData {
                bytes: "abcdef".into(),
                end: false
            },
            Event::ReqTrailers,
        ]
    );
    assert_eq!(host.request_eos_count(), 1);
}

#[test]
fn buffered_stop_resumes_with_merged_body() {
    let (stream, host) = recording_stream();
    let f1 = ScriptedReceiver::new()
        .on_data(DataStatus::StopIterationAndBuffer)
        .on_data(DataStatus::StopIterationAndBuffer)
        .install(&stream);
    let f2 = ScriptedReceiver::new().install(&stream);

    stream.receive_headers(Headers::new(), false);
    assert!(stream.receive_data(chunk("abc"), false));
    assert!(stream.receive_data(chunk("def"), true));

    // nothing has passed the stopped filter yet
    assert_eq!(host.request_body(), "");
    assert_eq!(f2.body_seen(), "");

    f1.continue_chain();

    assert_eq!(
        f2.seen.borrow().last(),
        Some(&Seen::Data {
            bytes: "abcdef".into(),
            end: true
        })
    );
    assert_eq!(host.request_body(), "abcdef");
    assert_eq!(host.request_eos_count(), 1);
    f2.assert_well_ordered();
}

#[test]
fn no_buffer_stop_discards_interim_bytes() {
    let (stream, host) = recording_stream();
    let f1 = ScriptedReceiver::new()
        .on_data(DataStatus::StopIterationNoBuffer)
        .on_data(DataStatus::StopIterationNoBuffer)
        .install(&stream);
    let f2 = ScriptedReceiver::new().install(&stream);

    stream.receive_headers(Headers::new(), false);
    stream.receive_data(chunk("abc"), false);
    stream.receive_data(chunk("def"), true);

    f1.continue_chain();

    assert_eq!(
        f2.seen.borrow().last(),
        Some(&Seen::Data {
            bytes: String::new(),
            end: true
        })
    );
    assert_eq!(host.request_body(), "");
    assert_eq!(host.request_eos_count(), 1);
}

#[test]
fn watermark_stop_fires_backpressure_hook_once() {
    let (stream, host) = recording_stream();
    let f1 = ScriptedReceiver::new()
        .on_data(DataStatus::StopIterationAndWatermark)
        .install(&stream);
    let _f2 = ScriptedReceiver::new().install(&stream);

    stream.receive_headers(Headers::new(), false);
    assert!(stream.receive_data(chunk("abc"), true));
    assert_eq!(host.recv_watermark_highs(), 1);

    f1.continue_chain();

    // the resume drained the chain, so backpressure lifted again
    assert_eq!(host.recv_watermark_highs(), 1);
    assert!(host.events.borrow().contains(&Event::RecvWatermark(false)));
    assert_eq!(host.request_body(), "abc");
}

#[test]
fn headers_stop_reemits_headers_before_body() {
    let (stream, host) = recording_stream();
    let f1 = ScriptedReceiver::new()
        .on_headers(HeadersStatus::StopIteration)
        .on_data(DataStatus::StopIterationAndBuffer)
        .on_data(DataStatus::StopIterationAndBuffer)
        .install(&stream);
    let f2 = ScriptedReceiver::new().install(&stream);

    assert!(stream.receive_headers(Headers::new(), false));
    stream.receive_data(chunk("ab"), false);
    stream.receive_data(chunk("cd"), true);

    assert!(f2.seen.borrow().is_empty());

    f1.continue_chain();

    assert_eq!(
        *f2.seen.borrow(),
        vec![
            Seen::Headers { end: false },
            Seen::Data {
                bytes: "abcd".into(),
                end: true
            },
        ]
    );
    assert_eq!(
        host.request_events(),
        vec![
            Event::ReqHeaders { end: false },
            Event::ReqData {
                bytes: "abcd".into(),
                end: true
            },
        ]
    );
}

#[test]
fn headers_only_request_carries_end_stream_to_the_edge() {
    let (stream, host) = recording_stream();
    let f1 = ScriptedReceiver::new().install(&stream);
    let f2 = ScriptedReceiver::new().install(&stream);

    assert!(!stream.receive_headers(Headers::new(), true));

    for probe in [&f1, &f2] {
        assert_eq!(*probe.seen.borrow(), vec![Seen::Headers { end: true }]);
    }
    assert_eq!(host.request_events(), vec![Event::ReqHeaders { end: true }]);
    assert_eq!(host.request_eos_count(), 1);
}

struct LocalReplier {
    callbacks: Option<ReceiverHandle>,
}

impl StreamReceiverFilter for LocalReplier {
    fn set_decoder_callbacks(&mut self, callbacks: ReceiverHandle) {
        self.callbacks = Some(callbacks);
    }

    fn on_decode_headers(&mut self, _headers: &mut Headers, _end_stream: bool) -> HeadersStatus {
        self.callbacks
            .as_ref()
            .unwrap()
            .append_headers(Headers::response(StatusCode::OK), true)
            .unwrap();
        HeadersStatus::StopIteration
    }
}

#[test]
fn local_reply_short_circuits_the_decode_chain() {
    let (stream, host) = recording_stream();
    stream.add_receiver_filter(Rc::new(RefCell::new(LocalReplier { callbacks: None })));
    let f2 = ScriptedReceiver::new().install(&stream);
    let s1 = ScriptedSender::new().install(&stream);

    assert!(stream.receive_headers(Headers::new(), false));

    // the encode chain ran from its head with the supplied headers
    assert_eq!(*s1.seen.borrow(), vec![Seen::Headers { end: true }]);
    assert_eq!(
        host.events.borrow().as_slice(),
        &[Event::RespHeaders {
            status: Some(200),
            end: true
        }]
    );
    assert!(stream.local_process_done());

    // decode dispatch is suppressed from here on
    assert!(!stream.receive_data(chunk("late"), true));
    assert!(!stream.receive_trailers(Trailers::new()));
    assert!(f2.seen.borrow().is_empty());
    assert_eq!(host.request_events(), vec![]);
    assert_eq!(host.response_eos_count(), 1);
}

struct TrailerInjector {
    callbacks: Option<SenderHandle>,
    payload: &'static str,
}

impl StreamSenderFilter for TrailerInjector {
    fn set_encoder_callbacks(&mut self, callbacks: SenderHandle) {
        self.callbacks = Some(callbacks);
    }

    fn on_append_trailers(&mut self, _trailers: &mut Trailers) -> TrailersStatus {
        self.callbacks
            .as_ref()
            .unwrap()
            .add_encoded_data(&chunk(self.payload), false)
            .unwrap();
        TrailersStatus::Continue
    }
}

#[test]
fn inject_during_trailers_reaches_downstream_filters_first() {
    let (stream, host) = recording_stream();
    stream.add_sender_filter(Rc::new(RefCell::new(TrailerInjector {
        callbacks: None,
        payload: "zz",
    })));
    let s2 = ScriptedSender::new().install(&stream);

    assert!(!stream.append_headers(Headers::response(StatusCode::OK), false));
    assert!(!stream.append_trailers(Trailers::new()));

    assert_eq!(
        *s2.seen.borrow(),
        vec![
            Seen::Headers { end: false },
            Seen::Data {
                bytes: "zz".into(),
                end: false
            },
            Seen::Trailers,
        ]
    );
    assert_eq!(
        host.events.borrow().as_slice(),
        &[
            Event::RespHeaders {
                status: Some(200),
                end: false
            },
            Event::RespData {
                bytes: "zz".into(),
                end: false
            },
            Event::RespTrailers,
        ]
    );
}

struct HeaderInjector {
    callbacks: Rc<RefCell<Option<ReceiverHandle>>>,
}

impl StreamReceiverFilter for HeaderInjector {
    fn set_decoder_callbacks(&mut self, callbacks: ReceiverHandle) {
        *self.callbacks.borrow_mut() = Some(callbacks);
    }

    fn on_decode_headers(&mut self, _headers: &mut Headers, _end_stream: bool) -> HeadersStatus {
        // outside the trailers stage the bytes land in the shared buffer
        let callbacks = self.callbacks.borrow().clone().unwrap();
        callbacks.add_decoded_data(&chunk("ix"), false).unwrap();
        HeadersStatus::StopIteration
    }
}

#[test]
fn inject_outside_trailers_lands_in_the_shared_buffer() {
    let (stream, host) = recording_stream();
    let injector = Rc::new(RefCell::new(None));
    stream.add_receiver_filter(Rc::new(RefCell::new(HeaderInjector {
        callbacks: injector.clone(),
    })));
    let f2 = ScriptedReceiver::new().install(&stream);

    assert!(stream.receive_headers(Headers::new(), true));
    assert!(f2.seen.borrow().is_empty());

    let handle = injector.borrow().clone().unwrap();
    handle.continue_decoding().unwrap();

    assert_eq!(
        *f2.seen.borrow(),
        vec![
            Seen::Headers { end: false },
            Seen::Data {
                bytes: "ix".into(),
                end: true
            },
        ]
    );
    assert_eq!(host.request_body(), "ix");
    assert_eq!(host.request_eos_count(), 1);
}

#[test]
fn sender_stop_resumes_through_trailers() {
    let (stream, host) = recording_stream();
    let _s1 = ScriptedSender::new()
        .on_data(DataStatus::StopIterationAndBuffer)
        .install(&stream);
    let s2 = ScriptedSender::new().install(&stream);

    assert!(!stream.append_headers(Headers::response(StatusCode::OK), false));
    assert!(stream.append_data(chunk("xy"), false));
    // the trailer dispatch resumes the stopped filter, so it reports the
    // chain as halted even though everything reached the edge
    assert!(stream.append_trailers(Trailers::new()));

    assert_eq!(
        *s2.seen.borrow(),
        vec![
            Seen::Headers { end: false },
            Seen::Data {
                bytes: "xy".into(),
                end: false
            },
            Seen::Trailers,
        ]
    );
    assert_eq!(host.response_body(), "xy");
    assert!(host.events.borrow().contains(&Event::RespTrailers));
    assert_eq!(host.response_eos_count(), 1);
    s2.assert_well_ordered();
}

struct AbortOnData {
    callbacks: Option<ReceiverHandle>,
}

impl StreamReceiverFilter for AbortOnData {
    fn set_decoder_callbacks(&mut self, callbacks: ReceiverHandle) {
        self.callbacks = Some(callbacks);
    }

    fn on_decode_data(&mut self, _data: &BufferRef, _end_stream: bool) -> DataStatus {
        self.callbacks.as_ref().unwrap().reset_stream().unwrap();
        DataStatus::StopIterationNoBuffer
    }
}

#[test]
fn filter_reset_tears_the_stream_down() {
    let (stream, host) = recording_stream();
    stream.add_receiver_filter(Rc::new(RefCell::new(AbortOnData { callbacks: None })));
    let f2 = ScriptedReceiver::new().install(&stream);

    stream.receive_headers(Headers::new(), false);
    assert!(stream.receive_data(chunk("abc"), false));

    assert_eq!(stream.reset_reason(), Some(ResetReason::FilterAborted));
    assert!(host
        .events
        .borrow()
        .contains(&Event::Reset(ResetReason::FilterAborted)));

    // everything after the reset is suppressed
    let before = f2.seen.borrow().len();
    assert!(stream.receive_data(chunk("def"), true));
    assert!(stream.receive_trailers(Trailers::new()));
    assert!(stream.append_headers(Headers::response(StatusCode::OK), true));
    assert_eq!(f2.seen.borrow().len(), before);
    assert_eq!(host.request_body(), "");
}

#[test]
fn off_worker_resume_goes_through_the_command_channel() {
    let (stream, host) = recording_stream();
    let f1 = ScriptedReceiver::new()
        .on_data(DataStatus::StopIterationAndBuffer)
        .install(&stream);
    let _f2 = ScriptedReceiver::new().install(&stream);

    stream.receive_headers(Headers::new(), false);
    assert!(stream.receive_data(chunk("abc"), true));
    assert_eq!(host.request_body(), "");

    let remote = f1.callbacks.borrow().clone().unwrap().remote();
    std::thread::spawn(move || remote.resume().unwrap())
        .join()
        .unwrap();

    // nothing moves until the stream's worker drains its commands
    assert_eq!(host.request_body(), "");
    assert_eq!(stream.drain_commands(), 1);
    assert_eq!(host.request_body(), "abc");
    assert_eq!(host.request_eos_count(), 1);
}
