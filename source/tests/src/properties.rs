//! Property tests over arbitrary stop/continue schedules.

use proptest::prelude::*;

use filya::{DataStatus, Headers, Trailers};

use crate::common::{chunk, recording_stream, ScriptedReceiver};

#[derive(Debug, Clone, Copy)]
enum Step {
    Pass,
    Buffer,
    Watermark,
}

impl Step {
    fn status(self) -> DataStatus {
        match self {
            Step::Pass => DataStatus::Continue,
            Step::Buffer => DataStatus::StopIterationAndBuffer,
            Step::Watermark => DataStatus::StopIterationAndWatermark,
        }
    }
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![Just(Step::Pass), Just(Step::Buffer), Just(Step::Watermark)]
}

proptest! {
    /// Whatever combination of buffering stops and resumes the filters
    /// produce, the terminal sink sees every input byte exactly once, in
    /// order, with exactly one end of stream; and every filter sees
    /// headers first, trailers last, end of stream at most once.
    #[test]
    fn bytes_are_conserved_under_stop_continue_schedules(
        chunks in prop::collection::vec("[a-z]{1,6}", 1..5),
        scripts in prop::collection::vec(prop::collection::vec(step_strategy(), 0..6), 1..4),
        with_trailers in any::<bool>(),
    ) {
        let (stream, host) = recording_stream();

        let probes: Vec<_> = scripts
            .iter()
            .map(|script| {
                let mut filter = ScriptedReceiver::new();
                for step in script {
                    filter = filter.on_data(step.status());
                }
                filter.install(&stream)
            })
            .collect();

        stream.receive_headers(Headers::new(), false);
        let last = chunks.len() - 1;
        for (i, data) in chunks.iter().enumerate() {
            let end_stream = !with_trailers && i == last;
            stream.receive_data(chunk(data), end_stream);
        }
        if with_trailers {
            stream.receive_trailers(Trailers::new());
        }

        // resume whatever is still holding the chain until it runs dry
        let mut rounds = 0;
        while probes.iter().any(|p| p.stopped.get()) {
            rounds += 1;
            prop_assert!(rounds < 64, "resume schedule did not converge");
            for probe in &probes {
                if probe.stopped.get() {
                    probe.continue_chain();
                }
            }
        }

        prop_assert_eq!(host.request_body(), chunks.concat());
        prop_assert_eq!(host.request_eos_count(), 1);
        for probe in &probes {
            probe.assert_well_ordered();
        }
    }

    /// A no-buffer stop discards every byte that arrives during the stop
    /// interval; downstream filters see an empty body on resume.
    #[test]
    fn no_buffer_stop_blanks_the_interim(
        chunks in prop::collection::vec("[a-z]{1,4}", 1..5),
    ) {
        let (stream, host) = recording_stream();

        let mut f1 = ScriptedReceiver::new();
        for _ in &chunks {
            f1 = f1.on_data(DataStatus::StopIterationNoBuffer);
        }
        let f1 = f1.install(&stream);
        let f2 = ScriptedReceiver::new().install(&stream);

        stream.receive_headers(Headers::new(), false);
        let last = chunks.len() - 1;
        for (i, data) in chunks.iter().enumerate() {
            stream.receive_data(chunk(data), i == last);
        }

        prop_assert!(f2.seen.borrow().len() == 1, "only headers so far");
        f1.continue_chain();

        prop_assert_eq!(host.request_body(), "");
        prop_assert_eq!(host.request_eos_count(), 1);
        prop_assert_eq!(f2.body_seen(), "");
        f2.assert_well_ordered();
    }
}
