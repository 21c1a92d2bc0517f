//! Gapless playback scheduling for inbound model audio.
//!
//! Every decoded chunk is placed at `max(watermark, now + margin)` on the
//! output clock, and the watermark moves to the end of that chunk. Chunks that
//! arrive faster than real time therefore queue back to back; a chunk that
//! arrives after the queue drained starts one margin from now.

use crate::audio::pcm::decode_base64_chunk;
use crate::audio::{BufferId, OutputContext};
use crate::error::SessionError;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_SCHEDULE_MARGIN: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    /// Output-clock seconds.
    pub start: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn OutputContext>,
    margin: f64,
    watermark: f64,
    in_flight: BTreeMap<BufferId, ScheduledBuffer>,
    next_id: u64,
    output_closed: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputContext>, margin: Duration) -> Self {
        let watermark = output.now();
        Self {
            output,
            margin: margin.as_secs_f64(),
            watermark,
            in_flight: BTreeMap::new(),
            next_id: 0,
            output_closed: false,
        }
    }

    /// Decode a base64 PCM16 chunk and schedule it.
    ///
    /// An undecodable or empty chunk is dropped with a warning and yields `Ok(None)`;
    /// only an output failure is an error.
    pub fn enqueue(&mut self, chunk: &str) -> Result<Option<ScheduledBuffer>, SessionError> {
        match decode_base64_chunk(chunk) {
            Ok(samples) => self.enqueue_samples(samples),
            Err(err) => {
                tracing::warn!(%err, len = chunk.len(), "dropping undecodable audio chunk");
                Ok(None)
            }
        }
    }

    pub fn enqueue_samples(
        &mut self,
        samples: Vec<f32>,
    ) -> Result<Option<ScheduledBuffer>, SessionError> {
        if samples.is_empty() || self.output_closed {
            return Ok(None);
        }
        let rate = f64::from(self.output.sample_rate().max(1));
        let duration = samples.len() as f64 / rate;
        let now = self.output.now();
        let requested = self.watermark.max(now + self.margin);
        let id = BufferId(self.next_id);
        self.next_id += 1;

        // The output may have rendered past `requested` since `now` was read.
        let start = self.output.schedule(id, samples, requested)?;
        self.watermark = start + duration;
        let buffer = ScheduledBuffer {
            id,
            start,
            duration,
        };
        self.in_flight.insert(id, buffer);
        tracing::debug!(%id, start, duration, in_flight = self.in_flight.len(), "chunk scheduled");
        Ok(Some(buffer))
    }

    /// Forget a buffer that finished on its own. Unknown ids are ignored.
    pub fn on_ended(&mut self, id: BufferId) -> bool {
        self.in_flight.remove(&id).is_some()
    }

    /// Cut every in-flight buffer and restart the queue at the current time.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.in_flight.len();
        for id in self.in_flight.keys() {
            self.output.stop(*id);
        }
        self.in_flight.clear();
        self.watermark = self.output.now();
        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
        stopped
    }

    pub fn close_output(&mut self) -> Result<(), SessionError> {
        if self.output_closed {
            return Ok(());
        }
        self.output_closed = true;
        self.output.close()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn watermark(&self) -> f64 {
        self.watermark
    }

    pub fn now(&self) -> f64 {
        self.output.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_base64_frame;
    use crate::audio::{DeviceNotifier, OutputRequest, PLAYBACK_RATE};
    use crate::audio::AudioBackend;
    use crate::session::test_support::FakeBackend;
    use proptest::prelude::*;
    use std::sync::Arc;

    const EPS: f64 = 1e-9;

    fn scheduler(backend: &FakeBackend, margin_ms: u64) -> PlaybackScheduler {
        let notifier: DeviceNotifier = Arc::new(|_| {});
        let output = backend
            .open_output(
                &OutputRequest {
                    sample_rate: PLAYBACK_RATE,
                    device_name: None,
                },
                notifier,
            )
            .expect("fake output");
        PlaybackScheduler::new(output, Duration::from_millis(margin_ms))
    }

    #[test]
    fn first_chunk_starts_one_margin_from_now() {
        let backend = FakeBackend::new();
        backend.set_output_clock(10.0);
        let mut playback = scheduler(&backend, 50);
        let buffer = playback
            .enqueue_samples(vec![0.0; 12_000])
            .expect("schedule")
            .expect("buffer");
        assert!((buffer.start - 10.05).abs() < EPS);
        assert!((buffer.duration - 0.5).abs() < EPS);
        assert!((playback.watermark() - 10.55).abs() < EPS);
    }

    #[test]
    fn back_to_back_chunks_are_contiguous() {
        let backend = FakeBackend::new();
        let mut playback = scheduler(&backend, 50);
        let first = playback
            .enqueue(&encode_base64_frame(&vec![0.1; 2_400]))
            .expect("schedule")
            .expect("buffer");
        let second = playback
            .enqueue(&encode_base64_frame(&vec![0.1; 4_800]))
            .expect("schedule")
            .expect("buffer");
        assert!((second.start - first.end()).abs() < EPS);
        assert_eq!(playback.in_flight_len(), 2);
        assert_eq!(backend.scheduled().len(), 2);
    }

    #[test]
    fn late_chunk_after_drain_uses_margin_again() {
        let backend = FakeBackend::new();
        let mut playback = scheduler(&backend, 50);
        let first = playback
            .enqueue_samples(vec![0.0; 2_400])
            .expect("schedule")
            .expect("buffer");
        playback.on_ended(first.id);
        backend.set_output_clock(5.0);
        let second = playback
            .enqueue_samples(vec![0.0; 2_400])
            .expect("schedule")
            .expect("buffer");
        assert!((second.start - 5.05).abs() < EPS);
    }

    #[test]
    fn watermark_follows_the_start_the_output_actually_used() {
        let backend = FakeBackend::new();
        let mut playback = scheduler(&backend, 0);
        backend.delay_schedule(0.01);
        let first = playback
            .enqueue_samples(vec![0.0; 2_400])
            .expect("schedule")
            .expect("buffer");
        assert!((first.start - 0.01).abs() < EPS);
        let second = playback
            .enqueue_samples(vec![0.0; 2_400])
            .expect("schedule")
            .expect("buffer");
        assert!(second.start + EPS >= first.end());
        assert!((playback.watermark() - second.end()).abs() < EPS);
    }

    #[test]
    fn interrupt_stops_everything_and_resets_watermark() {
        let backend = FakeBackend::new();
        let mut playback = scheduler(&backend, 50);
        let a = playback.enqueue_samples(vec![0.0; 24_000]).expect("a").expect("a");
        let b = playback.enqueue_samples(vec![0.0; 24_000]).expect("b").expect("b");
        backend.set_output_clock(0.7);
        assert_eq!(playback.interrupt(), 2);
        assert_eq!(playback.in_flight_len(), 0);
        assert!((playback.watermark() - 0.7).abs() < EPS);
        assert_eq!(backend.stopped(), vec![a.id, b.id]);
        assert!(!playback.on_ended(a.id));
    }

    #[test]
    fn garbage_and_empty_chunks_are_dropped() {
        let backend = FakeBackend::new();
        let mut playback = scheduler(&backend, 50);
        assert_eq!(playback.enqueue("%%%").expect("not fatal"), None);
        assert_eq!(playback.enqueue("").expect("not fatal"), None);
        assert_eq!(playback.in_flight_len(), 0);
        assert!(backend.scheduled().is_empty());
    }

    #[test]
    fn nothing_is_scheduled_after_output_closes() {
        let backend = FakeBackend::new();
        let mut playback = scheduler(&backend, 50);
        playback.close_output().expect("close");
        playback.close_output().expect("close twice");
        assert_eq!(backend.output_closes(), 1);
        assert_eq!(playback.enqueue_samples(vec![0.0; 10]).expect("ok"), None);
    }

    #[test]
    fn output_failure_is_reported() {
        let backend = FakeBackend::new();
        let mut playback = scheduler(&backend, 50);
        backend.fail_schedule("speaker unplugged");
        let err = playback
            .enqueue_samples(vec![0.0; 10])
            .expect_err("schedule fails");
        assert_eq!(err, SessionError::Permission("speaker unplugged".into()));
        assert_eq!(playback.in_flight_len(), 0);
    }

    proptest! {
        #[test]
        fn schedule_is_monotonic_and_non_overlapping(
            steps in proptest::collection::vec((1usize..48_000, 0u32..1_500), 1..40),
            margin_ms in 0u64..200,
        ) {
            let backend = FakeBackend::new();
            let mut playback = scheduler(&backend, margin_ms);
            let margin = margin_ms as f64 / 1_000.0;
            let mut clock = 0.0_f64;
            let mut previous: Option<ScheduledBuffer> = None;
            for (samples, advance_ms) in steps {
                clock += f64::from(advance_ms) / 1_000.0;
                backend.set_output_clock(clock);
                let buffer = playback
                    .enqueue_samples(vec![0.0; samples])
                    .expect("schedule")
                    .expect("buffer");
                prop_assert!(buffer.start + EPS >= clock + margin);
                prop_assert!((buffer.duration - samples as f64 / 24_000.0).abs() < EPS);
                if let Some(prev) = previous {
                    prop_assert!(buffer.start + EPS >= prev.end());
                    prop_assert!(buffer.start > prev.start);
                    if prev.end() >= clock + margin {
                        prop_assert!((buffer.start - prev.end()).abs() < EPS);
                    }
                }
                prop_assert!((playback.watermark() - buffer.end()).abs() < EPS);
                previous = Some(buffer);
            }
        }
    }
}
