//! Microphone capture pipeline.
//!
//! The device callback pushes 16 kHz mono samples into a [`FrameChunker`]; every
//! full frame is encoded to base64 PCM16 and queued on the outbound channel.
//! A gate shared with the callback decides whether anything leaves at all:
//! closed until `start`, closed again (and the sender dropped) on `stop`.

use super::channel::{OutboundFrame, OutboundSender};
use crate::audio::pcm::encode_base64_frame;
use crate::audio::{AudioBackend, DeviceNotifier, InputDevice, InputRequest, CAPTURE_RATE};
use crate::error::SessionError;
use crate::lock::lock_or_recover;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub frame_samples: usize,
    pub device_name: Option<String>,
}

/// Re-chunks an arbitrary sample stream into fixed-size frames.
#[derive(Debug)]
pub struct FrameChunker {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let take = (self.frame_samples - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.pending.len() == self.frame_samples {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[derive(Default)]
struct CaptureGate {
    open: AtomicBool,
    outbound: Mutex<Option<OutboundSender>>,
    frames_sent: AtomicU64,
}

impl CaptureGate {
    fn forward(&self, frame: &[f32]) {
        let outbound = lock_or_recover(&self.outbound, "capture_outbound");
        // Re-checked under the lock so stop() cannot race a frame out.
        let Some(sender) = outbound.as_ref() else {
            return;
        };
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        if sender.send(OutboundFrame::Audio(encode_base64_frame(frame))).is_ok() {
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct CapturePipeline {
    device: Option<Box<dyn InputDevice>>,
    gate: Arc<CaptureGate>,
    started: bool,
}

impl CapturePipeline {
    /// Acquire the microphone with the gate closed.
    pub fn open<B: AudioBackend + ?Sized>(
        backend: &B,
        settings: &CaptureSettings,
        notifier: DeviceNotifier,
    ) -> Result<Self, SessionError> {
        let gate = Arc::new(CaptureGate::default());
        let callback_gate = Arc::clone(&gate);
        let mut chunker = FrameChunker::new(settings.frame_samples);
        let sink = Box::new(move |samples: &[f32]| {
            if !callback_gate.open.load(Ordering::Acquire) {
                chunker.reset();
                return;
            }
            chunker.push(samples, |frame| callback_gate.forward(frame));
        });
        let request = InputRequest {
            sample_rate: CAPTURE_RATE,
            device_name: settings.device_name.clone(),
        };
        let device = backend.open_input(&request, sink, notifier)?;
        tracing::info!(
            device = device.name(),
            frame_samples = settings.frame_samples,
            "microphone acquired"
        );
        Ok(Self {
            device: Some(device),
            gate,
            started: false,
        })
    }

    /// Start streaming frames into `outbound`.
    pub fn start(&mut self, outbound: OutboundSender) -> Result<(), SessionError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| SessionError::Permission("microphone already released".into()))?;
        *lock_or_recover(&self.gate.outbound, "capture_outbound") = Some(outbound);
        self.gate.open.store(true, Ordering::Release);
        self.started = true;
        device.start()
    }

    /// Close the gate, then release the device. Safe to call repeatedly.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.gate.open.store(false, Ordering::Release);
        lock_or_recover(&self.gate.outbound, "capture_outbound").take();
        let Some(mut device) = self.device.take() else {
            return Ok(());
        };
        tracing::debug!(
            frames_sent = self.frames_sent(),
            started = self.started,
            "releasing microphone"
        );
        device.close()
    }

    pub fn is_streaming(&self) -> bool {
        self.device.is_some() && self.gate.open.load(Ordering::Acquire)
    }

    pub fn frames_sent(&self) -> u64 {
        self.gate.frames_sent.load(Ordering::Relaxed)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(%err, "microphone release failed on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::decode_base64_chunk;
    use crate::session::channel::outbound_queue;
    use crate::session::test_support::FakeBackend;

    fn settings(frame_samples: usize) -> CaptureSettings {
        CaptureSettings {
            frame_samples,
            device_name: None,
        }
    }

    fn drain(rx: &mut crate::session::channel::OutboundReceiver) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(OutboundFrame::Audio(data)) = rx.try_recv() {
            frames.push(data);
        }
        frames
    }

    #[test]
    fn chunker_emits_fixed_frames_and_keeps_remainder() {
        let mut chunker = FrameChunker::new(4);
        let mut frames = Vec::new();
        chunker.push(&[1.0, 2.0, 3.0], |f| frames.push(f.to_vec()));
        assert!(frames.is_empty());
        chunker.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |f| frames.push(f.to_vec()));
        assert_eq!(
            frames,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert_eq!(chunker.buffered(), 1);
    }

    #[test]
    fn nothing_is_sent_before_start() {
        let backend = FakeBackend::new();
        let notifier = backend.null_notifier();
        let mut capture = CapturePipeline::open(&backend, &settings(4), notifier).expect("open");
        backend.feed_input(&[0.1; 16]);
        assert_eq!(capture.frames_sent(), 0);
        let (tx, mut rx) = outbound_queue();
        capture.start(tx).expect("start");
        assert!(drain(&mut rx).is_empty());
        assert!(capture.is_streaming());
    }

    #[test]
    fn frames_are_encoded_pcm16_of_configured_length() {
        let backend = FakeBackend::new();
        let mut capture =
            CapturePipeline::open(&backend, &settings(4), backend.null_notifier()).expect("open");
        let (tx, mut rx) = outbound_queue();
        capture.start(tx).expect("start");
        backend.feed_input(&[0.5, 0.5, 0.5, 0.5, -2.0, -2.0]);
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        let decoded = decode_base64_chunk(&frames[0]).expect("decode");
        assert_eq!(decoded.len(), 4);
        assert!((decoded[0] - 0.5).abs() < 1e-3);
        backend.feed_input(&[0.0, 0.0]);
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        let decoded = decode_base64_chunk(&frames[0]).expect("decode");
        assert_eq!(decoded[0], -1.0);
        assert_eq!(capture.frames_sent(), 2);
    }

    #[test]
    fn stop_is_idempotent_and_silences_the_gate() {
        let backend = FakeBackend::new();
        let mut capture =
            CapturePipeline::open(&backend, &settings(2), backend.null_notifier()).expect("open");
        let (tx, mut rx) = outbound_queue();
        capture.start(tx).expect("start");
        capture.stop().expect("stop");
        capture.stop().expect("second stop");
        backend.feed_input(&[0.2; 8]);
        assert!(drain(&mut rx).is_empty());
        assert!(!capture.is_streaming());
        assert_eq!(backend.input_closes(), 1);
        assert!(capture.start(outbound_queue().0).is_err());
    }

    #[test]
    fn denied_microphone_is_a_permission_error() {
        let backend = FakeBackend::new();
        backend.deny_input("mic blocked");
        let err = CapturePipeline::open(&backend, &settings(4), backend.null_notifier())
            .err()
            .expect("denied");
        assert_eq!(err, SessionError::Permission("mic blocked".into()));
    }
}
