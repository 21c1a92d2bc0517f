//! Audio hardware seam: microphone capture, speaker scheduling, and the sample
//! formats used on the wire.
//!
//! The session never talks to `cpal` directly. It goes through
//! [`AudioBackend`], which hands out an [`InputDevice`] delivering mono samples
//! at the capture rate and an [`OutputContext`] that plays buffers at exact
//! times on its own clock. Hardware callbacks report back through a
//! [`DeviceNotifier`] so the controller sees them as ordinary queued events.

pub mod device;
pub mod mixer;
pub mod pcm;
pub mod resample;

use crate::error::SessionError;
use std::fmt;
use std::sync::Arc;

/// Outbound wire rate.
pub const CAPTURE_RATE: u32 = 16_000;
/// Inbound wire rate.
pub const PLAYBACK_RATE: u32 = 24_000;
pub const DEFAULT_FRAME_SAMPLES: usize = 4_096;

/// Identifier of one scheduled playback buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    /// Rate the sink expects; the backend converts from the device rate.
    pub sample_rate: u32,
    /// Preferred device name; `None` picks the system default.
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRequest {
    /// Rate of the buffers passed to [`OutputContext::schedule`].
    pub sample_rate: u32,
    pub device_name: Option<String>,
}

/// Something a hardware thread wants the controller to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceNotice {
    BufferEnded(BufferId),
    StreamError(String),
}

pub type DeviceNotifier = Arc<dyn Fn(DeviceNotice) + Send + Sync>;

/// Receives mono samples at the requested capture rate, on the device thread.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send>;

pub trait AudioBackend {
    /// Acquire a microphone. Samples flow to `sink` only after `start`.
    fn open_input(
        &self,
        request: &InputRequest,
        sink: SampleSink,
        notifier: DeviceNotifier,
    ) -> Result<Box<dyn InputDevice>, SessionError>;

    /// Acquire a speaker with a running output clock.
    fn open_output(
        &self,
        request: &OutputRequest,
        notifier: DeviceNotifier,
    ) -> Result<Box<dyn OutputContext>, SessionError>;
}

pub trait InputDevice {
    fn name(&self) -> &str;
    fn start(&mut self) -> Result<(), SessionError>;
    /// Release the device. Safe to call more than once.
    fn close(&mut self) -> Result<(), SessionError>;
}

pub trait OutputContext {
    /// Output clock in seconds; monotonic for the life of the context.
    fn now(&self) -> f64;
    fn sample_rate(&self) -> u32;
    /// Play `samples` (at the requested rate) starting at `start_at` seconds.
    /// Returns the start actually used, which is never earlier than the clock
    /// at the moment the buffer was queued. Completion is reported as
    /// [`DeviceNotice::BufferEnded`].
    fn schedule(
        &mut self,
        id: BufferId,
        samples: Vec<f32>,
        start_at: f64,
    ) -> Result<f64, SessionError>;
    /// Silence one buffer without a completion notice.
    fn stop(&mut self, id: BufferId);
    fn close(&mut self) -> Result<(), SessionError>;
}
