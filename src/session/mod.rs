//! Live voice session manager: capture, remote channel, playback, and the
//! controller that ties one call's resources together.

pub mod capture;
pub mod channel;
pub mod controller;
pub mod events;
pub mod gemini;
pub mod playback;
pub mod protocol;
pub mod timer;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{
    MonotonicClock, Phase, SessionController, SessionSettings, SessionSnapshot, SessionState,
    SystemClock,
};
pub use events::{SessionId, UiCommand};
pub use gemini::{GeminiConnector, DEFAULT_ENDPOINT, DEFAULT_MODEL};
