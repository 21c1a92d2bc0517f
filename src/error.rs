//! Session failure taxonomy shared by the controller, devices, and the remote channel.

use std::fmt;

/// Every failure that can end a call attempt.
///
/// All variants are fatal to the current session and are surfaced to the user;
/// nothing here is retried automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Missing credential or persona; raised before any device or network access.
    Configuration(String),
    /// Microphone or speaker denied, missing, or failed while in use.
    Permission(String),
    /// Channel open failure, mid-session network error, or unexpected close.
    Connection(String),
}

impl SessionError {
    /// Short label used in logs and status output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Permission(_) => "permission",
            Self::Connection(_) => "connection",
        }
    }

    /// Message rendered in the UI error banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(detail) => format!("Configuration missing: {detail}."),
            Self::Permission(detail) => format!("Microphone or speaker unavailable: {detail}."),
            Self::Connection(detail) => format!("Connection error occurred: {detail}."),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(detail) => write!(f, "configuration error: {detail}"),
            Self::Permission(detail) => write!(f, "audio device error: {detail}"),
            Self::Connection(detail) => write!(f, "connection error: {detail}"),
        }
    }
}

impl std::error::Error for SessionError {}
