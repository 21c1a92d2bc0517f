//! Plumbit voice client: live, interruptible voice calls with the support and
//! emergency-dispatch agents.

pub mod audio;
pub mod config;
pub mod error;
mod lock;
pub mod persona;
pub mod session;
pub mod telemetry;
pub mod terminal_restore;

pub use error::SessionError;
pub use persona::{AgentKind, AgentPersona};
pub use session::{Phase, SessionController, SessionSnapshot, SessionState, UiCommand};
