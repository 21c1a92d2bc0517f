//! Transport-neutral side of the remote session channel.
//!
//! The controller only sees [`SessionChannel`]: a single ordered outbound queue
//! plus an idempotent close. The actual websocket lives behind [`Connector`] so
//! tests can swap it for an in-memory fake.

use super::events::EventSender;
use crate::error::SessionError;
use std::fmt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Base64 PCM16 at 16 kHz.
    Audio(String),
}

pub type OutboundSender = UnboundedSender<OutboundFrame>;
pub type OutboundReceiver = UnboundedReceiver<OutboundFrame>;

/// Unbounded so the capture callback never blocks on the network.
pub fn outbound_queue() -> (OutboundSender, OutboundReceiver) {
    unbounded_channel()
}

/// Everything the remote side needs to start a call for one persona.
#[derive(Clone)]
pub struct ConnectRequest {
    pub api_key: String,
    pub model: String,
    pub voice_id: String,
    pub system_prompt: String,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("voice_id", &self.voice_id)
            .field("system_prompt_len", &self.system_prompt.len())
            .finish()
    }
}

/// Opens links to the voice endpoint.
///
/// `open` must return quickly. Readiness, inbound frames and termination are
/// reported later through `events`.
pub trait Connector {
    fn open(
        &self,
        request: ConnectRequest,
        outbound: OutboundReceiver,
        events: EventSender,
    ) -> Result<Box<dyn ChannelLink>, SessionError>;
}

/// Live connection owned by a [`SessionChannel`].
pub trait ChannelLink {
    /// Begin shutdown. Must not fail and must tolerate repeat calls.
    fn close(&mut self);
}

pub struct SessionChannel {
    outbound: Option<OutboundSender>,
    link: Box<dyn ChannelLink>,
}

impl SessionChannel {
    pub fn open<C: Connector + ?Sized>(
        connector: &C,
        request: ConnectRequest,
        events: EventSender,
    ) -> Result<Self, SessionError> {
        let (outbound, receiver) = outbound_queue();
        let link = connector.open(request, receiver, events)?;
        Ok(Self {
            outbound: Some(outbound),
            link,
        })
    }

    /// Producer handle for the capture path; `None` once closed.
    pub fn sender(&self) -> Option<OutboundSender> {
        self.outbound.clone()
    }

    /// Queue a frame. Frames sent after close are dropped silently.
    pub fn send(&self, frame: OutboundFrame) {
        match &self.outbound {
            Some(outbound) => {
                if outbound.send(frame).is_err() {
                    tracing::debug!("outbound frame dropped; link already gone");
                }
            }
            None => tracing::debug!("outbound frame dropped; channel closed"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_none()
    }

    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            self.link.close();
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.close();
    }
}
