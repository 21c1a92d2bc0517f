//! Messages delivered to the controller queue.
//!
//! Hardware and network callbacks never touch session state directly; they
//! enqueue a [`SessionEvent`] tagged with the session that produced it.

use super::protocol::InboundFrame;
use crate::audio::{BufferId, DeviceNotice};
use crate::persona::AgentKind;
use crossbeam_channel::Sender;
use std::fmt;

/// Monotonic call counter; events from an older call are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn next(self) -> Self {
        SessionId(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Server acknowledged setup.
    ChannelOpened,
    Inbound(InboundFrame),
    /// Remote end or network ended the connection.
    ChannelClosed { reason: Option<String> },
    ChannelFailed(String),
    PlaybackEnded(BufferId),
    DeviceFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub kind: EventKind,
}

/// Producer handle given to callbacks; stamps every event with its session.
#[derive(Debug, Clone)]
pub struct EventSender {
    session: SessionId,
    tx: Sender<SessionEvent>,
}

impl EventSender {
    pub fn new(session: SessionId, tx: Sender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    /// Returns false once the controller has gone away.
    pub fn emit(&self, kind: EventKind) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                kind,
            })
            .is_ok()
    }

    pub fn emit_device_notice(&self, notice: DeviceNotice) -> bool {
        match notice {
            DeviceNotice::BufferEnded(id) => self.emit(EventKind::PlaybackEnded(id)),
            DeviceNotice::StreamError(err) => self.emit(EventKind::DeviceFailed(err)),
        }
    }
}

/// Requests from the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    Open(AgentKind),
    Close,
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn emit_stamps_session_id() {
        let (tx, rx) = unbounded();
        let sender = EventSender::new(SessionId(3), tx);
        assert!(sender.emit(EventKind::ChannelOpened));
        let event = rx.try_recv().expect("event queued");
        assert_eq!(event.session, SessionId(3));
        assert_eq!(event.kind, EventKind::ChannelOpened);
    }

    #[test]
    fn device_notices_map_to_session_events() {
        let (tx, rx) = unbounded();
        let sender = EventSender::new(SessionId(1), tx);
        sender.emit_device_notice(DeviceNotice::BufferEnded(BufferId(9)));
        sender.emit_device_notice(DeviceNotice::StreamError("unplugged".into()));
        let kinds: Vec<EventKind> = rx.try_iter().map(|event| event.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::PlaybackEnded(BufferId(9)),
                EventKind::DeviceFailed("unplugged".into())
            ]
        );
    }

    #[test]
    fn emit_reports_dropped_receiver() {
        let (tx, rx) = unbounded();
        drop(rx);
        assert!(!EventSender::new(SessionId(1), tx).emit(EventKind::ChannelOpened));
    }
}
