//! Call lifecycle state machine.
//!
//! ```text
//! Idle ──open──▶ Connecting ──Opened──▶ Connected ──close──▶ Closed
//!                    │                      │
//!                    └──failure/remote close┴──▶ Errored ──close──▶ Closed
//! ```
//!
//! The controller is single-threaded. Device and network callbacks only enqueue
//! [`SessionEvent`]s; [`SessionController::pump`] or [`SessionController::run`]
//! applies them one at a time, so session state has exactly one writer.

use super::capture::{CapturePipeline, CaptureSettings};
use super::channel::{ConnectRequest, Connector, SessionChannel};
use super::events::{EventKind, EventSender, SessionEvent, SessionId, UiCommand};
use super::playback::{PlaybackScheduler, DEFAULT_SCHEDULE_MARGIN};
use super::protocol::InboundFrame;
use super::timer::{FallbackTimer, DEFAULT_TALKING_FALLBACK};
use crate::audio::{
    AudioBackend, DeviceNotice, DeviceNotifier, OutputRequest, DEFAULT_FRAME_SAMPLES,
    PLAYBACK_RATE,
};
use crate::error::SessionError;
use crate::persona::{self, AgentKind, AgentPersona};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll interval for `run` while no talking deadline is pending.
const IDLE_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closed,
    Errored,
}

impl Phase {
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Connecting | Phase::Connected)
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::Closed => "closed",
            Phase::Errored => "errored",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub connected: bool,
    pub talking: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub agent: Option<AgentKind>,
    pub state: SessionState,
}

#[derive(Clone)]
pub struct SessionSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub frame_samples: usize,
    pub talking_fallback: Duration,
    pub schedule_margin: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: super::gemini::DEFAULT_MODEL.to_string(),
            input_device: None,
            output_device: None,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            talking_fallback: DEFAULT_TALKING_FALLBACK,
            schedule_margin: DEFAULT_SCHEDULE_MARGIN,
        }
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("input_device", &self.input_device)
            .field("output_device", &self.output_device)
            .field("frame_samples", &self.frame_samples)
            .field("talking_fallback", &self.talking_fallback)
            .field("schedule_margin", &self.schedule_margin)
            .finish()
    }
}

pub trait MonotonicClock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Resources owned by one call. Each is optional so a partially opened call
/// can be torn down the same way as a complete one.
struct ActiveSession {
    id: SessionId,
    playback: Option<PlaybackScheduler>,
    capture: Option<CapturePipeline>,
    channel: Option<SessionChannel>,
}

/// Run one release step; failures and panics are logged, never propagated.
fn guarded_release(step: &'static str, release: impl FnOnce() -> Result<(), SessionError>) {
    match catch_unwind(AssertUnwindSafe(release)) {
        Ok(Ok(())) => tracing::debug!(step, "released"),
        Ok(Err(err)) => tracing::warn!(step, %err, "release failed"),
        Err(_) => tracing::warn!(step, "release panicked"),
    }
}

pub struct SessionController<B: AudioBackend, C: Connector> {
    backend: B,
    connector: C,
    settings: SessionSettings,
    clock: Box<dyn MonotonicClock>,
    phase: Phase,
    state: SessionState,
    last_error: Option<SessionError>,
    session_id: SessionId,
    active: Option<ActiveSession>,
    agent: Option<AgentKind>,
    timer: FallbackTimer,
    /// Carries `session` and `agent` for every record logged on behalf of a call.
    call_span: tracing::Span,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    subscribers: Vec<Sender<SessionSnapshot>>,
}

impl<B: AudioBackend, C: Connector> SessionController<B, C> {
    pub fn new(backend: B, connector: C, settings: SessionSettings) -> Self {
        Self::with_clock(backend, connector, settings, Box::new(SystemClock))
    }

    pub fn with_clock(
        backend: B,
        connector: C,
        settings: SessionSettings,
        clock: Box<dyn MonotonicClock>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        let timer = FallbackTimer::new(settings.talking_fallback);
        Self {
            backend,
            connector,
            settings,
            clock,
            phase: Phase::Idle,
            state: SessionState::default(),
            last_error: None,
            session_id: SessionId::default(),
            active: None,
            agent: None,
            timer,
            call_span: tracing::Span::none(),
            events_tx,
            events_rx,
            subscribers: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            agent: self.agent,
            state: self.state.clone(),
        }
    }

    /// Change feed for the UI; the current snapshot is delivered immediately.
    pub fn subscribe(&mut self) -> Receiver<SessionSnapshot> {
        let (tx, rx) = unbounded();
        let _ = tx.send(self.snapshot());
        self.subscribers.push(tx);
        rx
    }

    /// Start a call with `persona`.
    ///
    /// Configuration problems are reported before any device or network access.
    pub fn open_session(&mut self, persona: Option<&'static AgentPersona>) {
        if self.phase.is_active() {
            tracing::warn!(phase = %self.phase, "open ignored; a call is already active");
            return;
        }
        let Some(persona) = persona else {
            self.fail(SessionError::Configuration("no agent selected".into()));
            return;
        };
        self.agent = Some(persona.kind);
        let api_key = match self.settings.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                self.fail(SessionError::Configuration("API key is not set".into()));
                return;
            }
        };

        self.session_id = self.session_id.next();
        self.call_span = tracing::info_span!(
            "call",
            session = %self.session_id,
            agent = persona.kind.as_str()
        );
        // Entered through acquisition so the network task inherits it.
        let _call = self.call_span.clone().entered();
        self.last_error = None;
        self.timer.disarm();
        self.state = SessionState::default();
        self.phase = Phase::Connecting;
        self.active = Some(ActiveSession {
            id: self.session_id,
            playback: None,
            capture: None,
            channel: None,
        });
        tracing::info!(voice = persona.voice_id, "opening call");
        self.publish();

        if let Err(err) = self.acquire_resources(persona, api_key) {
            self.fail(err);
        }
    }

    fn acquire_resources(
        &mut self,
        persona: &'static AgentPersona,
        api_key: String,
    ) -> Result<(), SessionError> {
        let events = EventSender::new(self.session_id, self.events_tx.clone());
        let notifier = device_notifier(events.clone());

        let output = self.backend.open_output(
            &OutputRequest {
                sample_rate: PLAYBACK_RATE,
                device_name: self.settings.output_device.clone(),
            },
            Arc::clone(&notifier),
        )?;
        let playback = PlaybackScheduler::new(output, self.settings.schedule_margin);
        self.attach(|active| active.playback = Some(playback));

        let capture = CapturePipeline::open(
            &self.backend,
            &CaptureSettings {
                frame_samples: self.settings.frame_samples,
                device_name: self.settings.input_device.clone(),
            },
            notifier,
        )?;
        self.attach(|active| active.capture = Some(capture));

        let request = ConnectRequest {
            api_key,
            model: self.settings.model.clone(),
            voice_id: persona.voice_id.to_string(),
            system_prompt: persona.system_prompt.to_string(),
        };
        let channel = SessionChannel::open(&self.connector, request, events)?;
        self.attach(|active| active.channel = Some(channel));
        Ok(())
    }

    fn attach(&mut self, install: impl FnOnce(&mut ActiveSession)) {
        if let Some(active) = self.active.as_mut() {
            install(active);
        }
    }

    /// Hang up. No-op when nothing is open; dismisses a shown error.
    pub fn close_session(&mut self) {
        let _call = self.call_span.clone().entered();
        match self.phase {
            Phase::Idle | Phase::Closed => {
                tracing::debug!(phase = %self.phase, "close ignored; no call open");
            }
            Phase::Errored => {
                self.last_error = None;
                self.state = SessionState::default();
                self.phase = Phase::Closed;
                self.publish();
            }
            Phase::Connecting | Phase::Connected => {
                tracing::info!("closing call");
                self.teardown();
                self.state = SessionState::default();
                self.phase = Phase::Closed;
                self.publish();
            }
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        let _call = self.call_span.clone().entered();
        let current = self.active.as_ref().map(|active| active.id);
        if current != Some(event.session) {
            tracing::debug!(
                event_session = %event.session,
                kind = ?event.kind,
                "ignoring stale session event"
            );
            return;
        }

        match event.kind {
            EventKind::ChannelOpened => self.on_channel_opened(),
            EventKind::Inbound(frame) => self.on_inbound(frame),
            EventKind::ChannelClosed { reason } => {
                let detail = match reason {
                    Some(reason) if !reason.is_empty() => {
                        format!("session closed by server ({reason})")
                    }
                    _ => "session closed by server".to_string(),
                };
                self.fail(SessionError::Connection(detail));
            }
            EventKind::ChannelFailed(cause) => self.fail(SessionError::Connection(cause)),
            EventKind::PlaybackEnded(id) => {
                if let Some(playback) = self.playback_mut() {
                    playback.on_ended(id);
                }
                self.refresh_talking();
            }
            EventKind::DeviceFailed(cause) => self.fail(SessionError::Permission(cause)),
        }
    }

    fn on_channel_opened(&mut self) {
        if self.phase != Phase::Connecting {
            tracing::debug!(phase = %self.phase, "duplicate channel open ignored");
            return;
        }
        let started = match self.active.as_mut() {
            Some(ActiveSession {
                capture: Some(capture),
                channel: Some(channel),
                ..
            }) => match channel.sender() {
                Some(outbound) => capture.start(outbound),
                None => Err(SessionError::Connection("channel closed before ready".into())),
            },
            _ => Err(SessionError::Permission("microphone not acquired".into())),
        };
        if let Err(err) = started {
            self.fail(err);
            return;
        }
        self.phase = Phase::Connected;
        self.state.connected = true;
        tracing::info!("call connected; streaming microphone");
        self.publish();
    }

    fn on_inbound(&mut self, frame: InboundFrame) {
        if self.phase != Phase::Connected {
            tracing::debug!(phase = %self.phase, "inbound frame before ready ignored");
            return;
        }
        match frame {
            InboundFrame::Audio(data) => {
                let scheduled = match self.playback_mut() {
                    Some(playback) => playback.enqueue(&data),
                    None => Ok(None),
                };
                match scheduled {
                    Ok(Some(_)) => {
                        let now = self.clock.now();
                        self.timer.arm(now);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        self.fail(err);
                        return;
                    }
                }
            }
            InboundFrame::Interrupted => {
                let stopped = self
                    .playback_mut()
                    .map(|playback| playback.interrupt())
                    .unwrap_or(0);
                self.timer.disarm();
                tracing::info!(stopped, "model interrupted by caller");
            }
            InboundFrame::TurnComplete => {
                self.timer.disarm();
                tracing::debug!("model turn complete");
            }
        }
        self.refresh_talking();
    }

    /// Expire the talking window if due.
    pub fn tick(&mut self) {
        if self.timer.expire_if_due(self.clock.now()) {
            let _call = self.call_span.clone().entered();
            tracing::debug!("talking fallback window elapsed");
            self.refresh_talking();
        }
    }

    /// Apply every queued event, then check the talking deadline.
    pub fn pump(&mut self) -> usize {
        let pending: Vec<SessionEvent> = self.events_rx.try_iter().collect();
        let handled = pending.len();
        for event in pending {
            self.handle_event(event);
        }
        self.tick();
        handled
    }

    /// Serve UI commands until `Shutdown` or until the command sender goes away.
    pub fn run(&mut self, commands: &Receiver<UiCommand>) -> Phase {
        let events = self.events_rx.clone();
        loop {
            let wait = self
                .timer
                .remaining(self.clock.now())
                .map_or(IDLE_POLL, |left| left.min(IDLE_POLL));
            let mut shutdown = false;
            select! {
                recv(commands) -> command => match command {
                    Ok(UiCommand::Open(kind)) => self.open_session(Some(persona::lookup(kind))),
                    Ok(UiCommand::Close) => self.close_session(),
                    Ok(UiCommand::Shutdown) | Err(_) => shutdown = true,
                },
                recv(events) -> event => {
                    if let Ok(event) = event {
                        self.handle_event(event);
                    }
                },
                default(wait) => {},
            }
            if shutdown {
                break;
            }
            self.tick();
        }
        if self.phase.is_active() {
            self.close_session();
        }
        tracing::info!(phase = %self.phase, "session loop finished");
        self.phase
    }

    fn playback_mut(&mut self) -> Option<&mut PlaybackScheduler> {
        self.active.as_mut().and_then(|active| active.playback.as_mut())
    }

    fn talking_now(&self) -> bool {
        let in_flight = self
            .active
            .as_ref()
            .and_then(|active| active.playback.as_ref())
            .is_some_and(|playback| playback.in_flight_len() > 0);
        in_flight || self.timer.is_armed()
    }

    fn refresh_talking(&mut self) {
        let talking = self.phase == Phase::Connected && self.talking_now();
        if talking != self.state.talking {
            self.state.talking = talking;
            self.publish();
        }
    }

    fn fail(&mut self, err: SessionError) {
        tracing::error!(kind = err.label(), %err, "call failed");
        self.teardown();
        self.state = SessionState {
            connected: false,
            talking: false,
            error: Some(err.user_message()),
        };
        self.last_error = Some(err);
        self.phase = Phase::Errored;
        self.publish();
    }

    /// Release everything the active call holds, in dependency order.
    fn teardown(&mut self) {
        self.timer.disarm();
        let Some(mut active) = self.active.take() else {
            return;
        };
        tracing::debug!("tearing down call");
        if let Some(mut capture) = active.capture.take() {
            guarded_release("capture", move || capture.stop());
        }
        if let Some(playback) = active.playback.as_mut() {
            guarded_release("playback", || {
                playback.interrupt();
                Ok(())
            });
        }
        if let Some(mut channel) = active.channel.take() {
            guarded_release("channel", move || {
                channel.close();
                Ok(())
            });
        }
        if let Some(mut playback) = active.playback.take() {
            guarded_release("output", move || playback.close_output());
        }
        guarded_release("timers", || {
            self.timer.disarm();
            Ok(())
        });
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

impl<B: AudioBackend, C: Connector> Drop for SessionController<B, C> {
    fn drop(&mut self) {
        let _call = self.call_span.clone().entered();
        self.teardown();
    }
}

fn device_notifier(events: EventSender) -> DeviceNotifier {
    Arc::new(move |notice: DeviceNotice| {
        events.emit_device_notice(notice);
    })
}
