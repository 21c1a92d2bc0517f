//! In-memory audio backend, connector and clock for session tests.

use super::channel::{ChannelLink, ConnectRequest, Connector, OutboundFrame, OutboundReceiver};
use super::controller::MonotonicClock;
use super::events::{EventKind, EventSender};
use crate::audio::{
    AudioBackend, BufferId, DeviceNotice, DeviceNotifier, InputDevice, InputRequest,
    OutputContext, OutputRequest, SampleSink,
};
use crate::error::SessionError;
use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct AudioState {
    sink: Option<SampleSink>,
    input_notifier: Option<DeviceNotifier>,
    output_notifier: Option<DeviceNotifier>,
    deny_input: Option<String>,
    deny_output: Option<String>,
    fail_schedule: Option<String>,
    schedule_delay: f64,
    input_opens: u32,
    input_starts: u32,
    input_closes: u32,
    output_opens: u32,
    output_closes: u32,
    clock: f64,
    scheduled: Vec<(BufferId, usize, f64)>,
    stopped: Vec<BufferId>,
}

/// Shared-state fake; clones observe the same devices.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Rc<RefCell<AudioState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn null_notifier(&self) -> DeviceNotifier {
        Arc::new(|_| {})
    }

    pub fn deny_input(&self, reason: &str) {
        self.state.borrow_mut().deny_input = Some(reason.to_string());
    }

    pub fn deny_output(&self, reason: &str) {
        self.state.borrow_mut().deny_output = Some(reason.to_string());
    }

    pub fn fail_schedule(&self, reason: &str) {
        self.state.borrow_mut().fail_schedule = Some(reason.to_string());
    }

    /// Make the output start every buffer `seconds` later than requested, as if
    /// a render callback ran between reading the clock and queueing.
    pub fn delay_schedule(&self, seconds: f64) {
        self.state.borrow_mut().schedule_delay = seconds;
    }

    /// Push samples through the microphone callback, as the device thread would.
    pub fn feed_input(&self, samples: &[f32]) {
        let sink = self.state.borrow_mut().sink.take();
        if let Some(mut sink) = sink {
            sink(samples);
            let mut state = self.state.borrow_mut();
            if state.sink.is_none() && state.input_closes < state.input_opens {
                state.sink = Some(sink);
            }
        }
    }

    pub fn set_output_clock(&self, seconds: f64) {
        self.state.borrow_mut().clock = seconds;
    }

    pub fn advance_output_clock(&self, seconds: f64) {
        self.state.borrow_mut().clock += seconds;
    }

    /// Report a buffer as played out.
    pub fn finish_buffer(&self, id: BufferId) {
        let notifier = self.state.borrow().output_notifier.clone();
        if let Some(notifier) = notifier {
            notifier(DeviceNotice::BufferEnded(id));
        }
    }

    pub fn fail_input_stream(&self, reason: &str) {
        let notifier = self.state.borrow().input_notifier.clone();
        if let Some(notifier) = notifier {
            notifier(DeviceNotice::StreamError(reason.to_string()));
        }
    }

    pub fn scheduled(&self) -> Vec<(BufferId, usize, f64)> {
        self.state.borrow().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        self.state.borrow().stopped.clone()
    }

    pub fn input_opens(&self) -> u32 {
        self.state.borrow().input_opens
    }

    pub fn input_starts(&self) -> u32 {
        self.state.borrow().input_starts
    }

    pub fn input_closes(&self) -> u32 {
        self.state.borrow().input_closes
    }

    pub fn output_opens(&self) -> u32 {
        self.state.borrow().output_opens
    }

    pub fn output_closes(&self) -> u32 {
        self.state.borrow().output_closes
    }

    /// Every acquired device has been released.
    pub fn all_released(&self) -> bool {
        let state = self.state.borrow();
        state.input_closes == state.input_opens && state.output_closes == state.output_opens
    }
}

struct FakeInput {
    state: Rc<RefCell<AudioState>>,
    closed: bool,
}

impl InputDevice for FakeInput {
    fn name(&self) -> &str {
        "fake microphone"
    }

    fn start(&mut self) -> Result<(), SessionError> {
        self.state.borrow_mut().input_starts += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if !self.closed {
            self.closed = true;
            let mut state = self.state.borrow_mut();
            state.input_closes += 1;
            state.sink = None;
        }
        Ok(())
    }
}

struct FakeOutput {
    state: Rc<RefCell<AudioState>>,
    sample_rate: u32,
    closed: bool,
}

impl OutputContext for FakeOutput {
    fn now(&self) -> f64 {
        self.state.borrow().clock
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(
        &mut self,
        id: BufferId,
        samples: Vec<f32>,
        start_at: f64,
    ) -> Result<f64, SessionError> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = &state.fail_schedule {
            return Err(SessionError::Permission(reason.clone()));
        }
        let start = start_at.max(state.clock) + state.schedule_delay;
        state.scheduled.push((id, samples.len(), start));
        Ok(start)
    }

    fn stop(&mut self, id: BufferId) {
        self.state.borrow_mut().stopped.push(id);
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if !self.closed {
            self.closed = true;
            self.state.borrow_mut().output_closes += 1;
        }
        Ok(())
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(
        &self,
        _request: &InputRequest,
        sink: SampleSink,
        notifier: DeviceNotifier,
    ) -> Result<Box<dyn InputDevice>, SessionError> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = &state.deny_input {
            return Err(SessionError::Permission(reason.clone()));
        }
        state.input_opens += 1;
        state.sink = Some(sink);
        state.input_notifier = Some(notifier);
        Ok(Box::new(FakeInput {
            state: Rc::clone(&self.state),
            closed: false,
        }))
    }

    fn open_output(
        &self,
        request: &OutputRequest,
        notifier: DeviceNotifier,
    ) -> Result<Box<dyn OutputContext>, SessionError> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = &state.deny_output {
            return Err(SessionError::Permission(reason.clone()));
        }
        state.output_opens += 1;
        state.output_notifier = Some(notifier);
        Ok(Box::new(FakeOutput {
            state: Rc::clone(&self.state),
            sample_rate: request.sample_rate,
            closed: false,
        }))
    }
}

#[derive(Default)]
struct ConnectorState {
    fail_open: Option<SessionError>,
    requests: Vec<ConnectRequest>,
    outbound: Option<OutboundReceiver>,
    events: Option<EventSender>,
    link_closes: Rc<Cell<u32>>,
}

/// Records opens and lets tests play the server side through `server_*` calls.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Rc<RefCell<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, err: SessionError) {
        self.state.borrow_mut().fail_open = Some(err);
    }

    pub fn opens(&self) -> usize {
        self.state.borrow().requests.len()
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.state.borrow().requests.last().cloned()
    }

    pub fn link_closes(&self) -> u32 {
        self.state.borrow().link_closes.get()
    }

    /// Sender bound to the most recent open, for injecting stale events later.
    pub fn events(&self) -> Option<EventSender> {
        self.state.borrow().events.clone()
    }

    pub fn server_emit(&self, kind: EventKind) {
        if let Some(events) = self.events() {
            events.emit(kind);
        }
    }

    /// Audio frames the session has queued for the server so far.
    pub fn sent_frames(&self) -> Vec<String> {
        let mut state = self.state.borrow_mut();
        let mut frames = Vec::new();
        if let Some(outbound) = state.outbound.as_mut() {
            while let Ok(OutboundFrame::Audio(data)) = outbound.try_recv() {
                frames.push(data);
            }
        }
        frames
    }
}

struct FakeLink {
    closes: Rc<Cell<u32>>,
    closed: bool,
}

impl ChannelLink for FakeLink {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.set(self.closes.get() + 1);
        }
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        request: ConnectRequest,
        outbound: OutboundReceiver,
        events: EventSender,
    ) -> Result<Box<dyn ChannelLink>, SessionError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_open.clone() {
            return Err(err);
        }
        state.requests.push(request);
        state.outbound = Some(outbound);
        state.events = Some(events);
        Ok(Box::new(FakeLink {
            closes: Rc::clone(&state.link_closes),
            closed: false,
        }))
    }
}

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }
}

/// In-memory sink for the JSON trace subscriber.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn records(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().expect("capture lock").clone();
        String::from_utf8(bytes)
            .expect("utf8 log")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json record"))
            .collect()
    }

    /// The first record whose message is `message`.
    pub fn record(&self, message: &str) -> Option<serde_json::Value> {
        self.records()
            .into_iter()
            .find(|record| record["fields"]["message"] == message)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("capture lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
