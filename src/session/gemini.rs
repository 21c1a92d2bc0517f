//! Websocket connector for the Gemini Live endpoint.
//!
//! Each call runs as one task on a small runtime owned by the connector. The
//! task multiplexes three sources: the local close signal, the outbound frame
//! queue, and inbound websocket messages. Everything it learns is reported to
//! the controller as session events.

use super::channel::{ChannelLink, ConnectRequest, Connector, OutboundFrame, OutboundReceiver};
use super::events::{EventKind, EventSender};
use super::protocol::{ClientMessage, ServerMessage};
use crate::error::SessionError;
use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;
use tungstenite::Message;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

const REDACTED: &str = "<redacted>";

fn session_url(endpoint: &str, api_key: &str) -> Result<String, SessionError> {
    let endpoint = endpoint.trim();
    if !(endpoint.starts_with("wss://") || endpoint.starts_with("ws://")) {
        return Err(SessionError::Configuration(format!(
            "voice endpoint must be a ws:// or wss:// URL, got '{endpoint}'"
        )));
    }
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    Ok(format!("{endpoint}{separator}key={api_key}"))
}

/// Replace the key in any text that might echo the session URL.
fn redact(text: &str, api_key: &str) -> String {
    if api_key.is_empty() {
        text.to_string()
    } else {
        text.replace(api_key, REDACTED)
    }
}

pub struct GeminiConnector {
    endpoint: String,
    runtime: Runtime,
}

impl GeminiConnector {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("plumbit-voice-net")
            .enable_all()
            .build()
            .map_err(|err| SessionError::Connection(format!("cannot start network runtime: {err}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            runtime,
        })
    }

}

impl Connector for GeminiConnector {
    fn open(
        &self,
        request: ConnectRequest,
        outbound: OutboundReceiver,
        events: EventSender,
    ) -> Result<Box<dyn ChannelLink>, SessionError> {
        let url = session_url(&self.endpoint, &request.api_key)?;
        let (close_tx, close_rx) = oneshot::channel();
        let link = run_link(url, request, outbound, events, close_rx);
        let task = self.runtime.spawn(link.instrument(tracing::Span::current()));
        Ok(Box::new(GeminiLink {
            close: Some(close_tx),
            task: Some(task),
        }))
    }
}

struct GeminiLink {
    close: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelLink for GeminiLink {
    fn close(&mut self) {
        if let Some(close) = self.close.take() {
            // The task may already have exited on a remote close.
            let _ = close.send(());
        }
        // The task finishes its close handshake on its own; dropping the handle detaches it.
        self.task.take();
    }
}

impl Drop for GeminiLink {
    fn drop(&mut self) {
        self.close();
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Route one server payload; `opened` latches on the first `setupComplete`.
fn dispatch_payload(payload: &[u8], opened: &mut bool, events: &EventSender) -> Flow {
    let message = match ServerMessage::parse(payload) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(%err, bytes = payload.len(), "skipping malformed server message");
            return Flow::Continue;
        }
    };
    if message.is_setup_complete() && !*opened {
        *opened = true;
        tracing::info!("voice session ready");
        if !events.emit(EventKind::ChannelOpened) {
            return Flow::Stop;
        }
    }
    if let Some(go_away) = &message.go_away {
        tracing::warn!(
            time_left = go_away.time_left.as_deref().unwrap_or("unknown"),
            "server announced it will close the session"
        );
    }
    for frame in message.frames() {
        if !events.emit(EventKind::Inbound(frame)) {
            return Flow::Stop;
        }
    }
    Flow::Continue
}

async fn run_link(
    url: String,
    request: ConnectRequest,
    mut outbound: OutboundReceiver,
    events: EventSender,
    mut close_rx: oneshot::Receiver<()>,
) {
    tracing::info!(url = %redact(&url, &request.api_key), model = %request.model, "connecting to voice endpoint");

    let connected = tokio::select! {
        _ = &mut close_rx => {
            tracing::debug!("closed before connect finished");
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };
    let (mut ws, _response) = match connected {
        Ok(pair) => pair,
        Err(err) => {
            let cause = redact(&err.to_string(), &request.api_key);
            tracing::error!(%cause, "voice endpoint connect failed");
            events.emit(EventKind::ChannelFailed(format!("connect failed: {cause}")));
            return;
        }
    };

    let setup = ClientMessage::setup(&request.model, &request.voice_id, &request.system_prompt);
    let setup_sent = match setup.to_json() {
        Ok(json) => ws.send(Message::Text(json)).await.map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };
    if let Err(cause) = setup_sent {
        tracing::error!(%cause, "setup message failed");
        events.emit(EventKind::ChannelFailed(format!("setup failed: {cause}")));
        return;
    }
    tracing::debug!(voice = %request.voice_id, "setup sent");

    let mut opened = false;
    let mut frames_out: u64 = 0;
    loop {
        tokio::select! {
            _ = &mut close_rx => {
                tracing::debug!(frames_out, "closing voice session");
                let _ = ws.close(None).await;
                return;
            }
            frame = outbound.recv() => {
                let Some(OutboundFrame::Audio(data)) = frame else {
                    let _ = ws.close(None).await;
                    return;
                };
                let json = match ClientMessage::audio(data).to_json() {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::warn!(%err, "dropping unserializable audio frame");
                        continue;
                    }
                };
                if let Err(err) = ws.send(Message::Text(json)).await {
                    tracing::error!(%err, "audio send failed");
                    events.emit(EventKind::ChannelFailed(format!("send failed: {err}")));
                    return;
                }
                frames_out += 1;
            }
            inbound = ws.next() => {
                let flow = match inbound {
                    Some(Ok(Message::Text(text))) => dispatch_payload(text.as_bytes(), &mut opened, &events),
                    Some(Ok(Message::Binary(bytes))) => dispatch_payload(&bytes, &mut opened, &events),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason).trim().to_string());
                        tracing::info!(reason = reason.as_deref().unwrap_or(""), "server closed voice session");
                        events.emit(EventKind::ChannelClosed { reason });
                        return;
                    }
                    Some(Ok(_)) => Flow::Continue,
                    Some(Err(err)) => {
                        let cause = redact(&err.to_string(), &request.api_key);
                        tracing::error!(%cause, "voice session transport error");
                        events.emit(EventKind::ChannelFailed(cause));
                        return;
                    }
                    None => {
                        tracing::info!("voice session stream ended");
                        events.emit(EventKind::ChannelClosed { reason: None });
                        return;
                    }
                };
                if let Flow::Stop = flow {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }
    }
}
