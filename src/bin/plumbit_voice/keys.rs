//! Hang-up key listener.

use crossbeam_channel::Sender;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use plumbit_voice::terminal_restore::TerminalRestoreGuard;
use plumbit_voice::UiCommand;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const KEY_POLL_MS: u64 = 50;

pub(crate) fn is_hangup_key(key: &KeyEvent) -> bool {
    if key.kind == KeyEventKind::Release {
        return false;
    }
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('C') => key.modifiers.contains(KeyModifiers::CONTROL),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc | KeyCode::Enter => true,
        _ => false,
    }
}

/// Read keys in raw mode until a hang-up key arrives or `stop` is set.
pub(crate) fn spawn_key_listener(
    commands: Sender<UiCommand>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("plumbit-voice-keys".into())
        .spawn(move || {
            let guard = TerminalRestoreGuard::new();
            if let Err(err) = guard.enable_raw_mode() {
                tracing::warn!(error = %err, "raw mode unavailable; hang-up keys disabled");
                return;
            }
            while !stop.load(Ordering::SeqCst) {
                match event::poll(Duration::from_millis(KEY_POLL_MS)) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        tracing::warn!(error = %err, "key poll failed");
                        break;
                    }
                }
                match event::read() {
                    Ok(Event::Key(key)) if is_hangup_key(&key) => {
                        tracing::info!(key = ?key.code, "hang-up requested");
                        let _ = commands.send(UiCommand::Shutdown);
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "key read failed");
                        break;
                    }
                }
            }
            guard.restore();
        })
}
