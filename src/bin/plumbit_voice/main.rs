//! `plumbit-voice`: place a live voice call to a Plumbit agent from the terminal.

mod keys;
mod status;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use plumbit_voice::audio::device::{list_input_devices, list_output_devices, CpalBackend};
use plumbit_voice::config::AppConfig;
use plumbit_voice::persona::AgentPersona;
use plumbit_voice::session::GeminiConnector;
use plumbit_voice::telemetry::init_tracing;
use plumbit_voice::{Phase, SessionController, SessionError, SessionSnapshot, UiCommand};
use std::io::{self, IsTerminal, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const THREAD_JOIN_POLL_MS: u64 = 10;
const THREAD_JOIN_TIMEOUT_MS: u64 = 500;

const EXIT_CALL_FAILED: u8 = 1;
const EXIT_CONFIGURATION: u8 = 2;

fn join_thread_with_timeout(name: &str, handle: thread::JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        if handle.is_finished() || Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(THREAD_JOIN_POLL_MS));
    }

    if handle.is_finished() {
        if let Err(err) = handle.join() {
            tracing::warn!(thread = name, ?err, "thread panicked during shutdown");
        }
    } else {
        tracing::debug!(
            thread = name,
            timeout_ms = timeout.as_millis() as u64,
            "thread did not exit in time; detaching"
        );
    }
}

fn exit_code_for(phase: Phase, error: Option<&SessionError>) -> ExitCode {
    match (phase, error) {
        (Phase::Errored, Some(SessionError::Configuration(_))) => {
            ExitCode::from(EXIT_CONFIGURATION)
        }
        (Phase::Errored, _) => ExitCode::from(EXIT_CALL_FAILED),
        _ => ExitCode::SUCCESS,
    }
}

fn print_devices(label: &str, devices: Vec<String>) {
    if devices.is_empty() {
        println!("No audio {label} devices detected.");
        return;
    }
    println!("Available audio {label} devices:");
    for name in devices {
        println!("  {name}");
    }
}

fn spawn_status_printer(
    persona: &'static AgentPersona,
    updates: Receiver<SessionSnapshot>,
    commands: crossbeam_channel::Sender<UiCommand>,
) -> io::Result<thread::JoinHandle<()>> {
    let color = io::stdout().is_terminal();
    thread::Builder::new()
        .name("plumbit-voice-status".into())
        .spawn(move || {
            let mut last = None;
            for snapshot in updates {
                if snapshot.phase == Phase::Idle {
                    continue;
                }
                let line = status::render_status(persona, &snapshot, color);
                if last.as_ref() != Some(&line) {
                    let mut stdout = io::stdout();
                    let _ = write!(stdout, "{line}\r\n");
                    let _ = stdout.flush();
                    last = Some(line);
                }
                if status::call_finished(&snapshot) {
                    let _ = commands.send(UiCommand::Shutdown);
                    break;
                }
            }
        })
}

fn run(config: &AppConfig) -> Result<ExitCode> {
    if config.list_input_devices || config.list_output_devices {
        if config.list_input_devices {
            print_devices("input", list_input_devices().context("listing microphones")?);
        }
        if config.list_output_devices {
            print_devices("output", list_output_devices().context("listing speakers")?);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let persona = config.persona();
    let connector = GeminiConnector::new(config.endpoint.clone())
        .context("starting the network runtime")?;
    let mut controller =
        SessionController::new(CpalBackend::new(), connector, config.session_settings());

    let updates = controller.subscribe();
    controller.open_session(Some(persona));
    if controller.phase() == Phase::Errored {
        if let Some(message) = controller.state().error.as_deref() {
            eprintln!("{message}");
        }
        return Ok(exit_code_for(controller.phase(), controller.last_error()));
    }

    println!("Calling {}. Press q, Esc, Enter or Ctrl-C to hang up.", persona.display_name);
    let (commands_tx, commands_rx) = unbounded();
    let stop_keys = Arc::new(AtomicBool::new(false));
    let keys = keys::spawn_key_listener(commands_tx.clone(), Arc::clone(&stop_keys))
        .context("spawning key listener")?;
    let printer = spawn_status_printer(persona, updates, commands_tx)
        .context("spawning status printer")?;

    let phase = controller.run(&commands_rx);
    let code = exit_code_for(phase, controller.last_error());
    drop(controller);

    stop_keys.store(true, Ordering::SeqCst);
    let timeout = Duration::from_millis(THREAD_JOIN_TIMEOUT_MS);
    join_thread_with_timeout("keys", keys, timeout);
    join_thread_with_timeout("status", printer, timeout);
    Ok(code)
}

fn main() -> ExitCode {
    let config = AppConfig::load();
    init_tracing(&config);
    tracing::info!(?config, "plumbit-voice starting");
    for warning in &config.warnings {
        tracing::warn!(%warning, "config value ignored");
        eprintln!("plumbit-voice: {warning}");
    }

    match run(&config) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "startup failed");
            eprintln!("plumbit-voice: {err:#}");
            ExitCode::from(EXIT_CALL_FAILED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_final_phase() {
        let config = SessionError::Configuration("API key is not set".into());
        let network = SessionError::Connection("reset".into());
        assert_eq!(exit_code_for(Phase::Closed, None), ExitCode::SUCCESS);
        assert_eq!(
            exit_code_for(Phase::Errored, Some(&config)),
            ExitCode::from(EXIT_CONFIGURATION)
        );
        assert_eq!(
            exit_code_for(Phase::Errored, Some(&network)),
            ExitCode::from(EXIT_CALL_FAILED)
        );
    }

    #[test]
    fn join_thread_with_timeout_waits_for_worker_to_finish_within_budget() {
        let done = Arc::new(AtomicBool::new(false));
        let done_ref = Arc::clone(&done);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            done_ref.store(true, Ordering::SeqCst);
        });

        join_thread_with_timeout("test-worker", handle, Duration::from_millis(250));
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn join_thread_with_timeout_returns_quickly_when_thread_already_finished() {
        let handle = thread::spawn(|| {});
        thread::sleep(Duration::from_millis(10));

        let start = Instant::now();
        join_thread_with_timeout("finished-worker", handle, Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
