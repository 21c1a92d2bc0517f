//! Optional JSON trace log for debugging calls after the fact.
//!
//! Nothing is written unless `--logs` is given. Records emitted while a call is
//! active carry its `call` span (`session`, `agent`), so one file can be split
//! per call. The API key never reaches the log: every layer that formats
//! connection details redacts it first.

use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::MakeWriter;

pub const TRACE_LOG_ENV: &str = "PLUMBIT_VOICE_TRACE_LOG";
const DEFAULT_TRACE_FILE: &str = "plumbit_voice_trace.jsonl";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub fn tracing_log_path() -> PathBuf {
    env::var_os(TRACE_LOG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join(DEFAULT_TRACE_FILE))
}

fn tracing_enabled(config: &AppConfig) -> bool {
    config.logs && !config.no_logs
}

/// One JSON object per line, stamped in UTC, with the innermost span's fields.
pub fn json_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer)
        .with_current_span(true)
        .with_span_list(false)
        .finish()
}

fn init_tracing_once(config: &AppConfig, once: &OnceLock<()>) {
    if !tracing_enabled(config) {
        return;
    }

    once.get_or_init(|| {
        let path = tracing_log_path();
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let _ = tracing::subscriber::set_global_default(json_subscriber(file));
            }
            Err(err) => eprintln!("trace log unavailable at {}: {err}", path.display()),
        }
    });
}

pub fn init_tracing(config: &AppConfig) {
    init_tracing_once(config, &TRACING_INIT);
}
