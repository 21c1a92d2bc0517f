//! One-line call status rendering for the terminal.

use crossterm::style::{Color, Stylize};
use plumbit_voice::persona::{AgentPersona, ThemeColor};
use plumbit_voice::{Phase, SessionSnapshot};

fn accent(color: ThemeColor) -> Color {
    match color {
        ThemeColor::Blue => Color::Blue,
        ThemeColor::Red => Color::Red,
    }
}

/// Plain-text status for a snapshot.
pub(crate) fn format_status(persona: &AgentPersona, snapshot: &SessionSnapshot) -> String {
    let header = format!("{} ({})", persona.display_name, persona.role);
    match snapshot.phase {
        Phase::Idle => format!("{header}: ready"),
        Phase::Connecting => format!("{header}: connecting..."),
        Phase::Connected if snapshot.state.talking => format!("{header}: speaking"),
        Phase::Connected => format!("{header}: listening"),
        Phase::Closed => format!("{header}: call ended"),
        Phase::Errored => {
            let message = snapshot
                .state
                .error
                .as_deref()
                .unwrap_or("Call failed.");
            format!("{header}: {message}")
        }
    }
}

pub(crate) fn render_status(
    persona: &AgentPersona,
    snapshot: &SessionSnapshot,
    color: bool,
) -> String {
    let line = format_status(persona, snapshot);
    if color {
        line.with(accent(persona.theme_color)).to_string()
    } else {
        line
    }
}

/// The call is over and the UI should stop the session loop.
pub(crate) fn call_finished(snapshot: &SessionSnapshot) -> bool {
    matches!(snapshot.phase, Phase::Closed | Phase::Errored)
}
