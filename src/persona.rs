//! Static agent persona catalog for the two phone lines a caller can reach.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which line the caller picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Front desk: scheduling, pricing ranges, general questions.
    #[default]
    Support,
    /// Emergency dispatch: burst pipes, flooding, sewage backups.
    Emergency,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Support => "support",
            AgentKind::Emergency => "emergency",
        }
    }

    pub fn parse_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "support" | "front-desk" => Some(AgentKind::Support),
            "emergency" | "dispatch" => Some(AgentKind::Emergency),
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accent color the UI uses for the agent's header and talking indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeColor {
    Blue,
    Red,
}

/// Immutable description of one agent, handed to the session once at call start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPersona {
    pub kind: AgentKind,
    pub display_name: &'static str,
    pub role: &'static str,
    /// Prebuilt voice name understood by the remote speech model.
    pub voice_id: &'static str,
    pub system_prompt: &'static str,
    pub theme_color: ThemeColor,
}

const SUPPORT_PROMPT: &str = "You are Sarah, the friendly and professional front desk receptionist for Plumbit, a local plumbing company.
Your goal is to help customers schedule appointments, answer general questions about services, and provide pricing estimates (ranges only).

Key Traits:
- Tone: Warm, welcoming, patient, and helpful.
- Services: We do drain cleaning ($150-$300), water heater repair ($200+), and general pipe maintenance.
- Availability: We are open 8 AM to 6 PM, Monday through Saturday.
- If they have a bursting pipe or flooding, politely transfer them to the Emergency Dispatch line (tell them to hang up and call the emergency line).

Keep your responses concise and conversational, like a real phone operator.";

const EMERGENCY_PROMPT: &str = "You are Dan, the emergency dispatcher for Plumbit. You handle urgent situations like burst pipes, major leaks, and sewage backups.

Key Traits:
- Tone: Calm, authoritative, efficient, and reassuring.
- Priority: Get the customer's address immediately and understand the severity of the leak.
- Instruction: Tell them how to shut off their main water valve if water is actively flowing.
- Action: Assure them a technician is being routed to their location.
- Do not waste time with pleasantries. This is an emergency line.

Keep responses short and action-oriented.";

static CATALOG: [AgentPersona; 2] = [
    AgentPersona {
        kind: AgentKind::Support,
        display_name: "Sarah (Front Desk)",
        role: "General Inquiries & Scheduling",
        voice_id: "Kore",
        system_prompt: SUPPORT_PROMPT,
        theme_color: ThemeColor::Blue,
    },
    AgentPersona {
        kind: AgentKind::Emergency,
        display_name: "Dispatcher Dan",
        role: "Emergency Response",
        voice_id: "Fenrir",
        system_prompt: EMERGENCY_PROMPT,
        theme_color: ThemeColor::Red,
    },
];

/// Every persona, in the order the site lists them.
pub fn catalog() -> &'static [AgentPersona] {
    &CATALOG
}

pub fn lookup(kind: AgentKind) -> &'static AgentPersona {
    match kind {
        AgentKind::Support => &CATALOG[0],
        AgentKind::Emergency => &CATALOG[1],
    }
}
