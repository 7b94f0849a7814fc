use agent_runtime::AgentEvent;
use serde::Serialize;

/// JSON frame sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    AgentMessage { message: String },
    AgentTurnComplete { turn_complete: bool },
    AgentInterrupted { interrupted: bool },
}

impl OutboundFrame {
    /// Maps a runtime event to at most one frame. Turn completion wins over
    /// interruption, which wins over content. Events whose first part has no
    /// text produce nothing.
    pub fn from_event(event: &AgentEvent) -> Option<Self> {
        if event.turn_complete {
            return Some(OutboundFrame::AgentTurnComplete { turn_complete: true });
        }
        if event.interrupted {
            return Some(OutboundFrame::AgentInterrupted { interrupted: true });
        }
        event
            .first_text()
            .filter(|text| !text.is_empty())
            .map(|text| OutboundFrame::AgentMessage {
                message: text.to_string(),
            })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
