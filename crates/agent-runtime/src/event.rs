use serde::{Deserialize, Serialize};

use crate::content::Content;

/// Event emitted by a live session.
///
/// A turn-complete or interrupted event carries no content; every other event
/// carries a content fragment authored by a persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub author: String,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

impl AgentEvent {
    pub fn content(author: impl Into<String>, content: Content) -> Self {
        Self {
            author: author.into(),
            content: Some(content),
            partial: false,
            turn_complete: false,
            interrupted: false,
        }
    }

    /// A streamed text fragment.
    pub fn text(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            partial: true,
            ..Self::content(author, Content::model_text(text))
        }
    }

    pub fn turn_complete(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: None,
            partial: false,
            turn_complete: true,
            interrupted: false,
        }
    }

    pub fn interrupted(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: None,
            partial: false,
            turn_complete: false,
            interrupted: true,
        }
    }

    /// Text of the first content part, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.as_ref().and_then(Content::first_text)
    }
}
