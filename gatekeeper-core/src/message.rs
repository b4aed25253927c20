//! Shape of an incoming chat message as far as admission is concerned.

use serde::{Deserialize, Serialize};

/// What a member posted. Only text can ever answer a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text(String),
    Sticker,
    Other,
}

impl MessageKind {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Sticker | Self::Other => None,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Sticker => "sticker",
            Self::Other => "other",
        }
    }
}

/// Case-insensitive exact comparison of a message against the expected answer.
///
/// Surrounding whitespace is ignored on both sides. Lowercasing is Unicode
/// aware, so Cyrillic answers compare the same way Latin ones do.
pub fn matches_answer(message: &MessageKind, expected: &str) -> bool {
    match message.text() {
        Some(text) => normalize(text) == normalize(expected),
        None => false,
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
