//! Record shapes supplied by the dashboard's storage layer. The engine only
//! reads these; it never persists anything itself.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Account owner details, shown at the top of assistant context.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// A saved note. Listings are newest-updated first.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteSummary {
    pub title: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

/// Metadata about an uploaded dataset. Row contents stay in storage; only
/// this metadata ever reaches assistant context.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSummary {
    pub name: String,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Speaker of a chat turn, serialised with the provider's role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn name(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One message in a conversation. Doubles as the provider wire shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        ChatTurn { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatTurn { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatTurn { role: ChatRole::Assistant, content: content.into() }
    }
}
