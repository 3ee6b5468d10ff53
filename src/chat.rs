//! Chat history types
//!
//! Messages are kept locally for the active session and mirrored to the
//! backend, which stores sessions per user and per book.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::backend::string_or_number;

/// One chat entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message text
    pub text: String,

    /// True for the user's question, false for the assistant's answer
    pub is_user: bool,

    /// Book location the answer was drawn from (assistant messages only)
    #[serde(default)]
    pub source: Option<String>,

    /// When the message was created
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// A question from the user
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_user: true,
            source: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// An answer from the assistant
    #[must_use]
    pub fn assistant(text: impl Into<String>, source: Option<String>) -> Self {
        Self {
            text: text.into(),
            is_user: false,
            source,
            timestamp: Some(Utc::now()),
        }
    }

    /// Speaker label for display
    #[must_use]
    pub const fn speaker(&self) -> &'static str {
        if self.is_user { "You" } else { "Assistant" }
    }
}

/// Accept RFC 3339 strings; anything else becomes `None`
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

/// Local history of the active chat session
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    /// Empty history
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Append a message
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Replace all messages with a loaded session's messages, in order
    pub fn replace(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    /// Remove all messages
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// All messages, oldest first
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether there are no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent assistant answer
    #[must_use]
    pub fn last_assistant(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| !m.is_user)
    }

    /// "1 message" / "N messages"
    #[must_use]
    pub fn count_label(&self) -> String {
        match self.messages.len() {
            1 => "1 message".to_string(),
            n => format!("{n} messages"),
        }
    }
}

/// A stored chat session as listed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatSessionSummary {
    /// Session identifier
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    /// Display title
    #[serde(default)]
    pub title: String,

    /// Book the session belongs to
    #[serde(default)]
    pub book: String,

    /// Number of stored messages
    #[serde(default)]
    pub message_count: usize,

    /// Creation time as reported by the backend
    #[serde(default)]
    pub created_at: Option<String>,

    /// Time of the latest message as reported by the backend
    #[serde(default)]
    pub last_message_at: Option<String>,
}

impl ChatSessionSummary {
    /// Date of the latest activity, if parseable
    #[must_use]
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message_at
            .as_deref()
            .or(self.created_at.as_deref())
            .and_then(parse_backend_time)
    }

    /// One-line description: title, message count, and date
    #[must_use]
    pub fn describe(&self) -> String {
        let count = if self.message_count == 1 {
            "1 message".to_string()
        } else {
            format!("{} messages", self.message_count)
        };

        match self.last_activity() {
            Some(when) => format!("{} ({count} • {})", self.title, when.format("%Y-%m-%d")),
            None => format!("{} ({count})", self.title),
        }
    }
}

/// Backends report either RFC 3339 or naive `YYYY-MM-DD HH:MM:SS` times
fn parse_backend_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// A stored chat session with its messages
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSession {
    /// Session identifier
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    /// Messages in chronological order
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}
