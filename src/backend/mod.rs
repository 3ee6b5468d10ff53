//! Backend service interface
//!
//! Transcription, retrieval, generation, synthesis, authentication, and
//! chat persistence all live on the backend. [`Backend`] is the seam the
//! assistant talks through; [`HttpBackend`] is the production client.

mod http;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::Result;
use crate::chat::{ChatMessage, ChatSession, ChatSessionSummary};
use crate::voice::{AudioClip, Synthesizer};

pub use http::HttpBackend;

/// Signed-in user as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Login email
    #[serde(default)]
    pub email: String,
}

/// Result of a successful login or registration
#[derive(Debug)]
pub struct AuthGrant {
    /// Bearer token for authenticated calls
    pub token: SecretString,
    /// Profile of the signed-in user
    pub user: UserProfile,
    /// Backend's confirmation message
    pub message: String,
}

/// A ranked passage from the book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Passage text
    #[serde(default)]
    pub text: String,

    /// Retrieval score; higher is more relevant
    #[serde(deserialize_with = "score")]
    pub score: f64,

    /// Chapter title
    #[serde(default, deserialize_with = "string_or_number")]
    pub chapter: String,

    /// Page locator
    #[serde(default, deserialize_with = "string_or_number")]
    pub page: String,

    /// Paragraph locator
    #[serde(default, deserialize_with = "string_or_number")]
    pub paragraph: String,
}

impl Passage {
    /// Location label: `{chapter}, Page {page}, Paragraph {paragraph}`
    #[must_use]
    pub fn location(&self) -> String {
        format!(
            "{}, Page {}, Paragraph {}",
            self.chapter, self.page, self.paragraph
        )
    }
}

/// Remote services used by the assistant
///
/// Every call is a single request/response with no retry; failures surface
/// as the matching [`crate::Error`] variant.
#[async_trait]
pub trait Backend: Synthesizer {
    /// Create an account and sign in
    async fn register(&self, name: &str, email: &str, password: &str) -> Result<AuthGrant>;

    /// Sign in with existing credentials
    async fn login(&self, email: &str, password: &str) -> Result<AuthGrant>;

    /// Check a stored token, returning the current profile
    async fn verify(&self, token: &SecretString) -> Result<UserProfile>;

    /// Invalidate a token
    async fn logout(&self, token: &SecretString) -> Result<()>;

    /// Prepare retrieval and generation for a book
    async fn init_book(&self, token: &SecretString, book: &str) -> Result<()>;

    /// All of the user's chat sessions, most recent first
    async fn list_sessions(&self, token: &SecretString) -> Result<Vec<ChatSessionSummary>>;

    /// One session with its messages
    async fn get_session(&self, token: &SecretString, session_id: &str) -> Result<ChatSession>;

    /// Start a new session for a book
    async fn new_session(&self, token: &SecretString, book: &str) -> Result<String>;

    /// Append a message to a session
    async fn post_message(
        &self,
        token: &SecretString,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<()>;

    /// Remove all messages from a session
    async fn clear_session(&self, token: &SecretString, session_id: &str) -> Result<()>;

    /// Speech to text; the clip is consumed
    async fn transcribe(&self, clip: AudioClip) -> Result<String>;

    /// Ranked passages for a query
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>>;

    /// Answer a query from context, passages, and the conversation so far
    async fn generate(
        &self,
        query: &str,
        context: &str,
        passages: &[Passage],
        history: &[ChatMessage],
    ) -> Result<String>;
}

/// Deserialize a JSON string or number as a string
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Deserialize a score sent as a number or a numeric string
fn score<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("score out of range")),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid score '{s}'"))),
        other => Err(serde::de::Error::custom(format!(
            "expected numeric score, got {other}"
        ))),
    }
}
