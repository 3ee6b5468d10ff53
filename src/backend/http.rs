//! HTTP client for the assistant backend
//!
//! The backend answers most calls with a JSON object carrying a `status`
//! field (`"success"` or an error) and a human-readable `message`. Search is
//! the exception and returns its results directly.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{AuthGrant, Backend, Passage, UserProfile};
use crate::chat::{ChatMessage, ChatSession, ChatSessionSummary};
use crate::voice::{AudioClip, Synthesizer};
use crate::{Error, Result};

/// Client for the assistant backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    /// HTTP client
    client: Client,
    /// Base URL including the `/api` prefix, without trailing slash
    base_url: String,
}

#[derive(Deserialize)]
struct AuthBody {
    token: String,
    #[serde(default)]
    user: UserProfile,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct VerifyBody {
    #[serde(default)]
    user: UserProfile,
}

#[derive(Deserialize)]
struct SessionsBody {
    #[serde(default)]
    sessions: Vec<ChatSessionSummary>,
}

#[derive(Deserialize)]
struct SessionBody {
    session: ChatSession,
}

#[derive(Deserialize)]
struct TranscribeBody {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    results: Vec<Passage>,
}

#[derive(Deserialize)]
struct GenerateBody {
    response: String,
}

impl HttpBackend {
    /// Create a client for the backend at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client reusing an existing `reqwest` client
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(request: RequestBuilder, token: &SecretString) -> RequestBuilder {
        request.bearer_auth(token.expose_secret())
    }

    async fn auth(&self, path: &str, body: Value) -> Result<AuthGrant> {
        let response = self.client.post(self.url(path)).json(&body).send().await?;
        let body: AuthBody = read_envelope(response, Error::Auth).await?;

        tracing::info!(email = %body.user.email, "authenticated");

        Ok(AuthGrant {
            token: SecretString::from(body.token),
            user: body.user,
            message: body.message,
        })
    }
}

/// Decode a `{status, message, ...}` response
///
/// A non-JSON body is a [`Error::Serialization`]; a JSON body whose status
/// is not `"success"` becomes `kind(message)`.
async fn read_envelope<T: DeserializeOwned>(
    response: Response,
    kind: fn(String) -> Error,
) -> Result<T> {
    let http_status = response.status();
    let text = response.text().await?;
    let value: Value = serde_json::from_str(&text)?;

    if value.get("status").and_then(Value::as_str) != Some("success") {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| format!("request failed with status {http_status}"), str::to_string);
        tracing::debug!(status = %http_status, message = %message, "backend rejected request");
        return Err(kind(message));
    }

    serde_json::from_value(value).map_err(|e| kind(format!("unexpected response: {e}")))
}

/// Response with no payload beyond its status
type Ack = serde_json::Map<String, Value>;

#[async_trait]
impl Synthesizer for HttpBackend {
    async fn synthesize(&self, sentence: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.url("/tts"))
            .json(&json!({ "text": sentence }))
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Synthesis(format!(
                "TTS request failed: {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn register(&self, name: &str, email: &str, password: &str) -> Result<AuthGrant> {
        self.auth(
            "/auth/register",
            json!({ "email": email, "password": password, "name": name }),
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthGrant> {
        self.auth("/auth/login", json!({ "email": email, "password": password }))
            .await
    }

    async fn verify(&self, token: &SecretString) -> Result<UserProfile> {
        let request = self.client.get(self.url("/auth/verify"));
        let response = Self::authorized(request, token).send().await?;
        let body: VerifyBody = read_envelope(response, Error::Auth).await?;
        Ok(body.user)
    }

    async fn logout(&self, token: &SecretString) -> Result<()> {
        let request = self.client.post(self.url("/auth/logout"));
        let response = Self::authorized(request, token).send().await?;

        if !response.status().is_success() {
            return Err(Error::Auth(format!("logout failed: {}", response.status())));
        }
        Ok(())
    }

    async fn init_book(&self, token: &SecretString, book: &str) -> Result<()> {
        let request = self.client.post(self.url("/init")).json(&json!({ "book": book }));
        let response = Self::authorized(request, token).send().await?;
        let _: Ack = read_envelope(response, Error::BookInit).await?;
        Ok(())
    }

    async fn list_sessions(&self, token: &SecretString) -> Result<Vec<ChatSessionSummary>> {
        let request = self.client.get(self.url("/chat/sessions"));
        let response = Self::authorized(request, token).send().await?;
        let body: SessionsBody = read_envelope(response, Error::Chat).await?;
        Ok(body.sessions)
    }

    async fn get_session(&self, token: &SecretString, session_id: &str) -> Result<ChatSession> {
        let path = format!("/chat/session/{}", urlencoding::encode(session_id));
        let request = self.client.get(self.url(&path));
        let response = Self::authorized(request, token).send().await?;
        let body: SessionBody = read_envelope(response, Error::Chat).await?;
        Ok(body.session)
    }

    async fn new_session(&self, token: &SecretString, book: &str) -> Result<String> {
        let request = self
            .client
            .post(self.url("/chat/new"))
            .json(&json!({ "book": book }));
        let response = Self::authorized(request, token).send().await?;
        let body: SessionBody = read_envelope(response, Error::Chat).await?;
        Ok(body.session.id)
    }

    async fn post_message(
        &self,
        token: &SecretString,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<()> {
        let request = self.client.post(self.url("/chat/message")).json(&json!({
            "session_id": session_id,
            "text": message.text,
            "is_user": message.is_user,
            "source": message.source,
        }));
        let response = Self::authorized(request, token).send().await?;

        if !response.status().is_success() {
            return Err(Error::Chat(format!(
                "saving message failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn clear_session(&self, token: &SecretString, session_id: &str) -> Result<()> {
        let path = format!("/chat/clear/{}", urlencoding::encode(session_id));
        let request = self.client.post(self.url(&path));
        let response = Self::authorized(request, token).send().await?;
        let _: Ack = read_envelope(response, Error::Chat).await?;
        Ok(())
    }

    async fn transcribe(&self, clip: AudioClip) -> Result<String> {
        let sample_rate = clip.sample_rate();
        let audio = BASE64.encode(clip.into_data());

        let response = self
            .client
            .post(self.url("/transcribe"))
            .json(&json!({ "audio": audio, "sampleRate": sample_rate }))
            .send()
            .await?;
        let body: TranscribeBody = read_envelope(response, Error::Transcription).await?;
        Ok(body.text)
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        let response = self
            .client
            .post(self.url("/search"))
            .json(&json!({ "query": query, "topK": top_k }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!("search failed: {status} - {body}")));
        }

        let body: SearchBody = response
            .json()
            .await
            .map_err(|e| Error::Search(format!("unexpected response: {e}")))?;
        Ok(body.results)
    }

    async fn generate(
        &self,
        query: &str,
        context: &str,
        passages: &[Passage],
        history: &[ChatMessage],
    ) -> Result<String> {
        let response = self
            .client
            .post(self.url("/generate"))
            .json(&json!({
                "query": query,
                "context": context,
                "searchResults": passages,
                "chatHistory": history,
            }))
            .send()
            .await?;
        let body: GenerateBody = read_envelope(response, Error::Generation).await?;
        Ok(body.response)
    }
}
