//! Shared test utilities
//!
//! In-memory stand-ins for the backend, the audio output device, and the
//! microphone, so no test needs network access or audio hardware.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Notify;

use vidya_assist::assistant::{StatusLog, StatusSink};
use vidya_assist::backend::{AuthGrant, Backend, Passage, UserProfile};
use vidya_assist::chat::{ChatMessage, ChatSession, ChatSessionSummary};
use vidya_assist::config::VoiceConfig;
use vidya_assist::voice::{
    AudioClip, AudioSink, CaptureConstraints, CaptureStream, ClipEncoding, Microphone,
    Synthesizer, samples_to_bytes,
};
use vidya_assist::{Assistant, Config, Error, Result};

/// Token handed out by [`FakeBackend`] logins
pub const TEST_TOKEN: &str = "test-token";

/// How [`FakeBackend::verify`] answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Token is valid
    Accept,
    /// Backend rejects the token
    Reject,
    /// Backend cannot be reached
    Unreachable,
}

/// Arguments of the latest generate call
#[derive(Debug, Clone)]
pub struct GenerateCall {
    pub query: String,
    pub context: String,
    pub passages: usize,
    pub history: Vec<ChatMessage>,
}

/// Scriptable in-memory backend
///
/// Synthesized "audio" is the sentence text as UTF-8 so a [`RecordingSink`]
/// can report what was spoken.
pub struct FakeBackend {
    calls: Mutex<Vec<String>>,
    posted: Mutex<Vec<(String, ChatMessage)>>,
    passages: Mutex<Vec<Passage>>,
    response: Mutex<String>,
    transcript: Mutex<String>,
    verify_mode: Mutex<VerifyMode>,
    failing_sentences: Mutex<HashSet<String>>,
    panicking_sentences: Mutex<HashSet<String>>,
    synth_gates: Mutex<HashMap<String, Arc<Notify>>>,
    generate_gate: Mutex<Option<Arc<Notify>>>,
    last_generate: Mutex<Option<GenerateCall>>,
    sessions: Mutex<Vec<ChatSessionSummary>>,
    session_messages: Mutex<HashMap<String, Vec<ChatMessage>>>,
    next_session: AtomicU64,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
            passages: Mutex::new(Vec::new()),
            response: Mutex::new("Plants make food in their leaves.".to_string()),
            transcript: Mutex::new("What is photosynthesis?".to_string()),
            verify_mode: Mutex::new(VerifyMode::Accept),
            failing_sentences: Mutex::new(HashSet::new()),
            panicking_sentences: Mutex::new(HashSet::new()),
            synth_gates: Mutex::new(HashMap::new()),
            generate_gate: Mutex::new(None),
            last_generate: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
            session_messages: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(100),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_passages(&self, passages: Vec<Passage>) {
        *self.passages.lock().unwrap() = passages;
    }

    pub fn set_response(&self, response: &str) {
        *self.response.lock().unwrap() = response.to_string();
    }

    pub fn set_transcript(&self, transcript: &str) {
        *self.transcript.lock().unwrap() = transcript.to_string();
    }

    pub fn set_verify(&self, mode: VerifyMode) {
        *self.verify_mode.lock().unwrap() = mode;
    }

    /// Make synthesis of `sentence` fail
    pub fn fail_sentence(&self, sentence: &str) {
        self.failing_sentences
            .lock()
            .unwrap()
            .insert(sentence.to_string());
    }

    /// Make synthesis of `sentence` panic
    pub fn panic_on_sentence(&self, sentence: &str) {
        self.panicking_sentences
            .lock()
            .unwrap()
            .insert(sentence.to_string());
    }

    /// Hold synthesis of `sentence` until the returned handle is notified
    pub fn hold_sentence(&self, sentence: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.synth_gates
            .lock()
            .unwrap()
            .insert(sentence.to_string(), Arc::clone(&gate));
        gate
    }

    /// Hold generation until the returned handle is notified
    pub fn hold_generate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.generate_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Add a stored session
    pub fn add_session(&self, id: &str, book: &str, messages: Vec<ChatMessage>) {
        self.sessions.lock().unwrap().push(ChatSessionSummary {
            id: id.to_string(),
            title: format!("Chat {id}"),
            book: book.to_string(),
            message_count: messages.len(),
            created_at: None,
            last_message_at: None,
        });
        self.session_messages
            .lock()
            .unwrap()
            .insert(id.to_string(), messages);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| *c == name).count()
    }

    pub fn posted(&self) -> Vec<(String, ChatMessage)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn last_generate(&self) -> Option<GenerateCall> {
        self.last_generate.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn grant(user: UserProfile) -> AuthGrant {
        AuthGrant {
            token: SecretString::from(TEST_TOKEN),
            user,
            message: "Login successful".to_string(),
        }
    }

    fn check_token(token: &SecretString) -> Result<()> {
        if token.expose_secret() == TEST_TOKEN {
            Ok(())
        } else {
            Err(Error::Auth("Invalid token".to_string()))
        }
    }
}

#[async_trait]
impl Synthesizer for FakeBackend {
    async fn synthesize(&self, sentence: &str) -> Result<Vec<u8>> {
        self.record("tts");

        let gate = self.synth_gates.lock().unwrap().get(sentence).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let panics = self.panicking_sentences.lock().unwrap().contains(sentence);
        assert!(!panics, "synthesizer crashed on {sentence:?}");

        if self.failing_sentences.lock().unwrap().contains(sentence) {
            return Err(Error::Synthesis("TTS request failed: 500".to_string()));
        }
        Ok(sentence.as_bytes().to_vec())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn register(&self, name: &str, email: &str, _password: &str) -> Result<AuthGrant> {
        self.record("register");
        Ok(Self::grant(UserProfile {
            name: name.to_string(),
            email: email.to_string(),
        }))
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthGrant> {
        self.record("login");
        if password != "secret" {
            return Err(Error::Auth("Invalid email or password".to_string()));
        }
        Ok(Self::grant(UserProfile {
            name: "Asha".to_string(),
            email: email.to_string(),
        }))
    }

    async fn verify(&self, token: &SecretString) -> Result<UserProfile> {
        self.record("verify");
        match *self.verify_mode.lock().unwrap() {
            VerifyMode::Accept => {
                Self::check_token(token)?;
                Ok(UserProfile {
                    name: "Asha".to_string(),
                    email: "asha@example.com".to_string(),
                })
            }
            VerifyMode::Reject => Err(Error::Auth("Token expired".to_string())),
            VerifyMode::Unreachable => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        }
    }

    async fn logout(&self, token: &SecretString) -> Result<()> {
        self.record("logout");
        Self::check_token(token)
    }

    async fn init_book(&self, token: &SecretString, _book: &str) -> Result<()> {
        self.record("init");
        Self::check_token(token)
    }

    async fn list_sessions(&self, token: &SecretString) -> Result<Vec<ChatSessionSummary>> {
        self.record("list_sessions");
        Self::check_token(token)?;
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn get_session(&self, token: &SecretString, session_id: &str) -> Result<ChatSession> {
        self.record("get_session");
        Self::check_token(token)?;
        let messages = self
            .session_messages
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::Chat("Session not found".to_string()))?;
        Ok(ChatSession {
            id: session_id.to_string(),
            messages,
        })
    }

    async fn new_session(&self, token: &SecretString, book: &str) -> Result<String> {
        self.record("new_session");
        Self::check_token(token)?;
        let id = self.next_session.fetch_add(1, Ordering::SeqCst).to_string();
        self.add_session(&id, book, Vec::new());
        Ok(id)
    }

    async fn post_message(
        &self,
        token: &SecretString,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<()> {
        self.record("post_message");
        Self::check_token(token)?;
        self.posted
            .lock()
            .unwrap()
            .push((session_id.to_string(), message.clone()));
        Ok(())
    }

    async fn clear_session(&self, token: &SecretString, session_id: &str) -> Result<()> {
        self.record("clear_session");
        Self::check_token(token)?;
        if let Some(messages) = self.session_messages.lock().unwrap().get_mut(session_id) {
            messages.clear();
        }
        Ok(())
    }

    async fn transcribe(&self, clip: AudioClip) -> Result<String> {
        self.record("transcribe");
        assert!(!clip.is_empty(), "empty clip sent for transcription");
        Ok(self.transcript.lock().unwrap().clone())
    }

    async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<Passage>> {
        self.record("search");
        Ok(self
            .passages
            .lock()
            .unwrap()
            .iter()
            .take(top_k)
            .cloned()
            .collect())
    }

    async fn generate(
        &self,
        query: &str,
        context: &str,
        passages: &[Passage],
        history: &[ChatMessage],
    ) -> Result<String> {
        self.record("generate");
        *self.last_generate.lock().unwrap() = Some(GenerateCall {
            query: query.to_string(),
            context: context.to_string(),
            passages: passages.len(),
            history: history.to_vec(),
        });

        let gate = self.generate_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        Ok(self.response.lock().unwrap().clone())
    }
}

/// Output device that records what it was asked to play
#[derive(Default)]
pub struct RecordingSink {
    played: Mutex<Vec<String>>,
    rates: Mutex<Vec<f32>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make playback of `sentence` fail after it starts
    pub fn fail_on(&self, sentence: &str) {
        self.failing.lock().unwrap().insert(sentence.to_string());
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn rates(&self) -> Vec<f32> {
        self.rates.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, audio: Vec<u8>, rate: f32) -> Result<()> {
        let text = String::from_utf8(audio).unwrap();
        tokio::task::yield_now().await;

        self.played.lock().unwrap().push(text.clone());
        self.rates.lock().unwrap().push(rate);

        if self.failing.lock().unwrap().contains(&text) {
            return Err(Error::Audio("device error".to_string()));
        }
        Ok(())
    }
}

/// Status sink whose lines stay readable after the assistant takes it
#[derive(Clone, Default)]
pub struct SharedStatus(pub Arc<StatusLog>);

impl StatusSink for SharedStatus {
    fn status(&self, message: &str) {
        self.0.status(message);
    }
}

/// Microphone that replays scripted chunks
pub struct ScriptedMicrophone {
    chunks: Vec<Vec<u8>>,
    sample_rate: u32,
    deny: bool,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl ScriptedMicrophone {
    /// Microphone producing one chunk per sample slice
    pub fn new(chunks: &[&[f32]]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| samples_to_bytes(c)).collect(),
            sample_rate: 16000,
            deny: false,
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Microphone that refuses access
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::new(&[])
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Microphone for ScriptedMicrophone {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>> {
        if self.deny {
            return Err(Error::MicrophoneAccess("permission denied".to_string()));
        }
        assert_eq!(constraints.channels, 1);

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            pending: self.chunks.clone().into(),
            sample_rate: self.sample_rate,
            released: Arc::clone(&self.released),
        }))
    }
}

struct ScriptedStream {
    pending: std::collections::VecDeque<Vec<u8>>,
    sample_rate: u32,
    released: Arc<AtomicUsize>,
}

impl CaptureStream for ScriptedStream {
    fn take_chunk(&mut self) -> Vec<u8> {
        self.pending.pop_front().unwrap_or_default()
    }

    fn finalize(&mut self) -> Vec<u8> {
        self.pending.drain(..).flatten().collect()
    }

    fn encoding(&self) -> ClipEncoding {
        ClipEncoding::pcm_f32(self.sample_rate)
    }

    fn release(self: Box<Self>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Passage with the given score
pub fn passage(score: f64, chapter: &str, page: &str, paragraph: &str) -> Passage {
    Passage {
        text: format!("Passage from {chapter}."),
        score,
        chapter: chapter.to_string(),
        page: page.to_string(),
        paragraph: paragraph.to_string(),
    }
}

/// Test configuration storing credentials under `data_dir`
pub fn test_config(data_dir: &std::path::Path, announce_status: bool) -> Config {
    Config {
        data_dir: data_dir.to_path_buf(),
        voice: VoiceConfig {
            announce_status,
            ..VoiceConfig::default()
        },
        ..Config::default()
    }
}

/// Assistant wired to fakes
pub struct Harness {
    pub assistant: Assistant,
    pub backend: Arc<FakeBackend>,
    pub sink: Arc<RecordingSink>,
    pub status: Arc<StatusLog>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    /// Assistant with spoken status announcements off
    pub fn new() -> Self {
        Self::with_announcements(false)
    }

    pub fn with_announcements(announce_status: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, announce_status, FakeBackend::new())
    }

    /// Assistant sharing an existing data directory and backend
    pub fn in_dir(dir: tempfile::TempDir, announce_status: bool, backend: Arc<FakeBackend>) -> Self {
        let sink = RecordingSink::new();
        let status = Arc::new(StatusLog::new());
        let config = test_config(dir.path(), announce_status);

        let assistant = Assistant::new(
            &config,
            Arc::clone(&backend) as Arc<dyn Backend>,
            Arc::clone(&sink) as Arc<dyn AudioSink>,
            Box::new(SharedStatus(Arc::clone(&status))),
        );

        Self {
            assistant,
            backend,
            sink,
            status,
            dir,
        }
    }

    /// Sign in and open `book`
    pub async fn ready(&self, book: &str) {
        self.assistant.login("asha@example.com", "secret").await.unwrap();
        let book = vidya_assist::books::find(book).unwrap();
        self.assistant.select_book(book).await.unwrap();
    }

    /// Wait for the speech queue to drain
    pub async fn drain_speech(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.assistant.speech().wait_until_idle())
            .await
            .expect("speech queue did not drain");
    }
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
