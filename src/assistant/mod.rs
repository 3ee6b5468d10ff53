//! Question-answering assistant
//!
//! Ties the pieces together: a question (typed or recorded) is admitted by
//! the [`ProcessingGate`], transcribed, searched, answered, stored in the
//! chat history, and spoken through the [`SpeechQueue`].

mod command;
mod gate;
mod status;
mod tasks;

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::Mutex;

use crate::backend::{Backend, Passage, UserProfile};
use crate::books::Book;
use crate::chat::{ChatMessage, ChatSessionSummary};
use crate::config::Config;
use crate::context::{AppContext, CredentialStore, Credentials};
use crate::voice::{
    AudioClip, AudioSink, Microphone, RecordingSession, RecordingState, SpeechQueue, SpeechRate,
    Synthesizer,
};
use crate::{Error, Result};

pub use command::{HELP_TEXT, Input};
pub use gate::{GateState, ProcessingGate, ProcessingToken};
pub use status::{Announcer, ConsoleStatus, StatusLog, StatusSink};
pub use tasks::QueryTasks;

/// Spoken when the book has nothing relevant
pub const NO_RESULT_MESSAGE: &str =
    "I could not find relevant information in the book for your question.";

/// Spoken when search or generation fails
pub const ERROR_MESSAGE: &str = "I encountered an error. Please try again.";

/// Announced when a request arrives while a query is in flight
pub const BUSY_MESSAGE: &str = "Please wait for processing to complete.";

/// How a query ended
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Another query held the gate; nothing was done
    Rejected,
    /// The question was empty
    Empty,
    /// The recording was below the amplitude threshold
    TooQuiet,
    /// Transcription found no speech
    NoSpeech,
    /// No passage was relevant enough to answer from
    NoResults,
    /// An answer was stored and queued for speech
    Answered {
        /// Generated answer
        response: String,
        /// Location of the top passage, when it was relevant
        source: Option<String>,
    },
    /// A backend call failed
    Failed,
}

/// A finished recording admitted for processing
///
/// Holds the processing token, so no other query can start until it has
/// been processed or dropped.
#[derive(Debug)]
pub struct RecordedQuestion {
    clip: AudioClip,
    token: ProcessingToken,
}

impl RecordedQuestion {
    /// Recorded audio
    #[must_use]
    pub const fn clip(&self) -> &AudioClip {
        &self.clip
    }
}

/// Voice-driven textbook assistant
///
/// Cloning yields another handle to the same assistant.
#[derive(Clone)]
pub struct Assistant {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn Backend>,
    speech: SpeechQueue,
    announcer: Announcer,
    gate: ProcessingGate,
    store: CredentialStore,
    context: Mutex<AppContext>,
    relevance_threshold: f64,
    top_k: usize,
    min_amplitude: f32,
}

impl Assistant {
    /// Create an assistant
    ///
    /// Spawns the speech playback task, so this must be called within a
    /// Tokio runtime.
    #[must_use]
    pub fn new(
        config: &Config,
        backend: Arc<dyn Backend>,
        output: Arc<dyn AudioSink>,
        status: Box<dyn StatusSink>,
    ) -> Self {
        let synthesizer: Arc<dyn Synthesizer> = backend.clone();
        let speech = SpeechQueue::new(
            synthesizer,
            output,
            SpeechRate::new(config.voice.speech_rate),
        );
        let announcer = Announcer::new(status, speech.clone(), config.voice.announce_status);

        Self {
            inner: Arc::new(Inner {
                backend,
                speech,
                announcer,
                gate: ProcessingGate::new(),
                store: CredentialStore::new(config.credentials_path()),
                context: Mutex::new(AppContext::new()),
                relevance_threshold: config.relevance_threshold,
                top_k: config.top_k,
                min_amplitude: config.voice.min_amplitude,
            }),
        }
    }

    /// Speech queue answers are spoken through
    #[must_use]
    pub fn speech(&self) -> &SpeechQueue {
        &self.inner.speech
    }

    /// Show a status line, speaking it when `speak` is set
    pub fn announce(&self, message: &str, speak: bool) {
        self.inner.announcer.announce(message, speak);
    }

    /// Whether a query is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.gate.is_held()
    }

    // Authentication

    /// Restore the stored login, if it is still valid
    ///
    /// A token the backend rejects is forgotten. A token that could not be
    /// checked (backend unreachable) is kept for the next run.
    pub async fn restore_session(&self) -> Option<UserProfile> {
        let stored = match self.inner.store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable credentials, discarding");
                self.forget_credentials();
                return None;
            }
        };

        match self.inner.backend.verify(&stored.token).await {
            Ok(user) => {
                tracing::info!(email = %user.email, "session restored");
                self.inner.context.lock().await.credentials = Some(Arc::new(Credentials {
                    token: stored.token,
                    user: user.clone(),
                }));
                Some(user)
            }
            Err(Error::Auth(reason)) => {
                tracing::info!(reason = %reason, "stored session rejected");
                self.forget_credentials();
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not verify stored session");
                None
            }
        }
    }

    /// Sign in and remember the session
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when fields are missing or the backend rejects
    /// the login, or a transport error
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::Auth("Please fill in all fields".to_string()));
        }

        let grant = self.inner.backend.login(email.trim(), password).await?;
        self.remember(grant.token, grant.user.clone(), &grant.message)
            .await;
        Ok(grant.user)
    }

    /// Create an account, sign in, and remember the session
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when fields are missing or the backend rejects
    /// the registration, or a transport error
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<UserProfile> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::Auth("Please fill in all fields".to_string()));
        }
        if name.trim().is_empty() {
            return Err(Error::Auth("Please enter your name".to_string()));
        }

        let grant = self
            .inner
            .backend
            .register(name.trim(), email.trim(), password)
            .await?;
        self.remember(grant.token, grant.user.clone(), &grant.message)
            .await;
        Ok(grant.user)
    }

    async fn remember(&self, token: SecretString, user: UserProfile, message: &str) {
        let credentials = Credentials { token, user };

        if let Err(e) = self.inner.store.save(&credentials) {
            tracing::warn!(error = %e, "could not persist credentials");
        }

        let mut ctx = self.inner.context.lock().await;
        ctx.reset();
        ctx.credentials = Some(Arc::new(credentials));
        drop(ctx);

        if !message.is_empty() {
            self.announce(message, false);
        }
    }

    /// Sign out: tell the backend, forget local credentials, reset state
    pub async fn logout(&self) {
        let credentials = self.inner.context.lock().await.credentials.clone();

        if let Some(credentials) = credentials
            && let Err(e) = self.inner.backend.logout(&credentials.token).await
        {
            tracing::warn!(error = %e, "logout request failed");
        }

        self.forget_credentials();
        self.inner.context.lock().await.reset();
        self.announce("Logged out successfully", true);
    }

    fn forget_credentials(&self) {
        if let Err(e) = self.inner.store.clear() {
            tracing::warn!(error = %e, "could not remove stored credentials");
        }
    }

    /// Signed-in user
    pub async fn current_user(&self) -> Option<UserProfile> {
        self.inner
            .context
            .lock()
            .await
            .credentials
            .as_ref()
            .map(|c| c.user.clone())
    }

    async fn credentials(&self) -> Result<Arc<Credentials>> {
        self.inner
            .context
            .lock()
            .await
            .credentials
            .clone()
            .ok_or_else(|| Error::Auth("not logged in".to_string()))
    }

    // Books and chat sessions

    /// Prepare `book` on the backend and open its most recent chat
    ///
    /// # Errors
    ///
    /// Returns error if not signed in or the backend cannot load the book
    pub async fn select_book(&self, book: &'static Book) -> Result<()> {
        let credentials = self.credentials().await?;

        {
            let mut ctx = self.inner.context.lock().await;
            ctx.leave_book();
            ctx.book = Some(book);
        }

        self.announce("Loading models...", false);
        if let Err(e) = self.inner.backend.init_book(&credentials.token, book.file).await {
            tracing::error!(book = book.file, error = %e, "book initialization failed");
            self.announce(
                "Error loading models. Please make sure the backend server is running.",
                false,
            );
            return Err(e);
        }

        match self.list_sessions().await {
            Ok(sessions) => {
                if let Some(latest) = sessions.first()
                    && let Err(e) = self.load_session(&latest.id).await
                {
                    tracing::warn!(session = %latest.id, error = %e, "could not load latest chat");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not list chat sessions"),
        }

        tracing::info!(book = book.file, "book ready");
        self.announce(
            "System ready. Press Enter to start voice input or type your question.",
            false,
        );
        Ok(())
    }

    /// Return to book selection
    pub async fn leave_book(&self) {
        self.inner.context.lock().await.leave_book();
    }

    /// Selected book
    pub async fn book(&self) -> Option<&'static Book> {
        self.inner.context.lock().await.book
    }

    /// Chat sessions for the selected book, most recent first
    ///
    /// # Errors
    ///
    /// Returns error if not signed in or the backend call fails
    pub async fn list_sessions(&self) -> Result<Vec<ChatSessionSummary>> {
        let credentials = self.credentials().await?;
        let book = self.book().await;

        let sessions = self.inner.backend.list_sessions(&credentials.token).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| book.is_some_and(|b| s.book == b.file))
            .collect())
    }

    /// Make `session_id` the active chat, replacing local history with its
    /// messages; returns the number of messages loaded
    ///
    /// # Errors
    ///
    /// Returns error if not signed in or the backend call fails
    pub async fn load_session(&self, session_id: &str) -> Result<usize> {
        let credentials = self.credentials().await?;
        let session = self
            .inner
            .backend
            .get_session(&credentials.token, session_id)
            .await?;

        let count = session.messages.len();
        let mut ctx = self.inner.context.lock().await;
        ctx.session_id = Some(session.id);
        ctx.history.replace(session.messages);

        tracing::debug!(session = session_id, messages = count, "chat loaded");
        Ok(count)
    }

    /// Start a new chat for the selected book
    ///
    /// # Errors
    ///
    /// Returns error if not signed in, no book is selected, or the backend
    /// call fails
    pub async fn new_session(&self) -> Result<()> {
        match self.create_session().await {
            Ok(_) => {
                self.inner.context.lock().await.history.clear();
                self.announce("New chat session started", true);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "could not create chat");
                self.announce("Error creating new chat", true);
                Err(e)
            }
        }
    }

    async fn create_session(&self) -> Result<String> {
        let credentials = self.credentials().await?;
        let book = self
            .book()
            .await
            .ok_or_else(|| Error::Chat("no book selected".to_string()))?;

        let id = self
            .inner
            .backend
            .new_session(&credentials.token, book.file)
            .await?;
        self.inner.context.lock().await.session_id = Some(id.clone());

        tracing::debug!(session = %id, book = book.file, "chat created");
        Ok(id)
    }

    /// Clear the active chat
    ///
    /// # Errors
    ///
    /// Returns error if the backend call fails
    pub async fn clear_session(&self) -> Result<()> {
        let session_id = self.inner.context.lock().await.session_id.clone();
        let Some(session_id) = session_id else {
            self.announce("No active chat to clear", true);
            return Ok(());
        };

        let result = match self.credentials().await {
            Ok(credentials) => {
                self.inner
                    .backend
                    .clear_session(&credentials.token, &session_id)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.inner.context.lock().await.history.clear();
                self.announce("Chat cleared successfully", true);
                Ok(())
            }
            Err(e) => {
                tracing::error!(session = %session_id, error = %e, "could not clear chat");
                self.announce("Error clearing chat", true);
                Err(e)
            }
        }
    }

    /// Active chat session id
    pub async fn session_id(&self) -> Option<String> {
        self.inner.context.lock().await.session_id.clone()
    }

    /// Messages of the active chat
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.inner.context.lock().await.history.messages().to_vec()
    }

    /// "N messages" label for the active chat
    pub async fn message_count_label(&self) -> String {
        self.inner.context.lock().await.history.count_label()
    }

    /// Append to local history and persist
    ///
    /// A chat is created first when none is active. Persistence failures are
    /// logged, never surfaced.
    async fn save_message(&self, message: ChatMessage) {
        let (credentials, session_id) = {
            let mut ctx = self.inner.context.lock().await;
            ctx.history.push(message.clone());
            (ctx.credentials.clone(), ctx.session_id.clone())
        };

        let Some(credentials) = credentials else {
            tracing::debug!("not signed in, message kept locally");
            return;
        };

        let session_id = match session_id {
            Some(id) => id,
            None => match self.create_session().await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(error = %e, "could not create chat, message kept locally");
                    return;
                }
            },
        };

        if let Err(e) = self
            .inner
            .backend
            .post_message(&credentials.token, &session_id, &message)
            .await
        {
            tracing::warn!(session = %session_id, error = %e, "could not save message");
        }
    }

    // Query pipeline

    /// Start or stop recording
    ///
    /// Starting is refused while a query is in flight. Stopping finalizes
    /// the capture and admits it through the gate right away, so the
    /// returned [`RecordedQuestion`] already holds the processing token;
    /// pass it to [`Self::process_recording`].
    pub fn toggle_recording(
        &self,
        session: &mut RecordingSession,
        microphone: &dyn Microphone,
    ) -> Option<RecordedQuestion> {
        if session.is_capturing() {
            return self.stop_recording(session);
        }

        if self.is_busy() {
            self.announce(BUSY_MESSAGE, true);
            return None;
        }

        // A finished session can be reused for the next recording
        if session.state() != RecordingState::Idle {
            *session = RecordingSession::new();
        }

        self.announce("Requesting microphone access...", true);
        match session.start(microphone) {
            Ok(()) => self.announce("Recording started. Speak now.", true),
            Err(e) => {
                tracing::error!(error = %e, "microphone unavailable");
                self.announce(
                    "Could not access microphone. Please check permissions.",
                    true,
                );
            }
        }
        None
    }

    fn stop_recording(&self, session: &mut RecordingSession) -> Option<RecordedQuestion> {
        if let Err(e) = session.stop() {
            tracing::warn!(error = %e, "could not stop recording");
            return None;
        }

        let clip = match session.finish() {
            Ok(clip) => clip,
            Err(e) => {
                tracing::error!(error = %e, "could not assemble recording");
                self.announce("Error processing audio. Please try again.", true);
                return None;
            }
        };

        // A typed question may have started while the microphone was open
        let Some(token) = self.inner.gate.try_enter() else {
            tracing::debug!("recording discarded, another query in flight");
            self.announce(BUSY_MESSAGE, true);
            return None;
        };

        self.announce("Processing your speech...", true);
        Some(RecordedQuestion { clip, token })
    }

    /// Answer a recorded question
    pub async fn process_audio(&self, clip: AudioClip) -> QueryOutcome {
        let Some(token) = self.inner.gate.try_enter() else {
            self.announce(BUSY_MESSAGE, true);
            return QueryOutcome::Rejected;
        };
        self.process_recording(RecordedQuestion { clip, token }).await
    }

    /// Answer a recording already admitted by [`Self::toggle_recording`]
    ///
    /// The gate stays held until this returns.
    pub async fn process_recording(&self, question: RecordedQuestion) -> QueryOutcome {
        let RecordedQuestion { clip, token: _token } = question;

        self.announce("Converting speech to text...", true);

        let peak = clip.peak_amplitude();
        if peak < self.inner.min_amplitude {
            tracing::debug!(peak, threshold = self.inner.min_amplitude, "recording too quiet");
            self.announce("Audio too quiet. Please speak louder.", true);
            return QueryOutcome::TooQuiet;
        }

        let text = match self.transcribe(clip).await {
            Ok(text) => text,
            Err(Error::BlankAudio) => {
                self.announce("No speech detected. Please try again.", true);
                return QueryOutcome::NoSpeech;
            }
            Err(e) => {
                tracing::error!(error = %e, "transcription failed");
                self.announce("Error processing audio. Please try again.", true);
                return QueryOutcome::Failed;
            }
        };

        self.save_message(ChatMessage::user(text.as_str())).await;
        self.announce(&format!("You said: {text}"), true);
        self.answer(&text).await
    }

    async fn transcribe(&self, clip: AudioClip) -> Result<String> {
        let text = self.inner.backend.transcribe(clip).await?;
        if is_blank_transcript(&text) {
            tracing::debug!(transcript = %text, "blank transcript");
            return Err(Error::BlankAudio);
        }
        Ok(text.trim().to_string())
    }

    /// Answer a typed question
    pub async fn submit_text(&self, text: &str) -> QueryOutcome {
        let text = text.trim();
        if text.is_empty() {
            self.announce("Please enter a question.", true);
            return QueryOutcome::Empty;
        }

        let Some(_token) = self.inner.gate.try_enter() else {
            self.announce("Please wait for the current question to be processed.", true);
            return QueryOutcome::Rejected;
        };

        self.save_message(ChatMessage::user(text)).await;
        self.announce(&format!("You asked: {text}"), true);
        self.answer(text).await
    }

    /// Search, generate, store, and speak; the caller holds the gate
    async fn answer(&self, query: &str) -> QueryOutcome {
        self.announce("Searching the book for relevant information...", true);

        let passages = match self.inner.backend.search(query, self.inner.top_k).await {
            Ok(passages) => passages,
            Err(e) => {
                tracing::error!(error = %e, "search failed");
                self.announce(ERROR_MESSAGE, true);
                return QueryOutcome::Failed;
            }
        };

        let threshold = self.inner.relevance_threshold;
        let context = build_context(&passages, threshold);
        tracing::debug!(found = passages.len(), threshold, "search complete");

        if context.is_empty() {
            self.save_message(ChatMessage::assistant(NO_RESULT_MESSAGE, None))
                .await;
            self.inner.speech.speak(NO_RESULT_MESSAGE);
            return QueryOutcome::NoResults;
        }

        self.announce("Generating answer from the book...", true);

        let history = self.history().await;
        let response = match self
            .inner
            .backend
            .generate(query, &context, &passages, &history)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "generation failed");
                self.announce(ERROR_MESSAGE, true);
                return QueryOutcome::Failed;
            }
        };

        let source = source_annotation(&passages, threshold);
        self.save_message(ChatMessage::assistant(response.as_str(), source.clone()))
            .await;
        self.inner.speech.speak(&response);

        self.announce(
            "Response complete. Press Enter for voice input or type your question.",
            false,
        );
        QueryOutcome::Answered { response, source }
    }

    // Playback controls

    /// Speak the last answer again; false when there is none
    pub async fn repeat_last_response(&self) -> bool {
        let last = self
            .inner
            .context
            .lock()
            .await
            .history
            .last_assistant()
            .map(|m| m.text.clone());

        if let Some(text) = last {
            self.announce("Repeating last response...", true);
            self.inner.speech.speak(&text);
            true
        } else {
            self.announce("No response to repeat.", true);
            false
        }
    }

    /// Speak the help text
    pub fn announce_help(&self) {
        self.announce(HELP_TEXT, true);
    }

    /// Change the speech rate for clips that have not started yet; returns
    /// the rate actually applied
    pub fn set_speech_rate(&self, rate: f32) -> f32 {
        let applied = self.inner.speech.rate().set(rate);
        self.announce(&format!("Speech rate set to {applied:.1}"), false);
        applied
    }
}

/// Whether a transcript means "nothing was said"
#[must_use]
pub fn is_blank_transcript(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text == "[INAUDIBLE]" || text.contains("BLANK")
}

/// Passages above `threshold`, one per paragraph, as generation context
#[must_use]
pub fn build_context(passages: &[Passage], threshold: f64) -> String {
    passages
        .iter()
        .filter(|p| p.score > threshold)
        .map(|p| {
            format!(
                "From {} (Score: {}): {}",
                p.location(),
                p.score,
                p.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `Source: ...` for the top passage, when it clears `threshold`
#[must_use]
pub fn source_annotation(passages: &[Passage], threshold: f64) -> Option<String> {
    passages
        .first()
        .filter(|p| p.score > threshold)
        .map(|p| format!("Source: {}", p.location()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(score: f64, chapter: &str) -> Passage {
        Passage {
            text: format!("text of {chapter}"),
            score,
            chapter: chapter.to_string(),
            page: "12".to_string(),
            paragraph: "3".to_string(),
        }
    }

    #[test]
    fn test_blank_transcripts() {
        assert!(is_blank_transcript(""));
        assert!(is_blank_transcript("   "));
        assert!(is_blank_transcript("[BLANK_AUDIO]"));
        assert!(is_blank_transcript(" [BLANK_AUDIO] [BLANK_AUDIO]"));
        assert!(is_blank_transcript("[INAUDIBLE]"));
        assert!(!is_blank_transcript("What is a blank verse?"));
    }

    #[test]
    fn test_context_filters_by_threshold() {
        let passages = vec![passage(15.0, "Cells"), passage(4.5, "Motion"), passage(11.25, "Light")];
        let context = build_context(&passages, 10.0);

        assert_eq!(
            context,
            "From Cells, Page 12, Paragraph 3 (Score: 15): text of Cells\n\n\
             From Light, Page 12, Paragraph 3 (Score: 11.25): text of Light"
        );
        assert!(build_context(&passages, 20.0).is_empty());
    }

    #[test]
    fn test_source_only_for_relevant_top_passage() {
        let passages = vec![passage(15.0, "Cells"), passage(4.5, "Motion")];
        assert_eq!(
            source_annotation(&passages, 10.0).as_deref(),
            Some("Source: Cells, Page 12, Paragraph 3")
        );

        let passages = vec![passage(9.0, "Motion"), passage(15.0, "Cells")];
        assert!(source_annotation(&passages, 10.0).is_none());
        assert!(source_annotation(&[], 10.0).is_none());
    }
}
