//! Vidya Assist - voice-driven textbook question answering
//!
//! This library provides the client side of a textbook assistant:
//! - Microphone recording with an explicit session state machine
//! - Single-flight query pipeline (transcribe, search, generate)
//! - Sentence segmentation and strictly ordered speech playback
//! - Authentication and chat history against the assistant backend
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 vidya (terminal UI)                  │
//! │     chat  │  ask  │  login  │  test-mic  │  ...      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Assistant                         │
//! │  ProcessingGate │ RecordingSession │ SpeechQueue     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Backend (HTTP API)                      │
//! │  auth │ chat │ transcribe │ search │ generate │ tts  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod assistant;
pub mod backend;
pub mod books;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod voice;

pub use assistant::{Assistant, ProcessingGate, ProcessingToken, QueryOutcome, RecordedQuestion};
pub use backend::{Backend, HttpBackend, Passage, UserProfile};
pub use books::Book;
pub use chat::{ChatHistory, ChatMessage};
pub use config::Config;
pub use context::{AppContext, CredentialStore, Credentials};
pub use error::{Error, Result};
pub use voice::{RecordingSession, SpeechQueue, segment};
