//! Status announcements
//!
//! Every status line goes to a [`StatusSink`]. Lines flagged for speech are
//! also spoken through the speech queue, so announcements stay in order with
//! answers.

use std::sync::Mutex;

use crate::voice::SpeechQueue;

/// Where status lines are shown
pub trait StatusSink: Send + Sync {
    /// Show one status line
    fn status(&self, message: &str);
}

/// Prints status lines to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn status(&self, message: &str) {
        println!("» {message}");
    }
}

/// Collects status lines in memory
#[derive(Debug, Default)]
pub struct StatusLog {
    lines: Mutex<Vec<String>>,
}

impl StatusLog {
    /// Empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines shown so far
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Whether `message` was shown
    #[must_use]
    pub fn contains(&self, message: &str) -> bool {
        self.lines().iter().any(|line| line == message)
    }
}

impl StatusSink for StatusLog {
    fn status(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }
}

/// Shows status lines and optionally speaks them
pub struct Announcer {
    sink: Box<dyn StatusSink>,
    speech: SpeechQueue,
    speak_enabled: bool,
}

impl Announcer {
    /// Create an announcer; `speak_enabled` turns spoken announcements on
    #[must_use]
    pub fn new(sink: Box<dyn StatusSink>, speech: SpeechQueue, speak_enabled: bool) -> Self {
        Self {
            sink,
            speech,
            speak_enabled,
        }
    }

    /// Show `message`, and speak it when `speak` is set and speech is enabled
    pub fn announce(&self, message: &str, speak: bool) {
        tracing::debug!(status = message, speak, "status");
        self.sink.status(message);

        if speak && self.speak_enabled {
            self.speech.speak(message);
        }
    }
}
