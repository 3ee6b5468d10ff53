//! Application context
//!
//! Holds everything that lives for one signed-in session: credentials, the
//! selected book, the active chat session, and its local history. Created at
//! startup, reset on logout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::backend::UserProfile;
use crate::books::Book;
use crate::chat::ChatHistory;

/// Bearer token plus the profile it belongs to
#[derive(Debug)]
pub struct Credentials {
    /// Bearer token
    pub token: SecretString,
    /// Signed-in user
    pub user: UserProfile,
}

/// On-disk form of [`Credentials`]
#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    token: String,
    user: UserProfile,
}

/// Persists credentials across runs in a JSON file
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store backed by `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read stored credentials, `None` if nothing is stored
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(&self) -> Result<Option<Credentials>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let stored: StoredCredentials = serde_json::from_str(&content)?;

        Ok(Some(Credentials {
            token: SecretString::from(stored.token),
            user: stored.user,
        }))
    }

    /// Write credentials, creating the data directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let stored = StoredCredentials {
            token: credentials.token.expose_secret().to_string(),
            user: credentials.user.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&stored)?)?;

        tracing::debug!(path = %self.path.display(), "credentials saved");
        Ok(())
    }

    /// Remove stored credentials; a missing file is not an error
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "credentials removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Mutable state of one signed-in session
#[derive(Debug, Default)]
pub struct AppContext {
    /// Signed-in user, if any
    pub credentials: Option<Arc<Credentials>>,
    /// Book questions are answered from
    pub book: Option<&'static Book>,
    /// Backend id of the active chat session
    pub session_id: Option<String>,
    /// Messages of the active chat session
    pub history: ChatHistory,
}

impl AppContext {
    /// Empty, signed-out context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a user is signed in
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// Drop everything, as on logout
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Return to book selection, keeping the signed-in user
    pub fn leave_book(&mut self) {
        self.book = None;
        self.session_id = None;
        self.history.clear();
    }
}
