//! Single-recording state machine
//!
//! A [`RecordingSession`] moves `Idle → Capturing → Stopped → HandedOff`.
//! The microphone stream is owned by the session while capturing and is
//! released exactly once: when the clip is handed off, or when the session
//! is dropped on an error path.

use crate::voice::{AudioClip, ClipEncoding};
use crate::{Error, Result};

/// Fixed parameters requested from the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Channel count
    pub channels: u16,
    /// Target sample rate in Hz
    pub sample_rate: u32,
    /// Ask the host for echo cancellation
    pub echo_cancellation: bool,
    /// Ask the host for noise suppression
    pub noise_suppression: bool,
    /// Ask the host for automatic gain control
    pub auto_gain_control: bool,
}

/// Constraints used for every recording
pub const SPEECH_CONSTRAINTS: CaptureConstraints = CaptureConstraints {
    channels: 1,
    sample_rate: crate::voice::SAMPLE_RATE,
    echo_cancellation: true,
    noise_suppression: true,
    auto_gain_control: true,
};

/// Source of microphone streams
pub trait Microphone {
    /// Acquire the microphone exclusively and start capturing
    ///
    /// # Errors
    ///
    /// Returns [`Error::MicrophoneAccess`] if permission is denied or no
    /// device is available
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>>;
}

/// A live capture from an opened microphone
pub trait CaptureStream {
    /// Bytes captured since the last call
    fn take_chunk(&mut self) -> Vec<u8>;

    /// Stop capturing and return any bytes not yet taken
    fn finalize(&mut self) -> Vec<u8>;

    /// Encoding the device actually delivers
    fn encoding(&self) -> ClipEncoding;

    /// Release the hardware
    fn release(self: Box<Self>);
}

/// Observable recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Not yet started, or microphone access failed
    Idle,
    /// Microphone open, buffering chunks
    Capturing,
    /// Capture finalized, clip not yet assembled
    Stopped,
    /// Clip handed to the pipeline
    HandedOff,
}

impl RecordingState {
    const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Stopped => "stopped",
            Self::HandedOff => "handed off",
        }
    }
}

enum Phase {
    Idle,
    Capturing {
        stream: Box<dyn CaptureStream>,
        chunks: Vec<Vec<u8>>,
    },
    Stopped {
        stream: Box<dyn CaptureStream>,
        chunks: Vec<Vec<u8>>,
    },
    HandedOff,
}

/// One microphone recording
pub struct RecordingSession {
    phase: Phase,
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSession {
    /// Create an idle session
    #[must_use]
    pub const fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> RecordingState {
        match self.phase {
            Phase::Idle => RecordingState::Idle,
            Phase::Capturing { .. } => RecordingState::Capturing,
            Phase::Stopped { .. } => RecordingState::Stopped,
            Phase::HandedOff => RecordingState::HandedOff,
        }
    }

    /// Whether the microphone is currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        matches!(self.phase, Phase::Capturing { .. })
    }

    /// Open the microphone and begin capturing
    ///
    /// On failure the session stays idle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless idle, or the microphone's
    /// access error
    pub fn start(&mut self, microphone: &dyn Microphone) -> Result<()> {
        let state = self.state();
        if state != RecordingState::Idle {
            return Err(invalid(state, "start recording"));
        }

        let stream = microphone.open(&SPEECH_CONSTRAINTS)?;
        tracing::debug!(encoding = ?stream.encoding(), "recording started");

        self.phase = Phase::Capturing {
            stream,
            chunks: Vec::new(),
        };
        Ok(())
    }

    /// Move newly captured bytes into the chunk buffer
    ///
    /// Called at a fixed interval while capturing; returns the size of the
    /// chunk taken (zero when not capturing).
    pub fn poll(&mut self) -> usize {
        let Phase::Capturing { stream, chunks } = &mut self.phase else {
            return 0;
        };

        let chunk = stream.take_chunk();
        let len = chunk.len();
        if len > 0 {
            chunks.push(chunk);
        }
        len
    }

    /// Finalize the capture device
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless capturing
    pub fn stop(&mut self) -> Result<()> {
        let state = self.state();
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Capturing {
                mut stream,
                mut chunks,
            } => {
                let tail = stream.finalize();
                if !tail.is_empty() {
                    chunks.push(tail);
                }

                tracing::debug!(chunks = chunks.len(), "recording stopped");
                self.phase = Phase::Stopped { stream, chunks };
                Ok(())
            }
            other => {
                self.phase = other;
                Err(invalid(state, "stop recording"))
            }
        }
    }

    /// Assemble the buffered chunks into one clip and release the microphone
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless stopped
    pub fn finish(&mut self) -> Result<AudioClip> {
        let state = self.state();
        match std::mem::replace(&mut self.phase, Phase::HandedOff) {
            Phase::Stopped { stream, chunks } => {
                let encoding = stream.encoding();
                stream.release();

                let clip = AudioClip::new(chunks.concat(), encoding);
                tracing::debug!(
                    bytes = clip.data().len(),
                    secs = clip.duration_secs(),
                    "recording handed off"
                );
                Ok(clip)
            }
            other => {
                self.phase = other;
                Err(invalid(state, "hand off recording"))
            }
        }
    }
}

const fn invalid(state: RecordingState, action: &'static str) -> Error {
    Error::InvalidTransition {
        state: state.label(),
        action,
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::HandedOff) {
            Phase::Capturing { stream, .. } | Phase::Stopped { stream, .. } => {
                tracing::debug!("recording abandoned, releasing microphone");
                stream.release();
            }
            Phase::Idle | Phase::HandedOff => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    struct FakeStream {
        pending: Arc<Mutex<Vec<Vec<u8>>>>,
        releases: Arc<AtomicUsize>,
    }

    impl CaptureStream for FakeStream {
        fn take_chunk(&mut self) -> Vec<u8> {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                Vec::new()
            } else {
                pending.remove(0)
            }
        }

        fn finalize(&mut self) -> Vec<u8> {
            self.pending.lock().unwrap().drain(..).flatten().collect()
        }

        fn encoding(&self) -> ClipEncoding {
            ClipEncoding::pcm_f32(16000)
        }

        fn release(self: Box<Self>) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeMic {
        pending: Arc<Mutex<Vec<Vec<u8>>>>,
        releases: Arc<AtomicUsize>,
        deny: bool,
    }

    impl FakeMic {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                pending: Arc::new(Mutex::new(chunks)),
                releases: Arc::new(AtomicUsize::new(0)),
                deny: false,
            }
        }
    }

    impl Microphone for FakeMic {
        fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>> {
            assert_eq!(constraints.channels, 1);
            if self.deny {
                return Err(Error::MicrophoneAccess("permission denied".to_string()));
            }
            Ok(Box::new(FakeStream {
                pending: Arc::clone(&self.pending),
                releases: Arc::clone(&self.releases),
            }))
        }
    }

    #[test]
    fn test_start_stop_finish_concatenates() {
        let mic = FakeMic::new(vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
        let mut session = RecordingSession::new();

        session.start(&mic).unwrap();
        assert_eq!(session.state(), RecordingState::Capturing);
        assert_eq!(session.poll(), 2);

        session.stop().unwrap();
        assert_eq!(session.state(), RecordingState::Stopped);
        assert_eq!(mic.releases.load(Ordering::SeqCst), 0);

        let clip = session.finish().unwrap();
        assert_eq!(clip.data(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(session.state(), RecordingState::HandedOff);

        drop(session);
        assert_eq!(mic.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_denied_access_stays_idle() {
        let mut mic = FakeMic::new(Vec::new());
        mic.deny = true;
        let mut session = RecordingSession::new();

        let err = session.start(&mic).unwrap_err();
        assert!(matches!(err, Error::MicrophoneAccess(_)));
        assert_eq!(session.state(), RecordingState::Idle);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mic = FakeMic::new(Vec::new());
        let mut session = RecordingSession::new();

        assert!(matches!(
            session.stop(),
            Err(Error::InvalidTransition { state: "idle", .. })
        ));
        assert!(session.finish().is_err());

        session.start(&mic).unwrap();
        assert!(matches!(
            session.start(&mic),
            Err(Error::InvalidTransition { state: "capturing", .. })
        ));
        assert!(session.finish().is_err());
    }

    #[test]
    fn test_drop_while_capturing_releases_once() {
        let mic = FakeMic::new(vec![vec![9]]);
        {
            let mut session = RecordingSession::new();
            session.start(&mic).unwrap();
            session.poll();
        }
        assert_eq!(mic.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_poll_outside_capture_is_noop() {
        let mut session = RecordingSession::new();
        assert_eq!(session.poll(), 0);
    }
}
