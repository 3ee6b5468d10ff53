//! Voice processing module
//!
//! Handles microphone recording, sentence segmentation, and ordered
//! playback of synthesized speech. Transcription and synthesis themselves
//! happen on the backend (see `backend`).

mod capture;
mod clip;
mod playback;
mod queue;
mod recording;
mod segment;

pub use capture::{CpalMicrophone, SAMPLE_RATE};
pub use clip::{AudioClip, ClipEncoding, PCM_F32_MIME, samples_to_bytes, samples_to_wav};
pub use playback::{AudioPlayback, AudioSink, SilentOutput};
pub use queue::{
    MAX_SPEECH_RATE, MIN_SPEECH_RATE, PlaybackState, PlaybackStatus, SpeechJob, SpeechQueue,
    SpeechRate, Synthesizer,
};
pub use recording::{
    CaptureConstraints, CaptureStream, Microphone, RecordingSession, RecordingState,
    SPEECH_CONSTRAINTS,
};
pub use segment::segment;
