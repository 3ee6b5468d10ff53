//! Ordered text-to-speech playback
//!
//! Sentences are synthesized concurrently but always played in the order
//! they were enqueued. Each sentence gets a sequence index when enqueued; a
//! single playback task holds the cursor and only plays the job at the
//! cursor, parking jobs that finish synthesis early.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::Result;
use crate::voice::{AudioSink, segment};

/// Slowest accepted playback rate
pub const MIN_SPEECH_RATE: f32 = 0.25;

/// Fastest accepted playback rate
pub const MAX_SPEECH_RATE: f32 = 4.0;

/// Remote text-to-speech
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Fetch synthesized audio for one sentence
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Synthesis`] on a failed or rejected request
    async fn synthesize(&self, sentence: &str) -> Result<Vec<u8>>;
}

/// User-adjustable playback rate, read when each clip starts
#[derive(Debug, Clone)]
pub struct SpeechRate(Arc<AtomicU32>);

impl SpeechRate {
    /// Create a rate, clamped to the accepted range
    #[must_use]
    pub fn new(rate: f32) -> Self {
        Self(Arc::new(AtomicU32::new(clamp_rate(rate).to_bits())))
    }

    /// Current rate
    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Change the rate; returns the value actually stored
    pub fn set(&self, rate: f32) -> f32 {
        let rate = clamp_rate(rate);
        self.0.store(rate.to_bits(), Ordering::Relaxed);
        rate
    }
}

impl Default for SpeechRate {
    fn default() -> Self {
        Self::new(1.0)
    }
}

fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_SPEECH_RATE, MAX_SPEECH_RATE)
    } else {
        1.0
    }
}

/// One sentence on its way to the speaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechJob {
    /// Sentence being spoken
    pub sentence_text: String,
    /// Position in enqueue order
    pub sequence_index: u64,
    /// Synthesized audio; `None` when synthesis failed and the job is dropped
    pub synthesized_audio: Option<Vec<u8>>,
}

/// What the playback task is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing bound to the device
    Idle,
    /// The job with this index is on the device
    Playing {
        /// Sequence index of the playing job
        index: u64,
    },
}

/// Snapshot of the playback task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStatus {
    /// Current device state
    pub state: PlaybackState,
    /// Index of the next job eligible to play
    pub cursor: u64,
}

/// Ordered queue of synthesized sentences
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct SpeechQueue {
    synthesizer: Arc<dyn Synthesizer>,
    next_index: Arc<AtomicU64>,
    jobs_tx: mpsc::UnboundedSender<SpeechJob>,
    status_rx: watch::Receiver<PlaybackStatus>,
    rate: SpeechRate,
}

impl SpeechQueue {
    /// Create a queue and spawn its playback task
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        rate: SpeechRate,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PlaybackStatus {
            state: PlaybackState::Idle,
            cursor: 0,
        });

        tokio::spawn(run_playback(jobs_rx, sink, rate.clone(), status_tx));

        Self {
            synthesizer,
            next_index: Arc::new(AtomicU64::new(0)),
            jobs_tx,
            status_rx,
            rate,
        }
    }

    /// Request synthesis for one sentence and queue it for playback
    ///
    /// Returns the sentence's sequence index. A failed synthesis is logged
    /// and the sentence is skipped; it never blocks later sentences.
    pub fn enqueue_sentence(&self, text: impl Into<String>) -> u64 {
        let sentence_text = text.into();
        let sequence_index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let synthesizer = Arc::clone(&self.synthesizer);
        let jobs_tx = self.jobs_tx.clone();

        tracing::debug!(index = sequence_index, sentence = %sentence_text, "sentence queued");

        tokio::spawn(async move {
            let text = sentence_text.clone();
            let synthesis = tokio::spawn(async move { synthesizer.synthesize(&text).await });

            // A panicking synthesizer still yields a job so the cursor moves on
            let synthesized_audio = match synthesis.await {
                Ok(Ok(audio)) => Some(audio),
                Ok(Err(e)) => {
                    tracing::warn!(
                        index = sequence_index,
                        error = %e,
                        "synthesis failed, dropping sentence"
                    );
                    None
                }
                Err(e) => {
                    tracing::error!(
                        index = sequence_index,
                        error = %e,
                        "synthesis task aborted, dropping sentence"
                    );
                    None
                }
            };

            let job = SpeechJob {
                sentence_text,
                sequence_index,
                synthesized_audio,
            };
            if jobs_tx.send(job).is_err() {
                tracing::debug!(index = sequence_index, "playback task gone, discarding job");
            }
        });

        sequence_index
    }

    /// Segment `text` into sentences and queue each one
    ///
    /// Returns the number of sentences queued.
    pub fn speak(&self, text: &str) -> usize {
        let sentences = segment(text);
        for sentence in &sentences {
            self.enqueue_sentence(sentence.as_str());
        }
        sentences.len()
    }

    /// Wait until everything enqueued so far has played or been skipped
    pub async fn wait_until_idle(&self) {
        let target = self.next_index.load(Ordering::SeqCst);
        let mut status_rx = self.status_rx.clone();
        let _ = status_rx.wait_for(|status| status.cursor >= target).await;
    }

    /// Current playback snapshot
    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        *self.status_rx.borrow()
    }

    /// Whether a clip is bound to the device
    #[must_use]
    pub fn is_playing(&self) -> bool {
        matches!(self.status().state, PlaybackState::Playing { .. })
    }

    /// Sentences enqueued but not yet played or skipped
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.next_index
            .load(Ordering::SeqCst)
            .saturating_sub(self.status().cursor)
    }

    /// Playback rate handle
    #[must_use]
    pub const fn rate(&self) -> &SpeechRate {
        &self.rate
    }
}

/// Single playback loop: the only place audio is bound to the device
async fn run_playback(
    mut jobs_rx: mpsc::UnboundedReceiver<SpeechJob>,
    sink: Arc<dyn AudioSink>,
    rate: SpeechRate,
    status_tx: watch::Sender<PlaybackStatus>,
) {
    let mut parked: BTreeMap<u64, SpeechJob> = BTreeMap::new();
    let mut cursor = 0_u64;

    while let Some(job) = jobs_rx.recv().await {
        if job.sequence_index != cursor {
            tracing::trace!(index = job.sequence_index, cursor, "job ready early, parked");
        }
        parked.insert(job.sequence_index, job);

        while let Some(job) = parked.remove(&cursor) {
            if let Some(audio) = job.synthesized_audio {
                status_tx.send_replace(PlaybackStatus {
                    state: PlaybackState::Playing { index: cursor },
                    cursor,
                });

                let playback_rate = rate.get();
                tracing::debug!(index = cursor, rate = playback_rate, "playing sentence");

                if let Err(e) = sink.play(audio, playback_rate).await {
                    tracing::warn!(index = cursor, error = %e, "playback failed, skipping");
                }
            }

            cursor += 1;
            status_tx.send_replace(PlaybackStatus {
                state: PlaybackState::Idle,
                cursor,
            });
        }
    }

    tracing::debug!("speech queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_clamped() {
        let rate = SpeechRate::new(10.0);
        assert!((rate.get() - MAX_SPEECH_RATE).abs() < f32::EPSILON);

        assert!((rate.set(0.1) - MIN_SPEECH_RATE).abs() < f32::EPSILON);
        assert!((rate.set(f32::NAN) - 1.0).abs() < f32::EPSILON);
        assert!((rate.set(1.5) - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rate_shared_between_clones() {
        let rate = SpeechRate::default();
        let other = rate.clone();
        other.set(2.0);
        assert!((rate.get() - 2.0).abs() < f32::EPSILON);
    }
}
