//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Device that plays one synthesized clip at a time
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio` to completion at `rate` times normal speed
    ///
    /// The clip is consumed; its buffers are freed when playback ends.
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be decoded or the device fails
    async fn play(&self, audio: Vec<u8>, rate: f32) -> Result<()>;
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Play raw f32 samples recorded at the device rate
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_samples(&self, samples: Vec<f32>) -> Result<()> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || play_samples_blocking(&config, samples))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

#[async_trait]
impl AudioSink for AudioPlayback {
    async fn play(&self, audio: Vec<u8>, rate: f32) -> Result<()> {
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let decoded = decode_audio(&audio)?;
            drop(audio);

            let samples = resample(
                decoded.samples,
                decoded.sample_rate,
                config.sample_rate.0,
                rate,
            )?;
            play_samples_blocking(&config, samples)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Output used when voice is disabled: clips are discarded
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

#[async_trait]
impl AudioSink for SilentOutput {
    async fn play(&self, audio: Vec<u8>, rate: f32) -> Result<()> {
        tracing::debug!(bytes = audio.len(), rate, "voice disabled, skipping clip");
        Ok(())
    }
}

/// Play samples in a blocking manner
fn play_samples_blocking(config: &StreamConfig, samples: Vec<f32>) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = usize::from(config.channels.max(1));
    let sample_count = samples.len();

    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);

                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Release);
                            0.0
                        });

                        for out in frame.iter_mut() {
                            *out = sample;
                        }

                        if pos < samples.len() {
                            pos += 1;
                        }
                    }

                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Wait for playback to finish
    let duration_ms = (sample_count as u64 * 1000) / u64::from(config.sample_rate.0.max(1));

    // Poll for completion with timeout
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Acquire) {
        if start.elapsed() > timeout {
            tracing::warn!("playback did not signal completion, giving up");
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(std::time::Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// Mono samples with their native rate
#[derive(Debug)]
struct DecodedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
}

/// Decode WAV or MP3 bytes to mono f32 samples
fn decode_audio(data: &[u8]) -> Result<DecodedAudio> {
    if data.starts_with(b"RIFF") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

fn decode_wav(data: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| {
                    #[allow(clippy::cast_precision_loss)]
                    let v = v as f32;
                    v / scale
                }))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, usize::from(spec.channels)),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(PLAYBACK_SAMPLE_RATE);
                let frame_samples: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&frame_samples, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Average interleaved channels into one
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample so that playing at `device_rate` sounds `speech_rate` times faster
fn resample(
    samples: Vec<f32>,
    source_rate: u32,
    device_rate: u32,
    speech_rate: f32,
) -> Result<Vec<f32>> {
    let ratio = f64::from(device_rate) / (f64::from(source_rate) * f64::from(speech_rate));

    if samples.is_empty() || (ratio - 1.0).abs() < 1e-6 {
        return Ok(samples);
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, samples.len(), 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let mut output = resampler
        .process(&[samples], None)
        .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;

    Ok(output.pop().unwrap_or_default())
}
