//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::voice::clip::samples_to_bytes;
use crate::voice::{CaptureConstraints, CaptureStream, ClipEncoding, Microphone};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// The default input device of the default host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    /// Create a handle to the default input device
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::MicrophoneAccess("no input device available".to_string()))?;

        let config = negotiate_config(&device, constraints)?;
        let channels = usize::from(config.channels.max(1));

        // cpal exposes no DSP switches; the host applies whatever it supports
        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels,
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            auto_gain_control = constraints.auto_gain_control,
            "audio capture initialized"
        );

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&buffer);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = writer.lock() {
                        if channels == 1 {
                            buf.extend_from_slice(data);
                        } else {
                            // Downmix interleaved frames to mono
                            #[allow(clippy::cast_precision_loss)]
                            buf.extend(
                                data.chunks(channels)
                                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                            );
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::MicrophoneAccess(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::MicrophoneAccess(e.to_string()))?;

        tracing::debug!("audio capture started");

        Ok(Box::new(CpalCaptureStream {
            stream: Some(stream),
            buffer,
            sample_rate: config.sample_rate.0,
        }))
    }
}

/// Pick mono at the target rate, else the device default (downmixed)
fn negotiate_config(device: &cpal::Device, constraints: &CaptureConstraints) -> Result<StreamConfig> {
    let target = SampleRate(constraints.sample_rate);

    let preferred = device
        .supported_input_configs()
        .map_err(|e| Error::MicrophoneAccess(e.to_string()))?
        .find(|c| {
            c.channels() == constraints.channels
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= target
                && c.max_sample_rate() >= target
        });

    if let Some(supported) = preferred {
        return Ok(supported.with_sample_rate(target).config());
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| Error::MicrophoneAccess(e.to_string()))?;

    if fallback.sample_format() != cpal::SampleFormat::F32 {
        return Err(Error::MicrophoneAccess(format!(
            "unsupported input sample format {:?}",
            fallback.sample_format()
        )));
    }

    tracing::debug!(
        sample_rate = fallback.sample_rate().0,
        channels = fallback.channels(),
        "target capture format unavailable, using device default"
    );
    Ok(fallback.config())
}

/// Live microphone capture backed by a cpal input stream
struct CpalCaptureStream {
    stream: Option<Stream>,
    buffer: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
}

impl CpalCaptureStream {
    fn drain(&self) -> Vec<u8> {
        let samples = self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        samples_to_bytes(&samples)
    }
}

impl CaptureStream for CpalCaptureStream {
    fn take_chunk(&mut self) -> Vec<u8> {
        self.drain()
    }

    fn finalize(&mut self) -> Vec<u8> {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                tracing::warn!(error = %e, "failed to pause capture stream");
            }
        }
        self.drain()
    }

    fn encoding(&self) -> ClipEncoding {
        ClipEncoding::pcm_f32(self.sample_rate)
    }

    fn release(mut self: Box<Self>) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}
