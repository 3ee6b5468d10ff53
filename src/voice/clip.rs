//! Captured audio clips

use crate::{Error, Result};

/// MIME tag for little-endian 32-bit float PCM
pub const PCM_F32_MIME: &str = "audio/pcm;format=f32le";

/// Encoding negotiated with the capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipEncoding {
    /// MIME/encoding tag of the clip bytes
    pub mime: String,
    /// Samples per second
    pub sample_rate: u32,
}

impl ClipEncoding {
    /// Mono f32 PCM at `sample_rate`
    #[must_use]
    pub fn pcm_f32(sample_rate: u32) -> Self {
        Self {
            mime: PCM_F32_MIME.to_string(),
            sample_rate,
        }
    }
}

/// One recording, ready for transcription
///
/// Owned by the recording session until handed to the pipeline, which moves
/// it into the transcription call.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    data: Vec<u8>,
    encoding: ClipEncoding,
}

impl AudioClip {
    /// Wrap raw clip bytes
    #[must_use]
    pub const fn new(data: Vec<u8>, encoding: ClipEncoding) -> Self {
        Self { data, encoding }
    }

    /// Build a PCM clip from f32 samples
    #[must_use]
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self::new(samples_to_bytes(samples), ClipEncoding::pcm_f32(sample_rate))
    }

    /// Raw clip bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the clip, returning its bytes
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Encoding tag
    #[must_use]
    pub const fn encoding(&self) -> &ClipEncoding {
        &self.encoding
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.encoding.sample_rate
    }

    /// Whether the clip holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode PCM samples; trailing partial samples are ignored
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Largest absolute sample value
    #[must_use]
    pub fn peak_amplitude(&self) -> f32 {
        self.samples()
            .iter()
            .map(|s| s.abs())
            .fold(0.0f32, f32::max)
    }

    /// Clip length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        if self.encoding.sample_rate == 0 {
            return 0.0;
        }
        (self.data.len() / 4) as f32 / self.encoding.sample_rate as f32
    }

    /// Encode as 16-bit WAV
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples(), self.encoding.sample_rate)
    }
}

/// Serialize f32 samples as little-endian bytes
#[must_use]
pub fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_survive_encoding() {
        let clip = AudioClip::from_samples(&[0.0, 0.25, -0.5, 1.0], 16000);
        assert_eq!(clip.data().len(), 16);
        assert_eq!(clip.samples(), vec![0.0, 0.25, -0.5, 1.0]);
        assert_eq!(clip.encoding().mime, PCM_F32_MIME);
    }

    #[test]
    fn test_peak_amplitude() {
        let clip = AudioClip::from_samples(&[0.001, -0.3, 0.2], 16000);
        assert!((clip.peak_amplitude() - 0.3).abs() < f32::EPSILON);

        let empty = AudioClip::from_samples(&[], 16000);
        assert!(empty.is_empty());
        assert!(empty.peak_amplitude() < f32::EPSILON);
    }

    #[test]
    fn test_duration() {
        let clip = AudioClip::from_samples(&vec![0.0; 8000], 16000);
        assert!((clip.duration_secs() - 0.5).abs() < f32::EPSILON);
    }
}
