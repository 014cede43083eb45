//! Opus frame codec pinned to the container's fixed 20 ms frame geometry.

use super::error::AudioError;

/// Fixed frame duration the container stores, in milliseconds.
pub const FRAME_DURATION_MS: u32 = 20;

/// Sample rates the codec mandates. Anything else is rejected at the
/// encode/decode boundary.
pub const SUPPORTED_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

pub fn is_supported_rate(sample_rate: u32) -> bool {
    SUPPORTED_RATES.contains(&sample_rate)
}

/// Samples per channel in one 20 ms frame: 160/240/320/480/960 for the
/// supported rates.
pub fn frame_samples(sample_rate: u32) -> usize {
    (sample_rate as usize) * (FRAME_DURATION_MS as usize) / 1000
}

/// Bytes of 16-bit PCM in one frame.
pub fn frame_bytes(sample_rate: u32, channels: u8) -> usize {
    frame_samples(sample_rate) * channels as usize * 2
}

fn opus_channels(channels: u8) -> opus::Channels {
    if channels == 1 {
        opus::Channels::Mono
    } else {
        opus::Channels::Stereo
    }
}

fn check_format(sample_rate: u32, channels: u8) -> Result<(), AudioError> {
    if !is_supported_rate(sample_rate) || !(1..=2).contains(&channels) {
        return Err(AudioError::UnsupportedFormat { sample_rate, channels });
    }
    Ok(())
}

// ======================== Encoder ========================

pub struct VoiceEncoder {
    encoder: opus::Encoder,
    sample_rate: u32,
    channels: u8,
}

impl VoiceEncoder {
    /// Create an encoder for one of the mandated rates.
    ///
    /// * `sample_rate` - codec sample rate (e.g. 24000)
    /// * `channels`    - 1 or 2
    /// * `bitrate`     - bitrate in bits/s (e.g. 64000)
    pub fn new(sample_rate: u32, channels: u8, bitrate: i32) -> Result<Self, AudioError> {
        check_format(sample_rate, channels)?;
        let mut encoder =
            opus::Encoder::new(sample_rate, opus_channels(channels), opus::Application::Audio)?;
        encoder.set_bitrate(opus::Bitrate::Bits(bitrate))?;
        Ok(Self { encoder, sample_rate, channels })
    }

    /// Total interleaved i16 samples in one input frame.
    pub fn frame_samples_total(&self) -> usize {
        frame_samples(self.sample_rate) * self.channels as usize
    }

    /// Encode exactly one 20 ms frame of interleaved PCM.
    pub fn encode_frame(&mut self, pcm: &[i16]) -> Result<Vec<u8>, AudioError> {
        debug_assert_eq!(pcm.len(), self.frame_samples_total());
        let mut packet = vec![0u8; 4000];
        let encoded_len = self.encoder.encode(pcm, &mut packet)?;
        packet.truncate(encoded_len);
        Ok(packet)
    }
}

// ======================== Decoder ========================

pub struct VoiceDecoder {
    decoder: opus::Decoder,
    sample_rate: u32,
    channels: u8,
}

impl VoiceDecoder {
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self, AudioError> {
        check_format(sample_rate, channels)?;
        let decoder = opus::Decoder::new(sample_rate, opus_channels(channels))?;
        Ok(Self { decoder, sample_rate, channels })
    }

    /// Decode one packet back into interleaved PCM.
    ///
    /// The scratch buffer is sized for the codec's 120 ms maximum so an
    /// over-long packet decodes instead of erroring.
    pub fn decode_packet(&mut self, packet: &[u8]) -> Result<Vec<i16>, AudioError> {
        let max_samples = self.sample_rate as usize * 120 / 1000;
        let mut pcm = vec![0i16; max_samples * self.channels as usize];
        let decoded_per_ch = self.decoder.decode(packet, &mut pcm, false)?;
        pcm.truncate(decoded_per_ch * self.channels as usize);
        Ok(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_geometry_matches_canonical_values() {
        let expected = [(8000, 160), (12000, 240), (16000, 320), (24000, 480), (48000, 960)];
        for (rate, samples) in expected {
            assert_eq!(frame_samples(rate), samples);
            assert_eq!(frame_bytes(rate, 1), samples * 2);
            assert_eq!(frame_bytes(rate, 2), samples * 4);
        }
    }

    #[test]
    fn unsupported_rate_is_rejected_at_construction() {
        assert!(matches!(
            VoiceEncoder::new(44100, 1, 64000),
            Err(AudioError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            VoiceDecoder::new(22050, 1),
            Err(AudioError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn encode_decode_preserves_frame_count() {
        let mut encoder = VoiceEncoder::new(16000, 1, 32000).unwrap();
        let mut decoder = VoiceDecoder::new(16000, 1).unwrap();

        let frame = vec![0i16; encoder.frame_samples_total()];
        for _ in 0..5 {
            let packet = encoder.encode_frame(&frame).unwrap();
            assert!(!packet.is_empty());
            let pcm = decoder.decode_packet(&packet).unwrap();
            assert_eq!(pcm.len(), frame_samples(16000));
        }
    }
}
