//! Streaming container to raw-audio transcoder, the mirror of `encode`.
//!
//! Bytes arrive at whatever boundaries the network or filesystem hands
//! over; decoded PCM frames come out as soon as whole packets are
//! buffered, so playback starts while the download is still running.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::{Buf, BytesMut};

use super::codec::VoiceDecoder;
use super::container::{self, ContainerHeader, HEADER_LEN};
use super::error::AudioError;

/// Per-stream decode state. Feed byte chunks of any size, collect PCM.
pub struct StreamDecoder {
    buf: BytesMut,
    header: Option<ContainerHeader>,
    decoder: Option<VoiceDecoder>,
    packets_decoded: u64,
}

/// What a completed decode produced.
#[derive(Debug, Clone, Copy)]
pub struct DecodeSummary {
    pub sample_rate: u32,
    pub channels: u8,
    pub packets_decoded: u64,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            header: None,
            decoder: None,
            packets_decoded: 0,
        }
    }

    /// Header, once enough bytes have arrived to parse it.
    ///
    /// A `packet_count` of 0 means the container is open-ended; the count
    /// is never used as a loop bound either way; packets are decoded
    /// until the input source ends.
    pub fn header(&self) -> Option<&ContainerHeader> {
        self.header.as_ref()
    }

    /// Feed one chunk of container bytes; returns the interleaved PCM for
    /// every packet that became whole. An empty return just means more
    /// input is needed.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
        self.buf.extend_from_slice(bytes);

        if self.header.is_none() {
            if self.buf.len() < HEADER_LEN {
                return Ok(Vec::new());
            }
            let header = container::read_header(&self.buf)?;
            self.decoder = Some(VoiceDecoder::new(header.sample_rate, header.channels)?);
            self.header = Some(header);
            self.buf.advance(HEADER_LEN);
        }

        let mut pcm = Vec::new();
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(pcm);
        };
        loop {
            match container::read_packet(&self.buf) {
                Ok((payload, consumed)) => {
                    pcm.extend_from_slice(&decoder.decode_packet(payload)?);
                    self.buf.advance(consumed);
                    self.packets_decoded += 1;
                }
                // Mid-stream truncation just means the rest of the packet
                // has not arrived yet.
                Err(AudioError::TruncatedPacket { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(pcm)
    }

    /// Close the stream. Fails with `EmptyOrTruncatedContainer` when the
    /// source ended before a header and at least one packet were decoded;
    /// a partial trailing packet is dropped silently, since a live source
    /// ends wherever the connection does.
    pub fn finish(self) -> Result<DecodeSummary, AudioError> {
        let header = match self.header {
            Some(h) if self.packets_decoded > 0 => h,
            _ => return Err(AudioError::EmptyOrTruncatedContainer),
        };
        if !self.buf.is_empty() {
            log::debug!(
                "Container ended with {} unparsed trailing bytes after {} packets",
                self.buf.len(),
                self.packets_decoded,
            );
        }
        Ok(DecodeSummary {
            sample_rate: header.sample_rate,
            channels: header.channels,
            packets_decoded: self.packets_decoded,
        })
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a complete container file into a WAVE working file under
/// `work_dir`, named with a fresh UUID. The caller owns the returned path
/// and removes it after playback.
pub fn decode_to_work_file(container_path: &Path, work_dir: &Path) -> anyhow::Result<PathBuf> {
    let bytes = std::fs::read(container_path)
        .with_context(|| format!("Failed to read container {}", container_path.display()))?;

    let mut decoder = StreamDecoder::new();
    let pcm = decoder.feed(&bytes)?;
    let summary = decoder.finish()?;

    let out_path = work_dir.join(format!("decode-{}.wav", uuid::Uuid::new_v4()));
    let spec = hound::WavSpec {
        channels: summary.channels as u16,
        sample_rate: summary.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&out_path, spec)
        .with_context(|| format!("Failed to create working file {}", out_path.display()))?;
    for &s in &pcm {
        writer.write_sample(s)?;
    }
    writer.finalize()?;

    log::info!(
        "Decoded {} packets to {} ({} Hz, {} ch)",
        summary.packets_decoded,
        out_path.display(),
        summary.sample_rate,
        summary.channels,
    );
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{VoiceEncoder, frame_samples};
    use crate::audio::container::{write_header, write_packet};

    fn container_with_frames(sample_rate: u32, frames: u32) -> Vec<u8> {
        let mut encoder = VoiceEncoder::new(sample_rate, 1, 32000).unwrap();
        let mut out = write_header(sample_rate, 1, frames).to_vec();
        let frame = vec![0i16; encoder.frame_samples_total()];
        for _ in 0..frames {
            let packet = encoder.encode_frame(&frame).unwrap();
            write_packet(&packet, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn decodes_whole_container_in_one_feed() {
        let container = container_with_frames(16000, 4);
        let mut decoder = StreamDecoder::new();
        let pcm = decoder.feed(&container).unwrap();
        assert_eq!(pcm.len(), frame_samples(16000) * 4);

        let summary = decoder.finish().unwrap();
        assert_eq!(summary.packets_decoded, 4);
        assert_eq!(summary.sample_rate, 16000);
        assert_eq!(summary.channels, 1);
    }

    #[test]
    fn byte_at_a_time_feeding_decodes_identically() {
        let container = container_with_frames(24000, 3);

        let mut whole = StreamDecoder::new();
        let pcm_whole = whole.feed(&container).unwrap();

        let mut trickle = StreamDecoder::new();
        let mut pcm_trickle = Vec::new();
        for byte in &container {
            pcm_trickle.extend_from_slice(&trickle.feed(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(pcm_whole, pcm_trickle);
        assert_eq!(whole.finish().unwrap().packets_decoded, 3);
        assert_eq!(trickle.finish().unwrap().packets_decoded, 3);
    }

    #[test]
    fn header_count_is_not_trusted_as_a_loop_bound() {
        // Open-ended container: count says 0, but three packets follow.
        let mut container = container_with_frames(16000, 3);
        crate::audio::container::patch_packet_count(&mut container, 0);

        let mut decoder = StreamDecoder::new();
        let pcm = decoder.feed(&container).unwrap();
        assert_eq!(pcm.len(), frame_samples(16000) * 3);
        assert_eq!(decoder.finish().unwrap().packets_decoded, 3);
    }

    #[test]
    fn truncated_final_packet_stops_cleanly() {
        let container = container_with_frames(16000, 3);
        // Chop into the last packet.
        let cut = container.len() - 5;

        let mut decoder = StreamDecoder::new();
        let pcm = decoder.feed(&container[..cut]).unwrap();
        assert_eq!(pcm.len(), frame_samples(16000) * 2);

        let summary = decoder.finish().unwrap();
        assert_eq!(summary.packets_decoded, 2);
    }

    #[test]
    fn unsupported_header_fails_terminally() {
        let mut container = write_header(44100, 1, 0).to_vec();
        container.extend_from_slice(&[0u8; 32]);

        let mut decoder = StreamDecoder::new();
        assert!(matches!(
            decoder.feed(&container),
            Err(AudioError::UnsupportedFormat { sample_rate: 44100, .. })
        ));
    }

    #[test]
    fn short_or_packetless_streams_are_empty_or_truncated() {
        // Fewer than 9 bytes ever received.
        let mut decoder = StreamDecoder::new();
        decoder.feed(&[1, 2, 3]).unwrap();
        assert!(matches!(
            decoder.finish(),
            Err(AudioError::EmptyOrTruncatedContainer)
        ));

        // A valid header but zero whole packets.
        let mut decoder = StreamDecoder::new();
        decoder.feed(&write_header(16000, 1, 5)).unwrap();
        decoder.feed(&[4]).unwrap();
        assert!(matches!(
            decoder.finish(),
            Err(AudioError::EmptyOrTruncatedContainer)
        ));
    }

    #[test]
    fn round_trip_preserves_frame_count() {
        // Encode then decode; lossy samples, exact frame count.
        let frames = 25u32;
        let container = container_with_frames(48000, frames);
        let mut decoder = StreamDecoder::new();
        let pcm = decoder.feed(&container).unwrap();
        assert_eq!(pcm.len(), frame_samples(48000) * frames as usize);
    }
}
