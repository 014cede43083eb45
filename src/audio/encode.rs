//! Streaming raw-audio to container transcoder.
//!
//! Bytes go in at whatever chunk boundaries the source produces; whole
//! container packets come out as soon as a full 20 ms frame has
//! accumulated. The same path serves a finite recording (the caller
//! patches the true packet count afterwards) and live synthesized speech
//! (the header keeps `packet_count = 0` and the peer reads to end of
//! stream).

use std::path::Path;

use anyhow::Context;

use super::codec::{self, VoiceEncoder};
use super::container;
use super::error::AudioError;

/// Where the source's sample format comes from.
pub enum SourceFormat {
    /// Byte stream opens with a RIFF/WAVE header (recorded file, or a
    /// synthesis stream that emits its header before the PCM).
    SelfDescribing,
    /// Bare PCM with a caller-supplied format.
    Raw { sample_rate: u32, channels: u16, bits_per_sample: u16 },
}

/// Format pulled from a WAVE header or supplied by the caller.
#[derive(Debug, Clone, Copy)]
struct SourceSpec {
    sample_rate: u32,
    channels: u16,
}

// ======================== WAVE header scan ========================

/// Incremental RIFF/WAVE header parse.
///
/// Returns `Ok(None)` while more bytes are needed, or the source spec and
/// the offset where PCM data begins. Works on partial buffers so a source
/// delivering one byte at a time parses identically to a whole file.
fn parse_wave_header(bytes: &[u8]) -> Result<Option<(SourceSpec, usize)>, AudioError> {
    if bytes.len() < 12 {
        return Ok(None);
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(AudioError::UnsupportedSourceFormat(
            "not a RIFF/WAVE stream".to_string(),
        ));
    }

    let mut pos = 12;
    let mut spec: Option<SourceSpec> = None;
    loop {
        if bytes.len() < pos + 8 {
            return Ok(None);
        }
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body = pos + 8;

        if id == b"data" {
            // The declared data size is ignored: live sources write a
            // placeholder here, so PCM is read until the stream ends.
            let spec = spec.ok_or_else(|| {
                AudioError::UnsupportedSourceFormat("data chunk before fmt chunk".to_string())
            })?;
            return Ok(Some((spec, body)));
        }

        if id == b"fmt " {
            if bytes.len() < body + 16 {
                return Ok(None);
            }
            let audio_format = u16::from_le_bytes([bytes[body], bytes[body + 1]]);
            let channels = u16::from_le_bytes([bytes[body + 2], bytes[body + 3]]);
            let sample_rate = u32::from_le_bytes([
                bytes[body + 4],
                bytes[body + 5],
                bytes[body + 6],
                bytes[body + 7],
            ]);
            let bits_per_sample = u16::from_le_bytes([bytes[body + 14], bytes[body + 15]]);

            if audio_format != 1 {
                return Err(AudioError::UnsupportedSourceFormat(format!(
                    "WAVE format tag {audio_format}, only linear PCM is handled"
                )));
            }
            check_pcm_spec(sample_rate, channels, bits_per_sample)?;
            spec = Some(SourceSpec { sample_rate, channels });
        }

        // Chunk bodies are padded to even length.
        let skip = size + (size & 1);
        match body.checked_add(skip) {
            Some(next) if next > pos => pos = next,
            _ => {
                return Err(AudioError::UnsupportedSourceFormat(
                    "corrupt WAVE chunk size".to_string(),
                ));
            }
        }
    }
}

fn check_pcm_spec(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Result<(), AudioError> {
    if bits_per_sample != 16 {
        return Err(AudioError::UnsupportedSourceFormat(format!(
            "{bits_per_sample}-bit samples, only 16-bit PCM is handled"
        )));
    }
    if channels == 0 || sample_rate == 0 {
        return Err(AudioError::UnsupportedSourceFormat(format!(
            "{channels} channels at {sample_rate} Hz"
        )));
    }
    Ok(())
}

// ======================== Downmix and resampling ========================

fn round_avg(sum: i32, n: i32) -> i16 {
    let avg = (f64::from(sum) / f64::from(n)).round() as i32;
    avg.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Average interleaved channels down to mono, rounding to nearest.
fn downmix_to_mono(frames: &[i16], channels: usize) -> Vec<i16> {
    if channels == 1 {
        return frames.to_vec();
    }
    frames
        .chunks_exact(channels)
        .map(|frame| round_avg(frame.iter().map(|&s| i32::from(s)).sum(), channels as i32))
        .collect()
}

/// 5-tap moving average followed by 2:1 decimation, for the one rate pair
/// (48 kHz native, 24 kHz target) where plain interpolation would alias.
struct HalfBandDecimator {
    hist: [i16; 4],
    take: bool,
}

impl HalfBandDecimator {
    fn new() -> Self {
        Self { hist: [0; 4], take: true }
    }

    fn push(&mut self, input: &[i16], out: &mut Vec<i16>) {
        for &x in input {
            let sum = self.hist.iter().map(|&h| i32::from(h)).sum::<i32>() + i32::from(x);
            if self.take {
                out.push(round_avg(sum, 5));
            }
            self.take = !self.take;
            self.hist = [self.hist[1], self.hist[2], self.hist[3], x];
        }
    }
}

/// Linear-interpolation resampler with exact rational positioning, so the
/// output is identical no matter how the input is chunked.
struct LinearResampler {
    src_rate: u64,
    dst_rate: u64,
    next_out: u64,
    base: u64,
    buf: Vec<i16>,
}

impl LinearResampler {
    fn new(src_rate: u32, dst_rate: u32) -> Self {
        Self {
            src_rate: u64::from(src_rate),
            dst_rate: u64::from(dst_rate),
            next_out: 0,
            base: 0,
            buf: Vec::new(),
        }
    }

    fn push(&mut self, input: &[i16], out: &mut Vec<i16>) {
        self.buf.extend_from_slice(input);
        let end = self.base + self.buf.len() as u64;

        loop {
            let num = self.next_out * self.src_rate;
            let idx = num / self.dst_rate;
            let frac = num % self.dst_rate;
            let last_needed = if frac == 0 { idx } else { idx + 1 };
            if last_needed >= end {
                break;
            }

            let s0 = i64::from(self.buf[(idx - self.base) as usize]);
            let sample = if frac == 0 {
                s0
            } else {
                let s1 = i64::from(self.buf[(idx + 1 - self.base) as usize]);
                s0 + (s1 - s0) * frac as i64 / self.dst_rate as i64
            };
            out.push(sample as i16);
            self.next_out += 1;
        }

        // Drop input that no future output sample can reference.
        let min_idx = self.next_out * self.src_rate / self.dst_rate;
        if min_idx > self.base {
            let drop = ((min_idx - self.base) as usize).min(self.buf.len());
            self.buf.drain(..drop);
            self.base += drop as u64;
        }
    }
}

enum Resampler {
    Passthrough,
    HalfBand(HalfBandDecimator),
    Linear(LinearResampler),
}

impl Resampler {
    fn for_rates(native: u32, target: u32) -> Self {
        if native == target {
            Resampler::Passthrough
        } else if native == 48000 && target == 24000 {
            Resampler::HalfBand(HalfBandDecimator::new())
        } else {
            Resampler::Linear(LinearResampler::new(native, target))
        }
    }

    fn push(&mut self, input: &[i16], out: &mut Vec<i16>) {
        match self {
            Resampler::Passthrough => out.extend_from_slice(input),
            Resampler::HalfBand(d) => d.push(input, out),
            Resampler::Linear(r) => r.push(input, out),
        }
    }
}

// ======================== Streaming encoder ========================

/// Per-source transcode state. Feed byte chunks of any size; container
/// bytes come back as packets complete. `finish` flushes the zero-padded
/// final partial frame.
pub struct StreamEncoder {
    target_rate: u32,
    bitrate: i32,
    spec: Option<SourceSpec>,
    encoder: Option<VoiceEncoder>,
    resampler: Resampler,
    header_pending: Vec<u8>,
    pcm_pending: Vec<u8>,
    interleaved: Vec<i16>,
    frame_buf: Vec<i16>,
    packets: u32,
    header_written: bool,
    received_any: bool,
}

impl StreamEncoder {
    /// * `format`      - self-describing stream or caller-supplied PCM spec
    /// * `target_rate` - codec rate, one of the mandated set
    /// * `bitrate`     - codec bitrate in bits/s
    pub fn new(format: SourceFormat, target_rate: u32, bitrate: i32) -> Result<Self, AudioError> {
        if !codec::is_supported_rate(target_rate) {
            return Err(AudioError::UnsupportedFormat { sample_rate: target_rate, channels: 1 });
        }

        let mut enc = Self {
            target_rate,
            bitrate,
            spec: None,
            encoder: None,
            resampler: Resampler::Passthrough,
            header_pending: Vec::new(),
            pcm_pending: Vec::new(),
            interleaved: Vec::new(),
            frame_buf: Vec::new(),
            packets: 0,
            header_written: false,
            received_any: false,
        };

        if let SourceFormat::Raw { sample_rate, channels, bits_per_sample } = format {
            check_pcm_spec(sample_rate, channels, bits_per_sample)?;
            enc.install_spec(SourceSpec { sample_rate, channels })?;
        }
        Ok(enc)
    }

    fn install_spec(&mut self, spec: SourceSpec) -> Result<(), AudioError> {
        self.encoder = Some(VoiceEncoder::new(self.target_rate, 1, self.bitrate)?);
        self.resampler = Resampler::for_rates(spec.sample_rate, self.target_rate);
        self.spec = Some(spec);
        Ok(())
    }

    /// Feed one chunk of source bytes; returns the container bytes that
    /// became complete. The container header (with `packet_count = 0`)
    /// leads the first returned chunk, so a live consumer can start
    /// parsing before any packet exists.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<u8>, AudioError> {
        if !bytes.is_empty() {
            self.received_any = true;
        }

        let mut out = Vec::new();
        if !self.header_written {
            out.extend_from_slice(&container::write_header(self.target_rate, 1, 0));
            self.header_written = true;
        }

        if self.spec.is_none() {
            self.header_pending.extend_from_slice(bytes);
            match parse_wave_header(&self.header_pending)? {
                None => return Ok(out),
                Some((spec, data_offset)) => {
                    self.install_spec(spec)?;
                    let tail = self.header_pending.split_off(data_offset);
                    self.pcm_pending = tail;
                    self.header_pending.clear();
                }
            }
        } else {
            self.pcm_pending.extend_from_slice(bytes);
        }

        self.drain_pcm(&mut out)?;
        Ok(out)
    }

    fn drain_pcm(&mut self, out: &mut Vec<u8>) -> Result<(), AudioError> {
        let spec = match self.spec {
            Some(s) => s,
            None => return Ok(()),
        };
        let channels = spec.channels as usize;

        // Bytes to interleaved samples, holding back an odd trailing byte.
        let whole = self.pcm_pending.len() / 2 * 2;
        for pair in self.pcm_pending[..whole].chunks_exact(2) {
            self.interleaved.push(i16::from_le_bytes([pair[0], pair[1]]));
        }
        self.pcm_pending.drain(..whole);

        // Whole channel-frames only; a split frame waits for its tail.
        let frames = self.interleaved.len() / channels;
        let mono = downmix_to_mono(&self.interleaved[..frames * channels], channels);
        self.interleaved.drain(..frames * channels);

        self.resampler.push(&mono, &mut self.frame_buf);
        self.emit_full_frames(out)
    }

    fn emit_full_frames(&mut self, out: &mut Vec<u8>) -> Result<(), AudioError> {
        let frame_len = codec::frame_samples(self.target_rate);
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };

        while self.frame_buf.len() >= frame_len {
            let packet = encoder.encode_frame(&self.frame_buf[..frame_len])?;
            container::write_packet(&packet, out)?;
            self.packets += 1;
            self.frame_buf.drain(..frame_len);
        }
        Ok(())
    }

    /// Flush the final partial frame (zero-padded) and close the encode.
    ///
    /// Returns the remaining container bytes and the total packet count,
    /// which the caller of a finite source patches into the header.
    pub fn finish(mut self) -> Result<(Vec<u8>, u32), AudioError> {
        if !self.received_any {
            return Err(AudioError::EmptySource);
        }
        if self.spec.is_none() {
            return Err(AudioError::UnsupportedSourceFormat(
                "stream ended inside the WAVE header".to_string(),
            ));
        }

        let mut out = Vec::new();
        let frame_len = codec::frame_samples(self.target_rate);
        if !self.frame_buf.is_empty() {
            self.frame_buf.resize(frame_len, 0);
            self.emit_full_frames(&mut out)?;
        }

        if self.packets == 0 {
            return Err(AudioError::EmptySource);
        }
        Ok((out, self.packets))
    }
}

/// Encode a finite WAVE file into a fully materialized container with the
/// true packet count in the header.
pub fn encode_wav_file(
    path: &Path,
    target_rate: u32,
    bitrate: i32,
) -> anyhow::Result<Vec<u8>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read source file {}", path.display()))?;

    let mut encoder = StreamEncoder::new(SourceFormat::SelfDescribing, target_rate, bitrate)?;
    let mut container_bytes = encoder.feed(&bytes)?;
    let (tail, packet_count) = encoder.finish()?;
    container_bytes.extend_from_slice(&tail);
    container::patch_packet_count(&mut container_bytes, packet_count);

    log::info!(
        "Encoded {}: {} bytes in, {} packets at {} Hz",
        path.display(),
        bytes.len(),
        packet_count,
        target_rate,
    );
    Ok(container_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::container::{HEADER_LEN, read_header, read_packet};
    use std::io::Cursor;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn count_packets(container: &[u8]) -> usize {
        let mut rest = &container[HEADER_LEN..];
        let mut n = 0;
        while !rest.is_empty() {
            let (_, consumed) = read_packet(rest).unwrap();
            rest = &rest[consumed..];
            n += 1;
        }
        n
    }

    #[test]
    fn one_second_of_48k_silence_yields_fifty_packets_at_24k() {
        let wav = wav_bytes(48000, 1, &vec![0i16; 48000]);

        let mut encoder =
            StreamEncoder::new(SourceFormat::SelfDescribing, 24000, 64000).unwrap();
        let mut out = encoder.feed(&wav).unwrap();
        let (tail, packet_count) = encoder.finish().unwrap();
        out.extend_from_slice(&tail);
        crate::audio::container::patch_packet_count(&mut out, packet_count);

        assert_eq!(packet_count, 50);
        assert_eq!(count_packets(&out), 50);

        let header = read_header(&out).unwrap();
        assert_eq!(header.sample_rate, 24000);
        assert_eq!(header.channels, 1);
        assert_eq!(header.packet_count, 50);
    }

    #[test]
    fn byte_at_a_time_feeding_matches_single_chunk() {
        // A tone, stereo at 32 kHz, so downmix and linear resampling both run.
        let samples: Vec<i16> = (0..32000u32)
            .flat_map(|i| {
                let s = ((i as f32 * 0.05).sin() * 12000.0) as i16;
                [s, s / 3]
            })
            .collect();
        let wav = wav_bytes(32000, 2, &samples);

        let mut whole = StreamEncoder::new(SourceFormat::SelfDescribing, 16000, 32000).unwrap();
        let mut out_whole = whole.feed(&wav).unwrap();
        let (tail, n_whole) = whole.finish().unwrap();
        out_whole.extend_from_slice(&tail);

        let mut trickle = StreamEncoder::new(SourceFormat::SelfDescribing, 16000, 32000).unwrap();
        let mut out_trickle = Vec::new();
        for byte in &wav {
            out_trickle.extend_from_slice(&trickle.feed(std::slice::from_ref(byte)).unwrap());
        }
        let (tail, n_trickle) = trickle.finish().unwrap();
        out_trickle.extend_from_slice(&tail);

        assert_eq!(n_whole, n_trickle);
        assert_eq!(out_whole, out_trickle);
    }

    #[test]
    fn header_leads_the_stream_with_zero_packet_count() {
        let wav = wav_bytes(24000, 1, &vec![0i16; 480]);
        let mut encoder =
            StreamEncoder::new(SourceFormat::SelfDescribing, 24000, 64000).unwrap();
        let out = encoder.feed(&wav[..4]).unwrap();

        // Even before the source header parses, the container header is out.
        let header = read_header(&out).unwrap();
        assert_eq!(header.packet_count, 0);
        assert_eq!(header.sample_rate, 24000);
    }

    #[test]
    fn partial_final_frame_is_zero_padded_into_one_packet() {
        // 30 ms at 16 kHz: one full frame plus half a frame.
        let wav = wav_bytes(16000, 1, &vec![100i16; 480]);
        let mut encoder =
            StreamEncoder::new(SourceFormat::SelfDescribing, 16000, 32000).unwrap();
        let mut out = encoder.feed(&wav).unwrap();
        let (tail, packet_count) = encoder.finish().unwrap();
        out.extend_from_slice(&tail);

        assert_eq!(packet_count, 2);
        assert_eq!(count_packets(&out), 2);
    }

    #[test]
    fn eight_bit_sources_are_rejected() {
        let mut bytes = wav_bytes(16000, 1, &[0i16; 64]);
        // Rewrite the fmt chunk's bits-per-sample field (offset 34 in a
        // canonical 44-byte header) to 8.
        bytes[34] = 8;
        let mut encoder =
            StreamEncoder::new(SourceFormat::SelfDescribing, 16000, 32000).unwrap();
        assert!(matches!(
            encoder.feed(&bytes),
            Err(AudioError::UnsupportedSourceFormat(_))
        ));
    }

    #[test]
    fn empty_source_is_an_error() {
        let encoder = StreamEncoder::new(SourceFormat::SelfDescribing, 24000, 64000).unwrap();
        assert!(matches!(encoder.finish(), Err(AudioError::EmptySource)));
    }

    #[test]
    fn raw_sources_take_a_caller_supplied_spec() {
        let mut encoder = StreamEncoder::new(
            SourceFormat::Raw { sample_rate: 16000, channels: 1, bits_per_sample: 16 },
            16000,
            32000,
        )
        .unwrap();

        let pcm: Vec<u8> = vec![0u8; 320 * 2]; // exactly one frame
        let out = encoder.feed(&pcm).unwrap();
        assert!(out.len() > HEADER_LEN);
        let (_, n) = encoder.finish().unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn raw_source_with_wrong_depth_is_rejected() {
        assert!(matches!(
            StreamEncoder::new(
                SourceFormat::Raw { sample_rate: 16000, channels: 1, bits_per_sample: 24 },
                16000,
                32000,
            ),
            Err(AudioError::UnsupportedSourceFormat(_))
        ));
    }

    #[test]
    fn unsupported_target_rate_is_rejected() {
        assert!(matches!(
            StreamEncoder::new(SourceFormat::SelfDescribing, 44100, 64000),
            Err(AudioError::UnsupportedFormat { sample_rate: 44100, .. })
        ));
    }

    #[test]
    fn downmix_averages_and_rounds() {
        assert_eq!(downmix_to_mono(&[100, 200], 2), vec![150]);
        assert_eq!(downmix_to_mono(&[1, 2], 2), vec![2]); // 1.5 rounds up
        assert_eq!(downmix_to_mono(&[-1, -2], 2), vec![-2]); // -1.5 rounds away
        assert_eq!(downmix_to_mono(&[i16::MAX, i16::MAX], 2), vec![i16::MAX]);
    }

    #[test]
    fn halfband_decimator_halves_and_settles_on_dc() {
        let mut d = HalfBandDecimator::new();
        let mut out = Vec::new();
        d.push(&vec![1000i16; 100], &mut out);
        assert_eq!(out.len(), 50);
        // After the 5-tap window fills, a DC input passes through exactly.
        assert!(out[4..].iter().all(|&s| s == 1000));
    }

    #[test]
    fn linear_resampler_is_chunking_invariant() {
        let input: Vec<i16> = (0..1000).map(|i| (i * 13 % 2000 - 1000) as i16).collect();

        let mut whole = LinearResampler::new(16000, 24000);
        let mut out_whole = Vec::new();
        whole.push(&input, &mut out_whole);

        let mut split = LinearResampler::new(16000, 24000);
        let mut out_split = Vec::new();
        for chunk in input.chunks(7) {
            split.push(chunk, &mut out_split);
        }

        assert_eq!(out_whole, out_split);
        // Roughly 1.5x as many samples out as in.
        assert!((out_whole.len() as i64 - 1500).abs() <= 2);
    }

    #[test]
    fn linear_resampler_preserves_dc() {
        let mut r = LinearResampler::new(12000, 16000);
        let mut out = Vec::new();
        r.push(&vec![-321i16; 1200], &mut out);
        assert!(!out.is_empty());
        assert!(out.iter().all(|&s| s == -321));
    }
}
