//! The framed container wrapping codec packets for transport.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! [sample_rate: u32][channels: u8][packet_count: u32]   9-byte header
//! [length: u16][payload: length bytes]                  repeated packets
//! ```
//!
//! A `packet_count` of 0 marks an open-ended container: the producer did
//! not know the count at header time and the consumer reads packets until
//! the byte source ends.

use bytes::{Buf, BufMut};

use super::codec;
use super::error::AudioError;

/// Header size in bytes: 4 (rate) + 1 (channels) + 4 (count).
pub const HEADER_LEN: usize = 9;

/// Length prefix size in bytes, one per packet.
pub const PACKET_PREFIX_LEN: usize = 2;

/// Parsed container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub sample_rate: u32,
    pub channels: u8,
    pub packet_count: u32,
}

/// Serialize a container header. Range validation is the caller's job.
pub fn write_header(sample_rate: u32, channels: u8, packet_count: u32) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    {
        let mut buf = &mut out[..];
        buf.put_u32_le(sample_rate);
        buf.put_u8(channels);
        buf.put_u32_le(packet_count);
    }
    out
}

/// Parse and validate a container header from the front of `bytes`.
pub fn read_header(bytes: &[u8]) -> Result<ContainerHeader, AudioError> {
    if bytes.len() < HEADER_LEN {
        return Err(AudioError::MalformedHeader(bytes.len()));
    }
    let mut buf = &bytes[..HEADER_LEN];
    let sample_rate = buf.get_u32_le();
    let channels = buf.get_u8();
    let packet_count = buf.get_u32_le();

    if !codec::is_supported_rate(sample_rate) || !(1..=2).contains(&channels) {
        return Err(AudioError::UnsupportedFormat { sample_rate, channels });
    }

    Ok(ContainerHeader { sample_rate, channels, packet_count })
}

/// Overwrite the `packet_count` field of an already-serialized container.
///
/// Used after a finite encode, once the true count is known.
pub fn patch_packet_count(container: &mut [u8], packet_count: u32) {
    debug_assert!(container.len() >= HEADER_LEN);
    container[5..HEADER_LEN].copy_from_slice(&packet_count.to_le_bytes());
}

/// Append one length-prefixed packet to `out`.
pub fn write_packet(payload: &[u8], out: &mut Vec<u8>) -> Result<(), AudioError> {
    if payload.len() > u16::MAX as usize {
        return Err(AudioError::PacketTooLarge(payload.len()));
    }
    out.put_u16_le(payload.len() as u16);
    out.extend_from_slice(payload);
    Ok(())
}

/// Read one packet from the front of `bytes`.
///
/// Returns the payload and the number of bytes consumed (prefix included).
/// Fails with `TruncatedPacket` when fewer bytes are buffered than the
/// prefix declares; on a live stream the caller buffers more and retries.
pub fn read_packet(bytes: &[u8]) -> Result<(&[u8], usize), AudioError> {
    if bytes.len() < PACKET_PREFIX_LEN {
        return Err(AudioError::TruncatedPacket {
            needed: PACKET_PREFIX_LEN,
            available: bytes.len(),
        });
    }
    let len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let total = PACKET_PREFIX_LEN + len;
    if bytes.len() < total {
        return Err(AudioError::TruncatedPacket {
            needed: total,
            available: bytes.len(),
        });
    }
    Ok((&bytes[PACKET_PREFIX_LEN..total], total))
}
