//! Typed errors for the audio transport pipeline.

use thiserror::Error;

/// Errors raised by the container codec and the streaming pipelines.
///
/// `TruncatedPacket` is recoverable while the input stream is still live:
/// the caller buffers more bytes and retries. Every other variant is
/// terminal for the operation that raised it.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Fewer than the 9 header bytes were available.
    #[error("malformed container header: need 9 bytes, have {0}")]
    MalformedHeader(usize),

    /// Header carries a sample rate or channel count the codec cannot do.
    #[error("unsupported container format: {sample_rate} Hz, {channels} ch")]
    UnsupportedFormat { sample_rate: u32, channels: u8 },

    /// Packet payload would not fit behind a u16 length prefix.
    #[error("packet payload of {0} bytes exceeds the u16 length prefix")]
    PacketTooLarge(usize),

    /// Declared packet length exceeds the bytes buffered so far.
    #[error("truncated packet: need {needed} bytes, have {available}")]
    TruncatedPacket { needed: usize, available: usize },

    /// The input ended before a header and at least one packet were read.
    #[error("container is empty or truncated before the first packet")]
    EmptyOrTruncatedContainer,

    /// The encode source produced zero PCM bytes.
    #[error("audio source produced no data")]
    EmptySource,

    /// The encode source is not 16-bit linear PCM.
    #[error("unsupported source format: {0}")]
    UnsupportedSourceFormat(String),

    /// Capture file is below the hard floor duration.
    #[error("capture too short: {actual} bytes, need at least {expected}")]
    CaptureTooShort { expected: u64, actual: u64 },

    /// Every output device candidate failed to open.
    #[error("no audio device available (tried {0} candidates)")]
    NoDeviceAvailable(usize),

    #[error(transparent)]
    Codec(#[from] opus::Error),
}
