//! audio - capture, playback, and the container transcode pipelines.
//!
//! The container format, the streaming encoder/decoder pair, and the
//! hardware-facing playback and capture loops. The transforms are pure
//! and synchronous; only `play` and `record` touch devices.

pub mod alsa_device;
pub mod codec;
pub mod container;
pub mod cue;
pub mod decode;
pub mod effects;
pub mod encode;
pub mod error;
pub mod play;
pub mod record;
pub mod volume;

pub use error::AudioError;
pub use play::{PlaybackConfig, PlaybackEngine, PlaybackOutcome};
pub use volume::VolumeHandle;
