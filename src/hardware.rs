//! Physical collaborators: the amplifier gate and the user controls.
//!
//! These are seams, not drivers. The playback and capture loops only ever
//! see the traits; the sysfs implementations below cover boards that wire
//! the amplifier enable pin and the push button through GPIO value files,
//! and the null implementations cover headless development machines.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

/// Enable/disable control for the audio output stage. Toggled around
/// playback so the speaker is only powered while a clip is actually
/// being written.
pub trait AmplifierGate: Send + Sync {
    fn set_enabled(&self, on: bool) -> Result<()>;
}

/// Debounced "is the button held" signal. Debouncing happens upstream
/// (hardware or kernel); the audio loops just poll the level every
/// iteration.
pub trait ControlButton: Send + Sync {
    fn is_asserted(&self) -> bool;
}

/// Accumulated rotation since the last poll, in detents. Positive is
/// clockwise.
pub trait RotaryDial: Send + Sync {
    fn take_delta(&self) -> i32;
}

// ======================== sysfs GPIO ========================

/// A GPIO driven through its sysfs value file.
pub struct GpioLine {
    value_path: PathBuf,
}

impl GpioLine {
    pub fn new(value_path: impl Into<PathBuf>) -> Self {
        Self { value_path: value_path.into() }
    }
}

impl AmplifierGate for GpioLine {
    fn set_enabled(&self, on: bool) -> Result<()> {
        let value = if on { "1" } else { "0" };
        std::fs::write(&self.value_path, value).with_context(|| {
            format!("Failed to write {} to {}", value, self.value_path.display())
        })
    }
}

/// A push button read through a sysfs GPIO value file.
pub struct GpioButton {
    value_path: PathBuf,
    active_low: bool,
}

impl GpioButton {
    pub fn new(value_path: impl Into<PathBuf>, active_low: bool) -> Self {
        Self { value_path: value_path.into(), active_low }
    }
}

impl ControlButton for GpioButton {
    fn is_asserted(&self) -> bool {
        match std::fs::read_to_string(&self.value_path) {
            Ok(raw) => {
                let high = raw.trim() == "1";
                high != self.active_low
            }
            Err(e) => {
                // A missing or unreadable line reads as released; a stuck
                // diagnostic is better than a crashed loop.
                log::warn!("Failed to read button {}: {}", self.value_path.display(), e);
                false
            }
        }
    }
}

// ======================== Null implementations ========================

/// Amplifier gate for boards without one; logs transitions only.
pub struct NullAmplifier;

impl AmplifierGate for NullAmplifier {
    fn set_enabled(&self, on: bool) -> Result<()> {
        log::debug!("Amplifier gate (null): {}", if on { "on" } else { "off" });
        Ok(())
    }
}

/// Rotary dial that never moves, for boards without one.
pub struct NullDial;

impl RotaryDial for NullDial {
    fn take_delta(&self) -> i32 {
        0
    }
}

/// In-memory button, used by tests and by programmatic stop requests.
#[derive(Default)]
pub struct SoftButton(AtomicBool);

impl SoftButton {
    pub fn press(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl ControlButton for SoftButton {
    fn is_asserted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
