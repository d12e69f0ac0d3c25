// Conversions between the linear [0.0, 1.0] contract and integer-scaled
// native volumes (PulseAudio's pa_volume_t, where NORM is 100%).

use super::Volume;

/// Native value for 100% (`PA_VOLUME_NORM`).
pub const NORM: u32 = 0x10000;

/// Largest step a reading can be off by after a write.
pub const STEP: f64 = 1.0 / NORM as f64;

/// Nearest native step for `level`.
pub fn to_native(level: Volume) -> u32 {
    (level.get() * NORM as f64).round() as u32
}

/// Linear level for a native value. Values above NORM (software boost)
/// report as full volume.
pub fn from_native(raw: u32) -> Volume {
    Volume::clamped(raw as f64 / NORM as f64)
}

/// Level as it will read back after being written natively.
pub fn quantize(level: Volume) -> Volume {
    from_native(to_native(level))
}
