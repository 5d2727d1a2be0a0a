//! # Gamepad State Module
//!
//! Normalized snapshot of every gamepad input, plus the raw-to-normalized
//! conversions applied by the event reader.
//!
//! ## Normalization
//!
//! - Sticks: raw 0..65536 maps linearly to -1..1, with a symmetric dead
//!   zone around center that collapses small values to exactly 0
//! - Triggers: raw 0..1024 maps linearly to 0..1
//! - D-pad: -1, 0, or 1 per axis

/// Full-scale raw stick value (16-bit axes).
pub const STICK_MAX: i32 = 65536;

/// Full-scale raw trigger value.
pub const TRIGGER_MAX: i32 = 1024;

/// Raw counts around stick center treated as zero.
pub const CENTER_TOLERANCE: i32 = 350;

/// One coherent snapshot of the gamepad.
///
/// `Default` is the neutral state: sticks and triggers at zero, no
/// buttons held, d-pad centered.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GamepadState {
    /// Sticks, normalized to [-1, 1].
    pub left_stick_x: f64,
    pub left_stick_y: f64,
    pub right_stick_x: f64,
    pub right_stick_y: f64,

    /// Triggers, normalized to [0, 1].
    pub left_trigger: f64,
    pub right_trigger: f64,

    /// Face buttons.
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,

    /// Shoulder buttons.
    pub left_bumper: bool,
    pub right_bumper: bool,

    /// Menu buttons.
    pub back: bool,
    pub start: bool,

    /// D-pad axes: -1 (left/up), 0, or 1 (right/down).
    pub dpad_x: i8,
    pub dpad_y: i8,
}

/// Normalize a raw 16-bit stick reading to [-1, 1] with the center
/// dead zone applied.
pub(super) fn normalize_stick(raw: i32) -> f64 {
    let half_scale = f64::from(STICK_MAX) / 2.0;
    let value = f64::from(raw) / half_scale - 1.0;
    if value.abs() < f64::from(CENTER_TOLERANCE) / half_scale {
        0.0
    } else {
        value
    }
}

/// Normalize a raw trigger reading to [0, 1].
pub(super) fn normalize_trigger(raw: i32) -> f64 {
    (f64::from(raw) / f64::from(TRIGGER_MAX)).clamp(0.0, 1.0)
}

/// Normalize a raw d-pad reading to {-1, 0, 1}.
pub(super) fn normalize_dpad(raw: i32) -> i8 {
    raw.clamp(-1, 1) as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stick_endpoints() {
        assert_eq!(normalize_stick(0), -1.0);
        assert_eq!(normalize_stick(STICK_MAX / 2), 0.0);
        assert_eq!(normalize_stick(STICK_MAX), 1.0);
    }

    #[test]
    fn test_stick_dead_zone_collapses_to_zero() {
        // Just inside the tolerance band around center
        assert_eq!(normalize_stick(STICK_MAX / 2 + CENTER_TOLERANCE - 1), 0.0);
        assert_eq!(normalize_stick(STICK_MAX / 2 - CENTER_TOLERANCE + 1), 0.0);

        // Just outside the band the linear value passes through
        let outside = normalize_stick(STICK_MAX / 2 + CENTER_TOLERANCE);
        assert!(outside > 0.0);
    }

    #[test]
    fn test_trigger_range() {
        assert_eq!(normalize_trigger(0), 0.0);
        assert_eq!(normalize_trigger(TRIGGER_MAX / 2), 0.5);
        assert_eq!(normalize_trigger(TRIGGER_MAX), 1.0);
        // Readings past full scale clamp rather than overshoot
        assert_eq!(normalize_trigger(TRIGGER_MAX * 2), 1.0);
    }

    #[test]
    fn test_dpad_values() {
        assert_eq!(normalize_dpad(-1), -1);
        assert_eq!(normalize_dpad(0), 0);
        assert_eq!(normalize_dpad(1), 1);
        assert_eq!(normalize_dpad(7), 1);
    }

    #[test]
    fn test_default_state_is_neutral() {
        let state = GamepadState::default();
        assert_eq!(state.left_stick_x, 0.0);
        assert_eq!(state.right_trigger, 0.0);
        assert!(!state.a);
        assert_eq!(state.dpad_y, 0);
    }
}
