//! # PWM Driver Module
//!
//! Hardware driver capability for the actuator rig.
//!
//! The core talks to hardware through exactly two operations per output
//! slot: `set_angle` for servo joints and `set_throttle` for the pump ESC.
//! Both implementations clamp identically, so the controller runs
//! unmodified against either:
//!
//! - [`Pca9685Driver`](pca9685::Pca9685Driver) — the real 16-channel PWM
//!   hat over I2C
//! - [`SimulatedDriver`] — records and logs writes instead of driving
//!   hardware

pub mod pca9685;

use tracing::debug;

use crate::error::{Result, RigError};

/// Servo angle range in degrees.
pub const ANGLE_MIN: f64 = 0.0;
/// Servo angle range in degrees.
pub const ANGLE_MAX: f64 = 180.0;

/// ESC throttle range.
pub const THROTTLE_MIN: f64 = -1.0;
/// ESC throttle range.
pub const THROTTLE_MAX: f64 = 1.0;

/// Clamp an angle command to the servo range.
#[must_use]
pub fn clamp_angle(degrees: f64) -> f64 {
    degrees.clamp(ANGLE_MIN, ANGLE_MAX)
}

/// Clamp a throttle command to the ESC range.
#[must_use]
pub fn clamp_throttle(value: f64) -> f64 {
    value.clamp(THROTTLE_MIN, THROTTLE_MAX)
}

/// Trait for PWM output operations
///
/// Implementations must clamp angles to [0, 180] and throttle to [-1, 1].
pub trait PwmDriver: Send {
    /// Drive the servo on `slot` to `degrees`.
    fn set_angle(&mut self, slot: usize, degrees: f64) -> Result<()>;

    /// Drive the continuous servo / ESC on `slot` at `value`.
    fn set_throttle(&mut self, slot: usize, value: f64) -> Result<()>;
}

/// Logging stand-in for the PWM hat.
///
/// Accepts the same two operations as the hardware driver, clamps
/// identically, and records the last written value per slot instead of
/// driving hardware. Used in simulation mode and by tests.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    angles: Vec<Option<f64>>,
    throttles: Vec<Option<f64>>,
}

impl SimulatedDriver {
    /// Create a simulated driver with `slots` output slots.
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            angles: vec![None; slots],
            throttles: vec![None; slots],
        }
    }

    /// Last angle written to `slot`, if any.
    #[must_use]
    pub fn angle(&self, slot: usize) -> Option<f64> {
        self.angles.get(slot).copied().flatten()
    }

    /// Last throttle written to `slot`, if any.
    #[must_use]
    pub fn throttle(&self, slot: usize) -> Option<f64> {
        self.throttles.get(slot).copied().flatten()
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.angles.len() {
            return Err(RigError::Driver(format!(
                "slot {} out of range (0 to {})",
                slot,
                self.angles.len()
            )));
        }
        Ok(())
    }
}

impl PwmDriver for SimulatedDriver {
    fn set_angle(&mut self, slot: usize, degrees: f64) -> Result<()> {
        self.check_slot(slot)?;
        let clamped = clamp_angle(degrees);
        self.angles[slot] = Some(clamped);
        debug!("[SIMULATION] slot {} angle set to {:.1} degrees", slot, clamped);
        Ok(())
    }

    fn set_throttle(&mut self, slot: usize, value: f64) -> Result<()> {
        self.check_slot(slot)?;
        let clamped = clamp_throttle(value);
        self.throttles[slot] = Some(clamped);
        debug!("[SIMULATION] slot {} throttle set to {:.2}", slot, clamped);
        Ok(())
    }
}
