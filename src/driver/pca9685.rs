//! # PCA9685 Driver Module
//!
//! Real-hardware implementation of [`PwmDriver`](super::PwmDriver) for the
//! 16-channel PCA9685 PWM hat over I2C.
//!
//! ## Pulse Mapping
//!
//! The chip runs at 50 Hz (20 ms frame, 4096 counts per frame):
//!
//! - Angle 0..180 degrees maps linearly to a 500..2500 us pulse
//! - Throttle -1..1 maps linearly to a 1000..2000 us pulse (standard ESC)

use rppal::i2c::I2c;
use std::thread;
use std::time::Duration;
use tracing::info;

use super::{clamp_angle, clamp_throttle, PwmDriver};
use crate::error::{Result, RigError};

/// Default I2C address of the PCA9685 hat.
pub const PCA9685_ADDRESS: u16 = 0x40;

/// PWM output frequency in Hz.
pub const PWM_FREQUENCY_HZ: f64 = 50.0;

/// Internal oscillator frequency in Hz.
const OSCILLATOR_HZ: f64 = 25_000_000.0;

/// Counts per PWM frame (12-bit counter).
const COUNTS_PER_FRAME: f64 = 4096.0;

// Register map
const REG_MODE1: u8 = 0x00;
const REG_MODE2: u8 = 0x01;
const REG_PRESCALE: u8 = 0xFE;
const REG_LED0_ON_L: u8 = 0x06;

// MODE1 bits
const MODE1_RESTART: u8 = 0x80;
const MODE1_AUTO_INCREMENT: u8 = 0x20;
const MODE1_SLEEP: u8 = 0x10;

// MODE2 bits
const MODE2_TOTEM_POLE: u8 = 0x04;

/// Servo pulse range in microseconds.
const SERVO_PULSE_MIN_US: f64 = 500.0;
const SERVO_PULSE_MAX_US: f64 = 2500.0;

/// ESC pulse range in microseconds.
const ESC_PULSE_MIN_US: f64 = 1000.0;
const ESC_PULSE_MAX_US: f64 = 2000.0;

/// Pulse width for a servo angle in degrees.
fn pulse_us_for_angle(degrees: f64) -> f64 {
    let span = SERVO_PULSE_MAX_US - SERVO_PULSE_MIN_US;
    SERVO_PULSE_MIN_US + degrees / 180.0 * span
}

/// Pulse width for an ESC throttle value.
fn pulse_us_for_throttle(value: f64) -> f64 {
    let center = (ESC_PULSE_MIN_US + ESC_PULSE_MAX_US) / 2.0;
    let half_span = (ESC_PULSE_MAX_US - ESC_PULSE_MIN_US) / 2.0;
    center + value * half_span
}

/// Off-count for a pulse width at the configured frame rate.
fn counts_for_pulse_us(pulse_us: f64) -> u16 {
    let frame_us = 1_000_000.0 / PWM_FREQUENCY_HZ;
    let counts = pulse_us / frame_us * COUNTS_PER_FRAME;
    counts.round().clamp(0.0, COUNTS_PER_FRAME - 1.0) as u16
}

/// PCA9685 PWM hat handle
pub struct Pca9685Driver {
    i2c: I2c,
    slots: usize,
}

impl std::fmt::Debug for Pca9685Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pca9685Driver")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl Pca9685Driver {
    /// Open the PWM hat at the default I2C address and configure it for
    /// 50 Hz servo output.
    ///
    /// # Errors
    ///
    /// Returns `Driver` error if the I2C bus cannot be opened or the chip
    /// does not respond.
    pub fn new(slots: usize) -> Result<Self> {
        Self::with_address(slots, PCA9685_ADDRESS)
    }

    /// Open the PWM hat at a specific I2C address.
    pub fn with_address(slots: usize, address: u16) -> Result<Self> {
        let mut i2c = I2c::new().map_err(i2c_err)?;
        i2c.set_slave_address(address).map_err(i2c_err)?;

        let mut driver = Self { i2c, slots };
        driver.configure()?;
        info!(
            "PCA9685 PWM hat initialized at 0x{:02x} ({} slots, {} Hz)",
            address, slots, PWM_FREQUENCY_HZ
        );
        Ok(driver)
    }

    /// Put the chip to sleep, program the 50 Hz prescaler, then wake and
    /// restart with register auto-increment enabled.
    fn configure(&mut self) -> Result<()> {
        let prescale =
            (OSCILLATOR_HZ / (COUNTS_PER_FRAME * PWM_FREQUENCY_HZ)).round() as u8 - 1;

        self.write_register(REG_MODE2, MODE2_TOTEM_POLE)?;
        self.write_register(REG_MODE1, MODE1_SLEEP)?;
        self.write_register(REG_PRESCALE, prescale)?;
        self.write_register(REG_MODE1, MODE1_AUTO_INCREMENT)?;
        // Oscillator needs 500 us to stabilize after leaving sleep
        thread::sleep(Duration::from_millis(1));
        self.write_register(REG_MODE1, MODE1_RESTART | MODE1_AUTO_INCREMENT)?;
        Ok(())
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.i2c
            .smbus_write_byte(register, value)
            .map_err(i2c_err)?;
        Ok(())
    }

    fn set_pulse(&mut self, slot: usize, pulse_us: f64) -> Result<()> {
        if slot >= self.slots {
            return Err(RigError::Driver(format!(
                "slot {} out of range (0 to {})",
                slot, self.slots
            )));
        }

        let off = counts_for_pulse_us(pulse_us);
        let register = REG_LED0_ON_L + (slot as u8) * 4;
        // ON at count 0, OFF at the pulse width; auto-increment covers
        // the four ON_L/ON_H/OFF_L/OFF_H registers in one write.
        let buffer = [register, 0x00, 0x00, (off & 0xFF) as u8, (off >> 8) as u8];
        self.i2c.write(&buffer).map_err(i2c_err)?;
        Ok(())
    }
}

impl PwmDriver for Pca9685Driver {
    fn set_angle(&mut self, slot: usize, degrees: f64) -> Result<()> {
        let clamped = clamp_angle(degrees);
        self.set_pulse(slot, pulse_us_for_angle(clamped))
    }

    fn set_throttle(&mut self, slot: usize, value: f64) -> Result<()> {
        let clamped = clamp_throttle(value);
        self.set_pulse(slot, pulse_us_for_throttle(clamped))
    }
}

fn i2c_err(e: rppal::i2c::Error) -> RigError {
    RigError::Driver(format!("I2C error: {}", e))
}
