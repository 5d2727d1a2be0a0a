//! # Controller Module
//!
//! The actuator core: channel state, shaping, pump blending, and the
//! input-rate watchdog.
//!
//! This module handles:
//! - Translating capped/deadzoned input values into servo angles and
//!   pump throttle through the PWM driver capability
//! - The SafeHold/ActiveControl safety state machine
//! - The background watchdog task observing the input rate

pub mod actuator;
pub mod monitor;

pub use actuator::{ActuatorController, ControlState};
pub use monitor::SafetyMonitor;
