//! # Rig Bridge Library
//!
//! Drive a PWM servo/pump actuator rig with an Xbox controller.
//!
//! This library translates normalized gamepad axes into hardware PWM
//! angle/throttle commands, with deadzone and gamma shaping per channel,
//! proportional pump blending, and an input-rate watchdog that holds the
//! rig in a safe neutral state whenever control input goes stale.

pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod gamepad;
