//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! A configuration document has three parts:
//!
//! - `[rig]` — controller-wide settings (output slot count, watchdog rate
//!   threshold, deadzone, pump mode, simulation switch)
//! - `[gamepad]` — input device settings (device name match, reconnect policy)
//! - `[channels.<name>]` — one entry per output slot, either an `angle`
//!   (servo joint) or a `pump` (variable-speed ESC) channel
//!
//! Channel entries are deserialized with every field optional and then
//! validated exhaustively, so a broken document reports the offending field
//! and channel by name instead of a generic serde error. Validation is
//! atomic: the first violation aborts the load and nothing is applied.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::{Result, RigError};

/// Slot count of the PCA9685 PWM hat.
pub const MAX_PWM_CHANNELS: usize = 16;

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    pub rig: RigSettings,
    pub gamepad: GamepadSettings,
    pub channels: ChannelSet,
}

/// Rig-wide settings from the `[rig]` table
#[derive(Debug, Deserialize, Clone)]
pub struct RigSettings {
    /// Number of output slots driven by the PWM hat (1..=16).
    #[serde(default = "default_pwm_channels")]
    pub pwm_channels: usize,

    /// Minimum input rate needed to keep the rig active. 0 disables
    /// rate checking entirely.
    #[serde(default = "default_rate_threshold_hz")]
    pub rate_threshold_hz: f64,

    /// Deadzone as a percentage of the input range.
    #[serde(default = "default_deadzone_percent")]
    pub deadzone_percent: f64,

    /// Skip shaping of designated track channels.
    #[serde(default)]
    pub tracks_disabled: bool,

    /// Drive the pump proportionally to summed angle-channel demand
    /// instead of at a static speed.
    #[serde(default = "default_pump_variable")]
    pub pump_variable: bool,

    /// Use the logging driver instead of real hardware.
    #[serde(default)]
    pub simulate: bool,
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            pwm_channels: default_pwm_channels(),
            rate_threshold_hz: default_rate_threshold_hz(),
            deadzone_percent: default_deadzone_percent(),
            tracks_disabled: false,
            pump_variable: default_pump_variable(),
            simulate: false,
        }
    }
}

/// Input device settings from the `[gamepad]` table
#[derive(Debug, Deserialize, Clone)]
pub struct GamepadSettings {
    /// Case-insensitive substring matched against evdev device names.
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Maximum reconnect attempts after a device I/O failure.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Delay between reconnect attempts.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for GamepadSettings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

// Default value functions
fn default_pwm_channels() -> usize { MAX_PWM_CHANNELS }
fn default_rate_threshold_hz() -> f64 { 10.0 }
fn default_deadzone_percent() -> f64 { 20.0 }
fn default_pump_variable() -> bool { true }

fn default_device_name() -> String { "xbox".to_string() }
fn default_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_backoff_ms() -> u64 { 3000 }

/// An angle (servo joint) channel descriptor.
///
/// Shaping applies gamma correction and linear scaling per polarity:
/// positive inputs use `gamma_positive`/`multiplier_positive`, negative
/// inputs the negative pair.
#[derive(Debug, Clone)]
pub struct AngleChannel {
    pub name: String,
    /// Index into the raw input vector, if this joint is driven directly.
    pub input: Option<usize>,
    /// Target hardware slot.
    pub output: usize,
    /// Direction multiplier, -1.0 or 1.0.
    pub direction: f64,
    /// Center offset in degrees, added to the 90-degree neutral.
    pub offset: f64,
    pub multiplier_positive: f64,
    pub multiplier_negative: f64,
    pub gamma_positive: f64,
    pub gamma_negative: f64,
    /// Whether this joint's demand feeds the proportional pump sum.
    pub affects_pump: bool,
    /// Designated track channel, skipped while tracks are disabled.
    pub track: bool,
}

impl AngleChannel {
    /// Neutral servo angle for this channel in degrees.
    #[must_use]
    pub fn center(&self) -> f64 {
        90.0 + self.offset
    }
}

/// A pump (variable-speed ESC) channel descriptor.
#[derive(Debug, Clone)]
pub struct PumpChannel {
    pub name: String,
    /// Optional direct throttle input; without it the pump runs at
    /// `idle` plus the blended variable demand.
    pub input: Option<usize>,
    pub output: usize,
    pub direction: f64,
    pub offset: f64,
    /// Base throttle in [-1, 1].
    pub idle: f64,
    /// Demand-to-throttle gain in (0, 10].
    pub multiplier: f64,
}

/// Tagged per-channel descriptor.
#[derive(Debug, Clone)]
pub enum ChannelConfig {
    Angle(AngleChannel),
    Pump(PumpChannel),
}

impl ChannelConfig {
    /// Channel name from the configuration document.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ChannelConfig::Angle(c) => &c.name,
            ChannelConfig::Pump(c) => &c.name,
        }
    }

    /// Target hardware slot.
    #[must_use]
    pub fn output(&self) -> usize {
        match self {
            ChannelConfig::Angle(c) => c.output,
            ChannelConfig::Pump(c) => c.output,
        }
    }

    /// Index into the raw input vector, if configured.
    #[must_use]
    pub fn input(&self) -> Option<usize> {
        match self {
            ChannelConfig::Angle(c) => c.input,
            ChannelConfig::Pump(c) => c.input,
        }
    }

    /// Whether this channel's demand feeds the pump sum.
    #[must_use]
    pub fn affects_pump(&self) -> bool {
        match self {
            ChannelConfig::Angle(c) => c.affects_pump,
            ChannelConfig::Pump(_) => false,
        }
    }
}

/// The validated set of channel descriptors.
#[derive(Debug, Clone)]
pub struct ChannelSet {
    channels: Vec<ChannelConfig>,
    num_inputs: usize,
    num_outputs: usize,
}

impl ChannelSet {
    /// Number of distinct declared input indices.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Number of hardware output slots.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// All channels, in document (name) order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter()
    }

    /// All angle channels, in document (name) order.
    pub fn angle_channels(&self) -> impl Iterator<Item = &AngleChannel> {
        self.channels.iter().filter_map(|c| match c {
            ChannelConfig::Angle(a) => Some(a),
            ChannelConfig::Pump(_) => None,
        })
    }

    /// The pump channel, if one is configured.
    #[must_use]
    pub fn pump(&self) -> Option<&PumpChannel> {
        self.channels.iter().find_map(|c| match c {
            ChannelConfig::Pump(p) => Some(p),
            ChannelConfig::Angle(_) => None,
        })
    }

    /// Whether any angle channel is configured.
    #[must_use]
    pub fn has_angles(&self) -> bool {
        self.channels
            .iter()
            .any(|c| matches!(c, ChannelConfig::Angle(_)))
    }

    /// Human-readable input-to-channel assignment lines, one per input
    /// index, for startup logging.
    #[must_use]
    pub fn input_mappings(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.num_inputs);
        for input in 0..self.num_inputs {
            let assigned: Vec<String> = self
                .channels
                .iter()
                .filter(|c| c.input() == Some(input))
                .map(|c| format!("{} (PWM output {})", c.name(), c.output()))
                .collect();
            if assigned.is_empty() {
                lines.push(format!("Input {}: not assigned", input));
            } else {
                lines.push(format!("Input {}: {}", input, assigned.join(", ")));
            }
        }
        lines
    }
}

/// Raw `input_channel` value: an index or the `"none"` sentinel.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum RawInput {
    Index(i64),
    Sentinel(String),
}

/// Channel entry as written in the document, before validation.
#[derive(Debug, Deserialize, Clone)]
struct RawChannel {
    #[serde(rename = "type")]
    kind: Option<String>,
    input_channel: Option<RawInput>,
    output_channel: Option<i64>,
    direction: Option<i64>,
    offset: Option<f64>,

    // angle-specific
    multiplier_positive: Option<f64>,
    multiplier_negative: Option<f64>,
    gamma_positive: Option<f64>,
    gamma_negative: Option<f64>,
    affects_pump: Option<bool>,
    #[serde(default)]
    track: bool,

    // pump-specific
    idle: Option<f64>,
    multiplier: Option<f64>,
}

/// Document structure as deserialized, before validation.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    rig: RigSettings,
    #[serde(default)]
    gamepad: GamepadSettings,
    #[serde(default)]
    channels: BTreeMap<String, RawChannel>,
}

fn channel_err(channel: &str, message: impl Into<String>) -> RigError {
    RigError::ChannelConfig {
        channel: channel.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load and validate a configuration document.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails, or
    /// any setting or channel entry fails validation.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rig_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// println!("{} inputs in use", config.channels.num_inputs());
    /// # Ok::<(), rig_bridge::error::RigError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate a configuration document from a string.
    pub fn parse(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents)?;
        raw.rig.validate()?;
        raw.gamepad.validate()?;
        let channels = validate_channels(&raw.channels, raw.rig.pwm_channels)?;
        Ok(Config {
            rig: raw.rig,
            gamepad: raw.gamepad,
            channels,
        })
    }
}

impl RigSettings {
    fn validate(&self) -> Result<()> {
        if self.pwm_channels == 0 || self.pwm_channels > MAX_PWM_CHANNELS {
            return Err(RigError::Config(format!(
                "pwm_channels must be between 1 and {}",
                MAX_PWM_CHANNELS
            )));
        }
        if !self.rate_threshold_hz.is_finite() || self.rate_threshold_hz < 0.0 {
            return Err(RigError::Config(
                "rate_threshold_hz must be a non-negative number".to_string(),
            ));
        }
        if !self.deadzone_percent.is_finite()
            || self.deadzone_percent < 0.0
            || self.deadzone_percent > 100.0
        {
            return Err(RigError::Config(
                "deadzone_percent must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }
}

impl GamepadSettings {
    fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(RigError::Config(
                "gamepad device_name cannot be empty".to_string(),
            ));
        }
        if self.reconnect_attempts == 0 {
            return Err(RigError::Config(
                "reconnect_attempts must be greater than 0".to_string(),
            ));
        }
        if self.reconnect_backoff_ms == 0 || self.reconnect_backoff_ms > 60000 {
            return Err(RigError::Config(
                "reconnect_backoff_ms must be between 1 and 60000".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve a raw `input_channel` entry to `Some(index)` or `None` for the
/// sentinel. Range checking happens separately so the error can name the
/// offending value.
fn resolve_input(channel: &str, raw: &RawInput) -> Result<Option<i64>> {
    match raw {
        RawInput::Index(idx) => Ok(Some(*idx)),
        RawInput::Sentinel(s) if s.eq_ignore_ascii_case("none") => Ok(None),
        RawInput::Sentinel(s) => Err(channel_err(
            channel,
            format!("invalid input_channel '{}' (expected an index or \"none\")", s),
        )),
    }
}

/// Count the distinct integer input indices declared across all channels.
fn count_inputs(raw: &BTreeMap<String, RawChannel>) -> usize {
    let mut indices = BTreeSet::new();
    for entry in raw.values() {
        if let Some(RawInput::Index(idx)) = &entry.input_channel {
            indices.insert(*idx);
        }
    }
    indices.len()
}

/// Validate the whole channel table and build the typed descriptor set.
///
/// Checks run in document (name) order and stop at the first violation,
/// so a failed validation never partially applies.
fn validate_channels(
    raw: &BTreeMap<String, RawChannel>,
    num_outputs: usize,
) -> Result<ChannelSet> {
    let num_inputs = count_inputs(raw);
    let mut channels = Vec::with_capacity(raw.len());
    let mut used_outputs = BTreeSet::new();
    let mut pump_seen: Option<&str> = None;

    for (name, entry) in raw {
        let kind = entry
            .kind
            .as_deref()
            .ok_or_else(|| channel_err(name, "missing 'type'"))?;
        if kind != "angle" && kind != "pump" {
            return Err(channel_err(name, format!("invalid type '{}'", kind)));
        }

        let raw_input = entry
            .input_channel
            .as_ref()
            .ok_or_else(|| channel_err(name, "missing 'input_channel'"))?;
        let input = match resolve_input(name, raw_input)? {
            Some(idx) => {
                if idx < 0 || idx as usize >= num_inputs {
                    return Err(channel_err(
                        name,
                        format!("input_channel {} out of range (0 to {})", idx, num_inputs),
                    ));
                }
                Some(idx as usize)
            }
            None => None,
        };

        let output = entry
            .output_channel
            .ok_or_else(|| channel_err(name, "missing 'output_channel'"))?;
        if output < 0 || output as usize >= num_outputs {
            return Err(channel_err(
                name,
                format!("output_channel {} out of range (0 to {})", output, num_outputs),
            ));
        }
        let output = output as usize;
        if !used_outputs.insert(output) {
            return Err(channel_err(
                name,
                format!("output_channel {} is already in use", output),
            ));
        }

        let direction = entry
            .direction
            .ok_or_else(|| channel_err(name, "missing 'direction'"))?;
        if direction != -1 && direction != 1 {
            return Err(channel_err(name, format!("invalid direction {}", direction)));
        }
        let direction = direction as f64;

        let offset = entry
            .offset
            .ok_or_else(|| channel_err(name, "missing 'offset'"))?;
        if !(-30.0..=30.0).contains(&offset) {
            return Err(channel_err(
                name,
                format!("offset {} out of range (-30 to 30)", offset),
            ));
        }

        match kind {
            "angle" => {
                let gamma_positive = angle_gamma(name, "gamma_positive", entry.gamma_positive)?;
                let gamma_negative = angle_gamma(name, "gamma_negative", entry.gamma_negative)?;
                let multiplier_positive =
                    angle_multiplier(name, "multiplier_positive", entry.multiplier_positive)?;
                let multiplier_negative =
                    angle_multiplier(name, "multiplier_negative", entry.multiplier_negative)?;
                let affects_pump = entry
                    .affects_pump
                    .ok_or_else(|| channel_err(name, "missing 'affects_pump'"))?;

                channels.push(ChannelConfig::Angle(AngleChannel {
                    name: name.clone(),
                    input,
                    output,
                    direction,
                    offset,
                    multiplier_positive,
                    multiplier_negative,
                    gamma_positive,
                    gamma_negative,
                    affects_pump,
                    track: entry.track,
                }));
            }
            "pump" => {
                if let Some(first) = pump_seen {
                    return Err(channel_err(
                        name,
                        format!("only one pump channel is allowed ('{}' already defined)", first),
                    ));
                }
                pump_seen = Some(name);

                let idle = entry
                    .idle
                    .ok_or_else(|| channel_err(name, "missing 'idle'"))?;
                if !(-1.0..=1.0).contains(&idle) {
                    return Err(channel_err(
                        name,
                        format!("idle {} out of range (-1 to 1)", idle),
                    ));
                }
                let multiplier = entry
                    .multiplier
                    .ok_or_else(|| channel_err(name, "missing 'multiplier'"))?;
                if !(multiplier > 0.0 && multiplier <= 10.0) {
                    return Err(channel_err(
                        name,
                        format!("multiplier {} out of range (0 to 10)", multiplier),
                    ));
                }

                channels.push(ChannelConfig::Pump(PumpChannel {
                    name: name.clone(),
                    input,
                    output,
                    direction,
                    offset,
                    idle,
                    multiplier,
                }));
            }
            _ => unreachable!("kind validated above"),
        }
    }

    Ok(ChannelSet {
        channels,
        num_inputs,
        num_outputs,
    })
}

fn angle_gamma(channel: &str, field: &str, value: Option<f64>) -> Result<f64> {
    let value = value.ok_or_else(|| channel_err(channel, format!("missing '{}'", field)))?;
    if !(0.1..=3.0).contains(&value) {
        return Err(channel_err(
            channel,
            format!("{} {} out of range (0.1 to 3.0)", field, value),
        ));
    }
    Ok(value)
}

fn angle_multiplier(channel: &str, field: &str, value: Option<f64>) -> Result<f64> {
    let value = value.ok_or_else(|| channel_err(channel, format!("missing '{}'", field)))?;
    if !(1.0..=50.0).contains(&value.abs()) {
        return Err(channel_err(
            channel,
            format!("{} {} out of range (1 to 50)", field, value),
        ));
    }
    Ok(value)
}
