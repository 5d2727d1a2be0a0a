//! # Actuator Controller Module
//!
//! The core of the rig: consumes normalized input vectors, applies
//! per-channel deadzone, gamma correction and linear scaling, blends the
//! proportional pump throttle, and writes the results through the
//! [`PwmDriver`] capability.
//!
//! ## Safety State Machine
//!
//! The controller is either in **ActiveControl** (shaped input drives the
//! outputs) or **SafeHold** (outputs held at neutral, input silently
//! dropped). It starts in SafeHold and is promoted by the
//! [`SafetyMonitor`](super::monitor::SafetyMonitor) once the input rate has
//! been good for long enough; a missed watchdog period demotes it back.
//! With rate checking disabled (threshold 0) no monitor runs and the
//! controller stays permanently in ActiveControl.
//!
//! ## Shaping Pipeline
//!
//! For each channel with an input index: clamp the raw value to the caps,
//! snap to 0 inside the deadzone, store it at the channel's output slot.
//! Angle channels then apply `sign(v) * |v|^gamma * multiplier * direction`
//! around their `90 + offset` center; the pump blends its idle throttle
//! with the summed demand of all `affects_pump` channels plus the manual
//! load.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::monitor::{SafetyMonitor, RATE_WINDOW};
use crate::config::{ChannelSet, Config};
use crate::driver::PwmDriver;
use crate::error::{Result, RigError};

/// Throttle the pump is parked at on reset. ESC dependent: -1.0 is
/// idle/reverse on the reference hardware.
pub const PUMP_RESET_THROTTLE: f64 = -1.0;

/// Safety state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Outputs held at neutral; input is dropped.
    SafeHold,
    /// Shaped input drives the outputs.
    ActiveControl,
}

/// State shared between the controller and the watchdog task, guarded by
/// one mutex.
#[derive(Debug)]
pub(crate) struct SafetyBlock {
    pub state: ControlState,
    pub good_streak: u32,
    /// Sliding window of input-observed instants, pruned to [`RATE_WINDOW`].
    pub timestamps: VecDeque<Instant>,
    pub last_signal: Instant,
    pub rate_threshold_hz: f64,
}

/// Neutral positions the watchdog writes on a missed period. Kept in sync
/// with the active channel configuration across reloads.
#[derive(Debug, Default)]
pub(crate) struct NeutralPlan {
    /// (slot, center degrees) for every angle channel.
    pub angle_centers: Vec<(usize, f64)>,
}

impl NeutralPlan {
    fn from_channels(channels: &ChannelSet) -> Self {
        Self {
            angle_centers: channels
                .angle_channels()
                .map(|c| (c.output, c.center()))
                .collect(),
        }
    }
}

/// Shared driver handle. Writes come from the control loop thread and,
/// on a missed watchdog period, from the monitor task.
pub(crate) type SharedDriver = Arc<Mutex<Box<dyn PwmDriver>>>;

/// The actuator controller.
///
/// Owns the channel configuration, the per-slot output state, the pump
/// accumulators and the safety state; writes through the [`PwmDriver`]
/// given at construction.
///
/// When rate checking is enabled, construction spawns the watchdog task
/// and must therefore happen inside a tokio runtime.
pub struct ActuatorController {
    channels: ChannelSet,
    driver: SharedDriver,
    safety: Arc<Mutex<SafetyBlock>>,
    neutral: Arc<Mutex<NeutralPlan>>,
    notify: Arc<Notify>,
    monitor: Option<SafetyMonitor>,
    skip_rate_check: bool,

    deadzone_percent: f64,
    tracks_disabled: bool,
    pump_enabled: bool,
    pump_variable: bool,

    outputs: Vec<f64>,
    pump_variable_sum: f64,
    manual_pump_load: f64,
    recorded_angles: BTreeMap<String, Option<f64>>,
}

impl ActuatorController {
    /// Create a controller from a validated configuration and a driver.
    ///
    /// Resets the rig to neutral and, unless `rate_threshold_hz` is 0,
    /// starts the watchdog task (initial state SafeHold). With rate
    /// checking disabled the controller is permanently ActiveControl.
    ///
    /// # Errors
    ///
    /// Returns `Driver` error if the initial neutral reset fails.
    pub fn new(config: &Config, driver: Box<dyn PwmDriver>) -> Result<Self> {
        let skip_rate_check = config.rig.rate_threshold_hz == 0.0;
        let channels = config.channels.clone();

        let safety = Arc::new(Mutex::new(SafetyBlock {
            state: if skip_rate_check {
                ControlState::ActiveControl
            } else {
                ControlState::SafeHold
            },
            good_streak: 0,
            timestamps: VecDeque::new(),
            last_signal: Instant::now(),
            rate_threshold_hz: config.rig.rate_threshold_hz,
        }));
        let neutral = Arc::new(Mutex::new(NeutralPlan::from_channels(&channels)));
        let driver: SharedDriver = Arc::new(Mutex::new(driver));
        let notify = Arc::new(Notify::new());

        let recorded_angles = channels
            .angle_channels()
            .map(|c| (c.name.clone(), None))
            .collect();

        let mut controller = Self {
            outputs: vec![0.0; channels.num_outputs()],
            channels,
            driver,
            safety,
            neutral,
            notify,
            monitor: None,
            skip_rate_check,
            deadzone_percent: config.rig.deadzone_percent,
            tracks_disabled: config.rig.tracks_disabled,
            pump_enabled: true,
            pump_variable: config.rig.pump_variable,
            pump_variable_sum: 0.0,
            manual_pump_load: 0.0,
            recorded_angles,
        };

        info!(
            "PWM channels in use: {}, inputs in use: {}",
            controller.channels.num_outputs(),
            controller.channels.num_inputs()
        );

        controller.reset()?;

        if skip_rate_check {
            info!("input rate checking is disabled");
        } else {
            controller.monitor = Some(SafetyMonitor::spawn(
                Arc::clone(&controller.safety),
                Arc::clone(&controller.notify),
                Arc::clone(&controller.driver),
                Arc::clone(&controller.neutral),
            ));
        }

        Ok(controller)
    }

    /// Translate one input vector into hardware writes.
    ///
    /// Raw values are clamped to `[min_cap, max_cap]` and snapped to 0
    /// inside the deadzone before shaping. While in SafeHold the call is
    /// dropped without touching the outputs.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `raw_values` is `None`
    /// - `InputShape` if the vector length differs from the configured
    ///   input count
    ///
    /// Both failures force a full neutral reset before returning; the
    /// caller may retry on the next cycle.
    pub fn update(
        &mut self,
        raw_values: Option<&[f64]>,
        min_cap: f64,
        max_cap: f64,
    ) -> Result<()> {
        // Anything not recomputed this cycle reads as unknown, never stale.
        for angle in self.recorded_angles.values_mut() {
            *angle = None;
        }

        if !self.skip_rate_check {
            self.notify.notify_one();

            let state = self.safety.lock().unwrap().state;
            if state == ControlState::SafeHold {
                debug!(
                    "safe hold active, ignoring input (average rate: {:.2} Hz)",
                    self.average_input_rate()
                );
                return Ok(());
            }
        }

        let raw_values = match raw_values {
            Some(values) => values,
            None => {
                self.reset()?;
                return Err(RigError::InvalidInput);
            }
        };

        let expected = self.channels.num_inputs();
        if raw_values.len() != expected {
            self.reset()?;
            return Err(RigError::InputShape {
                expected,
                actual: raw_values.len(),
            });
        }

        let deadzone_threshold = self.deadzone_percent / 100.0 * (max_cap - min_cap);

        self.pump_variable_sum = 0.0;
        for channel in self.channels.iter() {
            let Some(input) = channel.input() else {
                continue;
            };

            let capped = raw_values[input].clamp(min_cap, max_cap);
            let value = if capped.abs() < deadzone_threshold {
                0.0
            } else {
                capped
            };

            self.outputs[channel.output()] = value;
            if channel.affects_pump() {
                self.pump_variable_sum += value.abs();
            }
        }

        if self.channels.pump().is_some() {
            self.apply_pump()?;
        }
        if self.channels.has_angles() {
            self.apply_angles()?;
        }

        Ok(())
    }

    /// Compute and write the pump throttle from the current cycle state.
    ///
    /// Returns the clamped throttle actually written, so the manual-load
    /// helpers can re-apply without a full update cycle.
    fn apply_pump(&mut self) -> Result<f64> {
        let Some(cfg) = self.channels.pump() else {
            return Ok(0.0);
        };

        let throttle = if !self.pump_enabled {
            // Disabled overrides everything, ESC dependent idle/reverse.
            -1.0
        } else {
            match cfg.input {
                None => {
                    let base = if self.pump_variable {
                        cfg.idle + cfg.multiplier * self.pump_variable_sum
                    } else {
                        cfg.idle + cfg.multiplier / 10.0
                    };
                    base + self.manual_pump_load
                }
                Some(input) if input < self.outputs.len() => self.outputs[input],
                Some(input) => {
                    warn!("invalid pump input channel {}, using idle", input);
                    cfg.idle
                }
            }
        };

        let throttle = throttle.clamp(-1.0, 1.0);
        self.driver.lock().unwrap().set_throttle(cfg.output, throttle)?;
        Ok(throttle)
    }

    /// Shape and write every angle channel from the current cycle state.
    fn apply_angles(&mut self) -> Result<()> {
        for cfg in self.channels.angle_channels() {
            if self.tracks_disabled && cfg.track {
                continue;
            }

            let value = self.outputs[cfg.output];
            let (gamma, multiplier, magnitude) = if value >= 0.0 {
                (cfg.gamma_positive, cfg.multiplier_positive, value)
            } else {
                (cfg.gamma_negative, cfg.multiplier_negative, -value)
            };

            let corrected = magnitude.powf(gamma);
            let shaped = if value >= 0.0 { corrected } else { -corrected };

            let angle = (cfg.center() + shaped * multiplier * cfg.direction).clamp(0.0, 180.0);

            self.driver.lock().unwrap().set_angle(cfg.output, angle)?;
            self.recorded_angles
                .insert(cfg.name.clone(), Some((angle * 10.0).round() / 10.0));
        }
        Ok(())
    }

    /// Reset the rig to its neutral state: every angle channel to its
    /// `90 + offset` center and the pump to [`PUMP_RESET_THROTTLE`].
    pub fn reset(&mut self) -> Result<()> {
        self.reset_with(true, PUMP_RESET_THROTTLE)
    }

    /// Reset with explicit pump handling.
    ///
    /// With `reset_pump` false the pump throttle is left untouched (the
    /// watchdog uses this on a missed period). Demotes to SafeHold and
    /// clears the good-input streak, unless rate checking is disabled in
    /// which case the controller stays ActiveControl.
    pub fn reset_with(&mut self, reset_pump: bool, pump_reset_point: f64) -> Result<()> {
        {
            let mut driver = self.driver.lock().unwrap();
            for cfg in self.channels.angle_channels() {
                driver.set_angle(cfg.output, cfg.center())?;
            }
            if reset_pump {
                if let Some(pump) = self.channels.pump() {
                    driver.set_throttle(pump.output, pump_reset_point)?;
                }
            }
        }

        let mut safety = self.safety.lock().unwrap();
        if !self.skip_rate_check {
            safety.state = ControlState::SafeHold;
        }
        safety.good_streak = 0;
        Ok(())
    }

    /// Reload the channel configuration from a new document.
    ///
    /// Resets the rig to neutral, validates the document in full, and only
    /// then swaps it in. On any failure the previous configuration and
    /// controller state remain active.
    pub fn reload<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.reset()?;

        let config = Config::load(&path)?;

        self.channels = config.channels;
        self.outputs = vec![0.0; self.channels.num_outputs()];
        self.recorded_angles = self
            .channels
            .angle_channels()
            .map(|c| (c.name.clone(), None))
            .collect();
        *self.neutral.lock().unwrap() = NeutralPlan::from_channels(&self.channels);

        info!(
            "configuration reloaded: {} channels, {} inputs",
            self.channels.iter().count(),
            self.channels.num_inputs()
        );
        Ok(())
    }

    /// Update the watchdog rate threshold. Ignored with a warning unless
    /// positive and finite.
    pub fn set_rate_threshold(&mut self, hz: f64) {
        if !hz.is_finite() || hz <= 0.0 {
            warn!("rate threshold must be a positive number, ignoring {}", hz);
            return;
        }
        self.safety.lock().unwrap().rate_threshold_hz = hz;
        info!("rate threshold set to {} Hz", hz);
    }

    /// Update the deadzone percentage. Ignored with a warning outside
    /// [0, 100].
    pub fn set_deadzone_percent(&mut self, percent: f64) {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            warn!("deadzone must be between 0 and 100, ignoring {}", percent);
            return;
        }
        self.deadzone_percent = percent;
        info!("deadzone set to {}%", percent);
    }

    /// Enable or disable the designated track channels.
    pub fn set_tracks_disabled(&mut self, disabled: bool) {
        self.tracks_disabled = disabled;
        info!("tracks disabled set to {}", disabled);
    }

    /// Enable or disable the pump. While disabled the throttle is forced
    /// to -1.0 on every cycle regardless of demand.
    pub fn set_pump_enabled(&mut self, enabled: bool) {
        self.pump_enabled = enabled;
        info!("pump enabled set to {}", enabled);
    }

    /// Switch between demand-proportional and static pump speed.
    pub fn set_pump_variable_mode(&mut self, variable: bool) {
        self.pump_variable = variable;
        info!("pump variable mode set to {}", variable);
    }

    /// Nudge the persistent manual pump load and immediately re-apply the
    /// pump throttle. The accumulated load clamps to [-1, 1].
    pub fn adjust_manual_pump_load(&mut self, delta: f64) -> Result<()> {
        if !delta.is_finite() {
            warn!("pump load adjustment must be a number, ignoring");
            return Ok(());
        }
        self.manual_pump_load = (self.manual_pump_load + delta).clamp(-1.0, 1.0);
        let throttle = self.apply_pump()?;
        debug!(
            "manual pump load {:.2}, throttle {:.2}",
            self.manual_pump_load, throttle
        );
        Ok(())
    }

    /// Zero the manual pump load and re-apply the pump throttle.
    pub fn reset_manual_pump_load(&mut self) -> Result<()> {
        self.manual_pump_load = 0.0;
        let throttle = self.apply_pump()?;
        debug!("manual pump load reset, throttle {:.2}", throttle);
        Ok(())
    }

    /// Average input rate over the last 30 seconds, in Hz. Returns 0 with
    /// fewer than two samples in the window.
    #[must_use]
    pub fn average_input_rate(&self) -> f64 {
        let now = Instant::now();
        let safety = self.safety.lock().unwrap();
        let recent: Vec<Instant> = safety
            .timestamps
            .iter()
            .copied()
            .filter(|t| now.duration_since(*t) <= RATE_WINDOW)
            .collect();

        if recent.len() < 2 {
            return 0.0;
        }
        let span = recent[recent.len() - 1]
            .duration_since(recent[0])
            .as_secs_f64();
        if span > 0.0 {
            (recent.len() - 1) as f64 / span
        } else {
            0.0
        }
    }

    /// Current safety state.
    #[must_use]
    pub fn control_state(&self) -> ControlState {
        self.safety.lock().unwrap().state
    }

    /// Per-channel angle readouts from the last update cycle, rounded to
    /// 0.1 degrees. `None` for channels not recomputed in that cycle.
    #[must_use]
    pub fn recorded_angles(&self) -> &BTreeMap<String, Option<f64>> {
        &self.recorded_angles
    }

    /// Current persistent manual pump load.
    #[must_use]
    pub fn manual_pump_load(&self) -> f64 {
        self.manual_pump_load
    }

    /// Input-to-channel assignment lines for startup logging.
    #[must_use]
    pub fn input_mappings(&self) -> Vec<String> {
        self.channels.input_mappings()
    }

    /// Stop the watchdog task and wait for it to finish. No hardware
    /// writes happen after this returns.
    pub async fn shutdown(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedDriver;

    /// Driver handle that keeps the recorded writes observable after the
    /// controller takes ownership.
    #[derive(Clone)]
    struct SharedSim(Arc<Mutex<SimulatedDriver>>);

    impl SharedSim {
        fn new(slots: usize) -> Self {
            Self(Arc::new(Mutex::new(SimulatedDriver::new(slots))))
        }

        fn angle(&self, slot: usize) -> Option<f64> {
            self.0.lock().unwrap().angle(slot)
        }

        fn throttle(&self, slot: usize) -> Option<f64> {
            self.0.lock().unwrap().throttle(slot)
        }
    }

    impl PwmDriver for SharedSim {
        fn set_angle(&mut self, slot: usize, degrees: f64) -> Result<()> {
            self.0.lock().unwrap().set_angle(slot, degrees)
        }

        fn set_throttle(&mut self, slot: usize, value: f64) -> Result<()> {
            self.0.lock().unwrap().set_throttle(slot, value)
        }
    }

    /// One linear angle channel on input 0/output 0 plus a variable pump
    /// on output 6, rate checking disabled so updates apply immediately.
    fn test_config(deadzone_percent: f64) -> Config {
        let doc = format!(
            r#"
[rig]
pwm_channels = 16
rate_threshold_hz = 0.0
deadzone_percent = {}

[channels.boom]
type = "angle"
input_channel = 0
output_channel = 0
direction = 1
offset = 0.0
multiplier_positive = 45.0
multiplier_negative = -45.0
gamma_positive = 1.0
gamma_negative = 1.0
affects_pump = true

[channels.pump]
type = "pump"
input_channel = "none"
output_channel = 6
direction = 1
offset = 0.0
idle = -0.2
multiplier = 0.5
"#,
            deadzone_percent
        );
        Config::parse(&doc).unwrap()
    }

    fn make_controller(deadzone_percent: f64) -> (ActuatorController, SharedSim) {
        let sim = SharedSim::new(16);
        let controller =
            ActuatorController::new(&test_config(deadzone_percent), Box::new(sim.clone()))
                .unwrap();
        (controller, sim)
    }

    #[test]
    fn test_construction_resets_to_neutral() {
        let (_controller, sim) = make_controller(20.0);
        assert_eq!(sim.angle(0), Some(90.0));
        assert_eq!(sim.throttle(6), Some(PUMP_RESET_THROTTLE));
    }

    #[test]
    fn test_rate_check_disabled_is_permanently_active() {
        let (mut controller, _sim) = make_controller(20.0);
        assert_eq!(controller.control_state(), ControlState::ActiveControl);
        controller.reset().unwrap();
        assert_eq!(controller.control_state(), ControlState::ActiveControl);
    }

    #[test]
    fn test_linear_angle_scenario() {
        // deadzone 20%, caps [-1, 1]: 0.5 clears the 0.2 threshold and
        // lands at 90 + 0.5 * 45 = 112.5 degrees.
        let (mut controller, sim) = make_controller(20.0);
        controller.update(Some(&[0.5]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(0), Some(112.5));
        assert_eq!(controller.recorded_angles()["boom"], Some(112.5));
    }

    #[test]
    fn test_deadzone_snaps_to_center() {
        let (mut controller, sim) = make_controller(20.0);
        controller.update(Some(&[0.1]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(0), Some(90.0));

        controller.update(Some(&[-0.1]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(0), Some(90.0));
    }

    #[test]
    fn test_zero_input_hits_center_regardless_of_gamma() {
        let doc = r#"
[rig]
rate_threshold_hz = 0.0
deadzone_percent = 0.0

[channels.tilt]
type = "angle"
input_channel = 0
output_channel = 2
direction = 1
offset = 12.0
multiplier_positive = 30.0
multiplier_negative = -30.0
gamma_positive = 2.5
gamma_negative = 0.4
affects_pump = false
"#;
        let config = Config::parse(doc).unwrap();
        let sim = SharedSim::new(16);
        let mut controller =
            ActuatorController::new(&config, Box::new(sim.clone())).unwrap();

        controller.update(Some(&[0.0]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(2), Some(102.0));
    }

    #[test]
    fn test_negative_polarity_uses_negative_pair() {
        // direction 1, multiplier_negative -45: input -0.5 shapes to
        // -(0.5^1) * -45 = +22.5, so 112.5 degrees.
        let (mut controller, sim) = make_controller(0.0);
        controller.update(Some(&[-0.5]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(0), Some(112.5));
    }

    #[test]
    fn test_outputs_stay_in_hardware_ranges() {
        let (mut controller, sim) = make_controller(0.0);
        for value in [-5.0, -1.0, -0.3, 0.0, 0.7, 1.0, 9.0] {
            controller.update(Some(&[value]), -1.0, 1.0).unwrap();
            let angle = sim.angle(0).unwrap();
            let throttle = sim.throttle(6).unwrap();
            assert!((0.0..=180.0).contains(&angle), "angle {} for input {}", angle, value);
            assert!((-1.0..=1.0).contains(&throttle), "throttle {} for input {}", throttle, value);
        }
    }

    #[test]
    fn test_caps_clamp_before_deadzone() {
        // caps [-0.5, 0.5]: input 2.0 clamps to 0.5 -> 90 + 0.5*45
        let (mut controller, sim) = make_controller(0.0);
        controller.update(Some(&[2.0]), -0.5, 0.5).unwrap();
        assert_eq!(sim.angle(0), Some(112.5));
    }

    #[test]
    fn test_pump_variable_blend_scenario() {
        // idle -0.2, multiplier 0.5, demand 0.4 -> throttle 0.0
        let (mut controller, sim) = make_controller(0.0);
        controller.update(Some(&[0.4]), -1.0, 1.0).unwrap();
        let throttle = sim.throttle(6).unwrap();
        assert!(throttle.abs() < 1e-9, "throttle was {}", throttle);
    }

    #[test]
    fn test_pump_static_mode() {
        // static mode: idle + multiplier/10 = -0.2 + 0.05 = -0.15
        let (mut controller, sim) = make_controller(0.0);
        controller.set_pump_variable_mode(false);
        controller.update(Some(&[0.4]), -1.0, 1.0).unwrap();
        assert!((sim.throttle(6).unwrap() - (-0.15)).abs() < 1e-9);
    }

    #[test]
    fn test_pump_disabled_overrides_everything() {
        let (mut controller, sim) = make_controller(0.0);
        controller.set_pump_enabled(false);
        controller.adjust_manual_pump_load(0.8).unwrap();
        controller.update(Some(&[1.0]), -1.0, 1.0).unwrap();
        assert_eq!(sim.throttle(6), Some(-1.0));
    }

    #[test]
    fn test_manual_pump_load_clamps_and_reapplies() {
        let (mut controller, sim) = make_controller(0.0);
        controller.adjust_manual_pump_load(0.7).unwrap();
        controller.adjust_manual_pump_load(0.7).unwrap();
        assert_eq!(controller.manual_pump_load(), 1.0);
        // idle -0.2 + load 1.0, no demand yet
        assert!((sim.throttle(6).unwrap() - 0.8).abs() < 1e-9);

        controller.reset_manual_pump_load().unwrap();
        assert_eq!(controller.manual_pump_load(), 0.0);
        assert!((sim.throttle(6).unwrap() - (-0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_missing_input_forces_reset() {
        let (mut controller, sim) = make_controller(0.0);
        controller.update(Some(&[0.5]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(0), Some(112.5));

        let err = controller.update(None, -1.0, 1.0).unwrap_err();
        assert!(matches!(err, RigError::InvalidInput));
        assert_eq!(sim.angle(0), Some(90.0));
        assert_eq!(sim.throttle(6), Some(PUMP_RESET_THROTTLE));
    }

    #[test]
    fn test_wrong_arity_forces_reset() {
        let (mut controller, sim) = make_controller(0.0);
        let err = controller.update(Some(&[0.5, 0.5]), -1.0, 1.0).unwrap_err();
        match err {
            RigError::InputShape { expected, actual } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected InputShape, got: {:?}", other),
        }
        assert_eq!(sim.angle(0), Some(90.0));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (mut controller, sim) = make_controller(0.0);
        controller.update(Some(&[0.8]), -1.0, 1.0).unwrap();

        controller.reset().unwrap();
        let first = (sim.angle(0), sim.throttle(6));
        controller.reset().unwrap();
        let second = (sim.angle(0), sim.throttle(6));
        assert_eq!(first, second);
        assert_eq!(first, (Some(90.0), Some(PUMP_RESET_THROTTLE)));
    }

    #[test]
    fn test_recorded_angles_cleared_each_cycle() {
        let (mut controller, _sim) = make_controller(0.0);
        controller.update(Some(&[0.5]), -1.0, 1.0).unwrap();
        assert!(controller.recorded_angles()["boom"].is_some());

        // A dropped call must not leave stale readouts behind.
        let _ = controller.update(None, -1.0, 1.0);
        assert!(controller.recorded_angles()["boom"].is_none());
    }

    #[test]
    fn test_tracks_disabled_skips_track_channels() {
        let doc = r#"
[rig]
rate_threshold_hz = 0.0
deadzone_percent = 0.0

[channels.track_left]
type = "angle"
input_channel = 0
output_channel = 4
direction = 1
offset = 0.0
multiplier_positive = 45.0
multiplier_negative = -45.0
gamma_positive = 1.0
gamma_negative = 1.0
affects_pump = false
track = true
"#;
        let config = Config::parse(doc).unwrap();
        let sim = SharedSim::new(16);
        let mut controller =
            ActuatorController::new(&config, Box::new(sim.clone())).unwrap();

        controller.set_tracks_disabled(true);
        controller.update(Some(&[0.5]), -1.0, 1.0).unwrap();
        // Still at the neutral written by the construction-time reset.
        assert_eq!(sim.angle(4), Some(90.0));
        assert!(controller.recorded_angles()["track_left"].is_none());

        controller.set_tracks_disabled(false);
        controller.update(Some(&[0.5]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(4), Some(112.5));
    }

    #[test]
    fn test_invalid_tuning_values_ignored() {
        let (mut controller, _sim) = make_controller(20.0);
        controller.set_deadzone_percent(150.0);
        controller.set_rate_threshold(-5.0);

        // Deadzone unchanged: 0.1 still snaps to 0.
        controller.update(Some(&[0.1]), -1.0, 1.0).unwrap();
        assert_eq!(controller.recorded_angles()["boom"], Some(90.0));
    }

    #[test]
    fn test_reload_failure_keeps_previous_config() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let (mut controller, sim) = make_controller(20.0);

        let mut bad = NamedTempFile::new().unwrap();
        bad.write_all(b"[channels.broken]\ntype = \"angle\"\n").unwrap();
        bad.flush().unwrap();

        assert!(controller.reload(bad.path()).is_err());

        // Previous channels still drive the rig.
        controller.update(Some(&[0.5]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(0), Some(112.5));
    }

    #[test]
    fn test_reload_swaps_valid_config() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let (mut controller, sim) = make_controller(20.0);

        let doc = r#"
[rig]
rate_threshold_hz = 0.0
deadzone_percent = 0.0

[channels.slew]
type = "angle"
input_channel = 0
output_channel = 3
direction = -1
offset = 0.0
multiplier_positive = 20.0
multiplier_negative = -20.0
gamma_positive = 1.0
gamma_negative = 1.0
affects_pump = false
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(doc.as_bytes()).unwrap();
        file.flush().unwrap();

        controller.reload(file.path()).unwrap();
        controller.update(Some(&[0.5]), -1.0, 1.0).unwrap();
        // direction -1: 90 - 0.5 * 20 = 80
        assert_eq!(sim.angle(3), Some(80.0));
        assert_eq!(controller.recorded_angles()["slew"], Some(80.0));
    }

    #[test]
    fn test_average_rate_needs_two_samples() {
        let (controller, _sim) = make_controller(20.0);
        assert_eq!(controller.average_input_rate(), 0.0);
    }

    #[test]
    fn test_input_mappings_listing() {
        let (controller, _sim) = make_controller(20.0);
        let lines = controller.input_mappings();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("boom"));
    }

    #[tokio::test]
    async fn test_watchdog_promotes_and_demotes() {
        use std::time::Duration;

        // Same channels as test_config but with the watchdog enabled at
        // 10 Hz (100 ms period, streak target 2).
        let config = {
            let text = r#"
[rig]
pwm_channels = 16
rate_threshold_hz = 10.0
deadzone_percent = 0.0

[channels.boom]
type = "angle"
input_channel = 0
output_channel = 0
direction = 1
offset = 0.0
multiplier_positive = 45.0
multiplier_negative = -45.0
gamma_positive = 1.0
gamma_negative = 1.0
affects_pump = true

[channels.pump]
type = "pump"
input_channel = "none"
output_channel = 6
direction = 1
offset = 0.0
idle = -0.2
multiplier = 0.5
"#;
            Config::parse(text).unwrap()
        };

        let sim = SharedSim::new(16);
        let mut controller =
            ActuatorController::new(&config, Box::new(sim.clone())).unwrap();
        assert_eq!(controller.control_state(), ControlState::SafeHold);

        // Feed input at ~20 Hz until the good streak promotes us.
        for _ in 0..10 {
            let _ = controller.update(Some(&[0.5]), -1.0, 1.0);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(controller.control_state(), ControlState::ActiveControl);

        controller.update(Some(&[0.5]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(0), Some(112.5));
        let throttle_before = sim.throttle(6).unwrap();

        // Go silent for several watchdog periods.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(controller.control_state(), ControlState::SafeHold);
        assert_eq!(sim.angle(0), Some(90.0));
        // The missed-period park leaves the pump throttle alone.
        assert_eq!(sim.throttle(6), Some(throttle_before));

        // Input is dropped while held safe.
        controller.update(Some(&[0.9]), -1.0, 1.0).unwrap();
        assert_eq!(sim.angle(0), Some(90.0));

        controller.shutdown().await;
    }
}
