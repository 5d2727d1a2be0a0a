//! # Safety Monitor Module
//!
//! The input-rate watchdog task owned by the
//! [`ActuatorController`](super::actuator::ActuatorController).
//!
//! Each watchdog period (`1 / rate_threshold`) the task waits for an
//! "input observed" notification from `update`:
//!
//! - Signal arrived: the instantaneous rate since the previous signal is
//!   checked against the threshold. Enough consecutive on-time signals
//!   promote the controller SafeHold -> ActiveControl.
//! - Period elapsed without a signal: if the controller is ActiveControl
//!   it is demoted to SafeHold and every angle channel is parked at its
//!   neutral center. The pump throttle is deliberately left untouched.
//!
//! The notification is fire-and-forget (`Notify`), so `update` never
//! blocks on the watchdog. Signals arriving faster than the period
//! collapse into a single observation per period.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use super::actuator::{ControlState, NeutralPlan, SafetyBlock, SharedDriver};

/// Sliding window over which input timestamps are retained for the
/// average-rate readout.
pub(crate) const RATE_WINDOW: Duration = Duration::from_secs(30);

/// Handle to the running watchdog task.
pub struct SafetyMonitor {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SafetyMonitor {
    /// Spawn the watchdog task. Must be called inside a tokio runtime.
    pub(crate) fn spawn(
        safety: Arc<Mutex<SafetyBlock>>,
        notify: Arc<Notify>,
        driver: SharedDriver,
        neutral: Arc<Mutex<NeutralPlan>>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("input rate monitoring started");
            loop {
                // Re-read the threshold every period so live tuning via
                // set_rate_threshold takes effect.
                let period = {
                    let block = safety.lock().unwrap();
                    Duration::from_secs_f64(1.0 / block.rate_threshold_hz)
                };

                tokio::select! {
                    _ = stop_rx.changed() => break,
                    result = timeout(period, notify.notified()) => {
                        match result {
                            Ok(()) => observe_signal(&safety, Instant::now()),
                            Err(_) => {
                                observe_timeout(&safety, &driver, &neutral);
                            }
                        }
                    }
                }
            }
            info!("input rate monitoring stopped");
        });

        Self { stop_tx, handle }
    }

    /// Signal the task to stop, wake its parked wait, and join it.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Bookkeeping for one observed input signal.
fn observe_signal(safety: &Mutex<SafetyBlock>, now: Instant) {
    let mut block = safety.lock().unwrap();
    let elapsed = now.duration_since(block.last_signal);
    block.last_signal = now;

    if elapsed.is_zero() {
        return;
    }

    let instant_rate = 1.0 / elapsed.as_secs_f64();
    if instant_rate >= block.rate_threshold_hz {
        block.good_streak += 1;
        // Activation wants floor(threshold * 0.25) consecutive on-time
        // signals. Below 4 Hz that target truncates to 0, so a single
        // good sample re-activates.
        let target = (block.rate_threshold_hz * 0.25) as u32;
        if block.good_streak >= target {
            if block.state == ControlState::SafeHold {
                info!(
                    "input rate recovered ({:.1} Hz), resuming active control",
                    instant_rate
                );
            }
            block.state = ControlState::ActiveControl;
            block.good_streak = 0;
        }
    } else {
        block.good_streak = 0;
    }

    block.timestamps.push_back(now);
    while let Some(&front) = block.timestamps.front() {
        if now.duration_since(front) > RATE_WINDOW {
            block.timestamps.pop_front();
        } else {
            break;
        }
    }
}

/// Handle a period that elapsed without any input signal. Returns whether
/// the controller was demoted to SafeHold.
fn observe_timeout(
    safety: &Mutex<SafetyBlock>,
    driver: &SharedDriver,
    neutral: &Mutex<NeutralPlan>,
) -> bool {
    let mut block = safety.lock().unwrap();
    if block.state != ControlState::ActiveControl {
        return false;
    }

    warn!("input rate too low, entering safe hold");

    // Angles go neutral; the pump is intentionally not touched here.
    let plan = neutral.lock().unwrap();
    let mut drv = driver.lock().unwrap();
    for &(slot, center) in &plan.angle_centers {
        if let Err(e) = drv.set_angle(slot, center) {
            warn!("failed to park slot {} at neutral: {}", slot, e);
        }
    }

    block.state = ControlState::SafeHold;
    block.good_streak = 0;
    true
}
