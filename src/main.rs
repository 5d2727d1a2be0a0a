//! # Rig Bridge
//!
//! Drive a PWM servo/pump actuator rig with an Xbox controller.
//!
//! The control loop reads a gamepad snapshot at 100 Hz, maps sticks and
//! triggers onto the configured channels, and feeds them to the actuator
//! controller, which shapes them into servo angles and a pump throttle.
//! An input-rate watchdog holds the rig neutral whenever input goes stale.

use anyhow::Result;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use rig_bridge::config::Config;
use rig_bridge::controller::ActuatorController;
use rig_bridge::driver::pca9685::Pca9685Driver;
use rig_bridge::driver::{PwmDriver, SimulatedDriver};
use rig_bridge::gamepad::Gamepad;

/// Control loop rate in Hz.
const LOOP_RATE_HZ: u32 = 100;

/// Number of loop cycles between input-rate log messages.
const LOG_INTERVAL_CYCLES: u64 = 500;

/// Configuration file used when no path is given on the command line.
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up logging with tracing subscriber
///    - Load the channel configuration (path from argv or the default)
///    - Open the PWM driver (real PCA9685 hat, or simulated)
///    - Start the gamepad monitor and the input-rate watchdog
///
/// 2. **Main Loop** (100 Hz)
///    - Skip the cycle while the gamepad is disconnected
///    - Snapshot gamepad state, apply bumper-reverses-trigger mapping
///    - Forward the input vector to the actuator controller
///    - Log the average input rate every ~5 seconds
///
/// 3. **Graceful Shutdown** (Ctrl+C)
///    - Park all channels at neutral and stop the pump
///    - Join the watchdog and gamepad tasks
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the PWM hat
/// cannot be initialized.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Rig Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded configuration from {}", config_path);

    let driver: Box<dyn PwmDriver> = if config.rig.simulate {
        info!("Simulation mode: PWM writes will be logged, not sent");
        Box::new(SimulatedDriver::new(config.rig.pwm_channels))
    } else {
        Box::new(Pca9685Driver::new(config.rig.pwm_channels)?)
    };

    let mut rig = ActuatorController::new(&config, driver)?;
    for mapping in rig.input_mappings() {
        info!("{}", mapping);
    }

    let gamepad = Gamepad::start(&config.gamepad);

    let period_ms = 1000 / LOOP_RATE_HZ;
    let mut tick = interval(Duration::from_millis(u64::from(period_ms)));

    info!("Starting control loop at {}Hz", LOOP_RATE_HZ);
    info!("Press Ctrl+C to exit");

    let mut cycle: u64 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                cycle += 1;

                if !gamepad.is_connected() {
                    continue;
                }

                let pad = gamepad.read();

                // Bumpers reverse their trigger so one axis drives a
                // track both ways
                let right_track = if pad.right_bumper {
                    -pad.right_trigger
                } else {
                    pad.right_trigger
                };
                let left_track = if pad.left_bumper {
                    -pad.left_trigger
                } else {
                    pad.left_trigger
                };

                // A re-enables tracked driving, B disables it
                if pad.a {
                    rig.set_tracks_disabled(false);
                }
                if pad.b {
                    rig.set_tracks_disabled(true);
                }

                let inputs = [
                    pad.right_stick_x, // scoop
                    pad.left_stick_y,  // lift boom
                    pad.left_stick_x,  // rotate cabin
                    pad.right_stick_y, // tilt boom
                    right_track,
                    left_track,
                ];

                if let Err(e) = rig.update(Some(&inputs), -1.0, 1.0) {
                    debug!("input rejected: {}", e);
                }

                if cycle % LOG_INTERVAL_CYCLES == 0 {
                    info!(
                        "average input rate: {:.2} Hz ({:?})",
                        rig.average_input_rate(),
                        rig.control_state()
                    );
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if let Err(e) = rig.reset() {
        warn!("failed to park rig at neutral: {}", e);
    }
    rig.shutdown().await;
    gamepad.stop().await;
    info!("Shutdown complete");

    Ok(())
}
