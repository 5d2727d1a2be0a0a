//! # Gamepad Module
//!
//! This module handles gamepad detection, event reading, and automatic
//! reconnection using the Linux evdev interface.
//!
//! ## Device Detection
//!
//! Devices are matched by a case-insensitive substring of their evdev
//! name (`device_name` in `[gamepad]`), so any controller the kernel
//! names appropriately works without hardcoding vendor/product IDs.
//!
//! ## Input Axes
//!
//! - Left stick: ABS_X / ABS_Y (0-65536)
//! - Right stick: ABS_Z / ABS_RZ (0-65536)
//! - Triggers: ABS_BRAKE (left), ABS_GAS (right) (0-1024)
//! - D-pad: ABS_HAT0X / ABS_HAT0Y (-1, 0, 1)
//!
//! ## Reconnect Policy
//!
//! A background task owns the device. On any read failure it marks the
//! gamepad disconnected, resets the snapshot to neutral, and retries with
//! a fixed backoff up to the configured attempt limit. Exhausting the
//! limit stops monitoring permanently; callers observe that through
//! [`Gamepad::is_connected`] staying false.

pub mod state;

pub use state::GamepadState;

use evdev::{AbsoluteAxisType, Device, InputEventKind, Key};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::GamepadSettings;
use state::{normalize_dpad, normalize_stick, normalize_trigger};

/// State shared between the read task and callers.
struct Shared {
    state: Mutex<GamepadState>,
    connected: AtomicBool,
    reconnect_attempts: AtomicU32,
}

/// Handle to a monitored gamepad.
///
/// Spawns a background task that owns the evdev device, keeps the
/// normalized [`GamepadState`] current, and reconnects on failures.
/// Callers read coherent snapshots via [`read`](Self::read).
pub struct Gamepad {
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Gamepad {
    /// Start monitoring for a gamepad matching the configured name.
    ///
    /// Returns immediately; connection happens in the background. Must be
    /// called inside a tokio runtime.
    #[must_use]
    pub fn start(settings: &GamepadSettings) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(GamepadState::default()),
            connected: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
        });
        let (stop_tx, stop_rx) = watch::channel(false);

        let task_shared = Arc::clone(&shared);
        let task_settings = settings.clone();
        let handle = tokio::spawn(async move {
            monitor_device(task_shared, task_settings, stop_rx).await;
        });

        Self {
            shared,
            stop_tx,
            handle,
        }
    }

    /// Snapshot of the current input state.
    ///
    /// While disconnected this logs a reminder and returns the neutral
    /// state, so stale values can never leak into control decisions.
    pub fn read(&self) -> GamepadState {
        if !self.is_connected() {
            warn!("gamepad not connected, returning neutral input");
            let mut state = self.shared.state.lock().unwrap();
            *state = GamepadState::default();
            return *state;
        }
        *self.shared.state.lock().unwrap()
    }

    /// Whether a device is currently connected and being read.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Reconnect attempts made since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Stop the read task, interrupting any in-progress wait or backoff,
    /// and join it.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Why the event-reading loop ended.
enum ReadEnd {
    Stopped,
    Disconnected,
}

async fn monitor_device(
    shared: Arc<Shared>,
    settings: GamepadSettings,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            return;
        }

        let device = match find_device(&settings.device_name) {
            Some((path, device)) => {
                info!("gamepad connected at {}", path.display());
                device
            }
            None => {
                if !backoff_before_retry(&shared, &settings, &mut stop_rx).await {
                    return;
                }
                continue;
            }
        };

        shared.connected.store(true, Ordering::SeqCst);
        shared.reconnect_attempts.store(0, Ordering::SeqCst);

        match read_events(&shared, device, &mut stop_rx).await {
            ReadEnd::Stopped => return,
            ReadEnd::Disconnected => {
                warn!("gamepad disconnected, attempting to reconnect");
                shared.connected.store(false, Ordering::SeqCst);
                *shared.state.lock().unwrap() = GamepadState::default();
            }
        }
    }
}

/// Read and apply events until stopped or the device fails.
async fn read_events(
    shared: &Shared,
    device: Device,
    stop_rx: &mut watch::Receiver<bool>,
) -> ReadEnd {
    let mut stream = match device.into_event_stream() {
        Ok(stream) => stream,
        Err(e) => {
            warn!("failed to start gamepad event stream: {}", e);
            return ReadEnd::Disconnected;
        }
    };

    loop {
        tokio::select! {
            _ = stop_rx.changed() => return ReadEnd::Stopped,
            result = stream.next_event() => match result {
                Ok(event) => apply_event(shared, &event),
                Err(e) => {
                    debug!("gamepad read failed: {}", e);
                    return ReadEnd::Disconnected;
                }
            }
        }
    }
}

/// Sleep the backoff delay before the next connection attempt.
///
/// Returns false when the attempt limit is exhausted or a stop was
/// requested; the monitoring task then shuts down for good.
async fn backoff_before_retry(
    shared: &Shared,
    settings: &GamepadSettings,
    stop_rx: &mut watch::Receiver<bool>,
) -> bool {
    let attempt = shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt > settings.reconnect_attempts {
        warn!(
            "gamepad not found after {} attempts, monitoring stopped",
            settings.reconnect_attempts
        );
        return false;
    }

    warn!(
        "gamepad not found (attempt {}/{}), retrying in {} ms",
        attempt, settings.reconnect_attempts, settings.reconnect_backoff_ms
    );

    tokio::select! {
        _ = stop_rx.changed() => false,
        () = sleep(Duration::from_millis(settings.reconnect_backoff_ms)) => true,
    }
}

/// Scan `/dev/input` for the first device whose name contains the
/// configured fragment (case-insensitive).
fn find_device(name_fragment: &str) -> Option<(PathBuf, Device)> {
    let needle = name_fragment.to_lowercase();

    // Sort for deterministic selection when several devices match
    let mut devices: Vec<_> = evdev::enumerate().collect();
    devices.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, device) in devices {
        let name = device.name().unwrap_or("");
        debug!("found input device: {} ({})", path.display(), name);
        if name.to_lowercase().contains(&needle) {
            return Some((path, device));
        }
    }
    None
}

/// Fold one evdev event into the shared snapshot.
fn apply_event(shared: &Shared, event: &evdev::InputEvent) {
    let mut state = shared.state.lock().unwrap();

    match event.kind() {
        InputEventKind::Key(key) => {
            let pressed = event.value() != 0;
            match key {
                Key::BTN_SOUTH => state.a = pressed,
                Key::BTN_EAST => state.b = pressed,
                // xpad reports the X face button as BTN_NORTH and Y as
                // BTN_WEST
                Key::BTN_NORTH => state.x = pressed,
                Key::BTN_WEST => state.y = pressed,
                Key::BTN_TL => state.left_bumper = pressed,
                Key::BTN_TR => state.right_bumper = pressed,
                Key::BTN_SELECT => state.back = pressed,
                Key::BTN_START => state.start = pressed,
                _ => {}
            }
        }
        InputEventKind::AbsAxis(axis) => match axis {
            AbsoluteAxisType::ABS_X => state.left_stick_x = normalize_stick(event.value()),
            AbsoluteAxisType::ABS_Y => state.left_stick_y = normalize_stick(event.value()),
            AbsoluteAxisType::ABS_Z => state.right_stick_x = normalize_stick(event.value()),
            AbsoluteAxisType::ABS_RZ => state.right_stick_y = normalize_stick(event.value()),
            AbsoluteAxisType::ABS_BRAKE => state.left_trigger = normalize_trigger(event.value()),
            AbsoluteAxisType::ABS_GAS => state.right_trigger = normalize_trigger(event.value()),
            AbsoluteAxisType::ABS_HAT0X => state.dpad_x = normalize_dpad(event.value()),
            AbsoluteAxisType::ABS_HAT0Y => state.dpad_y = normalize_dpad(event.value()),
            _ => {}
        },
        _ => {}
    }
}
