//! Physics-tick adapter (§2, §4.4): the glue between the mailbox/queue
//! fabric and the physics integrator, which is itself an external
//! black box (§1 "the physics integrator itself... treated as a black-box
//! tick function consuming a command and producing a telemetry snapshot").
//!
//! This module owns the mailbox-read/tick/publish loop and the physics-side
//! fault overlay; it never implements the wheel dynamics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::mailbox::{Mailbox, MailboxSlot};
use crate::scenario::Action;
use crate::telemetry::{Queue as TelemetryQueue, Snapshot};

/// Caller-supplied wheel dynamics, driven once per 100Hz tick (§2).
///
/// A conformant implementation consumes at most one [`MailboxSlot`] per
/// call and returns a single coherent [`Snapshot`]; it must never block.
pub trait WheelModel: Send {
    /// Advance the model by `dt_s` seconds, applying `cmd` if present and
    /// the physics-layer scenario overlay `overlay` if present, and return
    /// the resulting snapshot.
    fn tick(&mut self, cmd: Option<MailboxSlot>, overlay: Option<Action>, dt_s: f32) -> Snapshot;
}

/// Physics-layer fault/limit overlay, written by the comms-side scenario
/// engine and read once per physics tick (§4.3 "Physics actions").
///
/// Backed by a spin-lock rather than the SPSC queue: unlike telemetry,
/// which flows one-way at tick rate, this is a low-frequency write (only
/// on scenario transitions) read at tick rate, the same shape as the
/// command [`Mailbox`] — so it reuses that lock discipline rather than
/// inventing a second lock-free structure for an already-solved problem.
#[derive(Default)]
pub struct PhysicsOverlay(Mutex<Option<Action>>);

impl PhysicsOverlay {
    /// An empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current overlay (or clear it with `None`).
    pub fn set(&self, action: Option<Action>) {
        *self.0.lock() = action;
    }

    /// Read the current overlay.
    #[must_use]
    pub fn get(&self) -> Option<Action> {
        *self.0.lock()
    }
}

/// Nominal tick period, 100Hz (§2, §5).
pub const TICK_PERIOD_US: u64 = 10_000;

/// Drives a [`WheelModel`] at the fixed 100Hz cadence described in §2/§5:
/// each tick reads at most one pending command, advances the model, and
/// publishes a snapshot — wait-free throughout (mailbox `try_read`,
/// queue `publish`, arithmetic; §5).
pub struct PhysicsRunner<M: WheelModel> {
    model: M,
    mailbox: Arc<Mailbox>,
    queue: Arc<TelemetryQueue>,
    overlay: Arc<PhysicsOverlay>,
    tick_count: u64,
    max_jitter_us: AtomicU64,
}

impl<M: WheelModel> PhysicsRunner<M> {
    /// Wire a model to the shared mailbox/queue/overlay.
    #[must_use]
    pub fn new(
        model: M,
        mailbox: Arc<Mailbox>,
        queue: Arc<TelemetryQueue>,
        overlay: Arc<PhysicsOverlay>,
    ) -> Self {
        Self {
            model,
            mailbox,
            queue,
            overlay,
            tick_count: 0,
            max_jitter_us: AtomicU64::new(0),
        }
    }

    /// Run one tick: read-at-most-one-command, advance the model, publish.
    ///
    /// `now_us` is the HAL monotonic clock reading at call time;
    /// `jitter_us` is the signed deviation from the nominal 10ms period,
    /// supplied by the caller's timer source (§3 "last-tick jitter").
    pub fn step(&mut self, now_us: u64, jitter_us: i32) -> Snapshot {
        let cmd = self.mailbox.try_read();
        let overlay = self.overlay.get();
        let mut snapshot = self.model.tick(cmd, overlay, TICK_PERIOD_US as f32 / 1e6);

        self.tick_count += 1;
        let jitter_mag = jitter_us.unsigned_abs() as u64;
        let max = self.max_jitter_us.fetch_max(jitter_mag, Ordering::Relaxed);
        let max = max.max(jitter_mag);

        snapshot.tick_count = self.tick_count;
        snapshot.last_tick_jitter_us = jitter_us;
        snapshot.max_jitter_us = max as u32;
        snapshot.timestamp_us = now_us;

        self.queue.publish(snapshot);
        snapshot
    }
}

/// Minimal first-order stand-in for the real wheel dynamics, used by the
/// hosted binary and by tests (§1: the physics integrator itself is an
/// external black box named only by the [`WheelModel`] interface — this is
/// not a claim of fidelity, just something for `wheelsim` to drive so the
/// rest of the emulator is runnable end to end without a real model plugged
/// in).
#[derive(Debug, Default)]
pub struct DemoWheelModel {
    speed_rpm: f32,
    mode: crate::telemetry::Mode,
    latches: crate::telemetry::LatchBits,
}

impl WheelModel for DemoWheelModel {
    fn tick(&mut self, cmd: Option<MailboxSlot>, overlay: Option<Action>, dt_s: f32) -> Snapshot {
        use crate::mailbox::{MailboxKind, RESET_P1_TRIP_LCL};
        use crate::telemetry::{LatchBits, Mode};

        if let Some(cmd) = cmd {
            match cmd.kind {
                MailboxKind::SetSpeed => {
                    self.speed_rpm = cmd.p1;
                    self.mode = Mode::Speed;
                }
                MailboxKind::SetCurrent => self.mode = Mode::Current,
                MailboxKind::SetTorque => self.mode = Mode::Torque,
                MailboxKind::SetPwm => self.mode = Mode::Pwm,
                MailboxKind::Reset => {
                    // `p1` tells a plain reset apart from a TRIP_LCL request
                    // riding the same kind (§3 has no dedicated TRIP_LCL
                    // slot; see `dispatch::handle_trip_lcl`).
                    self.speed_rpm = 0.0;
                    if cmd.p1 == RESET_P1_TRIP_LCL {
                        self.latches |= LatchBits::FAULT_LATCHED;
                    } else {
                        self.latches = LatchBits::empty();
                    }
                }
                MailboxKind::ClearFault => {
                    self.speed_rpm = 0.0;
                    self.latches = LatchBits::empty();
                }
                MailboxKind::SetMode | MailboxKind::None => {}
            }
        }
        let mut current_a = self.speed_rpm.abs() / 1000.0;
        if let Some(overlay) = overlay {
            if let Some(limit) = overlay.limit_speed_rpm {
                self.speed_rpm = self.speed_rpm.clamp(-limit, limit);
            }
            if let Some(limit) = overlay.limit_current_a {
                current_a = current_a.min(limit);
            }
        }
        let faults = if self.latches.contains(LatchBits::FAULT_LATCHED) {
            crate::telemetry::FaultBits::LCL_TRIP
        } else {
            crate::telemetry::FaultBits::empty()
        };
        let _ = dt_s; // the demo model has no integration state sensitive to it.
        Snapshot {
            speed_rpm: self.speed_rpm,
            angular_velocity_rad_s: self.speed_rpm * std::f32::consts::PI / 30.0,
            current_a,
            mode: self.mode,
            bus_voltage_v: 28.0,
            faults,
            latches: self.latches,
            ..Default::default()
        }
    }
}
