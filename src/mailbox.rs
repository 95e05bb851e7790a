//! Command mailbox from the comms core to the physics core (§4.4).
//!
//! A single slot guarded by a spin-lock, the way the teacher never has to
//! (its blocks are single-threaded), so this module is grounded instead on
//! `doublegate-VeridianOS`'s use of `spin::Mutex` for single-slot kernel-side
//! state shared across execution contexts without an OS-level scheduler to
//! block on. The lock is only ever held for the four-field copy §5 allows.

use spin::Mutex;

/// The kind of command waiting in the mailbox (§3 "Mailbox slot").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailboxKind {
    /// No command pending.
    #[default]
    None,
    /// Change the control mode (current/speed/torque/pwm).
    SetMode,
    /// Setpoint: target speed, rpm.
    SetSpeed,
    /// Setpoint: target current, amps.
    SetCurrent,
    /// Setpoint: target torque, mNm.
    SetTorque,
    /// Setpoint: raw PWM duty.
    SetPwm,
    /// Clear a latched fault.
    ClearFault,
    /// Reset the wheel model, or trip the load-control line (§3's fixed
    /// kind set has no separate TRIP_LCL slot; the two share this kind and
    /// are told apart by `p1`, see [`RESET_P1_PLAIN`]/[`RESET_P1_TRIP_LCL`]).
    Reset,
}

/// `Reset` sentinel: an ordinary software reset (speed zeroed, faults
/// untouched).
pub const RESET_P1_PLAIN: f32 = 0.0;
/// `Reset` sentinel: a TRIP_LCL (0x0B) request riding the `Reset` kind —
/// zeroes speed like a plain reset *and* latches an LCL-trip fault, so the
/// physics side can tell the two apart instead of observing an
/// indistinguishable reset (see `dispatch::handle_trip_lcl`).
pub const RESET_P1_TRIP_LCL: f32 = 1.0;

/// A pending command (§3 "Mailbox slot").
///
/// `p1`/`p2` carry the command's numeric arguments; which one is meaningful
/// depends on `kind` (e.g. for `SetMode`, `p1` holds the mode as a raw code).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MailboxSlot {
    /// Command kind.
    pub kind: MailboxKind,
    /// First numeric argument.
    pub p1: f32,
    /// Second numeric argument.
    pub p2: f32,
    /// Microsecond timestamp the command was submitted, from the HAL's
    /// monotonic clock (§1).
    pub ts_us: u64,
}

/// Single-slot, spin-locked command channel (§4.4 "Command mailbox").
///
/// Written only by the comms context, read and cleared only by the physics
/// context. At most one pending command at a time; `try_send` fails rather
/// than overwrite a pending one.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<MailboxSlot>,
}

impl Mailbox {
    /// Create an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a command, returning `false` if one is already pending.
    ///
    /// Holds the lock only around the plain-data copy, per §5's "bounded
    /// constant time" requirement — no blocking work happens under it.
    #[must_use]
    pub fn try_send(&self, kind: MailboxKind, p1: f32, p2: f32, ts_us: u64) -> bool {
        let mut guard = self.slot.lock();
        if guard.kind != MailboxKind::None {
            return false;
        }
        *guard = MailboxSlot {
            kind,
            p1,
            p2,
            ts_us,
        };
        true
    }

    /// Read and clear the pending command, if any.
    #[must_use]
    pub fn try_read(&self) -> Option<MailboxSlot> {
        let mut guard = self.slot.lock();
        if guard.kind == MailboxKind::None {
            return None;
        }
        Some(std::mem::take(&mut *guard))
    }

    /// Whether a command is currently pending, without consuming it.
    ///
    /// Diagnostic only (e.g. catalog `mailbox_pending` field); the physics
    /// context must use [`Mailbox::try_read`] to actually consume one.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.lock().kind != MailboxKind::None
    }
}
