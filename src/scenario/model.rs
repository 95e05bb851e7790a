//! Scenario data model: events, conditions, and injected actions (§3, §4.3).

use crate::telemetry::{Mode, Snapshot};

/// Fixed event capacity (§1 Non-goals: "dynamic scenario allocation").
pub const MAX_EVENTS: usize = 64;

/// Maximum `name` length, bytes (§6).
pub const MAX_NAME_LEN: usize = 31;
/// Maximum `description` length, bytes (§6).
pub const MAX_DESCRIPTION_LEN: usize = 127;

/// A predicate gate on an [`Event`] (§3 "Scenario"; §6 "Condition fields").
///
/// Every populated field must hold for the event to fire; an absent field is
/// a wildcard. Evaluated against the last published [`Snapshot`] and the
/// most recently dispatched command code, never against in-flight state
/// (§9 "Cycles").
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Condition {
    /// Fires only while the wheel is in this mode.
    pub mode_in: Option<Mode>,
    /// Fires only while speed exceeds this, rpm.
    pub rpm_gt: Option<f32>,
    /// Fires only while speed is below this, rpm.
    pub rpm_lt: Option<f32>,
    /// Fires only when the last dispatched command matched this code.
    pub nsp_cmd_eq: Option<u8>,
}

impl Condition {
    /// Whether this condition holds against `snapshot` and the last
    /// dispatched command code, combining every populated predicate with
    /// logical AND (§3).
    #[must_use]
    pub fn holds(&self, snapshot: &Snapshot, last_cmd_code: Option<u8>) -> bool {
        if let Some(mode) = self.mode_in
            && snapshot.mode != mode
        {
            return false;
        }
        if let Some(rpm) = self.rpm_gt
            && !(snapshot.speed_rpm > rpm)
        {
            return false;
        }
        if let Some(rpm) = self.rpm_lt
            && !(snapshot.speed_rpm < rpm)
        {
            return false;
        }
        if let Some(code) = self.nsp_cmd_eq
            && last_cmd_code != Some(code)
        {
            return false;
        }
        true
    }
}

/// The bag of independently-flagged injections an [`Event`] may carry
/// (§4.3, §6 "action object").
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Action {
    // Transport.
    /// Probability, 0..=100, that an outbound frame is suppressed.
    pub drop_frames_pct: Option<u8>,
    /// Flip the two checksum bytes before transmit.
    pub inject_crc_error: Option<bool>,
    /// Delay the reply transmission by this many milliseconds.
    pub delay_reply_ms: Option<u16>,
    /// Force the A bit to 0 (NACK) in the next reply.
    pub force_nack: Option<bool>,

    // Device.
    /// OR these bits into the fault word.
    pub set_fault_bits: Option<u32>,
    /// AND-NOT these bits out of the fault word.
    pub clear_fault_bits: Option<u32>,
    /// XOR these bits into the status word.
    pub flip_status_bits: Option<u32>,
    /// Synthesize a latched overspeed condition.
    pub overspeed_fault: Option<bool>,
    /// Synthesize an LCL trip.
    pub trip_lcl: Option<bool>,

    // Physics.
    /// Upper bound on reported power, W.
    pub limit_power_w: Option<f32>,
    /// Upper bound on reported current, A.
    pub limit_current_a: Option<f32>,
    /// Upper bound on reported speed, rpm.
    pub limit_speed_rpm: Option<f32>,
    /// Force the reported torque, mNm.
    pub override_torque_mnm: Option<f32>,
}

impl Action {
    /// Whether any transport-layer field is set.
    #[must_use]
    pub fn touches_transport(&self) -> bool {
        self.drop_frames_pct.is_some()
            || self.inject_crc_error.is_some()
            || self.delay_reply_ms.is_some()
            || self.force_nack.is_some()
    }

    /// Whether any device-layer field is set.
    #[must_use]
    pub fn touches_device(&self) -> bool {
        self.set_fault_bits.is_some()
            || self.clear_fault_bits.is_some()
            || self.flip_status_bits.is_some()
            || self.overspeed_fault.is_some()
            || self.trip_lcl.is_some()
    }

    /// Whether any physics-layer field is set.
    #[must_use]
    pub fn touches_physics(&self) -> bool {
        self.limit_power_w.is_some()
            || self.limit_current_a.is_some()
            || self.limit_speed_rpm.is_some()
            || self.override_torque_mnm.is_some()
    }

    /// Whether this action is an instant device/fault trigger applied once
    /// at trigger time regardless of `duration_ms` (§4.3).
    #[must_use]
    pub fn is_instant_device_trigger(&self) -> bool {
        self.overspeed_fault == Some(true) || self.trip_lcl == Some(true)
    }
}

/// A scheduled fault-injection event (§3 "Scenario").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Milliseconds after activation this event becomes eligible to fire.
    pub t_ms: u64,
    /// How long the resulting action slot stays active, 0 = instant or
    /// persistent depending on the action's fields (§4.3).
    pub duration_ms: u64,
    /// Gate on firing, evaluated each `update()` once `t_ms` has elapsed.
    pub condition: Condition,
    /// What to inject once this event fires.
    pub action: Action,
    /// Whether this event has already fired since the scenario was
    /// activated.
    pub triggered: bool,
    /// Wall-clock (HAL monotonic ms) the event fired, if it has.
    pub trigger_time_ms: Option<u64>,
}

impl Event {
    /// A fresh, untriggered event.
    #[must_use]
    pub fn new(t_ms: u64, duration_ms: u64, condition: Condition, action: Action) -> Self {
        Self {
            t_ms,
            duration_ms,
            condition,
            action,
            triggered: false,
            trigger_time_ms: None,
        }
    }
}

/// A named, loadable timeline of [`Event`]s (§3 "Scenario").
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    /// Scenario name, ≤31 bytes.
    pub name: String,
    /// Human-readable description, ≤127 bytes.
    pub description: String,
    /// Events, sorted by `t_ms` ascending at load time; ties keep source
    /// order (a stable sort).
    pub events: Vec<Event>,
}

impl Scenario {
    /// Build a scenario, sorting `events` by `t_ms` with a stable sort so
    /// ties keep their original relative order (§3).
    #[must_use]
    pub fn new(name: String, description: String, mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.t_ms);
        Self {
            name,
            description,
            events,
        }
    }

    /// Number of events that have fired at least once.
    #[must_use]
    pub fn triggered_count(&self) -> usize {
        self.events.iter().filter(|e| e.triggered).count()
    }
}
