//! Scenario activation state machine and per-tick stepper (§4.3).

use log::info;

use super::model::{Action, Scenario};
use crate::telemetry::Snapshot;

/// Activation state (§4.3 "Activation state machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// No scenario loaded.
    #[default]
    Empty,
    /// A scenario is loaded but not running.
    Loaded,
    /// A scenario is running; `update()` advances its timeline.
    Active,
}

/// An active injection, with an optional expiry (§4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveSlot {
    /// The action currently in effect, or `None` if the slot is clear.
    pub action: Option<Action>,
    /// HAL monotonic ms the slot expires, or `None` for a persistent
    /// (`duration_ms == 0`) override.
    pub expires_at_ms: Option<u64>,
}

impl ActiveSlot {
    fn clear(&mut self) {
        self.action = None;
        self.expires_at_ms = None;
    }

    fn expire_if_due(&mut self, now_ms: u64) {
        if let Some(expiry) = self.expires_at_ms
            && now_ms >= expiry
        {
            self.clear();
        }
    }
}

/// Runs a single active [`Scenario`]'s timeline (§4.3).
#[derive(Debug, Default)]
pub struct Engine {
    state: State,
    scenario: Option<Scenario>,
    t0_ms: u64,
    transport: ActiveSlot,
    device: ActiveSlot,
    physics: ActiveSlot,
    /// One-shot device triggers (overspeed_fault/trip_lcl) consumed by the
    /// device model this tick; cleared by [`Engine::take_instant_triggers`].
    pending_instant: Vec<Action>,
    last_error: Option<String>,
}

impl Engine {
    /// A fresh, empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current activation state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The loaded/active scenario, if any.
    #[must_use]
    pub fn scenario(&self) -> Option<&Scenario> {
        self.scenario.as_ref()
    }

    /// Most recent scenario-load rejection reason, if any (§7).
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Load a scenario, replacing any prior one (LOADED→LOADED is allowed,
    /// per §4.3). Transitions to `LOADED`.
    pub fn load(&mut self, scenario: Scenario) {
        info!("scenario: loaded '{}'", scenario.name);
        self.scenario = Some(scenario);
        self.state = State::Loaded;
        self.transport.clear();
        self.device.clear();
        self.physics.clear();
        self.last_error = None;
    }

    /// Record a scenario-load rejection (§7 "Scenario load").
    pub fn record_load_error(&mut self, reason: String) {
        self.last_error = Some(reason);
    }

    /// Activate the loaded scenario. Resets every event's `triggered` flag
    /// and clears all action slots. Reactivating an already-`ACTIVE`
    /// scenario deactivates first (§4.3).
    pub fn activate(&mut self, now_ms: u64) -> bool {
        if self.state == State::Active {
            self.deactivate();
        }
        let Some(scenario) = self.scenario.as_mut() else {
            return false;
        };
        for event in &mut scenario.events {
            event.triggered = false;
            event.trigger_time_ms = None;
        }
        self.t0_ms = now_ms;
        self.state = State::Active;
        info!("scenario: activated '{}' at t={now_ms}", scenario.name);
        true
    }

    /// Deactivate the running scenario, clearing all action slots.
    /// Transitions to `LOADED`; a no-op if not currently `ACTIVE`.
    pub fn deactivate(&mut self) {
        if self.state != State::Active {
            return;
        }
        self.transport.clear();
        self.device.clear();
        self.physics.clear();
        self.state = State::Loaded;
        if let Some(s) = &self.scenario {
            info!("scenario: deactivated '{}'", s.name);
        }
    }

    /// Advance the timeline by one comms-loop tick (§4.3 "update()").
    ///
    /// For every untriggered event whose time gate has passed and whose
    /// condition holds against `snapshot`/`last_cmd_code`, marks it
    /// triggered and applies its action to the matching slot(s). Expires
    /// any slot whose `duration_ms` has elapsed.
    pub fn update(&mut self, now_ms: u64, snapshot: &Snapshot, last_cmd_code: Option<u8>) {
        self.transport.expire_if_due(now_ms);
        self.device.expire_if_due(now_ms);
        self.physics.expire_if_due(now_ms);

        if self.state != State::Active {
            return;
        }
        let elapsed = now_ms.saturating_sub(self.t0_ms);
        let Some(scenario) = self.scenario.as_mut() else {
            return;
        };
        for event in &mut scenario.events {
            if event.triggered {
                continue;
            }
            if elapsed < event.t_ms {
                continue;
            }
            if !event.condition.holds(snapshot, last_cmd_code) {
                continue;
            }
            event.triggered = true;
            event.trigger_time_ms = Some(now_ms);
            let action = event.action;
            let expiry = (event.duration_ms > 0).then_some(now_ms + event.duration_ms);

            if action.is_instant_device_trigger() {
                self.pending_instant.push(action);
            }
            if action.touches_transport() {
                self.transport.action = Some(action);
                self.transport.expires_at_ms = expiry;
            }
            if action.touches_device() && !action.is_instant_device_trigger() {
                self.device.action = Some(action);
                self.device.expires_at_ms = expiry;
            }
            if action.touches_physics() {
                self.physics.action = Some(action);
                self.physics.expires_at_ms = expiry;
            }
        }
    }

    /// The currently active transport injection, if any.
    #[must_use]
    pub fn transport_action(&self) -> Option<Action> {
        self.transport.action
    }

    /// The currently active (durated) device injection, if any.
    #[must_use]
    pub fn device_action(&self) -> Option<Action> {
        self.device.action
    }

    /// The currently active physics injection, if any.
    #[must_use]
    pub fn physics_action(&self) -> Option<Action> {
        self.physics.action
    }

    /// Drain any instant device/fault triggers queued since the last call
    /// (overspeed_fault/trip_lcl), applied once at trigger time (§4.3).
    pub fn take_instant_triggers(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_instant)
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::{Condition, Event};
    use super::*;

    fn scenario_with(events: Vec<Event>) -> Scenario {
        Scenario::new("s".into(), "".into(), events)
    }

    #[test]
    fn activate_resets_triggered_flags_and_sets_t0() {
        let mut ev = Event::new(1000, 0, Condition::default(), Action::default());
        ev.triggered = true;
        let mut eng = Engine::new();
        eng.load(scenario_with(vec![ev]));
        eng.activate(5000);
        assert_eq!(eng.state(), State::Active);
        assert!(!eng.scenario().unwrap().events[0].triggered);
    }

    #[test]
    fn instant_and_durated_actions_per_window() {
        let crc_event = Event::new(
            1000,
            0,
            Condition::default(),
            Action {
                inject_crc_error: Some(true),
                ..Default::default()
            },
        );
        let drop_event = Event::new(
            2000,
            1000,
            Condition::default(),
            Action {
                drop_frames_pct: Some(50),
                ..Default::default()
            },
        );
        let mut eng = Engine::new();
        eng.load(scenario_with(vec![crc_event, drop_event]));
        eng.activate(0);
        let snap = Snapshot::default();

        eng.update(500, &snap, None);
        assert!(eng.transport_action().is_none());

        eng.update(1000, &snap, None);
        assert_eq!(
            eng.transport_action().unwrap().inject_crc_error,
            Some(true)
        );

        eng.update(2000, &snap, None);
        assert_eq!(eng.transport_action().unwrap().drop_frames_pct, Some(50));

        eng.update(3000, &snap, None);
        assert!(eng.transport_action().is_none());
    }

    #[test]
    fn deactivate_cancels_active_duration_immediately() {
        let ev = Event::new(
            0,
            10_000,
            Condition::default(),
            Action {
                drop_frames_pct: Some(100),
                ..Default::default()
            },
        );
        let mut eng = Engine::new();
        eng.load(scenario_with(vec![ev]));
        eng.activate(0);
        eng.update(0, &Snapshot::default(), None);
        assert!(eng.transport_action().is_some());
        eng.deactivate();
        assert!(eng.transport_action().is_none());
    }

    #[test]
    fn overspeed_fault_fires_once_and_is_counted() {
        let ev = Event::new(
            5000,
            0,
            Condition::default(),
            Action {
                overspeed_fault: Some(true),
                ..Default::default()
            },
        );
        let mut eng = Engine::new();
        eng.load(scenario_with(vec![ev]));
        eng.activate(0);
        let snap = Snapshot::default();
        eng.update(5000, &snap, None);
        assert_eq!(eng.take_instant_triggers().len(), 1);
        eng.update(6000, &snap, None);
        assert!(eng.take_instant_triggers().is_empty());
        assert_eq!(eng.scenario().unwrap().triggered_count(), 1);
    }

    #[test]
    fn reactivation_from_active_deactivates_first() {
        let ev = Event::new(
            0,
            10_000,
            Condition::default(),
            Action {
                force_nack: Some(true),
                ..Default::default()
            },
        );
        let mut eng = Engine::new();
        eng.load(scenario_with(vec![ev]));
        eng.activate(0);
        eng.update(0, &Snapshot::default(), None);
        assert!(eng.transport_action().is_some());
        eng.activate(100);
        assert!(eng.transport_action().is_none());
        assert_eq!(eng.state(), State::Active);
    }
}
