//! The single owned context struct bundling shared state (§9 "Global
//! state").
//!
//! Counters, last-error fields, the catalog, and the active scenario all
//! live here, passed by reference to the comms loop — the same "one struct,
//! passed around" shape the teacher uses for `Graph`/`MTGraph` owning every
//! block's state, just generalized from a DSP flow graph to protocol/fault
//! bookkeeping.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use crate::catalog::{
    Access, Catalog, Field, FieldType, FieldValue, Table,
    cells::{CounterCell, StringCell, TriggerCell},
};
use crate::mailbox::Mailbox;
use crate::scenario::Engine as ScenarioEngine;
use crate::telemetry::{Queue as TelemetryQueue, Snapshot};

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

/// Point-in-time copy of the §7 error counters, for the catalog's `stats`
/// table and for tests (§10.6 "Supplemented features").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Framing-layer errors (`ESCAPE_INVALID`/`END_IN_ESCAPE`).
    pub slip_errors: u32,
    /// Protocol-parser errors (`TOO_SHORT`/`BAD_LENGTH`/`BAD_CRC`/`NULL_PTR`).
    pub parse_errors: u32,
    /// Packets silently dropped for a foreign, non-broadcast address.
    pub wrong_addr: u32,
    /// Dispatch failures: unknown command code.
    pub cmd_errors: u32,
    /// Transport transmit failures.
    pub error_count: u32,
    /// Last unknown command code seen, if any.
    pub last_cmd_err: Option<u8>,
}

/// Counters and diagnostic fields, each updated by exactly one context
/// (§7, §9 "one writer per datum"), using plain atomics rather than a lock
/// since every individual counter is its own datum.
struct Counters {
    slip_errors: Arc<AtomicU32>,
    parse_errors: Arc<AtomicU32>,
    wrong_addr: Arc<AtomicU32>,
    cmd_errors: Arc<AtomicU32>,
    error_count: Arc<AtomicU32>,
    last_cmd_err: AtomicU32, // 0..=31 valid code, u32::MAX = "none".
}

const NO_CMD_ERR: u32 = u32::MAX;

impl Default for Counters {
    fn default() -> Self {
        Self {
            slip_errors: counter(),
            parse_errors: counter(),
            wrong_addr: counter(),
            cmd_errors: counter(),
            error_count: counter(),
            last_cmd_err: AtomicU32::new(NO_CMD_ERR),
        }
    }
}

impl Counters {
    fn snapshot(&self) -> Stats {
        let raw = self.last_cmd_err.load(Ordering::Relaxed);
        Stats {
            slip_errors: self.slip_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            wrong_addr: self.wrong_addr.load(Ordering::Relaxed),
            cmd_errors: self.cmd_errors.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_cmd_err: (raw != NO_CMD_ERR).then_some(raw as u8),
        }
    }
}

/// The one owned context struct, shared by reference between the comms
/// loop, the dispatcher, the scenario engine, and the console (§9).
pub struct Context {
    /// Own bus address, 0..=7 (§6).
    pub own_address: u8,
    /// Command mailbox to the physics core.
    pub mailbox: Arc<Mailbox>,
    /// Telemetry queue from the physics core.
    pub telemetry: Arc<TelemetryQueue>,
    /// Field/table registry consumed by the console.
    pub catalog: Catalog,
    /// Scenario timeline engine.
    pub scenario: ScenarioEngine,
    /// Most recently dispatched command code, for scenario conditions
    /// (§4.3 `nsp_cmd_eq`).
    last_cmd_code: AtomicU8,
    /// Textual reason for the last rejected scenario load (§7).
    last_scenario_error: Mutex<Option<String>>,
    counters: Counters,
    /// Rising-edge latch for the scenario table's write-triggered `trigger`
    /// field (§4.5); set by a catalog write, polled and cleared by the
    /// comms loop via [`Context::poll_trigger`].
    pending_trigger: Arc<AtomicBool>,
    /// Mirrors of the active scenario's name/state, kept in sync by
    /// [`Context::sync_scenario_fields`] once per comms-loop tick so the
    /// catalog's read-only `scenario.active_name`/`scenario.active_state`
    /// fields have something to read without borrowing the engine.
    scenario_name_cell: Arc<Mutex<String>>,
    scenario_state_cell: Arc<Mutex<String>>,
    /// Last snapshot seen from the telemetry queue, cached so both the
    /// `APPLICATION_TELEMETRY` handler and the scenario engine's condition
    /// evaluation read the same coherent sample instead of each draining
    /// the queue themselves (§9 "Cycles": conditions evaluate against the
    /// last published snapshot, never in-flight state). Shared (not just
    /// owned) so the `wheel` catalog table's read-only fields (§4.5,
    /// §10.6) can read through the same cell without borrowing `Context`.
    last_snapshot: Arc<Mutex<Option<Snapshot>>>,
    /// Configured protection thresholds (§4.2 `CONFIGURE_PROTECTION`),
    /// shared with the `protection` catalog table the same way.
    protection: Arc<Protection>,
}

/// Protection thresholds set by `CONFIGURE_PROTECTION` (§4.2), stored as
/// atomics so they're reachable from both the dispatch handler and the
/// `protection` catalog table without a lock per read.
#[derive(Default)]
struct Protection {
    voltage_v: AtomicU32,
    speed_rpm: AtomicU32,
    current_a: AtomicU32,
    power_w: AtomicU32,
    duty_pct: AtomicU32,
}

impl Protection {
    fn get(field: &AtomicU32) -> f32 {
        f32::from_bits(field.load(Ordering::Relaxed))
    }

    fn set(field: &AtomicU32, value: f32) {
        field.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Read-only [`crate::catalog::FieldStorage`] over one `f32` field of a
/// published [`Snapshot`], selected by `extract` (§10.6 "wheel" table).
struct SnapshotField {
    snapshot: Arc<Mutex<Option<Snapshot>>>,
    extract: fn(&Snapshot) -> FieldValue,
}

impl crate::catalog::FieldStorage for SnapshotField {
    fn read(&self) -> FieldValue {
        match &*self.snapshot.lock().unwrap() {
            Some(snap) => (self.extract)(snap),
            None => (self.extract)(&Snapshot::default()),
        }
    }

    fn write(&self, _value: FieldValue) -> Result<(), crate::error::CatalogError> {
        Err(crate::error::CatalogError::ReadOnly)
    }
}

/// Read-write [`crate::catalog::FieldStorage`] over one protection
/// threshold (§4.2 `CONFIGURE_PROTECTION`, §10.6 "protection" table).
struct ProtectionField {
    protection: Arc<Protection>,
    get: fn(&Protection) -> f32,
    set: fn(&Protection, f32),
}

impl crate::catalog::FieldStorage for ProtectionField {
    fn read(&self) -> FieldValue {
        FieldValue::Float((self.get)(&self.protection))
    }

    fn write(&self, value: FieldValue) -> Result<(), crate::error::CatalogError> {
        match value {
            FieldValue::Float(v) if v.is_finite() && v >= 0.0 => {
                (self.set)(&self.protection, v);
                Ok(())
            }
            _ => Err(crate::error::CatalogError::TypeMismatch),
        }
    }
}

impl Context {
    /// Build a context for `own_address`, wiring its stats counters into a
    /// registered `stats` catalog table (§10.6).
    #[must_use]
    pub fn new(own_address: u8, mailbox: Arc<Mailbox>, telemetry: Arc<TelemetryQueue>) -> Self {
        Self {
            own_address,
            mailbox,
            telemetry,
            catalog: Catalog::new(),
            scenario: ScenarioEngine::new(),
            last_cmd_code: AtomicU8::new(0xff),
            last_scenario_error: Mutex::new(None),
            counters: Counters::default(),
            pending_trigger: Arc::new(AtomicBool::new(false)),
            scenario_name_cell: Arc::new(Mutex::new(String::new())),
            scenario_state_cell: Arc::new(Mutex::new("EMPTY".to_string())),
            last_snapshot: Arc::new(Mutex::new(None)),
            protection: Arc::new(Protection::default()),
        }
    }

    /// Register the `scenario` table (§4.5, §10.6): a write-triggered
    /// `trigger` field whose rising edge launches the loaded scenario, and
    /// two read-only mirrors of its name/activation state.
    pub fn register_scenario_table(&mut self) {
        // Field ids here and in the other `register_*_table` methods are
        // opaque but global (PEEK/POKE address a field by id alone, with no
        // table qualifier, per §4.2) — each table gets a disjoint range so
        // no two fields in the catalog ever share an id.
        let mut table = Table::new(1, "scenario");
        table.add_field(Field::new(
            10,
            "trigger",
            FieldType::Bool,
            "",
            Access::Rw,
            FieldValue::Bool(false),
            Box::new(TriggerCell(Arc::clone(&self.pending_trigger))),
        ));
        table.add_field(Field::new(
            11,
            "active_name",
            FieldType::String,
            "",
            Access::Ro,
            FieldValue::String(String::new()),
            Box::new(StringCell(Arc::clone(&self.scenario_name_cell))),
        ));
        table.add_field(Field::new(
            12,
            "active_state",
            FieldType::String,
            "",
            Access::Ro,
            FieldValue::String("EMPTY".to_string()),
            Box::new(StringCell(Arc::clone(&self.scenario_state_cell))),
        ));
        self.catalog.register(table);
    }

    /// Read and clear the `scenario.trigger` rising edge (§4.5).
    pub fn poll_trigger(&self) -> bool {
        TriggerCell::take(&self.pending_trigger)
    }

    /// Mirror the active scenario's name/state into the read-only catalog
    /// fields. Called once per comms-loop tick.
    pub fn sync_scenario_fields(&self) {
        let name = self
            .scenario
            .scenario()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let state = match self.scenario.state() {
            crate::scenario::State::Empty => "EMPTY",
            crate::scenario::State::Loaded => "LOADED",
            crate::scenario::State::Active => "ACTIVE",
        };
        *self.scenario_name_cell.lock().unwrap() = name;
        *self.scenario_state_cell.lock().unwrap() = state.to_string();
    }

    /// Cache the most recently published telemetry snapshot, if one is
    /// available. Called once per comms-loop tick, before scenario
    /// conditions are evaluated or `APPLICATION_TELEMETRY` is dispatched.
    pub fn refresh_snapshot(&self) {
        if let Some(snapshot) = self.telemetry.read_latest() {
            *self.last_snapshot.lock().unwrap() = Some(snapshot);
        }
    }

    /// The last cached snapshot, if any (§9 "Cycles").
    #[must_use]
    pub fn last_snapshot(&self) -> Option<Snapshot> {
        *self.last_snapshot.lock().unwrap()
    }

    /// Register the `stats` table (§10.6) into `self.catalog`, wiring each
    /// field to a clone of the matching counter's `Arc` so the table stays
    /// live even if the catalog is read from another context later.
    pub fn register_stats_table(&mut self) {
        let mut table = Table::new(0, "stats");
        table.add_field(Field::new(
            0,
            "slip_errors",
            FieldType::U32,
            "",
            Access::Ro,
            FieldValue::U32(0),
            Box::new(CounterCell(Arc::clone(&self.counters.slip_errors))),
        ));
        table.add_field(Field::new(
            1,
            "parse_errors",
            FieldType::U32,
            "",
            Access::Ro,
            FieldValue::U32(0),
            Box::new(CounterCell(Arc::clone(&self.counters.parse_errors))),
        ));
        table.add_field(Field::new(
            2,
            "wrong_addr",
            FieldType::U32,
            "",
            Access::Ro,
            FieldValue::U32(0),
            Box::new(CounterCell(Arc::clone(&self.counters.wrong_addr))),
        ));
        table.add_field(Field::new(
            3,
            "cmd_errors",
            FieldType::U32,
            "",
            Access::Ro,
            FieldValue::U32(0),
            Box::new(CounterCell(Arc::clone(&self.counters.cmd_errors))),
        ));
        table.add_field(Field::new(
            4,
            "error_count",
            FieldType::U32,
            "",
            Access::Ro,
            FieldValue::U32(0),
            Box::new(CounterCell(Arc::clone(&self.counters.error_count))),
        ));
        self.catalog.register(table);
    }

    /// Register the `wheel` table (§4.5, §10.6): read-only fields mirroring
    /// the most recently published [`Snapshot`], so PEEK and the console
    /// can observe live wheel state the same way they observe counters.
    pub fn register_wheel_table(&mut self) {
        let mut table = Table::new(2, "wheel");
        let field = |id, name: &str, ftype, units, extract: fn(&Snapshot) -> FieldValue| {
            Field::new(
                id,
                name,
                ftype,
                units,
                Access::Ro,
                extract(&Snapshot::default()),
                Box::new(SnapshotField {
                    snapshot: Arc::clone(&self.last_snapshot),
                    extract,
                }),
            )
        };
        table.add_field(field(20, "speed_rpm", FieldType::Float, "rpm", |s| {
            FieldValue::Float(s.speed_rpm)
        }));
        table.add_field(field(21, "torque_mnm", FieldType::Float, "mNm", |s| {
            FieldValue::Float(s.torque_mnm)
        }));
        table.add_field(field(22, "current_a", FieldType::Float, "A", |s| {
            FieldValue::Float(s.current_a)
        }));
        table.add_field(field(23, "power_w", FieldType::Float, "W", |s| {
            FieldValue::Float(s.power_w)
        }));
        table.add_field(field(24, "bus_voltage_v", FieldType::Float, "V", |s| {
            FieldValue::Float(s.bus_voltage_v)
        }));
        table.add_field(
            field(25, "mode", FieldType::Enum, "", |s| {
                FieldValue::Enum(s.mode as u32)
            })
            .with_enum_labels(&["CURRENT", "SPEED", "TORQUE", "PWM"]),
        );
        table.add_field(
            field(26, "direction", FieldType::Enum, "", |s| {
                FieldValue::Enum(s.direction as u32)
            })
            .with_enum_labels(&["POSITIVE", "NEGATIVE"]),
        );
        table.add_field(field(27, "faults", FieldType::Hex, "", |s| {
            FieldValue::Hex(s.faults.bits())
        }));
        table.add_field(field(28, "warnings", FieldType::Hex, "", |s| {
            FieldValue::Hex(s.warnings.bits())
        }));
        table.add_field(field(29, "latches", FieldType::Hex, "", |s| {
            FieldValue::Hex(s.latches.bits())
        }));
        table.add_field(field(30, "tick_count", FieldType::U32, "", |s| {
            FieldValue::U32(s.tick_count as u32)
        }));
        self.catalog.register(table);
    }

    /// Register the `protection` table (§4.2 `CONFIGURE_PROTECTION`, §10.6):
    /// read-write threshold fields the dispatch handler stores into and the
    /// console/PEEK-POKE surface can inspect or adjust directly.
    pub fn register_protection_table(&mut self) {
        let mut table = Table::new(3, "protection");
        let field = |id,
                     name: &str,
                     units,
                     get: fn(&Protection) -> f32,
                     set: fn(&Protection, f32)| {
            Field::new(
                id,
                name,
                FieldType::Float,
                units,
                Access::Rw,
                FieldValue::Float(get(&self.protection)),
                Box::new(ProtectionField {
                    protection: Arc::clone(&self.protection),
                    get,
                    set,
                }),
            )
        };
        table.add_field(field(31, "voltage_v", "V", |p| Protection::get(&p.voltage_v), |p, v| {
            Protection::set(&p.voltage_v, v)
        }));
        table.add_field(field(32, "speed_rpm", "rpm", |p| Protection::get(&p.speed_rpm), |p, v| {
            Protection::set(&p.speed_rpm, v)
        }));
        table.add_field(field(33, "current_a", "A", |p| Protection::get(&p.current_a), |p, v| {
            Protection::set(&p.current_a, v)
        }));
        table.add_field(field(34, "power_w", "W", |p| Protection::get(&p.power_w), |p, v| {
            Protection::set(&p.power_w, v)
        }));
        table.add_field(field(35, "duty_pct", "%", |p| Protection::get(&p.duty_pct), |p, v| {
            Protection::set(&p.duty_pct, v)
        }));
        self.catalog.register(table);
    }

    /// Store a newly validated set of protection thresholds (§4.2
    /// `CONFIGURE_PROTECTION`), called by the dispatch handler after range
    /// validation passes.
    pub(crate) fn set_protection_thresholds(
        &self,
        voltage_v: f32,
        speed_rpm: f32,
        current_a: f32,
        power_w: f32,
        duty_pct: f32,
    ) {
        Protection::set(&self.protection.voltage_v, voltage_v);
        Protection::set(&self.protection.speed_rpm, speed_rpm);
        Protection::set(&self.protection.current_a, current_a);
        Protection::set(&self.protection.power_w, power_w);
        Protection::set(&self.protection.duty_pct, duty_pct);
    }

    /// A point-in-time copy of the error counters (§7, §10.6).
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }

    /// Bump the framing-error counter.
    pub fn count_slip_error(&self) {
        self.counters.slip_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump the protocol parse-error counter.
    pub fn count_parse_error(&self) {
        self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump the wrong-address counter (packet silently dropped).
    pub fn count_wrong_addr(&self) {
        self.counters.wrong_addr.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump the dispatch-error counter and record the offending code.
    pub fn count_cmd_error(&self, code: u8) {
        self.counters.cmd_errors.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_cmd_err
            .store(u32::from(code), Ordering::Relaxed);
    }

    /// Bump the transmit-failure counter.
    pub fn count_transmit_error(&self) {
        self.counters.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the most recently dispatched command code, for the scenario
    /// engine's `nsp_cmd_eq` condition.
    pub fn set_last_cmd_code(&self, code: u8) {
        self.last_cmd_code.store(code, Ordering::Relaxed);
    }

    /// The most recently dispatched command code, if any.
    #[must_use]
    pub fn last_cmd_code(&self) -> Option<u8> {
        match self.last_cmd_code.load(Ordering::Relaxed) {
            0xff => None,
            code => Some(code),
        }
    }

    /// Record a scenario-load rejection reason (§7).
    pub fn set_scenario_error(&self, reason: String) {
        *self.last_scenario_error.lock().unwrap() = Some(reason);
    }

    /// The last scenario-load rejection reason, if any.
    #[must_use]
    pub fn scenario_error(&self) -> Option<String> {
        self.last_scenario_error.lock().unwrap().clone()
    }
}
