//! Scenario JSON schema parser (§6 "Scenario JSON schema").
//!
//! Uses `serde`/`serde_json`, already in the teacher's dependency table,
//! the way `sigmf.rs` leans on `serde` for its metadata format: deserialize
//! into a permissive wire struct first (unknown keys silently skipped, the
//! default `serde` behavior), then validate into the engine's own
//! [`Scenario`] type so malformed-but-parseable documents still get a named
//! rejection reason instead of a generic serde error.

use serde::Deserialize;

use super::model::{Action, Condition, Event, Scenario, MAX_DESCRIPTION_LEN, MAX_EVENTS, MAX_NAME_LEN};
use crate::error::ScenarioError;
use crate::telemetry::Mode;

#[derive(Debug, Deserialize)]
struct WireCondition {
    mode_in: Option<String>,
    rpm_gt: Option<f32>,
    rpm_lt: Option<f32>,
    nsp_cmd_eq: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireAction {
    inject_crc_error: Option<bool>,
    drop_frames_pct: Option<u8>,
    delay_reply_ms: Option<u16>,
    force_nack: Option<bool>,
    flip_status_bits: Option<u32>,
    set_fault_bits: Option<u32>,
    clear_fault_bits: Option<u32>,
    limit_power_w: Option<f32>,
    limit_current_a: Option<f32>,
    limit_speed_rpm: Option<f32>,
    override_torque_mnm: Option<f32>,
    overspeed_fault: Option<bool>,
    trip_lcl: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    t_ms: u64,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    condition: Option<WireCondition>,
    action: WireAction,
}

#[derive(Debug, Deserialize)]
struct WireScenario {
    name: String,
    #[serde(default)]
    description: String,
    /// Accepted but ignored, per §6.
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<String>,
    schedule: Vec<WireEvent>,
}

fn parse_mode(s: &str) -> Result<Mode, ScenarioError> {
    match s {
        "CURRENT" => Ok(Mode::Current),
        "SPEED" => Ok(Mode::Speed),
        "TORQUE" => Ok(Mode::Torque),
        "PWM" => Ok(Mode::Pwm),
        other => Err(ScenarioError::BadEvent {
            index: 0,
            reason: format!("unknown mode_in '{other}'"),
        }),
    }
}

/// `"0xNN"` hex command code, per §6.
fn parse_hex_u8(s: &str) -> Result<u8, ScenarioError> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"));
    let digits = digits.ok_or_else(|| ScenarioError::BadEvent {
        index: 0,
        reason: format!("nsp_cmd_eq '{s}' missing 0x prefix"),
    })?;
    u8::from_str_radix(digits, 16).map_err(|_| ScenarioError::BadEvent {
        index: 0,
        reason: format!("nsp_cmd_eq '{s}' is not valid hex"),
    })
}

fn convert_condition(index: usize, wire: Option<WireCondition>) -> Result<Condition, ScenarioError> {
    let Some(wire) = wire else {
        return Ok(Condition::default());
    };
    let mode_in = wire
        .mode_in
        .as_deref()
        .map(parse_mode)
        .transpose()
        .map_err(|e| reindex(e, index))?;
    let nsp_cmd_eq = wire
        .nsp_cmd_eq
        .as_deref()
        .map(parse_hex_u8)
        .transpose()
        .map_err(|e| reindex(e, index))?;
    Ok(Condition {
        mode_in,
        rpm_gt: wire.rpm_gt,
        rpm_lt: wire.rpm_lt,
        nsp_cmd_eq,
    })
}

fn reindex(err: ScenarioError, index: usize) -> ScenarioError {
    match err {
        ScenarioError::BadEvent { reason, .. } => ScenarioError::BadEvent { index, reason },
        other => other,
    }
}

fn convert_action(wire: WireAction) -> Action {
    Action {
        drop_frames_pct: wire.drop_frames_pct,
        inject_crc_error: wire.inject_crc_error,
        delay_reply_ms: wire.delay_reply_ms,
        force_nack: wire.force_nack,
        set_fault_bits: wire.set_fault_bits,
        clear_fault_bits: wire.clear_fault_bits,
        flip_status_bits: wire.flip_status_bits,
        overspeed_fault: wire.overspeed_fault,
        trip_lcl: wire.trip_lcl,
        limit_power_w: wire.limit_power_w,
        limit_current_a: wire.limit_current_a,
        limit_speed_rpm: wire.limit_speed_rpm,
        override_torque_mnm: wire.override_torque_mnm,
    }
}

/// Parse and validate a scenario document (§6).
///
/// Rejects (rather than panicking on) a `name`/`schedule` that's missing,
/// a `name`/`description` over the byte-length caps, or a `schedule` longer
/// than [`MAX_EVENTS`]; any other malformed JSON surfaces as
/// [`ScenarioError::InvalidJson`] with serde's own message (covers
/// unterminated strings and the rest of plain syntax errors).
pub fn parse(text: &str) -> Result<Scenario, ScenarioError> {
    let wire: WireScenario =
        serde_json::from_str(text).map_err(|e| ScenarioError::InvalidJson(e.to_string()))?;

    if wire.name.is_empty() || wire.name.len() > MAX_NAME_LEN {
        return Err(ScenarioError::BadName);
    }
    if wire.description.len() > MAX_DESCRIPTION_LEN {
        return Err(ScenarioError::BadEvent {
            index: 0,
            reason: "description exceeds 127 bytes".into(),
        });
    }
    if wire.schedule.len() > MAX_EVENTS {
        return Err(ScenarioError::TooManyEvents {
            got: wire.schedule.len(),
            max: MAX_EVENTS,
        });
    }

    let mut events = Vec::with_capacity(wire.schedule.len());
    for (index, we) in wire.schedule.into_iter().enumerate() {
        let condition = convert_condition(index, we.condition)?;
        let action = convert_action(we.action);
        events.push(Event::new(we.t_ms, we.duration_ms, condition, action));
    }

    Ok(Scenario::new(wire.name, wire.description, events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_scenario() {
        let s = parse(r#"{"name":"t","schedule":[{"t_ms":1000,"action":{"force_nack":true}}]}"#)
            .unwrap();
        assert_eq!(s.name, "t");
        assert_eq!(s.events.len(), 1);
        assert_eq!(s.events[0].action.force_nack, Some(true));
    }

    #[test]
    fn rejects_missing_name() {
        let err = parse(r#"{"schedule":[]}"#).unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidJson(_)));
    }

    #[test]
    fn rejects_missing_schedule() {
        let err = parse(r#"{"name":"t"}"#).unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidJson(_)));
    }

    #[test]
    fn rejects_too_many_events() {
        let events: Vec<String> = (0..MAX_EVENTS + 1)
            .map(|i| format!(r#"{{"t_ms":{i},"action":{{}}}}"#))
            .collect();
        let doc = format!(r#"{{"name":"t","schedule":[{}]}}"#, events.join(","));
        let err = parse(&doc).unwrap_err();
        assert!(matches!(err, ScenarioError::TooManyEvents { .. }));
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = parse(r#"{"name":"t, "schedule":[]}"#).unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidJson(_)));
    }

    #[test]
    fn parses_condition_and_sorts_events() {
        let s = parse(
            r#"{"name":"t","schedule":[
                {"t_ms":5000,"action":{}},
                {"t_ms":2000,"action":{},"condition":{"mode_in":"SPEED","rpm_gt":100,"nsp_cmd_eq":"0x08"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(s.events[0].t_ms, 2000);
        assert_eq!(s.events[0].condition.mode_in, Some(Mode::Speed));
        assert_eq!(s.events[0].condition.nsp_cmd_eq, Some(0x08));
        assert_eq!(s.events[1].t_ms, 5000);
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let s = parse(
            r#"{"name":"t","version":"1.0","unknown_top":true,"schedule":[{"t_ms":0,"action":{"force_nack":true,"unknown_action_key":42}}]}"#,
        )
        .unwrap();
        assert_eq!(s.events[0].action.force_nack, Some(true));
    }
}
