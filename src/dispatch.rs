//! Command dispatch table and reply builder (§4.2).
//!
//! A closed set of handlers keyed by the 5-bit command code, matched with a
//! plain `match` rather than virtual dispatch, per the design note in §9 —
//! the same preference the teacher shows by keeping `Block` a trait object
//! only at the graph boundary, never for its fixed per-block behavior.

use log::{debug, warn};

use crate::catalog::FieldValue;
use crate::context::Context;
use crate::error::CatalogError;
use crate::mailbox::MailboxKind;
use crate::packet::{CommandCode, ControlByte, Packet};

/// ACK/NACK outcome of a dispatched command (§3 "Command result").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command succeeded.
    Ack,
    /// Command failed (type/range/access error, catalog miss, ...).
    Nack,
}

/// Result of a dispatch step (§3 "Command result").
///
/// Produced by [`dispatch`], consumed immediately by [`build_reply`]; never
/// stored past that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// ACK or NACK.
    pub status: Status,
    /// Reply payload bytes, empty unless the handler has data to return.
    pub data: Vec<u8>,
}

impl CommandResult {
    fn ack(data: Vec<u8>) -> Self {
        Self {
            status: Status::Ack,
            data,
        }
    }

    fn nack() -> Self {
        Self {
            status: Status::Nack,
            data: Vec::new(),
        }
    }
}

fn handle_ping() -> CommandResult {
    CommandResult::ack(Vec::new())
}

fn handle_peek(ctx: &Context, data: &[u8]) -> CommandResult {
    let Some(&id_lo) = data.first() else {
        return CommandResult::nack();
    };
    let id_hi = data.get(1).copied().unwrap_or(0);
    let id = u16::from_le_bytes([id_lo, id_hi]);
    match ctx.catalog.find_field_by_id(id) {
        Some(field) => CommandResult::ack(encode_field_value(&field.read())),
        None => CommandResult::nack(),
    }
}

fn handle_poke(ctx: &Context, data: &[u8]) -> CommandResult {
    if data.len() < 3 {
        return CommandResult::nack();
    }
    let id = u16::from_le_bytes([data[0], data[1]]);
    let Some(field) = ctx.catalog.find_field_by_id(id) else {
        return CommandResult::nack();
    };
    let value = match field.field_type {
        crate::catalog::FieldType::Bool => FieldValue::Bool(data[2] != 0),
        crate::catalog::FieldType::U8 => FieldValue::U8(data[2]),
        crate::catalog::FieldType::U32 | crate::catalog::FieldType::Hex => {
            if data.len() < 6 {
                return CommandResult::nack();
            }
            FieldValue::U32(u32::from_le_bytes(data[2..6].try_into().unwrap()))
        }
        crate::catalog::FieldType::Float => {
            if data.len() < 6 {
                return CommandResult::nack();
            }
            FieldValue::Float(f32::from_le_bytes(data[2..6].try_into().unwrap()))
        }
        crate::catalog::FieldType::Enum => {
            if data.len() < 6 {
                return CommandResult::nack();
            }
            FieldValue::Enum(u32::from_le_bytes(data[2..6].try_into().unwrap()))
        }
        crate::catalog::FieldType::String => {
            FieldValue::String(String::from_utf8_lossy(&data[2..]).into_owned())
        }
    };
    match field.write(value) {
        Ok(()) => CommandResult::ack(Vec::new()),
        Err(CatalogError::ReadOnly | CatalogError::TypeMismatch) => CommandResult::nack(),
        Err(_) => CommandResult::nack(),
    }
}

fn encode_field_value(value: &FieldValue) -> Vec<u8> {
    match value {
        FieldValue::Bool(b) => vec![u8::from(*b)],
        FieldValue::U8(v) => vec![*v],
        FieldValue::U32(v) | FieldValue::Hex(v) | FieldValue::Enum(v) => v.to_le_bytes().to_vec(),
        FieldValue::Float(v) => v.to_le_bytes().to_vec(),
        FieldValue::String(s) => s.clone().into_bytes(),
    }
}

fn handle_application_telemetry(ctx: &Context, data: &[u8]) -> CommandResult {
    let sub_id = data.first().copied().unwrap_or(0);
    let Some(snapshot) = ctx.last_snapshot() else {
        return CommandResult::nack();
    };
    let bytes = match sub_id {
        0 => snapshot.speed_rpm.to_le_bytes().to_vec(),
        1 => snapshot.torque_mnm.to_le_bytes().to_vec(),
        2 => snapshot.current_a.to_le_bytes().to_vec(),
        3 => snapshot.power_w.to_le_bytes().to_vec(),
        4 => snapshot.bus_voltage_v.to_le_bytes().to_vec(),
        5 => snapshot.faults.bits().to_le_bytes().to_vec(),
        _ => return CommandResult::nack(),
    };
    CommandResult::ack(bytes)
}

fn handle_application_command(ctx: &Context, data: &[u8], now_us: u64) -> CommandResult {
    if data.len() < 5 {
        return CommandResult::nack();
    }
    let kind = match data[0] {
        0 => MailboxKind::SetMode,
        1 => MailboxKind::SetSpeed,
        2 => MailboxKind::SetCurrent,
        3 => MailboxKind::SetTorque,
        4 => MailboxKind::SetPwm,
        _ => return CommandResult::nack(),
    };
    let p1 = f32::from_le_bytes(data[1..5].try_into().unwrap());
    let p2 = data
        .get(5..9)
        .and_then(|b| b.try_into().ok())
        .map(f32::from_le_bytes)
        .unwrap_or(0.0);
    if ctx.mailbox.try_send(kind, p1, p2, now_us) {
        CommandResult::ack(Vec::new())
    } else {
        CommandResult::nack()
    }
}

fn handle_clear_fault(ctx: &Context, now_us: u64) -> CommandResult {
    if ctx.mailbox.try_send(MailboxKind::ClearFault, 0.0, 0.0, now_us) {
        CommandResult::ack(Vec::new())
    } else {
        CommandResult::nack()
    }
}

fn handle_configure_protection(ctx: &Context, data: &[u8]) -> CommandResult {
    // voltage, speed, current, power, duty thresholds: 5 f32s.
    if data.len() < 20 {
        return CommandResult::nack();
    }
    let mut values = [0.0f32; 5];
    for (slot, chunk) in values.iter_mut().zip(data[..20].chunks_exact(4)) {
        let v = f32::from_le_bytes(chunk.try_into().unwrap());
        if !v.is_finite() || v < 0.0 {
            return CommandResult::nack();
        }
        *slot = v;
    }
    ctx.set_protection_thresholds(values[0], values[1], values[2], values[3], values[4]);
    CommandResult::ack(Vec::new())
}

fn handle_trip_lcl(ctx: &Context, now_us: u64) -> CommandResult {
    // §3's mailbox-kind set has no dedicated TRIP_LCL slot, so this rides
    // `Reset` with the `RESET_P1_TRIP_LCL` sentinel in `p1` rather than the
    // plain-reset `RESET_P1_PLAIN`, so the physics side can latch an
    // LCL-trip fault instead of performing an indistinguishable reset.
    if ctx
        .mailbox
        .try_send(MailboxKind::Reset, crate::mailbox::RESET_P1_TRIP_LCL, 0.0, now_us)
    {
        CommandResult::ack(Vec::new())
    } else {
        CommandResult::nack()
    }
}

/// Dispatch a command code against `ctx`, returning `None` for an unknown
/// code — the dispatcher counts `cmd_errors` and sends no reply for that
/// case (§4.2, §7).
pub fn dispatch(ctx: &Context, code_raw: u8, data: &[u8], now_us: u64) -> Option<CommandResult> {
    let Ok(code) = CommandCode::try_from(code_raw) else {
        warn!("dispatch: unknown command code {code_raw:#04x}");
        ctx.count_cmd_error(code_raw);
        return None;
    };
    ctx.set_last_cmd_code(code_raw);
    debug!("dispatch: {code:?}");
    Some(match code {
        CommandCode::Ping => handle_ping(),
        CommandCode::Peek => handle_peek(ctx, data),
        CommandCode::Poke => handle_poke(ctx, data),
        CommandCode::ApplicationTelemetry => handle_application_telemetry(ctx, data),
        CommandCode::ApplicationCommand => handle_application_command(ctx, data, now_us),
        CommandCode::ClearFault => handle_clear_fault(ctx, now_us),
        CommandCode::ConfigureProtection => handle_configure_protection(ctx, data),
        CommandCode::TripLcl => handle_trip_lcl(ctx, now_us),
    })
}

/// Build a reply frame payload (`dest|src|ctrl|data`, unchecksummed) for a
/// request that wanted one (§4.2 "Reply builder").
///
/// Caller is responsible for appending the checksum and framing the bytes
/// (§4.1); this only builds the header+payload per the reply-construction
/// rule: `dest = request.src`, `src = own_address`, POLL cleared, A set
/// from `result.status`, B preserved from the request.
#[must_use]
pub fn build_reply(request: &Packet, own_address: u8, result: &CommandResult) -> Vec<u8> {
    let ack = result.status == Status::Ack;
    let ctrl = ControlByte::build(false, request.ctrl.b(), ack, request.ctrl.command_raw());
    let mut out = Vec::with_capacity(3 + result.data.len());
    out.push(request.src);
    out.push(own_address);
    out.push(ctrl.raw());
    out.extend_from_slice(&result.data);
    out
}
