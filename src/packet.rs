//! Parsed packet view and control-byte bit layout (§3).
//!
//! The wire layout (`dest|src|ctrl|data…|crc_lo|crc_hi`) is a fixed,
//! addressed header much like the `FrameHeader` idea seen across the
//! example pack, but kept as a plain struct of primitive fields rather than
//! a zero-copy cast, matching the teacher's preference for small explicit
//! structs (`Tag`, `BlockRet`) over unsafe reinterpretation.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Control-byte bit for "reply expected" (bit 7).
pub const POLL_BIT: u8 = 1 << 7;
/// Control-byte ack-protocol bit, preserved request→reply (bit 6).
pub const B_BIT: u8 = 1 << 6;
/// Control-byte ack/nack selector, set by the reply builder (bit 5).
pub const A_BIT: u8 = 1 << 5;
/// Mask for the 5-bit command code (bits 4:0).
pub const CMD_MASK: u8 = 0x1f;

/// Broadcast destination address: accepted, never replied to (§6).
pub const BROADCAST: u8 = 0xff;

/// The fixed 5-bit command codes this emulator understands (§4.2).
///
/// Closed set, matched with a plain `match` rather than dynamic dispatch,
/// per the design note in §9 ("A tagged enum with a match is preferred
/// over virtual dispatch; the set is closed").
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum CommandCode {
    /// 0x00 — PING.
    Ping = 0x00,
    /// 0x02 — PEEK a catalog field.
    Peek = 0x02,
    /// 0x03 — POKE a catalog field.
    Poke = 0x03,
    /// 0x07 — read a telemetry block.
    ApplicationTelemetry = 0x07,
    /// 0x08 — submit a setpoint/mode change.
    ApplicationCommand = 0x08,
    /// 0x09 — clear a latched fault.
    ClearFault = 0x09,
    /// 0x0A — update protection thresholds.
    ConfigureProtection = 0x0a,
    /// 0x0B — trip the load-control line.
    TripLcl = 0x0b,
}

/// Decoded view of a control byte (§3 "Control byte").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlByte(u8);

impl ControlByte {
    /// Wrap a raw control byte.
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// The raw byte.
    #[must_use]
    pub fn raw(self) -> u8 {
        self.0
    }

    /// Bit 7: a reply is expected.
    #[must_use]
    pub fn poll(self) -> bool {
        self.0 & POLL_BIT != 0
    }

    /// Bit 6: ack-protocol bit, preserved from request to reply.
    #[must_use]
    pub fn b(self) -> bool {
        self.0 & B_BIT != 0
    }

    /// Bit 5: ack/nack selector (reply only). 1 = ACK, 0 = NACK.
    #[must_use]
    pub fn a(self) -> bool {
        self.0 & A_BIT != 0
    }

    /// Bits 4:0: the raw 5-bit command code, whether or not it is known.
    #[must_use]
    pub fn command_raw(self) -> u8 {
        self.0 & CMD_MASK
    }

    /// The command code, if it's one this emulator knows about.
    #[must_use]
    pub fn command(self) -> Option<CommandCode> {
        CommandCode::try_from(self.command_raw()).ok()
    }

    /// Build a control byte from its components.
    #[must_use]
    pub fn build(poll: bool, b: bool, a: bool, cmd: u8) -> Self {
        let mut raw = cmd & CMD_MASK;
        if poll {
            raw |= POLL_BIT;
        }
        if b {
            raw |= B_BIT;
        }
        if a {
            raw |= A_BIT;
        }
        Self(raw)
    }

    /// Return a copy with POLL cleared and A set according to `ack`,
    /// preserving B and the command code — exactly the reply-builder rule
    /// in §4.2.
    #[must_use]
    pub fn into_reply(self, ack: bool) -> Self {
        Self::build(false, self.b(), ack, self.command_raw())
    }
}

/// Parsed view of a frame (§3 "Packet").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Destination bus address (low 3 bits significant; 0xFF = broadcast).
    pub dest: u8,
    /// Source bus address.
    pub src: u8,
    /// Control byte.
    pub ctrl: ControlByte,
    /// Payload, 0 to 255 bytes.
    pub data: Vec<u8>,
}

impl Packet {
    /// Serialize `dest|src|ctrl|data` (without the trailing checksum),
    /// the portion of the wire layout the checksum is computed over.
    #[must_use]
    pub fn checksummed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.data.len());
        out.push(self.dest);
        out.push(self.src);
        out.push(self.ctrl.raw());
        out.extend_from_slice(&self.data);
        out
    }

    /// Whether this packet is addressed to us (§4.2 addressing rule).
    #[must_use]
    pub fn accepted_by(&self, own_address: u8) -> bool {
        self.dest == own_address || self.dest == BROADCAST
    }

    /// Whether a reply should ever be sent for this packet (broadcast is
    /// accepted but never replied to, per §9 open question resolution).
    #[must_use]
    pub fn wants_reply(&self) -> bool {
        self.ctrl.poll() && self.dest != BROADCAST
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_byte_bit_layout() {
        let c = ControlByte::from_raw(0x80);
        assert!(c.poll());
        assert!(!c.b());
        assert!(!c.a());
        assert_eq!(c.command(), Some(CommandCode::Ping));
    }

    #[test]
    fn reply_clears_poll_and_sets_a() {
        let req = ControlByte::build(true, true, false, CommandCode::Ping.into());
        let reply = req.into_reply(true);
        assert!(!reply.poll());
        assert!(reply.b());
        assert!(reply.a());
        assert_eq!(reply.command(), Some(CommandCode::Ping));
    }

    #[test]
    fn unknown_command_code_has_no_enum_value() {
        let c = ControlByte::from_raw(0x01); // code 1, not in the table.
        assert_eq!(c.command(), None);
        assert_eq!(c.command_raw(), 1);
    }

    #[test]
    fn broadcast_is_accepted_but_never_replied_to() {
        let p = Packet {
            dest: BROADCAST,
            src: 1,
            ctrl: ControlByte::build(true, false, false, CommandCode::Ping.into()),
            data: vec![],
        };
        assert!(p.accepted_by(2));
        assert!(!p.wants_reply());
    }
}
