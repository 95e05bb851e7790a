//! Protocol parser: turns a decoded frame into a [`Packet`] (§4.2).

use log::warn;

use crate::checksum;
use crate::error::ParseError;
use crate::packet::{ControlByte, Packet};

/// Minimum valid frame length: 3-byte header + 2-byte checksum, no payload.
pub const MIN_FRAME_LEN: usize = 5;
/// Maximum valid frame length: header + 255-byte payload + checksum.
pub const MAX_FRAME_LEN: usize = 3 + 255 + 2;

/// Parse a decoded frame into a [`Packet`] (§4.2 `parse(bytes) -> Packet |
/// ParseError`).
///
/// Does not apply the addressing rule (accept-for-us vs. broadcast vs.
/// silently-ignored): that's [`Packet::accepted_by`], checked by the
/// caller so it can count `wrong_addr` itself (§7).
pub fn parse(frame: &[u8]) -> Result<Packet, ParseError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(ParseError::TooShort);
    }
    if frame.len() > MAX_FRAME_LEN {
        return Err(ParseError::BadLength);
    }
    let dest = frame[0];
    let src = frame[1];
    let ctrl = ControlByte::from_raw(frame[2]);
    let data_end = frame.len() - 2;
    let data = frame[3..data_end].to_vec();
    let crc_lo = frame[data_end];
    let crc_hi = frame[data_end + 1];

    let checksummed = &frame[..data_end];
    if !checksum::verify(checksummed, crc_lo, crc_hi) {
        warn!("protocol: bad checksum from src={src:#04x}");
        return Err(ParseError::BadCrc);
    }

    Ok(Packet {
        dest,
        src,
        ctrl,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum as csum;
    use crate::packet::CommandCode;

    fn framed(dest: u8, src: u8, ctrl: u8, data: &[u8]) -> Vec<u8> {
        let mut body = vec![dest, src, ctrl];
        body.extend_from_slice(data);
        let crc = csum::checksum(&body);
        let (lo, hi) = csum::to_le_bytes(crc);
        body.push(lo);
        body.push(hi);
        body
    }

    #[test]
    fn parses_concrete_vector() {
        // §8: data = [0x01, 0x00, 0x80] -> {dest=1, src=0, ctrl=0x80}.
        let frame = framed(0x01, 0x00, 0x80, &[]);
        let pkt = parse(&frame).unwrap();
        assert_eq!(pkt.dest, 1);
        assert_eq!(pkt.src, 0);
        assert_eq!(pkt.ctrl.raw(), 0x80);
        assert!(pkt.ctrl.poll());
        assert!(pkt.data.is_empty());
    }

    #[test]
    fn too_short_frame_is_rejected() {
        assert_eq!(parse(&[1, 2, 3, 4]), Err(ParseError::TooShort));
    }

    #[test]
    fn too_long_frame_is_rejected() {
        let data = vec![0u8; 256];
        let frame = framed(1, 2, 0x80, &data);
        assert_eq!(parse(&frame), Err(ParseError::BadLength));
    }

    #[test]
    fn bad_crc_is_rejected() {
        let mut frame = framed(1, 2, CommandCode::Ping.into(), &[]);
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert_eq!(parse(&frame), Err(ParseError::BadCrc));
    }

    #[test]
    fn round_trips_payload_bytes() {
        let data = [1, 2, 3, 4, 5];
        let frame = framed(2, 1, 0x88, &data);
        let pkt = parse(&frame).unwrap();
        assert_eq!(pkt.data, data);
    }
}
