//! Byte-stuffed framing codec (§4.1, §6).
//!
//! The escaping rules and the four special byte values are exactly those
//! used by the teacher's `kiss` module (`KISS_FEND`/`KISS_FESC`/
//! `KISS_TFEND`/`KISS_TFESC` in `kiss.rs`, itself SLIP under a different
//! name); the three-state decoder is the same shape as
//! `hdlc_deframer::HdlcDeframer`'s bit-level state machine, generalized
//! from bits to bytes and from HDLC flags to END-delimited frames.

use log::{debug, trace};

/// Frame delimiter.
pub const END: u8 = 0xc0;
/// Escape byte.
pub const ESC: u8 = 0xdb;
/// Escaped form of [`END`].
pub const ESC_END: u8 = 0xdc;
/// Escaped form of [`ESC`].
pub const ESC_ESC: u8 = 0xdd;

/// Maximum frame length on the wire: 3-byte header + 255-byte payload +
/// 2-byte checksum (§3).
pub const MAX_FRAME_LEN: usize = 3 + 255 + 2;

/// Encode `payload` as a complete END-delimited, byte-stuffed frame.
///
/// Mirrors `kiss::escape`, minus the KISS port byte (this protocol has no
/// equivalent field).
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2 + payload.len() / 8);
    out.push(END);
    for &b in payload {
        match b {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            b => out.push(b),
        }
    }
    out.push(END);
    out
}

/// Decoder state (§4.1: "three-state machine {IDLE, IN_FRAME, ESCAPED}").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InFrame,
    Escaped,
}

/// Reentrant, non-allocating-per-byte SLIP-style frame decoder.
///
/// Feed it bytes one at a time with [`Decoder::push`]; it returns a
/// complete decoded frame exactly when a closing END is seen with
/// `frame_len > 0`. It never allocates beyond its internal growable buffer,
/// which is reused across frames (the "no heap allocation" §9 design note
/// applies to the embedded core; this hosted port uses a growable `Vec`
/// per the allowance in §9).
#[derive(Debug)]
pub struct Decoder {
    state: State,
    buf: Vec<u8>,
    /// Sticky error flag (§4.1, §7): set on an invalid escape sequence or
    /// an END right after an ESC, cleared only by [`Decoder::clear_error`].
    frame_error: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create a new decoder in the `IDLE` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            buf: Vec::with_capacity(MAX_FRAME_LEN),
            frame_error: false,
        }
    }

    /// Whether a framing error has occurred since the last
    /// [`Decoder::clear_error`].
    #[must_use]
    pub fn frame_error(&self) -> bool {
        self.frame_error
    }

    /// Clear the sticky framing-error flag.
    pub fn clear_error(&mut self) {
        self.frame_error = false;
    }

    /// Feed one byte to the decoder.
    ///
    /// Returns `Some(frame)` when `byte` completes a non-empty frame.
    /// Two adjacent END bytes are a keep-alive and produce no frame.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.state {
            State::Idle => {
                if byte == END {
                    self.buf.clear();
                    self.state = State::InFrame;
                }
                // Any other byte outside a frame is simply ignored.
                None
            }
            State::InFrame => match byte {
                END => {
                    if self.buf.is_empty() {
                        // Keep-alive: stay in IN_FRAME, length reset.
                        trace!("framing: keep-alive END");
                        None
                    } else {
                        let frame = std::mem::take(&mut self.buf);
                        self.buf.reserve(MAX_FRAME_LEN);
                        trace!("framing: decoded frame of {} bytes", frame.len());
                        Some(frame)
                    }
                }
                ESC => {
                    self.state = State::Escaped;
                    None
                }
                b => {
                    self.buf.push(b);
                    None
                }
            },
            State::Escaped => {
                match byte {
                    ESC_END => {
                        self.buf.push(END);
                        self.state = State::InFrame;
                    }
                    ESC_ESC => {
                        self.buf.push(ESC);
                        self.state = State::InFrame;
                    }
                    END => {
                        // END right after ESC: framing error, abort frame.
                        debug!("framing: END immediately after ESC");
                        self.frame_error = true;
                        self.state = State::Idle;
                    }
                    _ => {
                        // Any other byte after ESC is invalid.
                        debug!("framing: invalid escape byte {byte:#04x}");
                        self.frame_error = true;
                        self.state = State::Idle;
                    }
                }
                None
            }
        }
    }

    /// Feed a slice of bytes, returning every complete frame produced.
    pub fn push_slice(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_lengths() {
        for len in 0..=255usize {
            let payload: Vec<u8> = (0..len).map(|i| (i * 53 + 7) as u8).collect();
            let framed = encode(&payload);
            assert!(!framed[1..framed.len() - 1].contains(&END));
            let mut dec = Decoder::new();
            let frames = dec.push_slice(&framed);
            assert_eq!(frames, vec![payload], "len={len}");
            assert!(!dec.frame_error());
        }
    }

    #[test]
    fn two_consecutive_ends_produce_no_frame() {
        let mut dec = Decoder::new();
        let frames = dec.push_slice(&[END, END]);
        assert!(frames.is_empty());
    }

    #[test]
    fn keep_alive_between_frames_does_not_leak_state() {
        let mut dec = Decoder::new();
        let mut wire = encode(&[1, 2, 3]);
        wire.push(END); // extra keep-alive
        wire.extend(encode(&[4, 5]));
        let frames = dec.push_slice(&wire);
        assert_eq!(frames, vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn bad_escape_byte_aborts_frame_but_recovers() {
        let mut dec = Decoder::new();
        // END, ESC, <bad>, then a valid frame.
        let mut wire = vec![END, ESC, 0x55];
        wire.extend(encode(&[9, 9, 9]));
        let frames = dec.push_slice(&wire);
        assert_eq!(frames, vec![vec![9, 9, 9]]);
        assert!(dec.frame_error());
    }

    #[test]
    fn end_immediately_after_esc_aborts_frame_but_recovers() {
        let mut dec = Decoder::new();
        let mut wire = vec![END, 1, 2, ESC, END];
        wire.extend(encode(&[3, 3]));
        let frames = dec.push_slice(&wire);
        assert_eq!(frames, vec![vec![3, 3]]);
        assert!(dec.frame_error());
    }

    #[test]
    fn decoded_frame_never_contains_end_byte() {
        for len in [0usize, 1, 5, 255] {
            let payload: Vec<u8> = (0..len).map(|_| END).collect();
            let framed = encode(&payload);
            let mut dec = Decoder::new();
            let frames = dec.push_slice(&framed);
            if len == 0 {
                assert!(frames.is_empty());
            } else {
                assert_eq!(frames.len(), 1);
                assert!(!frames[0].contains(&END));
                assert_eq!(frames[0], payload);
            }
        }
    }
}
