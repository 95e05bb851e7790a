//! Byte-level transport abstraction (§1 "the hardware abstraction layer...
//! named only by the interface it presents", §10.6 supplement).
//!
//! The real RS-485 HAL is out of scope (§1); this module only defines the
//! interface the comms loop needs and an in-memory loopback implementation
//! so the end-to-end properties in §8 are exercisable without hardware,
//! the same role `tcp_source.rs`/`file_source.rs` play for the teacher's
//! graph — a swappable byte source/sink behind a small trait.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Non-blocking byte transport: `recv` polls without blocking, `send` is
/// best-effort (§5 "non-blocking poll").
pub trait Transport: Send + Sync {
    /// Write `bytes` to the wire. Failure is recorded by the caller as a
    /// transmit error (§7) and does not abort the comms loop.
    fn send(&self, bytes: &[u8]) -> std::io::Result<()>;

    /// Drain any bytes currently available without blocking. Returns an
    /// empty vec if nothing is available.
    fn recv(&self) -> Vec<u8>;
}

/// An in-memory two-way byte pipe, used by tests and the demo binary in
/// place of a real serial port (§10.6).
///
/// `send` pushes onto `to_peer`; `recv` drains `from_peer`. Construct a
/// pair with [`LoopbackTransport::pair`] to model two bus endpoints talking
/// to each other, or feed `from_peer` directly in a test to simulate a
/// single peer's transmissions.
#[derive(Default)]
pub struct LoopbackTransport {
    to_peer: Mutex<VecDeque<u8>>,
    from_peer: Mutex<VecDeque<u8>>,
}

impl LoopbackTransport {
    /// A transport with nothing queued in either direction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Two transports wired back to back: `a`'s outbound bytes are `b`'s
    /// inbound bytes and vice versa.
    #[must_use]
    pub fn pair() -> (LoopbackEndpoint, LoopbackEndpoint) {
        use std::sync::Arc;
        let ab = Mutex::new(VecDeque::new());
        let ba = Mutex::new(VecDeque::new());
        let a = Arc::new(LoopbackTransport {
            to_peer: ab,
            from_peer: ba,
        });
        // Build `b` sharing the same two queues, crossed.
        let b = LoopbackEndpoint {
            inner: Arc::clone(&a),
            crossed: true,
        };
        (LoopbackEndpoint { inner: a, crossed: false }, b)
    }

    /// Inject bytes as if they arrived from the peer (test helper).
    pub fn inject(&self, bytes: &[u8]) {
        self.from_peer.lock().unwrap().extend(bytes);
    }

    /// Drain whatever has been sent outbound so far (test helper).
    pub fn drain_sent(&self) -> Vec<u8> {
        self.to_peer.lock().unwrap().drain(..).collect()
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.to_peer.lock().unwrap().extend(bytes);
        Ok(())
    }

    fn recv(&self) -> Vec<u8> {
        self.from_peer.lock().unwrap().drain(..).collect()
    }
}

/// One side of a [`LoopbackTransport::pair`]; `crossed` picks which queue
/// is "outbound" from this endpoint's perspective.
pub struct LoopbackEndpoint {
    inner: std::sync::Arc<LoopbackTransport>,
    crossed: bool,
}

impl Transport for LoopbackEndpoint {
    fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        if self.crossed {
            self.inner.from_peer.lock().unwrap().extend(bytes);
        } else {
            self.inner.to_peer.lock().unwrap().extend(bytes);
        }
        Ok(())
    }

    fn recv(&self) -> Vec<u8> {
        if self.crossed {
            self.inner.to_peer.lock().unwrap().drain(..).collect()
        } else {
            self.inner.from_peer.lock().unwrap().drain(..).collect()
        }
    }
}

/// Real RS-485 serial transport, feature-gated and unimplemented against
/// actual hardware (§1: the HAL is an external collaborator named only by
/// its interface). Present so a hosted port has a concrete place to wire a
/// real `serialport`-style crate without touching the comms loop.
#[cfg(feature = "serial")]
pub struct SerialTransport;

#[cfg(feature = "serial")]
impl Transport for SerialTransport {
    fn send(&self, _bytes: &[u8]) -> std::io::Result<()> {
        Err(std::io::Error::other(
            "serial transport requires a hardware backend",
        ))
    }

    fn recv(&self) -> Vec<u8> {
        Vec::new()
    }
}
