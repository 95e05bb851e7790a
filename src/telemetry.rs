//! Telemetry snapshot type and the physics→comms SPSC queue (§3, §4.4).
//!
//! The queue is hand-rolled lock-free rather than pulled from a crate: the
//! teacher has no concurrency story of its own (it's single-threaded), so
//! this is grounded on `doublegate-VeridianOS`'s kernel-side ring buffers —
//! fixed power-of-two capacity, one slot sacrificed to disambiguate empty
//! from full, explicit acquire/release fences instead of a borrowed crate,
//! because the physics side is required to be wait-free and a borrowed
//! mutex-backed queue would violate that.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Latched/transient fault bits (§3 "fault/warning/latch bitsets").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FaultBits: u32 {
        /// Wheel spinning faster than the configured limit.
        const OVERSPEED       = 1 << 0;
        /// Bus voltage below the configured floor.
        const UNDERVOLTAGE    = 1 << 1;
        /// Bus voltage above the configured ceiling.
        const OVERVOLTAGE     = 1 << 2;
        /// Motor current above the configured limit.
        const OVERCURRENT     = 1 << 3;
        /// Output power above the configured limit.
        const OVERPOWER       = 1 << 4;
        /// Load-control line tripped.
        const LCL_TRIP        = 1 << 5;
    }
}

bitflags! {
    /// Non-latched warning bits, cleared automatically once the condition
    /// clears (unlike [`FaultBits`], which require `CLEAR_FAULT`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WarningBits: u32 {
        /// Approaching the speed limit.
        const NEAR_OVERSPEED = 1 << 0;
        /// Approaching the current limit.
        const NEAR_OVERCURRENT = 1 << 1;
        /// Approaching the power limit.
        const NEAR_OVERPOWER = 1 << 2;
    }
}

bitflags! {
    /// Sticky latch bits: once set, only `CLEAR_FAULT` resets them, even if
    /// the underlying [`FaultBits`] condition has since cleared.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LatchBits: u32 {
        /// A fault has been latched since the last `CLEAR_FAULT`.
        const FAULT_LATCHED = 1 << 0;
    }
}

/// Wheel control mode (§4.2 `APPLICATION_COMMAND`, §6 condition `mode_in`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Current (torque-proportional) control.
    #[default]
    Current,
    /// Closed-loop speed control.
    Speed,
    /// Direct torque control.
    Torque,
    /// Open-loop PWM duty control.
    Pwm,
}

/// Spin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Positive angular velocity.
    #[default]
    Positive,
    /// Negative angular velocity.
    Negative,
}

/// A coherent sample of wheel state from a single physics tick (§3
/// "Telemetry snapshot").
///
/// Every field here is read by the same physics tick that writes it; the
/// queue's memory-ordering discipline (see [`Queue`]) is what keeps readers
/// from ever observing a torn mix of two ticks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    /// Angular velocity, rad/s.
    pub angular_velocity_rad_s: f32,
    /// Wheel speed, rpm.
    pub speed_rpm: f32,
    /// Angular momentum, N*m*s.
    pub momentum_nms: f32,
    /// Motor current, A.
    pub current_a: f32,
    /// Motor torque, mNm.
    pub torque_mnm: f32,
    /// Electrical power, W.
    pub power_w: f32,
    /// Bus voltage, V.
    pub bus_voltage_v: f32,
    /// Control mode at this tick.
    pub mode: Mode,
    /// Spin direction at this tick.
    pub direction: Direction,
    /// Active (non-latched) fault conditions.
    pub faults: FaultBits,
    /// Active warnings.
    pub warnings: WarningBits,
    /// Sticky latches.
    pub latches: LatchBits,
    /// Monotonically increasing tick counter.
    pub tick_count: u64,
    /// Jitter of this tick relative to the 10ms nominal period, us.
    pub last_tick_jitter_us: i32,
    /// Largest jitter magnitude observed since startup, us.
    pub max_jitter_us: u32,
    /// HAL monotonic timestamp this snapshot was produced, us.
    pub timestamp_us: u64,
}

const CAPACITY: usize = 16;
const MASK: usize = CAPACITY - 1;

/// Fixed-capacity, power-of-two, single-producer/single-consumer ring of
/// [`Snapshot`]s (§3 "SPSC queue", §4.4).
///
/// `head` is written only from [`Queue::publish`] (the physics context);
/// `tail` is written only from [`Queue::read_latest`] (the comms context).
/// One slot is always left empty so `head == tail` is unambiguously
/// "empty" and never also means "full".
pub struct Queue {
    buf: [UnsafeCell<MaybeUninit<Snapshot>>; CAPACITY],
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: `buf` slots are only ever touched by the producer at `head` (never
// read elsewhere) or by the consumer at indices strictly behind `head`
// (never written elsewhere); the one-slot gap keeps those ranges disjoint by
// construction, matching the single-producer/single-consumer contract.
unsafe impl Sync for Queue {}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        const INIT: UnsafeCell<MaybeUninit<Snapshot>> = UnsafeCell::new(MaybeUninit::uninit());
        Self {
            buf: [INIT; CAPACITY],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Queue capacity (number of slots that can hold a snapshot at once).
    #[must_use]
    pub fn capacity(&self) -> usize {
        CAPACITY - 1
    }

    /// Publish a snapshot. Wait-free: never blocks, never allocates.
    ///
    /// On a full queue, the engine's documented policy is drop-new (§4.4):
    /// the new snapshot is discarded and the consumer keeps whatever
    /// backlog it has not yet read, so it always sees a coherent, in-order
    /// history rather than a gap spliced with a newer sample.
    pub fn publish(&self, snapshot: Snapshot) {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) & MASK;
        if next == self.tail.load(Ordering::Acquire) {
            // Full: drop-new.
            return;
        }
        // SAFETY: only the producer writes this slot, and the full check
        // above proves the consumer is not currently reading it (the
        // one-slot gap guarantees index `head` is behind `tail`'s claimed
        // range as long as the queue isn't full).
        unsafe {
            (*self.buf[head].get()).write(snapshot);
        }
        // Release: the payload write above must be visible to the consumer
        // before it observes the advanced `head`.
        self.head.store(next, Ordering::Release);
    }

    /// Read the most recently published snapshot, discarding any older,
    /// unread ones so the consumer never accumulates backlog (§4.4).
    pub fn read_latest(&self) -> Option<Snapshot> {
        // Acquire: must happen-before reading the payload below, so we see
        // the producer's writes for every slot up to (but not including)
        // this `head`.
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        if head == tail {
            return None;
        }
        let latest_idx = (head + MASK) & MASK; // head - 1, wrapping.
        // SAFETY: `latest_idx` was written by the producer and is behind
        // the acquired `head`, so the write above happens-before this read.
        let snapshot = unsafe { (*self.buf[latest_idx].get()).assume_init() };
        // Advance tail past every slot we skipped, including the one we
        // just read, so the queue reports empty until the next publish.
        self.tail.store(head, Ordering::Release);
        Some(snapshot)
    }

    /// Whether the queue currently holds no unread snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(tick: u64) -> Snapshot {
        Snapshot {
            tick_count: tick,
            ..Default::default()
        }
    }

    #[test]
    fn empty_queue_reads_none() {
        let q = Queue::new();
        assert!(q.read_latest().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn publish_then_read_round_trips() {
        let q = Queue::new();
        q.publish(snap(1));
        let got = q.read_latest().unwrap();
        assert_eq!(got.tick_count, 1);
        assert!(q.is_empty());
    }

    #[test]
    fn read_latest_skips_older_unread_snapshots() {
        let q = Queue::new();
        for t in 0..5 {
            q.publish(snap(t));
        }
        let got = q.read_latest().unwrap();
        assert_eq!(got.tick_count, 4);
        assert!(q.is_empty());
    }

    #[test]
    fn fills_to_capacity_minus_one_then_drops_new() {
        let q = Queue::new();
        let cap = q.capacity();
        for t in 0..cap as u64 {
            q.publish(snap(t));
        }
        // One more publish should be silently dropped (queue reports the
        // same latest sample as before the drop).
        q.publish(snap(9999));
        let got = q.read_latest().unwrap();
        assert_eq!(got.tick_count, cap as u64 - 1);
    }

    #[test]
    fn one_pop_frees_room_for_one_more_push() {
        let q = Queue::new();
        let cap = q.capacity();
        for t in 0..cap as u64 {
            q.publish(snap(t));
        }
        let _ = q.read_latest();
        q.publish(snap(12345));
        let got = q.read_latest().unwrap();
        assert_eq!(got.tick_count, 12345);
    }

    #[test]
    fn concurrent_push_pop_never_goes_backwards() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(Queue::new());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for t in 0..100_000u64 {
                    q.publish(snap(t));
                }
            })
        };
        let mut last_seen: i64 = -1;
        let mut seen_any = false;
        for _ in 0..200_000 {
            if let Some(s) = q.read_latest() {
                seen_any = true;
                assert!(s.tick_count as i64 >= last_seen);
                last_seen = s.tick_count as i64;
            }
        }
        producer.join().unwrap();
        // Drain whatever's left.
        while let Some(s) = q.read_latest() {
            assert!(s.tick_count as i64 >= last_seen);
            last_seen = s.tick_count as i64;
            seen_any = true;
        }
        assert!(seen_any);
    }
}
