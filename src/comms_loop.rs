//! The comms-core run-to-completion loop (§5, §9 "Cycles").
//!
//! [`Station`] owns one side of the bus: decode incoming bytes, dispatch the
//! resulting commands, apply whatever the scenario engine currently wants
//! injected into the reply, and step the scenario timeline — all from a
//! single non-blocking `tick()` the caller drives at whatever cadence its
//! transport warrants. Nothing here blocks or allocates unboundedly, the
//! same discipline the teacher's `Block::work` methods follow for a single
//! graph step, generalized from "one sample buffer in, one out" to "one
//! poll of the transport in, zero or one reply out".

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};

use crate::checksum;
use crate::context::Context;
use crate::dispatch::{self, CommandResult};
use crate::framing::Decoder;
use crate::packet::{ControlByte, Packet};
use crate::physics::PhysicsOverlay;
use crate::protocol;
use crate::scenario::{self, Action};
use crate::transport::Transport;

/// A reply frame held back for `delay_reply_ms` (§4.3), released once its
/// due time has passed.
struct PendingReply {
    send_at_ms: u64,
    frame: Vec<u8>,
}

/// One bus endpoint: a transport, the decode/dispatch/reply pipeline, and
/// the owned [`Context`] the rest of the crate hangs off of.
pub struct Station<T: Transport> {
    /// Shared state: catalog, scenario engine, counters.
    pub ctx: Context,
    transport: T,
    overlay: Arc<PhysicsOverlay>,
    decoder: Decoder,
    pending: VecDeque<PendingReply>,
}

impl<T: Transport> Station<T> {
    /// Build a station around `ctx`, talking over `transport`, sharing
    /// `overlay` with the physics core.
    pub fn new(ctx: Context, transport: T, overlay: Arc<PhysicsOverlay>) -> Self {
        Self {
            ctx,
            transport,
            overlay,
            decoder: Decoder::new(),
            pending: VecDeque::new(),
        }
    }

    /// Run one non-blocking iteration of the comms loop at `now_ms` (HAL
    /// monotonic milliseconds): refresh the cached telemetry snapshot,
    /// advance the scenario timeline, merge its device/physics injections
    /// into the shared overlay, process whatever bytes the transport has
    /// waiting, and flush any reply whose delay has elapsed.
    pub fn tick(&mut self, now_ms: u64) {
        self.ctx.refresh_snapshot();

        if self.ctx.poll_trigger() && self.ctx.scenario.state() == scenario::State::Loaded {
            self.ctx.scenario.activate(now_ms);
        }
        // Advance the timeline even before the first telemetry snapshot has
        // arrived (e.g. a t_ms=0 event right after activation): conditions
        // with no snapshot-dependent predicate still evaluate correctly
        // against the wildcard default (§4.3 `Condition::holds`).
        let snapshot = self.ctx.last_snapshot().unwrap_or_default();
        self.ctx
            .scenario
            .update(now_ms, &snapshot, self.ctx.last_cmd_code());
        self.ctx.sync_scenario_fields();
        self.sync_physics_overlay();

        self.process_incoming(now_ms);
        self.flush_due_replies(now_ms);
    }

    /// Run one console command line against the owned catalog (§4.5, §6).
    pub fn run_console(&self, uptime_s: u64, line: &str) -> crate::console::ConsoleResult {
        crate::console::run(&self.ctx.catalog, uptime_s, line)
    }

    /// The underlying transport, for a caller that needs to feed/drain it
    /// directly (tests, or a hosted binary wiring up a real port).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn sync_physics_overlay(&mut self) {
        let mut merged = Action::default();
        let mut any = false;
        if let Some(action) = self.ctx.scenario.physics_action() {
            merge_action(&mut merged, action);
            any = true;
        }
        if let Some(action) = self.ctx.scenario.device_action() {
            merge_action(&mut merged, action);
            any = true;
        }
        for action in self.ctx.scenario.take_instant_triggers() {
            merge_action(&mut merged, action);
            any = true;
        }
        self.overlay.set(any.then_some(merged));
    }

    fn process_incoming(&mut self, now_ms: u64) {
        let bytes = self.transport.recv();
        let frames = self.decoder.push_slice(&bytes);
        if self.decoder.frame_error() {
            self.ctx.count_slip_error();
            self.decoder.clear_error();
        }
        for frame in frames {
            self.handle_frame(&frame, now_ms);
        }
    }

    fn handle_frame(&mut self, frame: &[u8], now_ms: u64) {
        let packet = match protocol::parse(frame) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("comms: dropping unparseable frame: {err}");
                self.ctx.count_parse_error();
                return;
            }
        };
        if !packet.accepted_by(self.ctx.own_address) {
            self.ctx.count_wrong_addr();
            return;
        }
        let now_us = now_ms.saturating_mul(1000);
        let Some(result) =
            dispatch::dispatch(&self.ctx, packet.ctrl.command_raw(), &packet.data, now_us)
        else {
            return;
        };
        self.queue_reply(&packet, &result, now_ms);
    }

    /// Build and transmit (or defer/drop, per the active transport
    /// injection) the reply to `request` (§4.1, §4.2, §4.3).
    fn queue_reply(&mut self, request: &Packet, result: &CommandResult, now_ms: u64) {
        if !request.wants_reply() {
            return;
        }
        let transport_action = self.ctx.scenario.transport_action();

        let mut header = dispatch::build_reply(request, self.ctx.own_address, result);
        if transport_action.and_then(|a| a.force_nack) == Some(true) {
            let ctrl = ControlByte::from_raw(header[2]);
            header[2] = ControlByte::build(false, ctrl.b(), false, ctrl.command_raw()).raw();
        }

        let crc = checksum::checksum(&header);
        let (mut lo, mut hi) = checksum::to_le_bytes(crc);
        if transport_action.and_then(|a| a.inject_crc_error) == Some(true) {
            debug!("scenario: injecting CRC error into reply");
            lo = !lo;
            hi = !hi;
        }
        header.push(lo);
        header.push(hi);
        let frame = crate::framing::encode(&header);

        if let Some(pct) = transport_action.and_then(|a| a.drop_frames_pct)
            && pseudo_random_hit(now_ms, pct)
        {
            debug!("scenario: dropping outbound frame ({pct}%)");
            return;
        }

        match transport_action.and_then(|a| a.delay_reply_ms) {
            Some(delay_ms) if delay_ms > 0 => {
                self.pending.push_back(PendingReply {
                    send_at_ms: now_ms + u64::from(delay_ms),
                    frame,
                });
            }
            _ => self.send_frame(&frame),
        }
    }

    fn flush_due_replies(&mut self, now_ms: u64) {
        while let Some(reply) = self.pending.front() {
            if reply.send_at_ms > now_ms {
                break;
            }
            let reply = self.pending.pop_front().expect("front just checked Some");
            self.send_frame(&reply.frame);
        }
    }

    fn send_frame(&self, frame: &[u8]) {
        if self.transport.send(frame).is_err() {
            self.ctx.count_transmit_error();
        }
    }
}

/// Clock-coarseness gate for `drop_frames_pct` (§4.3 "Pseudo-randomness"):
/// no RNG, just `now_ms % 100` compared against the configured percentage.
fn pseudo_random_hit(now_ms: u64, pct: u8) -> bool {
    now_ms % 100 < u64::from(pct)
}

fn merge_action(into: &mut Action, from: Action) {
    into.drop_frames_pct = into.drop_frames_pct.or(from.drop_frames_pct);
    into.inject_crc_error = into.inject_crc_error.or(from.inject_crc_error);
    into.delay_reply_ms = into.delay_reply_ms.or(from.delay_reply_ms);
    into.force_nack = into.force_nack.or(from.force_nack);
    into.set_fault_bits = into.set_fault_bits.or(from.set_fault_bits);
    into.clear_fault_bits = into.clear_fault_bits.or(from.clear_fault_bits);
    into.flip_status_bits = into.flip_status_bits.or(from.flip_status_bits);
    into.overspeed_fault = into.overspeed_fault.or(from.overspeed_fault);
    into.trip_lcl = into.trip_lcl.or(from.trip_lcl);
    into.limit_power_w = into.limit_power_w.or(from.limit_power_w);
    into.limit_current_a = into.limit_current_a.or(from.limit_current_a);
    into.limit_speed_rpm = into.limit_speed_rpm.or(from.limit_speed_rpm);
    into.override_torque_mnm = into.override_torque_mnm.or(from.override_torque_mnm);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;
    use crate::packet::CommandCode;
    use crate::telemetry::Queue as TelemetryQueue;
    use crate::transport::LoopbackTransport;

    fn framed(dest: u8, src: u8, ctrl: u8, data: &[u8]) -> Vec<u8> {
        let mut body = vec![dest, src, ctrl];
        body.extend_from_slice(data);
        let crc = checksum::checksum(&body);
        let (lo, hi) = checksum::to_le_bytes(crc);
        body.push(lo);
        body.push(hi);
        crate::framing::encode(&body)
    }

    fn station(own_address: u8) -> (Station<LoopbackTransport>, Arc<TelemetryQueue>) {
        let mailbox = Arc::new(Mailbox::new());
        let telemetry = Arc::new(TelemetryQueue::new());
        let overlay = Arc::new(PhysicsOverlay::new());
        let ctx = Context::new(own_address, Arc::clone(&mailbox), Arc::clone(&telemetry));
        let station = Station::new(ctx, LoopbackTransport::new(), overlay);
        (station, telemetry)
    }

    #[test]
    fn ping_round_trips_and_acks() {
        let (mut st, _telemetry) = station(2);
        let ctrl = ControlByte::build(true, false, false, CommandCode::Ping.into());
        st.transport().inject(&framed(2, 9, ctrl.raw(), &[]));
        st.tick(0);

        let sent = st.transport().drain_sent();
        let frame = Decoder::new().push_slice(&sent);
        assert_eq!(frame.len(), 1);
        let reply = protocol::parse(&frame[0]).unwrap();
        assert_eq!(reply.dest, 9);
        assert_eq!(reply.src, 2);
        assert!(reply.ctrl.a());
        assert!(!reply.ctrl.poll());
    }

    #[test]
    fn wrong_address_is_silently_dropped() {
        let (mut st, _telemetry) = station(2);
        let ctrl = ControlByte::build(true, false, false, CommandCode::Ping.into());
        st.transport().inject(&framed(5, 9, ctrl.raw(), &[]));
        st.tick(0);
        assert!(st.transport().drain_sent().is_empty());
        assert_eq!(st.ctx.stats().wrong_addr, 1);
    }

    #[test]
    fn broadcast_is_accepted_but_not_replied_to() {
        let (mut st, _telemetry) = station(2);
        let ctrl = ControlByte::build(true, false, false, CommandCode::Ping.into());
        st.transport().inject(&framed(0xff, 9, ctrl.raw(), &[]));
        st.tick(0);
        assert!(st.transport().drain_sent().is_empty());
        assert_eq!(st.ctx.stats().wrong_addr, 0);
    }

    #[test]
    fn unknown_command_counts_error_and_sends_no_reply() {
        let (mut st, _telemetry) = station(2);
        let ctrl = ControlByte::build(true, false, false, 0x1f);
        st.transport().inject(&framed(2, 9, ctrl.raw(), &[]));
        st.tick(0);
        assert!(st.transport().drain_sent().is_empty());
        assert_eq!(st.ctx.stats().cmd_errors, 1);
    }

    #[test]
    fn bad_crc_counts_parse_error() {
        let (mut st, _telemetry) = station(2);
        let ctrl = ControlByte::build(true, false, false, CommandCode::Ping.into());
        let mut body = vec![2u8, 9, ctrl.raw()];
        let crc = checksum::checksum(&body);
        let (lo, hi) = checksum::to_le_bytes(crc);
        body.push(lo);
        body.push(hi);
        body[0] ^= 0xff; // corrupt a header byte after the checksum was computed over it.
        let frame = crate::framing::encode(&body);

        st.transport().inject(&frame);
        st.tick(0);
        assert_eq!(st.ctx.stats().parse_errors, 1);
    }

    #[test]
    fn force_nack_scenario_action_clears_a_bit() {
        let (mut st, _telemetry) = station(2);
        st.ctx.scenario.load(scenario::Scenario::new(
            "s".into(),
            "".into(),
            vec![scenario::Event::new(
                0,
                0,
                scenario::Condition::default(),
                Action {
                    force_nack: Some(true),
                    ..Default::default()
                },
            )],
        ));
        st.ctx.scenario.activate(0);

        let ctrl = ControlByte::build(true, false, false, CommandCode::Ping.into());
        st.transport().inject(&framed(2, 9, ctrl.raw(), &[]));
        st.tick(0);

        let sent = st.transport().drain_sent();
        let frame = Decoder::new().push_slice(&sent);
        let reply = protocol::parse(&frame[0]).unwrap();
        assert!(!reply.ctrl.a());
    }

    #[test]
    fn delay_reply_ms_holds_back_until_due() {
        let (mut st, _telemetry) = station(2);
        st.ctx.scenario.load(scenario::Scenario::new(
            "s".into(),
            "".into(),
            vec![scenario::Event::new(
                0,
                0,
                scenario::Condition::default(),
                Action {
                    delay_reply_ms: Some(50),
                    ..Default::default()
                },
            )],
        ));
        st.ctx.scenario.activate(0);

        let ctrl = ControlByte::build(true, false, false, CommandCode::Ping.into());
        st.transport().inject(&framed(2, 9, ctrl.raw(), &[]));
        st.tick(0);
        assert!(st.transport().drain_sent().is_empty());

        st.tick(49);
        assert!(st.transport().drain_sent().is_empty());

        st.tick(50);
        assert!(!st.transport().drain_sent().is_empty());
    }
}
