#![warn(missing_docs)]
/*! A hardware-in-the-loop emulator of a reaction-wheel actuator used on
spacecraft.

It impersonates a real wheel on an RS-485 multi-drop bus, answering a
proprietary request/reply protocol bit-exactly, while a second processor
core runs a 100Hz physics model whose outputs feed the telemetry the
protocol serves. A scenario engine injects faults into the transport,
device, and physics layers on a scripted timeline so flight-software test
campaigns can exercise error paths without flying hardware.

# Architecture overview

Two concurrent execution contexts share memory through a small set of
wait-free/lock-free primitives:

```text
 serial bytes -> Framer -> Parser -> Dispatcher -+-> Mailbox -> Physics tick -> Snapshot queue -+
                           ^                      |                                             |
                           |                      +-> Reply builder -> Framer -> serial bytes    |
               Scenario engine (timeline)                                                       |
                           ^                                                                     |
                           +-- reads snapshot, writes transport/device/physics injections <------+
```

- [`framing`] and [`checksum`] implement the byte-stuffed wire format and
  its CRC.
- [`packet`] and [`protocol`] turn decoded frames into [`packet::Packet`]s.
- [`dispatch`] is the closed command table and reply builder.
- [`mailbox`] and [`telemetry`] are the dual-core fabric between the comms
  core and the physics core.
- [`physics`] adapts a caller-supplied [`physics::WheelModel`] to that
  fabric at the fixed 100Hz cadence.
- [`scenario`] is the fault-injection timeline engine.
- [`catalog`] and [`console`] are the observable field registry and its
  command-line surface.
- [`context`] bundles all of the above into the single owned struct the
  comms loop is built around; [`comms_loop`] is that loop.
 */

pub mod catalog;
pub mod checksum;
pub mod comms_loop;
pub mod config;
pub mod console;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod mailbox;
pub mod packet;
pub mod physics;
pub mod protocol;
pub mod scenario;
pub mod telemetry;
pub mod transport;

pub use error::{Error, Result};
