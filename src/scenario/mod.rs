//! Scenario engine: timeline of timed, conditional, durated fault
//! injections (§4.3).

pub mod engine;
pub mod json;
pub mod model;

pub use engine::{ActiveSlot, Engine, State};
pub use model::{Action, Condition, Event, Scenario, MAX_EVENTS};
