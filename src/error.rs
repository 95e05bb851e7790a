//! Crate-wide error types (§7).
//!
//! The teacher declares `thiserror` in `Cargo.toml` but never actually
//! derives with it, hand-rolling `Error` in `lib.rs` instead. This port
//! finishes that wiring: one `thiserror`-derived enum per layer, matching
//! the error kinds named in §7, aggregated into a single crate `Error` the
//! same way the teacher's `lib.rs` aggregates `std::io::Error` and
//! `anyhow::Error` into its own `Error` via `From` impls.

use thiserror::Error as ThisError;

/// Framing-layer errors (§7 "Framing").
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum FramingError {
    /// An escape byte was followed by something other than ESC_END/ESC_ESC.
    #[error("invalid escape sequence")]
    EscapeInvalid,
    /// An END byte appeared immediately after an ESC byte.
    #[error("END byte seen while escaped")]
    EndInEscape,
}

/// Protocol-parser errors (§7 "Protocol"), with the fixed numeric codes
/// from §4.2 for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum ParseError {
    /// Frame shorter than the minimum 5-byte header+crc.
    #[error("frame too short")]
    TooShort,
    /// Frame length out of the valid `5..=260` range.
    #[error("bad frame length")]
    BadLength,
    /// Checksum verification failed.
    #[error("bad checksum")]
    BadCrc,
    /// Reserved for host ports that validate a caller-supplied buffer
    /// pointer before parsing; always absent in this hosted port, kept so
    /// the numeric code space matches §4.2 exactly.
    #[error("null pointer")]
    NullPtr,
}

impl ParseError {
    /// Fixed numeric code, 1..4, per §4.2.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            ParseError::TooShort => 1,
            ParseError::BadLength => 2,
            ParseError::BadCrc => 3,
            ParseError::NullPtr => 4,
        }
    }
}

/// Scenario-load errors (§7 "Scenario load", §6 schema rejections).
#[derive(Debug, Clone, ThisError)]
pub enum ScenarioError {
    /// JSON syntax error, including an unterminated string.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// Required `name` field missing or too long.
    #[error("missing or invalid 'name' field")]
    BadName,
    /// Required `schedule` field missing.
    #[error("missing 'schedule' field")]
    MissingSchedule,
    /// More events than the engine's fixed capacity.
    #[error("schedule has {got} events, capacity is {max}")]
    TooManyEvents {
        /// Number of events the schedule contained.
        got: usize,
        /// Fixed event capacity of the engine.
        max: usize,
    },
    /// An event is missing a required field.
    #[error("event {index}: {reason}")]
    BadEvent {
        /// Index of the offending event in `schedule`.
        index: usize,
        /// Human-readable reason.
        reason: String,
    },
}

/// Catalog read/write errors (§4.5, used by PEEK/POKE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum CatalogError {
    /// No table with that name/id.
    #[error("unknown table")]
    UnknownTable,
    /// No field with that name/id in the table.
    #[error("unknown field")]
    UnknownField,
    /// Attempted to write a read-only field.
    #[error("field is read-only")]
    ReadOnly,
    /// Value didn't fit the field's type.
    #[error("value out of range or wrong type for field")]
    TypeMismatch,
}

/// Crate-wide error, aggregating every layer's error type.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Framing layer.
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// Protocol parser.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Scenario engine.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    /// Catalog.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// IO boundary (serial transport, scenario file load).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias, following the teacher's `Result<T, E = Error>`
/// convention in `lib.rs`/`block.rs`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
