//! Hosted-binary configuration (§10.4), via `clap`.
//!
//! `clap` (`derive` feature) was already a dev-dependency for the teacher's
//! example binaries (`ax25-1200-rx`, `ax25-9600-wpcr`); this promotes it to
//! a regular dependency since the shipped `wheelsim` binary itself needs
//! it, not just its examples, and follows the same derive-struct-with-docs
//! style those examples use for `--sample_rate`/`-r`/`-o`.

use std::path::PathBuf;

use clap::Parser;

/// Hardware-in-the-loop reaction-wheel emulator.
#[derive(Debug, Parser)]
#[command(name = "wheelsim", version, about)]
pub struct Config {
    /// Own bus address, 0-7 (§6).
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=7))]
    pub address: u8,

    /// Serial device path. Omit to run the built-in loopback transport
    /// used for local testing and demos (§10.6).
    #[arg(long)]
    pub port: Option<PathBuf>,

    /// Scenario JSON to preload at startup (not auto-activated; activation
    /// is a console `trigger` field per §4.5).
    #[arg(long)]
    pub scenario: Option<PathBuf>,

    /// Baud rate, accepted and stored for the HAL shim; the emulator core
    /// doesn't interpret it (§10.4).
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Increase log verbosity (repeatable), fed to `stderrlog`.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity (repeatable).
    #[arg(short = 'q', long, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::parse_from(["wheelsim"]);
        assert_eq!(cfg.address, 1);
        assert_eq!(cfg.baud, 115_200);
        assert!(cfg.port.is_none());
    }

    #[test]
    fn address_out_of_range_is_rejected() {
        assert!(Config::try_parse_from(["wheelsim", "--address", "9"]).is_err());
    }

    #[test]
    fn scenario_path_is_parsed() {
        let cfg = Config::parse_from(["wheelsim", "--scenario", "demo.json"]);
        assert_eq!(cfg.scenario, Some(PathBuf::from("demo.json")));
    }
}
