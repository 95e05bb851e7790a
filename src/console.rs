//! Console command surface over the catalog (§4.5, §6).
//!
//! The console/TUI itself is an external collaborator (§1); this module is
//! the small interpreter it's documented to drive: prefix-matched tokens
//! over the [`Catalog`]. Grounded on the teacher's own CLI-argument style in
//! its example binaries (plain string matching, `anyhow::Result` for
//! user-facing failures) rather than pulling in a parser combinator crate
//! for a half-dozen verbs.

use crate::catalog::{Catalog, FieldValue};

/// Outcome of a console command: either user-visible text or a named
/// failure reason.
pub type ConsoleResult = Result<String, String>;

fn parse_value(raw: &str) -> FieldValue {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if let Ok(v) = u32::from_str_radix(hex, 16) {
            return FieldValue::Hex(v);
        }
    }
    if raw.eq_ignore_ascii_case("true") {
        return FieldValue::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return FieldValue::Bool(false);
    }
    if let Ok(v) = raw.parse::<f32>()
        && raw.contains('.')
    {
        return FieldValue::Float(v);
    }
    if let Ok(v) = raw.parse::<u32>() {
        return FieldValue::U32(v);
    }
    FieldValue::String(raw.to_string())
}

/// Expand the §6 abbreviated prefixes (`d t l | d t desc <t> | d t g <t>.<f>
/// | d t s <t>.<f> <v>`) to their full-word equivalents so a single match
/// below handles both spellings.
fn expand_prefixes(tokens: &[&str]) -> Vec<String> {
    let word = |tok: &str| match tok {
        "d" => "database",
        "t" => "table",
        "l" => "list",
        "desc" => "describe",
        "g" => "get",
        "s" => "set",
        other => other,
    };
    tokens.iter().map(|t| word(t).to_string()).collect()
}

/// Run one console command line against `catalog` (§4.5, §6).
///
/// Recognized prefixes: `help`/`?`, `version`, `uptime`, and
/// `database table {list|describe <t>|get <t>.<f>|set <t>.<f> <v>}`,
/// including the abbreviated `d t {l|desc|g|s}` spellings from §6.
pub fn run(catalog: &Catalog, uptime_s: u64, line: &str) -> ConsoleResult {
    let raw_tokens: Vec<&str> = line.split_whitespace().collect();
    let expanded = expand_prefixes(&raw_tokens);
    let tokens: Vec<&str> = expanded.iter().map(String::as_str).collect();
    match tokens.as_slice() {
        [] => Ok(String::new()),
        ["help"] | ["?"] => Ok(
            "help|? | version | uptime | database table {list|describe <t>|get <t>.<f>|set <t>.<f> <v>}"
                .to_string(),
        ),
        ["version"] => Ok(format!("wheelsim {}", env!("CARGO_PKG_VERSION"))),
        ["uptime"] => Ok(format!("{uptime_s}s")),
        ["database", "table", "list"] => Ok(catalog
            .tables()
            .iter()
            .map(|t| t.name.clone())
            .collect::<Vec<_>>()
            .join("\n")),
        ["database", "table", "describe", table] => {
            let t = catalog
                .find_table(table)
                .ok_or_else(|| format!("unknown table '{table}'"))?;
            Ok(t.fields()
                .iter()
                .map(|f| format!("{} [{:?}] = {}", f.name, f.access, f.format()))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        ["database", "table", "get", path] => {
            let (table, field) = path
                .split_once('.')
                .ok_or_else(|| "expected <table>.<field>".to_string())?;
            let f = catalog
                .find_field(table, field)
                .ok_or_else(|| format!("unknown field '{path}'"))?;
            Ok(f.format())
        }
        ["database", "table", "set", path, value] => {
            let (table, field) = path
                .split_once('.')
                .ok_or_else(|| "expected <table>.<field>".to_string())?;
            let f = catalog
                .find_field(table, field)
                .ok_or_else(|| format!("unknown field '{path}'"))?;
            f.write(parse_value(value))
                .map_err(|e| e.to_string())
                .map(|()| String::new())
        }
        _ => Err(format!("unrecognized command: {line}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Access, Field, FieldType, Table};
    use std::cell::Cell;

    struct TestCell(Cell<u32>);
    // SAFETY: test-only, single-threaded.
    unsafe impl Sync for TestCell {}
    impl crate::catalog::FieldStorage for TestCell {
        fn read(&self) -> FieldValue {
            FieldValue::U32(self.0.get())
        }
        fn write(&self, value: FieldValue) -> Result<(), crate::error::CatalogError> {
            match value {
                FieldValue::U32(v) | FieldValue::Hex(v) => {
                    self.0.set(v);
                    Ok(())
                }
                _ => Err(crate::error::CatalogError::TypeMismatch),
            }
        }
    }

    fn catalog() -> Catalog {
        let mut cat = Catalog::new();
        let mut t = Table::new(1, "wheel");
        t.add_field(Field::new(
            1,
            "speed_rpm",
            FieldType::U32,
            "rpm",
            Access::Rw,
            FieldValue::U32(0),
            Box::new(TestCell(Cell::new(0))),
        ));
        cat.register(t);
        cat
    }

    #[test]
    fn help_and_version_respond() {
        let cat = catalog();
        assert!(run(&cat, 0, "help").is_ok());
        assert!(run(&cat, 0, "?").is_ok());
        assert!(run(&cat, 0, "version").unwrap().contains("wheelsim"));
    }

    #[test]
    fn uptime_reports_seconds() {
        let cat = catalog();
        assert_eq!(run(&cat, 42, "uptime").unwrap(), "42s");
    }

    #[test]
    fn table_list_and_describe() {
        let cat = catalog();
        assert_eq!(run(&cat, 0, "database table list").unwrap(), "wheel");
        assert!(
            run(&cat, 0, "database table describe wheel")
                .unwrap()
                .contains("speed_rpm")
        );
    }

    #[test]
    fn get_and_set_round_trip() {
        let cat = catalog();
        run(&cat, 0, "database table set wheel.speed_rpm 1234").unwrap();
        assert_eq!(
            run(&cat, 0, "database table get wheel.speed_rpm").unwrap(),
            "1234"
        );
    }

    #[test]
    fn prefix_d_expands_to_database() {
        let cat = catalog();
        run(&cat, 0, "d t s wheel.speed_rpm 77").unwrap();
        assert_eq!(run(&cat, 0, "d t g wheel.speed_rpm").unwrap(), "77");
    }

    #[test]
    fn unknown_field_errors() {
        let cat = catalog();
        assert!(run(&cat, 0, "database table get wheel.nope").is_err());
    }
}
