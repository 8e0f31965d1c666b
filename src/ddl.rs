//! Heuristics over BigQuery DDL text.
//!
//! The catalog exposes descriptions only inside the `ddl` column, as
//! `OPTIONS(description="...")` clauses. These helpers turn that text into
//! the two signals the scorer uses: whether an object is documented, and
//! which share of a table's columns are.

use regex::Regex;
use std::sync::OnceLock;

/// Marker BigQuery emits for a described dataset, table, or column.
pub const DESCRIPTION_MARKER: &str = "OPTIONS(description=";

fn column_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*`?(\w+)`?\s+\w+").unwrap())
}

fn description_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)OPTIONS\(description=").unwrap())
}

/// Whether the DDL carries a description clause.
pub fn has_description(ddl: &str) -> bool {
    ddl.contains(DESCRIPTION_MARKER)
}

/// Number of lines that look like a column declaration (`name TYPE ...`).
pub fn declared_columns(ddl: &str) -> usize {
    column_pattern().find_iter(ddl).count()
}

/// Number of description clauses, case-insensitive.
pub fn description_markers(ddl: &str) -> usize {
    description_pattern().find_iter(ddl).count()
}

/// Share of declared columns that carry a description, rounded to two decimals.
///
/// When the table itself is described, one marker belongs to the table and
/// is not counted as a column description. Always in `[0, 1]`; `0` when no
/// columns are declared.
pub fn column_completeness(ddl: &str, table_described: bool) -> f64 {
    let total = declared_columns(ddl);
    if total == 0 {
        return 0.0;
    }
    let described = description_markers(ddl).saturating_sub(usize::from(table_described));
    let ratio = described as f64 / total as f64;
    round2(ratio.clamp(0.0, 1.0))
}

/// Bytes → GiB, rounded to two decimals.
pub fn bytes_to_gib(bytes: Option<i64>) -> f64 {
    match bytes {
        Some(b) if b > 0 => round2(b as f64 / (1u64 << 30) as f64),
        _ => 0.0,
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
