//! Baseline health score.
//!
//! A pure, rule-based score computed before any agent sees the data. It is
//! handed to the summary agent as an anchor for its own score.
//!
//! The score starts at [`MAX_SCORE`] and only decreases:
//!
//! | Condition | Deduction |
//! |-----------|-----------|
//! | dataset without description | [`DATASET_UNDESCRIBED_PENALTY`] |
//! | table without description | [`TABLE_UNDESCRIBED_PENALTY`] |
//! | column completeness below [`COLUMN_COMPLETENESS_THRESHOLD`] | [`INCOMPLETE_COLUMNS_PENALTY`] |
//! | billable size above [`LARGE_TABLE_GB`] without partitioning | [`UNPARTITIONED_LARGE_TABLE_PENALTY`] |
//! | last modified more than [`STALE_AFTER_DAYS`] days ago | [`STALE_TABLE_PENALTY`] |
//!
//! Deductions are independent; one table can trigger several. The result is
//! floored at 0.

use chrono::{DateTime, Duration, Utc};

use crate::models::{AnalysisSnapshot, TableRecord};

pub const MAX_SCORE: i64 = 100;

pub const DATASET_UNDESCRIBED_PENALTY: i64 = 5;
pub const TABLE_UNDESCRIBED_PENALTY: i64 = 2;
pub const INCOMPLETE_COLUMNS_PENALTY: i64 = 4;
pub const UNPARTITIONED_LARGE_TABLE_PENALTY: i64 = 10;
pub const STALE_TABLE_PENALTY: i64 = 3;

pub const COLUMN_COMPLETENESS_THRESHOLD: f64 = 0.5;
pub const LARGE_TABLE_GB: f64 = 1.0;
pub const STALE_AFTER_DAYS: i64 = 90;

/// Score `snapshot` as of `now`. Same inputs always give the same score.
pub fn calculate_health_score(snapshot: &AnalysisSnapshot, now: DateTime<Utc>) -> i64 {
    let mut score = MAX_SCORE;

    for dataset in snapshot.datasets() {
        if !dataset.has_dataset_description {
            score -= DATASET_UNDESCRIBED_PENALTY;
        }
        for table in &dataset.tables {
            score -= table_deductions(table, now);
        }
    }

    score.max(0)
}

/// Sum of every deduction `table` triggers.
pub fn table_deductions(table: &TableRecord, now: DateTime<Utc>) -> i64 {
    let mut deduction = 0;

    if !table.has_table_description {
        deduction += TABLE_UNDESCRIBED_PENALTY;
    }

    if table.column_description_completeness < COLUMN_COMPLETENESS_THRESHOLD {
        deduction += INCOMPLETE_COLUMNS_PENALTY;
    }

    if table.billable_gb.unwrap_or(0.0) > LARGE_TABLE_GB && table.partitioning_info.is_none() {
        deduction += UNPARTITIONED_LARGE_TABLE_PENALTY;
    }

    if let Some(last_modified) = table.last_modified {
        if now - last_modified > Duration::days(STALE_AFTER_DAYS) {
            deduction += STALE_TABLE_PENALTY;
        }
    }

    deduction
}
