//! Row filtering ahead of association testing.
//!
//! Two stages run in a fixed order. Complete-case filtering drops rows
//! missing any required outcome variable; allele-frequency filtering then
//! drops rows whose primary allele is carried by fewer than `min_freq` of
//! the remaining rows. A row failing both stages is counted against the
//! first.

use crate::table::LocusTable;
use ahash::AHashMap;
use serde::Serialize;

/// Sample accounting across the filter stages.
///
/// `initial_count` always equals `final_count + missing_filtered +
/// frequency_filtered`; [`FilterStats::new`] computes the derived fields so
/// the identity holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilterStats {
    pub initial_count: usize,
    pub missing_filtered: usize,
    pub frequency_filtered: usize,
    pub final_count: usize,
    /// Percentage of initial rows removed, zero for an empty input.
    pub total_filtered_percent: f64,
}

impl FilterStats {
    pub fn new(initial_count: usize, missing_filtered: usize, frequency_filtered: usize) -> Self {
        let final_count = initial_count - missing_filtered - frequency_filtered;
        let total_filtered_percent = if initial_count == 0 {
            0.0
        } else {
            100.0 * (initial_count - final_count) as f64 / initial_count as f64
        };
        Self {
            initial_count,
            missing_filtered,
            frequency_filtered,
            final_count,
            total_filtered_percent,
        }
    }
}

/// Applies both filter stages and returns the surviving table with its
/// accounting. `required_vars` names outcome columns of the table; rows
/// missing any of them are dropped in the first stage.
pub fn filter(
    table: LocusTable,
    required_vars: &[String],
    min_freq: usize,
) -> (LocusTable, FilterStats) {
    let initial_count = table.len();
    let required_indices: Vec<usize> = required_vars
        .iter()
        .filter_map(|name| table.outcome_index(name))
        .collect();

    let LocusTable {
        outcome_names,
        covariate_names,
        rows,
    } = table;

    let complete: Vec<_> = rows
        .into_iter()
        .filter(|row| {
            required_indices
                .iter()
                .all(|&i| row.outcomes[i].is_some())
        })
        .collect();
    let missing_filtered = initial_count - complete.len();

    // Carrier counts are taken over complete-case survivors only.
    let mut counts: AHashMap<&str, usize> = AHashMap::new();
    for row in &complete {
        *counts.entry(row.allele.as_str()).or_insert(0) += 1;
    }
    let surviving: Vec<_> = complete
        .iter()
        .map(|row| counts[row.allele.as_str()] >= min_freq)
        .collect();
    let kept: Vec<_> = complete
        .into_iter()
        .zip(surviving)
        .filter_map(|(row, keep)| keep.then_some(row))
        .collect();
    let frequency_filtered = initial_count - missing_filtered - kept.len();

    let stats = FilterStats::new(initial_count, missing_filtered, frequency_filtered);
    (
        LocusTable {
            outcome_names,
            covariate_names,
            rows: kept,
        },
        stats,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::LocusRow;
    use approx::assert_abs_diff_eq;

    fn row(id: usize, allele: &str, outcomes: Vec<Option<f64>>) -> LocusRow {
        LocusRow {
            sample_id: format!("S{id}"),
            allele: allele.to_string(),
            outcomes,
            covariates: vec![1.0, 0.0],
            max_posterior: 0.9,
        }
    }

    fn table(rows: Vec<LocusRow>) -> LocusTable {
        LocusTable {
            outcome_names: vec!["severity".to_string(), "hospitalization".to_string()],
            covariate_names: vec!["sex_code".to_string(), "age_scaled".to_string()],
            rows,
        }
    }

    fn required() -> Vec<String> {
        vec!["severity".to_string(), "hospitalization".to_string()]
    }

    #[test]
    fn accounts_for_every_dropped_row() {
        // 200 rows: 20 missing an outcome, then a 5-carrier allele among
        // the remainder with the floor at 10.
        let mut rows = Vec::new();
        for i in 0..20 {
            rows.push(row(i, "01:01", vec![None, Some(0.0)]));
        }
        for i in 20..195 {
            rows.push(row(i, "01:01", vec![Some(1.0), Some(0.0)]));
        }
        for i in 195..200 {
            rows.push(row(i, "07:02", vec![Some(1.0), Some(0.0)]));
        }
        let (kept, stats) = filter(table(rows), &required(), 10);

        assert_eq!(stats.initial_count, 200);
        assert_eq!(stats.missing_filtered, 20);
        assert_eq!(stats.frequency_filtered, 5);
        assert_eq!(stats.final_count, 175);
        assert_eq!(
            stats.initial_count,
            stats.final_count + stats.missing_filtered + stats.frequency_filtered
        );
        assert_abs_diff_eq!(stats.total_filtered_percent, 12.5, epsilon = 1e-12);
        assert_eq!(kept.len(), 175);
        assert!(kept.rows.iter().all(|r| r.allele == "01:01"));
    }

    #[test]
    fn row_failing_both_stages_counts_as_missing() {
        // The single rare-allele carrier also misses an outcome; it must be
        // attributed to the complete-case stage, leaving the rare allele
        // with zero carriers at the frequency stage.
        let mut rows = vec![row(0, "15:01", vec![None, Some(1.0)])];
        for i in 1..12 {
            rows.push(row(i, "01:01", vec![Some(0.0), Some(1.0)]));
        }
        let (_, stats) = filter(table(rows), &required(), 10);
        assert_eq!(stats.missing_filtered, 1);
        assert_eq!(stats.frequency_filtered, 0);
        assert_eq!(stats.final_count, 11);
    }

    #[test]
    fn carrier_count_at_floor_survives() {
        let mut rows = Vec::new();
        for i in 0..10 {
            rows.push(row(i, "02:01", vec![Some(1.0), Some(0.0)]));
        }
        for i in 10..19 {
            rows.push(row(i, "03:03", vec![Some(0.0), Some(0.0)]));
        }
        let (kept, stats) = filter(table(rows), &required(), 10);
        assert_eq!(stats.frequency_filtered, 9);
        assert_eq!(kept.len(), 10);
        assert!(kept.rows.iter().all(|r| r.allele == "02:01"));
    }

    #[test]
    fn counts_are_taken_after_complete_case_drop() {
        // 10 carriers before complete-case filtering, 9 after; the allele
        // must fall below a floor of 10.
        let mut rows = vec![row(0, "04:01", vec![None, Some(0.0)])];
        for i in 1..10 {
            rows.push(row(i, "04:01", vec![Some(1.0), Some(0.0)]));
        }
        for i in 10..30 {
            rows.push(row(i, "01:01", vec![Some(1.0), Some(0.0)]));
        }
        let (kept, stats) = filter(table(rows), &required(), 10);
        assert_eq!(stats.missing_filtered, 1);
        assert_eq!(stats.frequency_filtered, 9);
        assert!(kept.rows.iter().all(|r| r.allele == "01:01"));
    }

    #[test]
    fn empty_input_yields_zeroed_stats() {
        let (kept, stats) = filter(table(vec![]), &required(), 10);
        assert!(kept.is_empty());
        assert_eq!(stats.initial_count, 0);
        assert_eq!(stats.total_filtered_percent, 0.0);
    }
}
