//! Per-locus analysis table.
//!
//! Produced by the imputation adapter after joining genotype calls with
//! clinical records: one row per matched sample, carrying the sample's
//! primary imputed allele, its outcome flags and its derived covariates.

use itertools::Itertools;

#[derive(Debug, Clone, PartialEq)]
pub struct LocusRow {
    pub sample_id: String,
    /// Primary imputed allele, e.g. `01:01`.
    pub allele: String,
    /// Outcome flags, aligned with `LocusTable::outcome_names`.
    pub outcomes: Vec<Option<f64>>,
    /// Derived covariates, aligned with `LocusTable::covariate_names`.
    pub covariates: Vec<f64>,
    /// Posterior probability of the sample's best genotype call.
    pub max_posterior: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocusTable {
    pub outcome_names: Vec<String>,
    pub covariate_names: Vec<String>,
    pub rows: Vec<LocusRow>,
}

impl LocusTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn outcome_index(&self, name: &str) -> Option<usize> {
        self.outcome_names.iter().position(|n| n == name)
    }

    /// Distinct alleles with their carrier counts, most frequent first;
    /// ties break alphabetically. This ordering decides the reference
    /// level of the locus-wide test and the reporting order of per-allele
    /// results.
    pub fn allele_counts(&self) -> Vec<(String, usize)> {
        self.rows
            .iter()
            .map(|row| row.allele.clone())
            .counts()
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .collect()
    }
}
