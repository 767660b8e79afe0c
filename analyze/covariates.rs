//! Covariate standardization.
//!
//! Fills the derived fields on [`ClinicalRecord`]s from their raw columns:
//! sex is recoded to a numeric code and mode-imputed, age is mean-imputed
//! and z-scored, principal components are z-scored without imputation.
//! Raw columns are never modified, so the pass is idempotent: running it
//! twice produces identical derived values.
//!
//! Batch statistics (mode, mean, standard deviation) are computed over the
//! records passed in, which is the matched cohort for the locus at hand.
//! Standard deviations use the n-1 sample form; a column with no spread is
//! set to zero rather than divided through.

use crate::clinical::ClinicalRecord;
use thiserror::Error;

/// Standard deviations at or below this are treated as zero spread.
const SD_FLOOR: f64 = 1e-10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CovariateError {
    #[error("column '{0}' has no observed values to standardize from")]
    NoObservedValues(String),
    #[error("column '{0}' contains non-finite values")]
    NonFiniteValues(String),
}

/// Maps a reported sex string to its numeric code (1 = female, 2 = male).
/// Unrecognized values are treated as missing.
pub fn sex_code(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("female") || trimmed.eq_ignore_ascii_case("f") || trimmed == "1"
    {
        Some(1.0)
    } else if trimmed.eq_ignore_ascii_case("male")
        || trimmed.eq_ignore_ascii_case("m")
        || trimmed == "2"
    {
        Some(2.0)
    } else {
        None
    }
}

/// Column names of the derived covariates, in design-matrix order.
pub fn covariate_names(pc_count: usize) -> Vec<String> {
    let mut names = vec!["sex_code".to_string(), "age_scaled".to_string()];
    names.extend((1..=pc_count).map(|i| format!("PC{i}_scaled")));
    names
}

/// The derived covariates of one record, in the order of
/// [`covariate_names`]. `None` if any covariate is still missing after
/// standardization (an unstandardized PC, for instance).
pub fn covariate_row(record: &ClinicalRecord) -> Option<Vec<f64>> {
    let mut row = Vec::with_capacity(2 + record.pcs_scaled.len());
    row.push(record.sex_code?);
    row.push(record.age_scaled?);
    for pc in &record.pcs_scaled {
        row.push((*pc)?);
    }
    Some(row)
}

/// Fills the derived covariate fields on every record in the batch.
pub fn standardize(records: &mut [ClinicalRecord]) -> Result<(), CovariateError> {
    standardize_sex(records)?;
    standardize_age(records)?;
    standardize_pcs(records)?;
    Ok(())
}

fn standardize_sex(records: &mut [ClinicalRecord]) -> Result<(), CovariateError> {
    let mut females = 0usize;
    let mut males = 0usize;
    for record in records.iter() {
        match record.sex.as_deref().and_then(sex_code) {
            Some(code) if code == 1.0 => females += 1,
            Some(_) => males += 1,
            None => {}
        }
    }
    if females + males == 0 {
        return Err(CovariateError::NoObservedValues("sex".to_string()));
    }
    // Mode imputation; ties resolve to the smaller code.
    let mode = if males > females { 2.0 } else { 1.0 };
    for record in records.iter_mut() {
        record.sex_code = Some(
            record
                .sex
                .as_deref()
                .and_then(sex_code)
                .unwrap_or(mode),
        );
    }
    Ok(())
}

fn standardize_age(records: &mut [ClinicalRecord]) -> Result<(), CovariateError> {
    let observed: Vec<f64> = records.iter().filter_map(|r| r.age).collect();
    if observed.iter().any(|v| !v.is_finite()) {
        return Err(CovariateError::NonFiniteValues("age".to_string()));
    }
    if observed.is_empty() {
        return Err(CovariateError::NoObservedValues("age".to_string()));
    }
    let observed_mean = observed.iter().sum::<f64>() / observed.len() as f64;

    // Impute first, then z-score over the completed column.
    let completed: Vec<f64> = records
        .iter()
        .map(|r| r.age.unwrap_or(observed_mean))
        .collect();
    let (mean, sd) = mean_and_sample_sd(&completed);
    for (record, value) in records.iter_mut().zip(completed) {
        record.age_scaled = Some(zscore(value, mean, sd));
    }
    Ok(())
}

fn standardize_pcs(records: &mut [ClinicalRecord]) -> Result<(), CovariateError> {
    let pc_count = records.iter().map(|r| r.pcs.len()).max().unwrap_or(0);
    for j in 0..pc_count {
        let observed: Vec<f64> = records
            .iter()
            .filter_map(|r| r.pcs.get(j).copied().flatten())
            .collect();
        if observed.iter().any(|v| !v.is_finite()) {
            return Err(CovariateError::NonFiniteValues(format!("PC{}", j + 1)));
        }
        let (mean, sd) = mean_and_sample_sd(&observed);
        for record in records.iter_mut() {
            let raw = record.pcs.get(j).copied().flatten();
            if let Some(slot) = record.pcs_scaled.get_mut(j) {
                *slot = raw.map(|value| zscore(value, mean, sd));
            }
        }
    }
    Ok(())
}

/// Mean and n-1 standard deviation; fewer than two values give zero spread.
fn mean_and_sample_sd(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

fn zscore(value: f64, mean: f64, sd: f64) -> f64 {
    if sd <= SD_FLOOR { 0.0 } else { (value - mean) / sd }
}
