//! Clinical table loading and validation.
//!
//! This module is the exclusive entry point for the clinical input file: a
//! tab-separated table with one row per sample. The schema is nullable by
//! design. Outcome flags, sex, age and principal components may all carry
//! missing values; row dropping is the filter stage's job, not the
//! loader's. The loader only fails hard on structural problems: missing
//! columns, unparseable numeric cells, duplicate or absent sample
//! identifiers.
//!
//! Numeric cells may use a decimal comma (`45,5`); these are normalized to
//! a decimal point before parsing. The tokens `NA`, `NaN`, `NULL` and the
//! empty string are read as missing.

use crate::covariates;
use crate::logging::RunLogger;
use ahash::AHashMap;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Column name of the join key against the genotype fileset.
pub const SAMPLE_ID_COLUMN: &str = "sample_id";

const LOAD_STAGE: &str = "clinical load";

/// One clinical sample, raw columns plus the derived covariate fields
/// standardization fills in. Derived fields never overwrite raw ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalRecord {
    pub sample_id: String,
    /// Observed outcome flags, aligned with `ClinicalTable::outcome_names`.
    pub outcomes: Vec<Option<f64>>,
    /// Reported sex, kept verbatim.
    pub sex: Option<String>,
    pub age: Option<f64>,
    /// Raw principal components PC1..PCk.
    pub pcs: Vec<Option<f64>>,
    /// Numeric sex code (1 = female, 2 = male), filled by standardization.
    pub sex_code: Option<f64>,
    /// Z-scored age, filled by standardization.
    pub age_scaled: Option<f64>,
    /// Z-scored principal components, filled by standardization.
    pub pcs_scaled: Vec<Option<f64>>,
}

/// The loaded clinical table, indexed by sample identifier.
#[derive(Debug, Clone)]
pub struct ClinicalTable {
    /// The required outcome variables, in configuration order.
    pub outcome_names: Vec<String>,
    /// Number of PC columns found in the file.
    pub pc_count: usize,
    records: Vec<ClinicalRecord>,
    index: AHashMap<String, usize>,
}

impl ClinicalTable {
    /// Builds a table from records, rejecting duplicate sample identifiers.
    pub fn new(
        outcome_names: Vec<String>,
        pc_count: usize,
        records: Vec<ClinicalRecord>,
    ) -> Result<Self, ClinicalError> {
        let mut index = AHashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if index.insert(record.sample_id.clone(), i).is_some() {
                return Err(ClinicalError::DuplicateSample(record.sample_id.clone()));
            }
        }
        Ok(Self {
            outcome_names,
            pc_count,
            records,
            index,
        })
    }

    pub fn get(&self, sample_id: &str) -> Option<&ClinicalRecord> {
        self.index.get(sample_id).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[ClinicalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Failures while reading or validating the clinical table.
#[derive(Error, Debug)]
pub enum ClinicalError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the clinical table. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "Column '{column}', data row {row}: '{value}' is not numeric (decimal commas are accepted)."
    )]
    NotNumeric {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Column '{column}', data row {row}: non-finite values are not allowed.")]
    NonFinite { column: String, row: usize },
    #[error("Data row {row} has no sample identifier.")]
    MissingSampleId { row: usize },
    #[error("Duplicate sample identifier '{0}' in the clinical table.")]
    DuplicateSample(String),
    #[error("The clinical table contains no data rows.")]
    Empty,
}

/// Reads the clinical TSV, validates its structure, and reports missing-value
/// counts for the required outcome variables through `logger`.
pub fn load_clinical_table(
    path: &Path,
    required_vars: &[String],
    logger: &dyn RunLogger,
) -> Result<ClinicalTable, ClinicalError> {
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let n = df.height();
    if n == 0 {
        return Err(ClinicalError::Empty);
    }

    let columns_set: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    for name in [SAMPLE_ID_COLUMN, "sex", "age"]
        .iter()
        .map(|s| s.to_string())
        .chain(required_vars.iter().cloned())
    {
        if !columns_set.contains(&name) {
            return Err(ClinicalError::ColumnNotFound(name));
        }
    }

    // PC columns are optional and must be contiguous from PC1.
    let pc_count = (1..)
        .take_while(|i| columns_set.contains(&format!("PC{i}")))
        .count();

    let ids = string_column(&df, SAMPLE_ID_COLUMN)?;
    let sex_raw = string_column(&df, "sex")?;
    let age_raw = string_column(&df, "age")?;
    let pcs_raw: Vec<Vec<Option<String>>> = (1..=pc_count)
        .map(|i| string_column(&df, &format!("PC{i}")))
        .collect::<Result<_, _>>()?;
    let outcomes_raw: Vec<Vec<Option<String>>> = required_vars
        .iter()
        .map(|name| string_column(&df, name))
        .collect::<Result<_, _>>()?;

    let mut records = Vec::with_capacity(n);
    let mut unrecognized_sex = 0usize;
    for i in 0..n {
        let row = i + 1;
        let sample_id = ids[i]
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ClinicalError::MissingSampleId { row })?
            .to_string();

        let sex = sex_raw[i]
            .as_deref()
            .map(str::trim)
            .filter(|s| !is_missing_token(s))
            .map(str::to_string);
        if let Some(value) = &sex
            && covariates::sex_code(value).is_none()
        {
            unrecognized_sex += 1;
        }

        let age = parse_numeric_cell(age_raw[i].as_deref(), "age", row)?;
        let pcs = pcs_raw
            .iter()
            .enumerate()
            .map(|(j, column)| parse_numeric_cell(column[i].as_deref(), &format!("PC{}", j + 1), row))
            .collect::<Result<Vec<_>, _>>()?;
        let outcomes = outcomes_raw
            .iter()
            .zip(required_vars)
            .map(|(column, name)| parse_numeric_cell(column[i].as_deref(), name, row))
            .collect::<Result<Vec<_>, _>>()?;

        records.push(ClinicalRecord {
            sample_id,
            outcomes,
            sex,
            age,
            pcs,
            sex_code: None,
            age_scaled: None,
            pcs_scaled: vec![None; pc_count],
        });
    }

    let missing: Vec<String> = required_vars
        .iter()
        .enumerate()
        .filter_map(|(j, name)| {
            let count = records.iter().filter(|r| r.outcomes[j].is_none()).count();
            (count > 0).then(|| format!("{name} ({count} samples)"))
        })
        .collect();
    if !missing.is_empty() {
        logger.warn(
            LOAD_STAGE,
            "clinical",
            &format!(
                "missing values in required variables: {}",
                missing.join(", ")
            ),
        );
    }
    if unrecognized_sex > 0 {
        logger.warn(
            LOAD_STAGE,
            "clinical",
            &format!("{unrecognized_sex} samples carry an unrecognized sex value; treated as missing"),
        );
    }

    ClinicalTable::new(required_vars.to_vec(), pc_count, records)
}

fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, ClinicalError> {
    let series = df.column(name)?;
    let casted = series.cast(&DataType::String)?;
    let chunked = casted.str()?.rechunk();
    Ok(chunked
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

fn is_missing_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("NA")
        || trimmed.eq_ignore_ascii_case("NaN")
        || trimmed.eq_ignore_ascii_case("NULL")
}

fn parse_numeric_cell(
    raw: Option<&str>,
    column: &str,
    row: usize,
) -> Result<Option<f64>, ClinicalError> {
    let Some(raw) = raw else { return Ok(None) };
    let trimmed = raw.trim();
    if is_missing_token(trimmed) {
        return Ok(None);
    }
    let normalized = trimmed.replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        Ok(_) => Err(ClinicalError::NonFinite {
            column: column.to_string(),
            row,
        }),
        Err(_) => Err(ClinicalError::NotNumeric {
            column: column.to_string(),
            row,
            value: trimmed.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, MemoryLogger};
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_tsv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn required() -> Vec<String> {
        vec!["severity".to_string(), "hospitalization".to_string()]
    }

    #[test]
    fn loads_nullable_columns_with_decimal_commas() {
        let content = "sample_id\tsex\tage\tPC1\tPC2\tseverity\thospitalization\n\
                       S1\tfemale\t45,5\t0.1\t-0.2\t1\t0\n\
                       S2\tmale\tNA\t0.3\t\t0\t1\n\
                       S3\t\t61\t-0,4\t0.5\tNA\t1";
        let file = create_test_tsv(content).unwrap();
        let logger = MemoryLogger::new();
        let table = load_clinical_table(file.path(), &required(), &logger).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.pc_count, 2);
        let s1 = table.get("S1").unwrap();
        assert_abs_diff_eq!(s1.age.unwrap(), 45.5);
        assert_eq!(s1.sex.as_deref(), Some("female"));
        assert_eq!(s1.outcomes, vec![Some(1.0), Some(0.0)]);

        let s2 = table.get("S2").unwrap();
        assert_eq!(s2.age, None);
        assert_eq!(s2.pcs, vec![Some(0.3), None]);

        let s3 = table.get("S3").unwrap();
        assert_eq!(s3.sex, None);
        assert_abs_diff_eq!(s3.pcs[0].unwrap(), -0.4);
        assert_eq!(s3.outcomes[0], None);
        assert!(logger.contains(LogLevel::Warn, "severity (1 samples)"));
    }

    #[test]
    fn missing_required_column_fails() {
        let content = "sample_id\tsex\tage\tseverity\nS1\tfemale\t40\t1";
        let file = create_test_tsv(content).unwrap();
        let err =
            load_clinical_table(file.path(), &required(), &MemoryLogger::new()).unwrap_err();
        match err {
            ClinicalError::ColumnNotFound(name) => assert_eq!(name, "hospitalization"),
            other => panic!("expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_sample_id_fails() {
        let content = "sample_id\tsex\tage\tseverity\thospitalization\n\
                       S1\tfemale\t40\t1\t0\n\
                       S1\tmale\t50\t0\t1";
        let file = create_test_tsv(content).unwrap();
        let err =
            load_clinical_table(file.path(), &required(), &MemoryLogger::new()).unwrap_err();
        assert!(matches!(err, ClinicalError::DuplicateSample(id) if id == "S1"));
    }

    #[test]
    fn garbage_numeric_cell_names_column_and_row() {
        let content = "sample_id\tsex\tage\tseverity\thospitalization\n\
                       S1\tfemale\tforty\t1\t0";
        let file = create_test_tsv(content).unwrap();
        let err =
            load_clinical_table(file.path(), &required(), &MemoryLogger::new()).unwrap_err();
        match err {
            ClinicalError::NotNumeric { column, row, value } => {
                assert_eq!(column, "age");
                assert_eq!(row, 1);
                assert_eq!(value, "forty");
            }
            other => panic!("expected NotNumeric, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_sex_is_missing_and_warned() {
        let content = "sample_id\tsex\tage\tseverity\thospitalization\n\
                       S1\tunknown\t40\t1\t0\n\
                       S2\tmale\t50\t0\t1";
        let file = create_test_tsv(content).unwrap();
        let logger = MemoryLogger::new();
        let table = load_clinical_table(file.path(), &required(), &logger).unwrap();
        // Raw value survives; only the derived code treats it as missing.
        assert_eq!(table.get("S1").unwrap().sex.as_deref(), Some("unknown"));
        assert!(logger.contains(LogLevel::Warn, "unrecognized sex"));
    }

    #[test]
    fn table_without_pcs_loads() {
        let content = "sample_id\tsex\tage\tseverity\thospitalization\n\
                       S1\tfemale\t40\t1\t0";
        let file = create_test_tsv(content).unwrap();
        let table =
            load_clinical_table(file.path(), &required(), &MemoryLogger::new()).unwrap();
        assert_eq!(table.pc_count, 0);
        assert!(table.get("S1").unwrap().pcs.is_empty());
    }
}
