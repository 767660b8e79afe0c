//! Imputation adapter: runs a registry model over the genotyped cohort and
//! joins the calls with clinical records into a per-locus analysis table.
//!
//! The adapter owns the boundary between genotype space and clinical
//! space. Genotype calls are made for every genotyped sample; only samples
//! that also carry a clinical record enter the analysis table, with the
//! covariates standardized over exactly that matched cohort. A sample's
//! primary allele is the first allele of its ordered best-genotype pair.

use crate::clinical::{ClinicalRecord, ClinicalTable};
use crate::covariates;
use crate::logging::RunLogger;
use crate::outcome::{SkipReason, StageOutcome};
use crate::table::{LocusRow, LocusTable};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::genetics::GeneticData;
use super::locus::HlaLocus;
use super::registry::ModelRegistry;

pub const STAGE: &str = "HLA imputation";

/// Posterior thresholds of the call-confidence tiers.
pub const MEDIUM_CONFIDENCE: f64 = 0.5;
pub const HIGH_CONFIDENCE: f64 = 0.75;

/// One sample's imputed genotype at one locus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenotypeCall {
    pub sample_id: String,
    /// Ordered allele pair; `allele1 <= allele2`, and `allele1` is the
    /// sample's primary allele downstream.
    pub allele1: String,
    pub allele2: String,
    /// Posterior probability of each candidate genotype class.
    pub posteriors: Array1<f64>,
    pub max_posterior: f64,
}

/// Distribution of call confidence across the cohort.
///
/// A call is low-confidence below 0.5 posterior, medium-confidence from
/// 0.5 up to (excluding) 0.75, and high-confidence at or above 0.75.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImputationMetrics {
    pub samples: usize,
    pub low_pct: f64,
    pub medium_pct: f64,
    pub high_pct: f64,
}

impl ImputationMetrics {
    pub fn from_calls(calls: &[GenotypeCall]) -> Self {
        let samples = calls.len();
        if samples == 0 {
            return Self {
                samples: 0,
                low_pct: 0.0,
                medium_pct: 0.0,
                high_pct: 0.0,
            };
        }
        let mut low = 0usize;
        let mut medium = 0usize;
        let mut high = 0usize;
        for call in calls {
            if call.max_posterior < MEDIUM_CONFIDENCE {
                low += 1;
            } else if call.max_posterior < HIGH_CONFIDENCE {
                medium += 1;
            } else {
                high += 1;
            }
        }
        let pct = |count: usize| 100.0 * count as f64 / samples as f64;
        Self {
            samples,
            low_pct: pct(low),
            medium_pct: pct(medium),
            high_pct: pct(high),
        }
    }
}

/// Everything imputation produces for one locus.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputationResult {
    /// Calls for every genotyped sample, in fileset order.
    pub calls: Vec<GenotypeCall>,
    pub metrics: ImputationMetrics,
    /// Analysis table over the matched, covariate-complete samples.
    pub table: LocusTable,
}

/// Imputes `locus` and assembles its analysis table.
pub fn impute(
    locus: HlaLocus,
    genetic: &GeneticData,
    clinical: &ClinicalTable,
    registry: &ModelRegistry,
    logger: &dyn RunLogger,
) -> StageOutcome<ImputationResult> {
    let entity = locus.as_str();
    let Some(model) = registry.model(locus) else {
        logger.info(STAGE, entity, "no model in the registry; locus skipped");
        return StageOutcome::Skipped(SkipReason::ModelMissing);
    };

    let matched: Vec<(usize, &ClinicalRecord)> = genetic
        .sample_ids
        .iter()
        .enumerate()
        .filter_map(|(i, id)| clinical.get(id).map(|record| (i, record)))
        .collect();
    if matched.is_empty() {
        logger.warn(STAGE, entity, "no genotyped sample matches a clinical record");
        return StageOutcome::Skipped(SkipReason::NoMatchedSamples);
    }

    // Standardize over the matched cohort only; the shared table stays
    // untouched.
    let mut cohort: Vec<ClinicalRecord> = matched.iter().map(|(_, r)| (*r).clone()).collect();
    if let Err(e) = covariates::standardize(&mut cohort) {
        logger.error(STAGE, entity, &e.to_string());
        return StageOutcome::Failed(e.to_string());
    }

    let calls = match model.predict(genetic) {
        Ok(calls) => calls,
        Err(e) => {
            logger.error(STAGE, entity, &e.to_string());
            return StageOutcome::Failed(e.to_string());
        }
    };
    let metrics = ImputationMetrics::from_calls(&calls);

    let mut rows = Vec::with_capacity(cohort.len());
    let mut incomplete = 0usize;
    for ((genetic_idx, _), record) in matched.iter().zip(&cohort) {
        let call = &calls[*genetic_idx];
        match covariates::covariate_row(record) {
            Some(covariate_values) => rows.push(LocusRow {
                sample_id: record.sample_id.clone(),
                allele: call.allele1.clone(),
                outcomes: record.outcomes.clone(),
                covariates: covariate_values,
                max_posterior: call.max_posterior,
            }),
            None => incomplete += 1,
        }
    }
    if incomplete > 0 {
        logger.info(
            STAGE,
            entity,
            &format!("{incomplete} matched samples lack complete covariates"),
        );
    }
    if rows.is_empty() {
        let message = "no matched sample has complete covariates".to_string();
        logger.warn(STAGE, entity, &message);
        return StageOutcome::Failed(message);
    }

    logger.info(
        STAGE,
        entity,
        &format!(
            "called {} samples; {} matched clinical records; {} analysis rows",
            calls.len(),
            matched.len(),
            rows.len()
        ),
    );

    StageOutcome::Ok(ImputationResult {
        calls,
        metrics,
        table: LocusTable {
            outcome_names: clinical.outcome_names.clone(),
            covariate_names: covariates::covariate_names(clinical.pc_count),
            rows,
        },
    })
}
