//! Covariate-adjusted association tests.
//!
//! Per allele: a logistic model of the outcome on a carrier indicator plus
//! the derived covariates, reported as an odds ratio with its Wald
//! confidence interval and p-value. Per locus: a likelihood-ratio test of
//! the k-1 allele indicators jointly, against the covariate-only null.
//!
//! Degenerate situations (an indicator without variation, a singular or
//! runaway fit) are soft failures: they are logged through the injected
//! logger and returned as tagged outcomes, never panics.

use crate::glm::{self, FitStatus};
use crate::logging::RunLogger;
use crate::outcome::{SkipReason, StageOutcome};
use crate::table::LocusTable;
use ndarray::{Array1, Array2};
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

const STAGE: &str = "association";
/// Log odds ratios beyond this magnitude are reported as unstable fits.
const MAX_STABLE_LOG_OR: f64 = 30.0;

/// Wald test of one allele's carrier indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationResult {
    pub allele: String,
    pub carriers: usize,
    pub odds_ratio: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64,
}

/// Likelihood-ratio test of all allele indicators at a locus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocusTestResult {
    pub test_statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
}

pub struct AssociationTester<'a> {
    locus_label: &'a str,
    z_multiplier: f64,
    logger: &'a dyn RunLogger,
}

impl<'a> AssociationTester<'a> {
    /// `locus_label` prefixes allele names in audit lines; pass the locus
    /// name. `confidence_level` sets the coverage of reported intervals.
    pub fn new(locus_label: &'a str, confidence_level: f64, logger: &'a dyn RunLogger) -> Self {
        let normal = Normal::new(0.0, 1.0).expect("standard normal has valid parameters");
        let z_multiplier = normal.inverse_cdf(0.5 + confidence_level / 2.0);
        Self {
            locus_label,
            z_multiplier,
            logger,
        }
    }

    /// Tests one allele's carrier indicator against `outcome`.
    pub fn test_allele(
        &self,
        table: &LocusTable,
        allele: &str,
        outcome: &str,
    ) -> StageOutcome<AssociationResult> {
        let entity = self.entity(allele);
        let Some(outcome_idx) = table.outcome_index(outcome) else {
            return self.fail(&entity, format!("outcome '{outcome}' is not in the table"));
        };

        let carriers = table
            .rows
            .iter()
            .filter(|r| r.outcomes[outcome_idx].is_some() && r.allele == allele)
            .count();
        let informative = table
            .rows
            .iter()
            .filter(|r| r.outcomes[outcome_idx].is_some())
            .count();
        if carriers == 0 || carriers == informative {
            return self.fail(
                &entity,
                format!("carrier indicator has no variation ({carriers} of {informative} rows)"),
            );
        }

        let covariate_cols = varying_covariate_columns(table);
        let (x, y) = build_design(table, outcome_idx, &[allele], &covariate_cols);
        let fit = match glm::fit_logistic(x.view(), y.view()) {
            Ok(fit) => fit,
            Err(e) => return self.fail(&entity, e.to_string()),
        };
        if fit.status != FitStatus::Converged {
            return self.fail(
                &entity,
                format!("fit did not converge within {} iterations", fit.iterations),
            );
        }

        let beta = fit.beta[1];
        let se = fit.standard_error(1);
        if !beta.is_finite() || !se.is_finite() || se <= 0.0 {
            return self.fail(&entity, "degenerate fit for the carrier indicator".to_string());
        }
        if beta.abs() > MAX_STABLE_LOG_OR {
            return self.fail(
                &entity,
                format!("no stable odds ratio (log odds ratio {beta:.1})"),
            );
        }

        StageOutcome::Ok(AssociationResult {
            allele: allele.to_string(),
            carriers,
            odds_ratio: beta.exp(),
            ci_lower: (beta - self.z_multiplier * se).exp(),
            ci_upper: (beta + self.z_multiplier * se).exp(),
            p_value: wald_p(beta.abs() / se),
        })
    }

    /// Likelihood-ratio test of the locus: the full model carries one
    /// indicator per non-reference allele, the null only the covariates.
    /// The most frequent allele is the reference level.
    pub fn test_locus(&self, table: &LocusTable, outcome: &str) -> StageOutcome<LocusTestResult> {
        let entity = self.locus_entity();
        let Some(outcome_idx) = table.outcome_index(outcome) else {
            return self.fail(&entity, format!("outcome '{outcome}' is not in the table"));
        };

        let alleles = table.allele_counts();
        if alleles.len() < 2 {
            self.logger.info(
                STAGE,
                &entity,
                "fewer than two allele levels after filtering; no locus-wide test",
            );
            return StageOutcome::Skipped(SkipReason::SingleAllele);
        }
        let contrast: Vec<&str> = alleles[1..].iter().map(|(a, _)| a.as_str()).collect();

        let covariate_cols = varying_covariate_columns(table);
        let (x_null, y) = build_design(table, outcome_idx, &[], &covariate_cols);
        let (x_full, _) = build_design(table, outcome_idx, &contrast, &covariate_cols);

        let null_fit = match glm::fit_logistic(x_null.view(), y.view()) {
            Ok(fit) => fit,
            Err(e) => return self.fail(&entity, format!("null model: {e}")),
        };
        let full_fit = match glm::fit_logistic(x_full.view(), y.view()) {
            Ok(fit) => fit,
            Err(e) => return self.fail(&entity, format!("full model: {e}")),
        };
        if full_fit.status != FitStatus::Converged || null_fit.status != FitStatus::Converged {
            return self.fail(&entity, "likelihood-ratio fits did not converge".to_string());
        }

        // Nested models; clamp away a slightly negative numerical difference.
        let test_statistic = (null_fit.deviance - full_fit.deviance).max(0.0);
        let degrees_of_freedom = alleles.len() - 1;
        StageOutcome::Ok(LocusTestResult {
            test_statistic,
            degrees_of_freedom,
            p_value: chi_square_upper_tail(test_statistic, degrees_of_freedom),
        })
    }

    fn entity(&self, allele: &str) -> String {
        if self.locus_label.is_empty() {
            allele.to_string()
        } else {
            format!("{}*{}", self.locus_label, allele)
        }
    }

    fn locus_entity(&self) -> String {
        if self.locus_label.is_empty() {
            "locus".to_string()
        } else {
            self.locus_label.to_string()
        }
    }

    fn fail<T>(&self, entity: &str, message: String) -> StageOutcome<T> {
        self.logger.warn(STAGE, entity, &message);
        StageOutcome::Failed(message)
    }
}

/// Covariate columns that vary across the table's rows. Constant columns
/// (a single-sex cohort, a zeroed component) would make the information
/// matrix singular alongside the intercept, so they are left out of the
/// design.
fn varying_covariate_columns(table: &LocusTable) -> Vec<usize> {
    (0..table.covariate_names.len())
        .filter(|&j| {
            let mut values = table.rows.iter().map(|r| r.covariates[j]);
            match values.next() {
                None => false,
                Some(first) => values.any(|v| v != first),
            }
        })
        .collect()
}

/// Stacks `[intercept, allele indicators, covariates]` over every row with
/// an observed outcome.
fn build_design(
    table: &LocusTable,
    outcome_idx: usize,
    allele_levels: &[&str],
    covariate_cols: &[usize],
) -> (Array2<f64>, Array1<f64>) {
    let rows: Vec<_> = table
        .rows
        .iter()
        .filter_map(|r| r.outcomes[outcome_idx].map(|y| (r, y)))
        .collect();
    let p = 1 + allele_levels.len() + covariate_cols.len();
    let mut x = Array2::<f64>::zeros((rows.len(), p));
    let mut y = Array1::<f64>::zeros(rows.len());
    for (i, (row, outcome)) in rows.iter().enumerate() {
        x[[i, 0]] = 1.0;
        for (j, level) in allele_levels.iter().enumerate() {
            x[[i, 1 + j]] = if row.allele == *level { 1.0 } else { 0.0 };
        }
        for (j, &col) in covariate_cols.iter().enumerate() {
            x[[i, 1 + allele_levels.len() + j]] = row.covariates[col];
        }
        y[i] = *outcome;
    }
    (x, y)
}

fn wald_p(z_abs: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).expect("standard normal has valid parameters");
    2.0 * normal.sf(z_abs)
}

fn chi_square_upper_tail(statistic: f64, degrees_of_freedom: usize) -> f64 {
    let dist = ChiSquared::new(degrees_of_freedom as f64)
        .expect("degrees of freedom are at least one");
    dist.sf(statistic)
}
