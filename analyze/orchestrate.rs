//! Per-locus pipeline orchestration.
//!
//! Each locus in the panel runs the same stage chain independently:
//! imputation, filtering, association testing, reporting. Loci share
//! nothing but read-only snapshots of the loaded inputs, so the fan-out is
//! a plain parallel map; outcomes land in per-locus keyed maps rather than
//! a shared mutable table. One locus failing soft never stops the others.

use crate::assoc::{AssociationResult, AssociationTester, LocusTestResult};
use crate::clinical::ClinicalTable;
use crate::config::RunConfig;
use crate::filter::{self, FilterStats};
use crate::hla::adapter::{self, GenotypeCall, ImputationMetrics, ImputationResult};
use crate::hla::genetics::GeneticData;
use crate::hla::locus::HlaLocus;
use crate::hla::registry::ModelRegistry;
use crate::logging::RunLogger;
use crate::outcome::{SkipReason, StageOutcome};
use crate::report;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

const FILTER_STAGE: &str = "filter";
const REPORT_STAGE: &str = "report";
const RUN_STAGE: &str = "orchestrate";

/// Analysis knobs the orchestrator needs, decoupled from the settings
/// file. `results_dir: None` disables persistence.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub min_freq: usize,
    pub p_threshold: f64,
    pub confidence_level: f64,
    pub results_dir: Option<PathBuf>,
}

impl RunSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            min_freq: config.analysis_params.min_freq,
            p_threshold: config.analysis_params.p_threshold,
            confidence_level: config.report_params.confidence_level,
            results_dir: Some(config.files.results.clone()),
        }
    }
}

/// An allele that produced no Wald result, with the reason it was passed
/// over.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedAllele {
    pub allele: String,
    pub reason: String,
}

/// Everything a completed locus produced.
#[derive(Debug, Clone)]
pub struct LocusResult {
    pub locus: HlaLocus,
    pub calls: Vec<GenotypeCall>,
    pub metrics: ImputationMetrics,
    pub filter_stats: FilterStats,
    /// Per-allele Wald results, most frequent allele first.
    pub associations: Vec<AssociationResult>,
    /// Locus-wide likelihood-ratio test, when one could be fitted.
    pub locus_test: Option<LocusTestResult>,
    pub skipped_alleles: Vec<SkippedAllele>,
}

/// Outcome of a whole run, keyed by locus. Every panel locus appears in
/// exactly one of the three maps.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: BTreeMap<HlaLocus, LocusResult>,
    pub skipped: BTreeMap<HlaLocus, SkipReason>,
    pub failed: BTreeMap<HlaLocus, String>,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.results.len()
    }

    /// Total loci accounted for across the three maps.
    pub fn total(&self) -> usize {
        self.results.len() + self.skipped.len() + self.failed.len()
    }
}

pub struct LocusOrchestrator {
    clinical: Arc<ClinicalTable>,
    genetic: Arc<GeneticData>,
    registry: Arc<ModelRegistry>,
    settings: RunSettings,
    logger: Arc<dyn RunLogger>,
}

impl LocusOrchestrator {
    pub fn new(
        clinical: Arc<ClinicalTable>,
        genetic: Arc<GeneticData>,
        registry: Arc<ModelRegistry>,
        settings: RunSettings,
        logger: Arc<dyn RunLogger>,
    ) -> Self {
        Self {
            clinical,
            genetic,
            registry,
            settings,
            logger,
        }
    }

    /// Runs every panel locus and collects the tagged outcomes.
    pub fn run(&self) -> RunSummary {
        let outcomes: Vec<(HlaLocus, StageOutcome<LocusResult>)> = HlaLocus::PANEL
            .par_iter()
            .map(|&locus| (locus, self.process_locus(locus)))
            .collect();

        let mut summary = RunSummary::default();
        for (locus, outcome) in outcomes {
            match outcome {
                StageOutcome::Ok(result) => {
                    summary.results.insert(locus, result);
                }
                StageOutcome::Skipped(reason) => {
                    summary.skipped.insert(locus, reason);
                }
                StageOutcome::Failed(message) => {
                    summary.failed.insert(locus, message);
                }
            }
        }
        summary
    }

    fn process_locus(&self, locus: HlaLocus) -> StageOutcome<LocusResult> {
        let entity = locus.as_str();
        let logger = self.logger.as_ref();

        let imputed = match adapter::impute(
            locus,
            &self.genetic,
            &self.clinical,
            &self.registry,
            logger,
        ) {
            StageOutcome::Ok(result) => result,
            StageOutcome::Skipped(reason) => return StageOutcome::Skipped(reason),
            StageOutcome::Failed(message) => return StageOutcome::Failed(message),
        };
        let ImputationResult {
            calls,
            metrics,
            table,
        } = imputed;

        let (table, filter_stats) = filter::filter(
            table,
            &self.clinical.outcome_names,
            self.settings.min_freq,
        );
        logger.info(
            FILTER_STAGE,
            entity,
            &format!(
                "{} rows in; {} missing outcomes, {} below the frequency floor; {} analyzed",
                filter_stats.initial_count,
                filter_stats.missing_filtered,
                filter_stats.frequency_filtered,
                filter_stats.final_count
            ),
        );

        let outcome_name = &self.clinical.outcome_names[0];
        let tester = AssociationTester::new(entity, self.settings.confidence_level, logger);
        let mut associations = Vec::new();
        let mut skipped_alleles = Vec::new();
        for (allele, _) in table.allele_counts() {
            match tester.test_allele(&table, &allele, outcome_name) {
                StageOutcome::Ok(result) => associations.push(result),
                StageOutcome::Skipped(reason) => skipped_alleles.push(SkippedAllele {
                    allele,
                    reason: reason.to_string(),
                }),
                StageOutcome::Failed(message) => skipped_alleles.push(SkippedAllele {
                    allele,
                    reason: message,
                }),
            }
        }
        let locus_test = tester.test_locus(&table, outcome_name).ok();

        let result = LocusResult {
            locus,
            calls,
            metrics,
            filter_stats,
            associations,
            locus_test,
            skipped_alleles,
        };

        if let Some(dir) = &self.settings.results_dir {
            // A reporting failure does not demote a completed locus.
            if let Err(e) = report::write_locus_outputs(dir, &result, self.settings.p_threshold) {
                logger.error(REPORT_STAGE, entity, &e.to_string());
            }
        }

        logger.info(RUN_STAGE, entity, "locus complete");
        StageOutcome::Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinical::ClinicalRecord;
    use crate::hla::registry::{GenotypeClass, LocusModel};
    use crate::logging::{LogLevel, MemoryLogger};
    use ndarray::Array2;

    fn clinical(n: usize) -> ClinicalTable {
        let records = (0..n)
            .map(|i| ClinicalRecord {
                sample_id: format!("S{i}"),
                outcomes: vec![Some(if i % 3 == 0 { 1.0 } else { 0.0 })],
                sex: Some(if i % 4 < 2 { "female" } else { "male" }.to_string()),
                age: Some(30.0 + 2.0 * i as f64),
                pcs: vec![],
                sex_code: None,
                age_scaled: None,
                pcs_scaled: vec![],
            })
            .collect();
        ClinicalTable::new(vec!["severity".to_string()], 0, records).unwrap()
    }

    fn genetic(n: usize) -> GeneticData {
        let dosages = Array2::from_shape_fn((n, 1), |(i, _)| if i % 2 == 0 { 2.0 } else { 0.0 });
        GeneticData::new(
            (0..n).map(|i| format!("S{i}")).collect(),
            vec!["rs1".to_string()],
            dosages,
        )
        .unwrap()
    }

    fn model_for(locus: HlaLocus, marker: &str) -> LocusModel {
        let homozygous = |allele: &str, weight: f64| GenotypeClass {
            allele1: allele.to_string(),
            allele2: allele.to_string(),
            intercept: 0.0,
            weights: vec![weight],
        };
        LocusModel {
            locus,
            alleles: vec!["01:01".to_string(), "02:01".to_string()],
            markers: vec![marker.to_string()],
            frequencies: vec![0.5],
            classes: vec![homozygous("01:01", 3.0), homozygous("02:01", -3.0)],
        }
    }

    fn settings() -> RunSettings {
        RunSettings {
            min_freq: 1,
            p_threshold: 0.05,
            confidence_level: 0.95,
            results_dir: None,
        }
    }

    #[test]
    fn uncovered_loci_are_skipped_and_every_locus_is_accounted_for() {
        let registry = ModelRegistry {
            models: vec![
                model_for(HlaLocus::A, "rs1"),
                model_for(HlaLocus::B, "rs1"),
            ],
        };
        let logger = Arc::new(MemoryLogger::new());
        let orchestrator = LocusOrchestrator::new(
            Arc::new(clinical(12)),
            Arc::new(genetic(12)),
            Arc::new(registry),
            settings(),
            logger.clone(),
        );
        let summary = orchestrator.run();

        assert_eq!(summary.processed(), 2);
        assert_eq!(summary.skipped.len(), 6);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.total(), HlaLocus::PANEL.len());
        assert!(
            summary
                .skipped
                .values()
                .all(|reason| *reason == SkipReason::ModelMissing)
        );
        assert!(logger.contains(LogLevel::Info, "locus complete"));
    }

    #[test]
    fn completed_locus_carries_tests_and_accounting() {
        let registry = ModelRegistry {
            models: vec![model_for(HlaLocus::A, "rs1")],
        };
        let orchestrator = LocusOrchestrator::new(
            Arc::new(clinical(12)),
            Arc::new(genetic(12)),
            Arc::new(registry),
            settings(),
            Arc::new(MemoryLogger::new()),
        );
        let summary = orchestrator.run();
        let result = summary.results.get(&HlaLocus::A).unwrap();

        assert_eq!(result.filter_stats.initial_count, 12);
        assert_eq!(result.filter_stats.final_count, 12);
        assert_eq!(
            result.filter_stats.initial_count,
            result.filter_stats.final_count
                + result.filter_stats.missing_filtered
                + result.filter_stats.frequency_filtered
        );
        assert_eq!(result.metrics.samples, 12);
        assert!(result.metrics.high_pct > 99.0);
        assert_eq!(result.associations.len(), 2);
        assert_eq!(result.associations[0].carriers, 6);
        let locus_test = result.locus_test.as_ref().unwrap();
        assert_eq!(locus_test.degrees_of_freedom, 1);
        assert!(locus_test.p_value > 0.0 && locus_test.p_value <= 1.0);
        assert!(result.skipped_alleles.is_empty());
    }

    #[test]
    fn model_invocation_failure_lands_in_the_failed_map() {
        let registry = ModelRegistry {
            models: vec![model_for(HlaLocus::A, "rs_missing")],
        };
        let logger = Arc::new(MemoryLogger::new());
        let orchestrator = LocusOrchestrator::new(
            Arc::new(clinical(12)),
            Arc::new(genetic(12)),
            Arc::new(registry),
            settings(),
            logger.clone(),
        );
        let summary = orchestrator.run();

        assert!(summary.results.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed.get(&HlaLocus::A).unwrap().contains("rs_missing"));
        assert_eq!(summary.skipped.len(), 7);
        assert!(logger.contains(LogLevel::Error, "rs_missing"));
    }
}
