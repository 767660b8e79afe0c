//! Per-locus imputation model registry.
//!
//! The registry file is a TOML document carrying one trained model per
//! covered locus. A model scores every stored candidate genotype (an
//! ordered allele pair) from marker dosages through a linear classifier
//! and a softmax, so prediction needs no fitting machinery at run time.
//! Loci absent from the registry are legitimate; callers treat them as
//! skips.

use super::adapter::GenotypeCall;
use super::genetics::GeneticData;
use super::locus::HlaLocus;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read registry file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML registry file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid model for locus {locus}: {message}")]
    InvalidModel { locus: HlaLocus, message: String },
}

/// A call against a registry model that could not be completed.
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("model marker '{marker}' is absent from the genotype fileset")]
    MarkerMissing { marker: String },
}

/// One candidate genotype of a locus model: an ordered allele pair and the
/// linear classifier scoring it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenotypeClass {
    pub allele1: String,
    pub allele2: String,
    pub intercept: f64,
    /// One weight per model marker, in `LocusModel::markers` order.
    pub weights: Vec<f64>,
}

/// A trained imputation model for one locus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocusModel {
    pub locus: HlaLocus,
    /// Alleles the model can call.
    pub alleles: Vec<String>,
    /// Marker IDs the classifier reads, in weight order.
    pub markers: Vec<String>,
    /// Per-marker A1 allele frequencies used to mean-fill missing dosages.
    pub frequencies: Vec<f64>,
    pub classes: Vec<GenotypeClass>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelRegistry {
    pub models: Vec<LocusModel>,
}

impl ModelRegistry {
    /// Loads and validates a registry file.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = fs::read_to_string(path)?;
        let registry: ModelRegistry = toml::from_str(&text)?;
        registry.validate()?;
        Ok(registry)
    }

    /// The model covering `locus`, if the registry has one.
    pub fn model(&self, locus: HlaLocus) -> Option<&LocusModel> {
        self.models.iter().find(|m| m.locus == locus)
    }

    pub fn covered_loci(&self) -> Vec<HlaLocus> {
        self.models.iter().map(|m| m.locus).collect()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        for model in &self.models {
            let invalid = |message: String| RegistryError::InvalidModel {
                locus: model.locus,
                message,
            };
            if model.markers.is_empty() {
                return Err(invalid("model lists no markers".to_string()));
            }
            if model.frequencies.len() != model.markers.len() {
                return Err(invalid(format!(
                    "{} markers but {} allele frequencies",
                    model.markers.len(),
                    model.frequencies.len()
                )));
            }
            if model.classes.is_empty() {
                return Err(invalid("model lists no genotype classes".to_string()));
            }
            for class in &model.classes {
                if class.weights.len() != model.markers.len() {
                    return Err(invalid(format!(
                        "genotype class {}/{} carries {} weights for {} markers",
                        class.allele1,
                        class.allele2,
                        class.weights.len(),
                        model.markers.len()
                    )));
                }
                for allele in [&class.allele1, &class.allele2] {
                    if !model.alleles.contains(allele) {
                        return Err(invalid(format!(
                            "genotype class names unknown allele '{allele}'"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl LocusModel {
    /// Calls the genotype of every sample in `genetic`.
    ///
    /// Missing dosages are filled with twice the stored allele frequency
    /// before scoring. Class scores pass through a stabilized softmax; the
    /// best class becomes the call, with its allele pair ordered so
    /// `allele1 <= allele2`.
    pub fn predict(&self, genetic: &GeneticData) -> Result<Vec<GenotypeCall>, PredictError> {
        let columns: Vec<usize> = self
            .markers
            .iter()
            .map(|marker| {
                genetic
                    .marker_position(marker)
                    .ok_or_else(|| PredictError::MarkerMissing {
                        marker: marker.clone(),
                    })
            })
            .collect::<Result<_, _>>()?;

        let mut calls = Vec::with_capacity(genetic.n_samples());
        let mut dose = vec![0.0f64; self.markers.len()];
        for sample in 0..genetic.n_samples() {
            for (slot, (&column, &frequency)) in dose
                .iter_mut()
                .zip(columns.iter().zip(&self.frequencies))
            {
                let observed = genetic.dosages[[sample, column]];
                *slot = if observed.is_nan() {
                    2.0 * frequency
                } else {
                    observed
                };
            }

            let scores: Vec<f64> = self
                .classes
                .iter()
                .map(|class| {
                    class.intercept
                        + class
                            .weights
                            .iter()
                            .zip(&dose)
                            .map(|(w, d)| w * d)
                            .sum::<f64>()
                })
                .collect();
            let posteriors = softmax(&scores);
            let (best, &max_posterior) = posteriors
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .expect("a validated model has at least one genotype class");

            let class = &self.classes[best];
            let (allele1, allele2) = if class.allele1 <= class.allele2 {
                (class.allele1.clone(), class.allele2.clone())
            } else {
                (class.allele2.clone(), class.allele1.clone())
            };
            calls.push(GenotypeCall {
                sample_id: genetic.sample_ids[sample].clone(),
                allele1,
                allele2,
                posteriors: Array1::from_vec(posteriors),
                max_posterior,
            });
        }
        Ok(calls)
    }
}

/// Numerically stable softmax.
fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
