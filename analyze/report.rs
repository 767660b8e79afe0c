//! Per-locus result persistence.
//!
//! Three files per completed locus land in the results directory:
//! `<locus>_statistics.toml` with filter accounting and test results,
//! `<locus>_imputation.toml` with confidence metrics and every genotype
//! call, and `<locus>_report.txt`, a human-readable summary with a
//! significant-findings section gated on the configured p threshold.

use crate::orchestrate::{LocusResult, SkippedAllele};
use crate::assoc::{AssociationResult, LocusTestResult};
use crate::filter::FilterStats;
use crate::hla::adapter::{GenotypeCall, ImputationMetrics};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write result file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to serialize results to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

#[derive(Serialize)]
struct StatisticsDocument<'a> {
    locus: &'a str,
    filter: &'a FilterStats,
    associations: &'a [AssociationResult],
    skipped_alleles: &'a [SkippedAllele],
    #[serde(skip_serializing_if = "Option::is_none")]
    locus_test: Option<&'a LocusTestResult>,
}

#[derive(Serialize)]
struct ImputationDocument<'a> {
    locus: &'a str,
    metrics: &'a ImputationMetrics,
    calls: &'a [GenotypeCall],
}

/// Writes the three per-locus files, creating the directory if needed.
pub fn write_locus_outputs(
    dir: &Path,
    result: &LocusResult,
    p_threshold: f64,
) -> Result<(), ReportError> {
    fs::create_dir_all(dir)?;
    let locus = result.locus.as_str();

    let statistics = StatisticsDocument {
        locus,
        filter: &result.filter_stats,
        associations: &result.associations,
        skipped_alleles: &result.skipped_alleles,
        locus_test: result.locus_test.as_ref(),
    };
    write_text(
        &dir.join(format!("{locus}_statistics.toml")),
        &toml::to_string_pretty(&statistics)?,
    )?;

    let imputation = ImputationDocument {
        locus,
        metrics: &result.metrics,
        calls: &result.calls,
    };
    write_text(
        &dir.join(format!("{locus}_imputation.toml")),
        &toml::to_string_pretty(&imputation)?,
    )?;

    write_text(
        &dir.join(format!("{locus}_report.txt")),
        &render_report(result, p_threshold),
    )?;
    Ok(())
}

fn write_text(path: &Path, text: &str) -> Result<(), ReportError> {
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(text.as_bytes())?;
    Ok(())
}

/// Renders the human-readable locus report.
pub fn render_report(result: &LocusResult, p_threshold: f64) -> String {
    let locus = result.locus.as_str();
    let mut out = String::new();
    let title = format!("HLA locus {locus} association report");
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "=".repeat(title.len()));
    let _ = writeln!(out);

    let stats = &result.filter_stats;
    let _ = writeln!(out, "Sample Statistics");
    let _ = writeln!(out, "-----------------");
    let _ = writeln!(out, "initial samples:            {}", stats.initial_count);
    let _ = writeln!(out, "missing required variables: {}", stats.missing_filtered);
    let _ = writeln!(out, "below allele frequency:     {}", stats.frequency_filtered);
    let _ = writeln!(out, "analyzed samples:           {}", stats.final_count);
    let _ = writeln!(out, "filtered:                   {:.1}%", stats.total_filtered_percent);
    let m = &result.metrics;
    let _ = writeln!(
        out,
        "imputation confidence:      low {:.1}% / medium {:.1}% / high {:.1}% ({} calls)",
        m.low_pct, m.medium_pct, m.high_pct, m.samples
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "Association Results");
    let _ = writeln!(out, "-------------------");
    match &result.locus_test {
        Some(test) => {
            let _ = writeln!(
                out,
                "likelihood-ratio test: chi2 = {:.4}, df = {}, p = {}",
                test.test_statistic,
                test.degrees_of_freedom,
                format_p(test.p_value)
            );
        }
        None => {
            let _ = writeln!(out, "likelihood-ratio test: not available");
        }
    }
    let _ = writeln!(out);
    if result.associations.is_empty() {
        let _ = writeln!(out, "no allele produced a Wald result");
    } else {
        let _ = writeln!(
            out,
            "{:<12} {:>9} {:>10} {:>22} {:>10}",
            "allele", "carriers", "OR", "CI", "p"
        );
        for assoc in &result.associations {
            let _ = writeln!(
                out,
                "{:<12} {:>9} {:>10.4} {:>22} {:>10}",
                result.locus.qualify_allele(&assoc.allele),
                assoc.carriers,
                assoc.odds_ratio,
                format!("({:.4}, {:.4})", assoc.ci_lower, assoc.ci_upper),
                format_p(assoc.p_value)
            );
        }
    }
    for skipped in &result.skipped_alleles {
        let _ = writeln!(
            out,
            "not tested: {} ({})",
            result.locus.qualify_allele(&skipped.allele),
            skipped.reason
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Significant Findings");
    let _ = writeln!(out, "--------------------");
    let significant: Vec<&AssociationResult> = result
        .associations
        .iter()
        .filter(|a| a.p_value < p_threshold)
        .collect();
    if significant.is_empty() {
        let _ = writeln!(out, "none at p < {p_threshold}");
    } else {
        for assoc in significant {
            let _ = writeln!(
                out,
                "{}: OR = {:.4} ({:.4}, {:.4}), p = {}",
                result.locus.qualify_allele(&assoc.allele),
                assoc.odds_ratio,
                assoc.ci_lower,
                assoc.ci_upper,
                format_p(assoc.p_value)
            );
        }
    }
    out
}

/// Fixed-point for ordinary p-values, scientific once they drop below
/// display precision.
fn format_p(p: f64) -> String {
    if p < 1e-4 {
        format!("{p:.2e}")
    } else {
        format!("{p:.4}")
    }
}
