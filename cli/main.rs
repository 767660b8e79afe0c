#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::Parser;
use covhla::clinical::load_clinical_table;
use covhla::config::RunConfig;
use covhla::hla::genetics::load_genetic_data;
use covhla::hla::locus::HlaLocus;
use covhla::hla::registry::ModelRegistry;
use covhla::logging::{FacadeLogger, RunLogger};
use covhla::orchestrate::{LocusOrchestrator, RunSettings, RunSummary};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// Imputes HLA alleles from genotypes and tests each allele for
/// association with COVID-19 clinical outcomes, one locus at a time.
#[derive(Parser)]
#[command(
    name = "covhla",
    version,
    about = "Per-locus HLA allele association testing against COVID-19 clinical outcomes"
)]
struct Cli {
    /// Path to the YAML run configuration.
    #[arg(value_name = "CONFIG", default_value = "config.yml")]
    config: PathBuf,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli.config) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(config_path: &Path) -> Result<(), Box<dyn Error>> {
    println!("Loading configuration from '{}'", config_path.display());
    let config = RunConfig::load(config_path)?;
    let logger: Arc<dyn RunLogger> = Arc::new(FacadeLogger);

    println!(
        "Loading clinical table from '{}'",
        config.files.clinical.display()
    );
    let clinical = load_clinical_table(
        &config.files.clinical,
        &config.analysis_params.required_vars,
        logger.as_ref(),
    )?;
    println!(
        "Loaded {} clinical records with {} PCs; outcome under test: '{}'",
        clinical.len(),
        clinical.pc_count,
        config.primary_outcome()
    );

    println!("Loading model registry from '{}'", config.files.model.display());
    let registry = ModelRegistry::load(&config.files.model)?;
    println!(
        "Registry covers {} of {} panel loci",
        registry.covered_loci().len(),
        HlaLocus::PANEL.len()
    );

    println!("Loading genotypes from '{}'", config.files.genetic.display());
    let genetic = load_genetic_data(&config.files.genetic)?;
    println!(
        "Loaded {} samples x {} markers",
        genetic.n_samples(),
        genetic.n_markers()
    );

    let orchestrator = LocusOrchestrator::new(
        Arc::new(clinical),
        Arc::new(genetic),
        Arc::new(registry),
        RunSettings::from_config(&config),
        logger,
    );
    let summary = orchestrator.run();
    print_summary(&summary, &config);
    Ok(())
}

fn print_summary(summary: &RunSummary, config: &RunConfig) {
    println!();
    println!(
        "{:<6} {:<9} {:>9} {:>8} {:>10}",
        "locus", "status", "analyzed", "alleles", "LRT p"
    );
    for locus in HlaLocus::PANEL {
        if let Some(result) = summary.results.get(&locus) {
            let p = result
                .locus_test
                .as_ref()
                .map(|t| format!("{:.4}", t.p_value))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<6} {:<9} {:>9} {:>8} {:>10}",
                locus,
                "done",
                result.filter_stats.final_count,
                result.associations.len(),
                p
            );
        } else if let Some(reason) = summary.skipped.get(&locus) {
            println!("{locus:<6} {:<9} {reason}", "skipped");
        } else if let Some(message) = summary.failed.get(&locus) {
            println!("{locus:<6} {:<9} {message}", "failed");
        }
    }
    println!();
    println!(
        "{} loci processed, {} skipped, {} failed; results in '{}'",
        summary.processed(),
        summary.skipped.len(),
        summary.failed.len(),
        config.files.results.display()
    );
}
