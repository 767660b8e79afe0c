// Per-locus HLA allele association testing against COVID-19 clinical outcomes.
//
// The crate is organized around one pipeline: load clinical covariates and
// genotypes, impute HLA alleles from per-locus registry models, filter the
// merged analysis table, and fit covariate-adjusted logistic models per
// allele. `orchestrate` drives the eight canonical loci independently and
// collects tagged per-locus outcomes.

pub mod assoc;
pub mod clinical;
pub mod config;
pub mod covariates;
pub mod filter;
pub mod glm;
pub mod logging;
pub mod orchestrate;
pub mod outcome;
pub mod report;
pub mod table;

#[path = "../hla/mod.rs"]
pub mod hla;

pub use config::RunConfig;
pub use logging::{FacadeLogger, LogLevel, MemoryLogger, RunLogger};
pub use orchestrate::{LocusOrchestrator, RunSettings, RunSummary};
pub use outcome::{SkipReason, StageOutcome};
