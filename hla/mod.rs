pub mod adapter;
pub mod genetics;
pub mod locus;
pub mod registry;

pub use adapter::{GenotypeCall, ImputationMetrics, ImputationResult};
pub use genetics::GeneticData;
pub use locus::HlaLocus;
pub use registry::{LocusModel, ModelRegistry};
