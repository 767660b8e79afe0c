use std::fmt;

/// Why a locus-scoped stage declined to produce a result.
///
/// Skips are expected, recoverable conditions; they are logged and counted
/// but never abort the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The model registry carries no entry for the locus.
    ModelMissing,
    /// No genotyped sample matched a clinical record.
    NoMatchedSamples,
    /// Fewer than two allele levels survived filtering, so no contrast
    /// can be tested.
    SingleAllele,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::ModelMissing => "no imputation model in the registry",
            SkipReason::NoMatchedSamples => "no genotyped sample matched a clinical record",
            SkipReason::SingleAllele => "fewer than two allele levels after filtering",
        };
        f.write_str(text)
    }
}

/// Tagged result of a locus-scoped pipeline stage.
///
/// `Skipped` and `Failed` are ordinary values: callers record them in the
/// run summary and move on to the next locus or allele. Hard `Err` returns
/// are reserved for run-level setup problems (configuration, input files)
/// before any locus work starts.
#[derive(Clone, Debug, PartialEq)]
pub enum StageOutcome<T> {
    Ok(T),
    Skipped(SkipReason),
    Failed(String),
}

impl<T> StageOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, StageOutcome::Ok(_))
    }

    /// The contained value, discarding skip and failure tags.
    pub fn ok(self) -> Option<T> {
        match self {
            StageOutcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            StageOutcome::Ok(value) => StageOutcome::Ok(f(value)),
            StageOutcome::Skipped(reason) => StageOutcome::Skipped(reason),
            StageOutcome::Failed(message) => StageOutcome::Failed(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_extracts_only_successes() {
        assert_eq!(StageOutcome::Ok(3).ok(), Some(3));
        assert_eq!(StageOutcome::<i32>::Skipped(SkipReason::ModelMissing).ok(), None);
        assert_eq!(StageOutcome::<i32>::Failed("boom".into()).ok(), None);
    }

    #[test]
    fn map_preserves_tags() {
        let skipped: StageOutcome<i32> = StageOutcome::Skipped(SkipReason::SingleAllele);
        assert_eq!(
            skipped.map(|v| v * 2),
            StageOutcome::Skipped(SkipReason::SingleAllele)
        );
        assert_eq!(StageOutcome::Ok(2).map(|v| v * 2), StageOutcome::Ok(4));
    }
}
