use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The fixed panel of classical HLA loci this tool imputes and tests.
///
/// Loci are ordered alphabetically by name; `Ord` on this enum gives the
/// canonical reporting order used everywhere downstream.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum HlaLocus {
    A,
    B,
    C,
    Dpa1,
    Dpb1,
    Dqa1,
    Dqb1,
    Drb1,
}

impl HlaLocus {
    /// Every locus processed in a run, in canonical order.
    pub const PANEL: [HlaLocus; 8] = [
        HlaLocus::A,
        HlaLocus::B,
        HlaLocus::C,
        HlaLocus::Dpa1,
        HlaLocus::Dpb1,
        HlaLocus::Dqa1,
        HlaLocus::Dqb1,
        HlaLocus::Drb1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HlaLocus::A => "A",
            HlaLocus::B => "B",
            HlaLocus::C => "C",
            HlaLocus::Dpa1 => "DPA1",
            HlaLocus::Dpb1 => "DPB1",
            HlaLocus::Dqa1 => "DQA1",
            HlaLocus::Dqb1 => "DQB1",
            HlaLocus::Drb1 => "DRB1",
        }
    }

    /// Formats an allele name in standard nomenclature, e.g. `A*01:01`.
    pub fn qualify_allele(self, allele: &str) -> String {
        format!("{}*{}", self.as_str(), allele)
    }
}

impl fmt::Display for HlaLocus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized HLA locus '{0}'; expected one of A, B, C, DPA1, DPB1, DQA1, DQB1, DRB1")]
pub struct UnknownLocus(pub String);

impl FromStr for HlaLocus {
    type Err = UnknownLocus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(HlaLocus::A),
            "B" => Ok(HlaLocus::B),
            "C" => Ok(HlaLocus::C),
            "DPA1" => Ok(HlaLocus::Dpa1),
            "DPB1" => Ok(HlaLocus::Dpb1),
            "DQA1" => Ok(HlaLocus::Dqa1),
            "DQB1" => Ok(HlaLocus::Dqb1),
            "DRB1" => Ok(HlaLocus::Drb1),
            other => Err(UnknownLocus(other.to_string())),
        }
    }
}
