//! PLINK fileset loading.
//!
//! Reads a `.bed/.bim/.fam` triplet into an in-memory dosage matrix. The
//! `.bed` payload is memory-mapped and decoded from its SNP-major 2-bit
//! encoding into per-sample A1 allele counts; missing genotypes become
//! `NaN` so the imputation models can mean-fill them from their stored
//! allele frequencies.

use ahash::AHashMap;
use memmap2::Mmap;
use ndarray::{Array2, ArrayView1};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

const BED_MAGIC: [u8; 3] = [0x6c, 0x1b, 0x01];

#[derive(Error, Debug)]
pub enum GeneticsError {
    #[error("could not open '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("'{path}' line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("'{path}' is not a SNP-major PLINK .bed file (bad magic number)")]
    BadMagic { path: PathBuf },
    #[error(
        "'{path}' holds {found} bytes but {expected} are required; the file may be truncated or inconsistent with its .bim/.fam"
    )]
    Truncated {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("duplicate sample identifier '{0}' in the .fam file")]
    DuplicateSample(String),
    #[error("duplicate marker identifier '{0}' in the .bim file")]
    DuplicateMarker(String),
}

/// Genotyped samples and their marker dosages.
#[derive(Debug, Clone)]
pub struct GeneticData {
    pub sample_ids: Vec<String>,
    pub marker_ids: Vec<String>,
    /// A1 allele counts, shape `[n_samples, n_markers]`, `NaN` when the
    /// genotype is missing.
    pub dosages: Array2<f64>,
    marker_index: AHashMap<String, usize>,
}

impl GeneticData {
    /// Assembles the container and its marker index, rejecting duplicate
    /// identifiers.
    pub fn new(
        sample_ids: Vec<String>,
        marker_ids: Vec<String>,
        dosages: Array2<f64>,
    ) -> Result<Self, GeneticsError> {
        let mut seen = AHashMap::with_capacity(sample_ids.len());
        for id in &sample_ids {
            if seen.insert(id.clone(), ()).is_some() {
                return Err(GeneticsError::DuplicateSample(id.clone()));
            }
        }
        let mut marker_index = AHashMap::with_capacity(marker_ids.len());
        for (i, id) in marker_ids.iter().enumerate() {
            if marker_index.insert(id.clone(), i).is_some() {
                return Err(GeneticsError::DuplicateMarker(id.clone()));
            }
        }
        Ok(Self {
            sample_ids,
            marker_ids,
            dosages,
            marker_index,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_markers(&self) -> usize {
        self.marker_ids.len()
    }

    pub fn marker_position(&self, marker_id: &str) -> Option<usize> {
        self.marker_index.get(marker_id).copied()
    }

    pub fn marker_column(&self, marker_id: &str) -> Option<ArrayView1<'_, f64>> {
        self.marker_position(marker_id)
            .map(|i| self.dosages.column(i))
    }
}

/// Loads `<prefix>.bed`, `<prefix>.bim` and `<prefix>.fam`.
pub fn load_genetic_data(prefix: &Path) -> Result<GeneticData, GeneticsError> {
    let sample_ids = read_fam(&with_suffix(prefix, "fam"))?;
    let marker_ids = read_bim(&with_suffix(prefix, "bim"))?;
    let dosages = read_bed(&with_suffix(prefix, "bed"), sample_ids.len(), marker_ids.len())?;
    GeneticData::new(sample_ids, marker_ids, dosages)
}

fn with_suffix(prefix: &Path, extension: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn open(path: &Path) -> Result<File, GeneticsError> {
    File::open(path).map_err(|source| GeneticsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Individual IDs from the second whitespace-separated `.fam` column.
fn read_fam(path: &Path) -> Result<Vec<String>, GeneticsError> {
    let reader = BufReader::new(open(path)?);
    let mut ids = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| GeneticsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let iid = line.split_whitespace().nth(1).ok_or_else(|| {
            GeneticsError::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                message: "missing IID column".to_string(),
            }
        })?;
        ids.push(iid.to_string());
    }
    Ok(ids)
}

/// Marker IDs from the second whitespace-separated `.bim` column.
fn read_bim(path: &Path) -> Result<Vec<String>, GeneticsError> {
    let reader = BufReader::new(open(path)?);
    let mut ids = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| GeneticsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let id = line.split_whitespace().nth(1).ok_or_else(|| {
            GeneticsError::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                message: "missing marker ID column".to_string(),
            }
        })?;
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// Decodes the SNP-major `.bed` payload into A1 dosages.
fn read_bed(path: &Path, n_samples: usize, n_markers: usize) -> Result<Array2<f64>, GeneticsError> {
    let file = open(path)?;
    let mmap = unsafe {
        Mmap::map(&file).map_err(|source| GeneticsError::Io {
            path: path.to_path_buf(),
            source,
        })?
    };

    let bytes_per_variant = n_samples.div_ceil(4);
    let expected = 3 + bytes_per_variant * n_markers;
    if mmap.len() < 3 || mmap[..3] != BED_MAGIC {
        return Err(GeneticsError::BadMagic {
            path: path.to_path_buf(),
        });
    }
    if mmap.len() < expected {
        return Err(GeneticsError::Truncated {
            path: path.to_path_buf(),
            expected,
            found: mmap.len(),
        });
    }

    let mut dosages = Array2::<f64>::from_elem((n_samples, n_markers), f64::NAN);
    for marker in 0..n_markers {
        let offset = 3 + marker * bytes_per_variant;
        let block = &mmap[offset..offset + bytes_per_variant];
        for sample in 0..n_samples {
            let byte = block[sample / 4];
            let code = (byte >> ((sample % 4) * 2)) & 0b11;
            dosages[[sample, marker]] = match code {
                0b00 => 2.0,
                0b10 => 1.0,
                0b11 => 0.0,
                _ => f64::NAN,
            };
        }
    }
    Ok(dosages)
}
