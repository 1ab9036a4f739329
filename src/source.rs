//! The record-source collaborator seam.
//!
//! The engine does not read instrument files itself; a [`RecordSource`]
//! hands it one [`RecordSet`] per session: record time ranges plus aligned
//! coordinate/value/error arrays over a shared spatial grid, and optionally
//! the auxiliary quality arrays the upstream screen is derived from. The
//! JSON-backed implementation below is what the CLI and the tests use.

use crate::config::FitConfig;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read record file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse record file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("misaligned record arrays: {0}")]
    Misaligned(String),
}

/// One session's worth of records on a shared coordinate grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSet {
    /// Per-record (start, end) timestamps, Unix seconds, time-ordered.
    pub utime: Vec<(f64, f64)>,
    /// Geodetic latitude per spatial bin (degrees).
    pub lat: Array1<f64>,
    /// Geodetic longitude per spatial bin (degrees).
    pub lon: Array1<f64>,
    /// Geodetic altitude per spatial bin (m).
    pub alt: Array1<f64>,
    /// Measured parameter, `nrecords × nbins`.
    pub value: Array2<f64>,
    /// One-sigma measurement error, `nrecords × nbins`.
    pub error: Array2<f64>,
    /// Upstream goodness-of-fit statistic per point, when available.
    #[serde(default)]
    pub chi2: Option<Array2<f64>>,
    /// Upstream fitter status code per point, when available.
    #[serde(default)]
    pub fitcode: Option<Array2<i64>>,
    /// Externally derived validity mask; `false` marks a point the engine
    /// must treat as missing.
    #[serde(default)]
    pub mask: Option<Array2<bool>>,
}

impl RecordSet {
    pub fn nrecords(&self) -> usize {
        self.utime.len()
    }

    pub fn nbins(&self) -> usize {
        self.lat.len()
    }

    /// Shape sanity for everything downstream indexing assumes.
    pub fn validate(&self) -> Result<(), SourceError> {
        let (nr, nb) = (self.nrecords(), self.nbins());
        let check = |name: &str, rows: usize, cols: usize| {
            if rows != nr || cols != nb {
                Err(SourceError::Misaligned(format!(
                    "{name} is {rows}×{cols}, expected {nr}×{nb}"
                )))
            } else {
                Ok(())
            }
        };
        check("value", self.value.nrows(), self.value.ncols())?;
        check("error", self.error.nrows(), self.error.ncols())?;
        if self.lon.len() != nb || self.alt.len() != nb {
            return Err(SourceError::Misaligned(
                "coordinate arrays have mismatched lengths".into(),
            ));
        }
        if let Some(c) = &self.chi2 {
            check("chi2", c.nrows(), c.ncols())?;
        }
        if let Some(f) = &self.fitcode {
            check("fitcode", f.nrows(), f.ncols())?;
        }
        if let Some(m) = &self.mask {
            check("mask", m.nrows(), m.ncols())?;
        }
        Ok(())
    }

    /// Honor the externally supplied validity mask: masked points become
    /// missing (NaN) before any filtering happens.
    pub fn apply_validity_mask(&mut self) {
        if let Some(mask) = self.mask.take() {
            for ((i, j), &ok) in mask.indexed_iter() {
                if !ok {
                    self.value[[i, j]] = f64::NAN;
                    self.error[[i, j]] = f64::NAN;
                }
            }
        }
    }

    /// The upstream quality screen: points whose error, goodness-of-fit, or
    /// fitter status fall outside the configured acceptance become missing.
    ///
    /// Some instrument files carry a chi-squared statistic with a known
    /// constant offset of +369; when the median is implausibly large the
    /// offset is subtracted before thresholding.
    pub fn apply_quality_screen(&mut self, config: &FitConfig) {
        let chi2 = self.chi2.clone().map(|mut c| {
            if nanmedian(c.iter().cloned()) > 100.0 {
                c.mapv_inplace(|v| v - 369.0);
            }
            c
        });

        let (nr, nb) = (self.nrecords(), self.nbins());
        let mut rejected = 0usize;
        for i in 0..nr {
            for j in 0..nb {
                let err = self.error[[i, j]];
                let mut good = err > config.errlim.0 && err < config.errlim.1;
                if let Some(c2) = &chi2 {
                    good &= c2[[i, j]] > config.chi2lim.0 && c2[[i, j]] < config.chi2lim.1;
                }
                if let Some(fc) = &self.fitcode {
                    good &= config.goodfitcode.contains(&fc[[i, j]]);
                }
                if !good {
                    self.value[[i, j]] = f64::NAN;
                    self.error[[i, j]] = f64::NAN;
                    rejected += 1;
                }
            }
        }
        if rejected > 0 {
            log::info!("[RECORD SOURCE] quality screen rejected {rejected} of {} points", nr * nb);
        }
    }

    /// Drop spatial bins whose coordinates are non-finite. These are grid
    /// cells the upstream processor declared but never filled (beams that
    /// do not reach a given altitude bin).
    pub fn drop_invalid_bins(&mut self) {
        let keep: Vec<usize> = (0..self.nbins())
            .filter(|&j| {
                self.lat[j].is_finite() && self.lon[j].is_finite() && self.alt[j].is_finite()
            })
            .collect();
        if keep.len() == self.nbins() {
            return;
        }
        let select1 = |a: &Array1<f64>| Array1::from_iter(keep.iter().map(|&j| a[j]));
        self.lat = select1(&self.lat);
        self.lon = select1(&self.lon);
        self.alt = select1(&self.alt);
        let select2 = |a: &Array2<f64>| {
            Array2::from_shape_fn((a.nrows(), keep.len()), |(i, jj)| a[[i, keep[jj]]])
        };
        self.value = select2(&self.value);
        self.error = select2(&self.error);
        self.chi2 = self.chi2.as_ref().map(select2);
        self.fitcode = self.fitcode.as_ref().map(|a| {
            Array2::from_shape_fn((a.nrows(), keep.len()), |(i, jj)| a[[i, keep[jj]]])
        });
    }

    /// Keep only records whose time range falls inside `[start, end]`.
    pub fn select_time_range(&mut self, start: Option<f64>, end: Option<f64>) {
        let keep: Vec<usize> = (0..self.nrecords())
            .filter(|&i| {
                let (t0, t1) = self.utime[i];
                start.is_none_or(|s| t0 >= s) && end.is_none_or(|e| t1 <= e)
            })
            .collect();
        if keep.len() == self.nrecords() {
            return;
        }
        self.utime = keep.iter().map(|&i| self.utime[i]).collect();
        let select_rows = |a: &Array2<f64>| {
            Array2::from_shape_fn((keep.len(), a.ncols()), |(ii, j)| a[[keep[ii], j]])
        };
        self.value = select_rows(&self.value);
        self.error = select_rows(&self.error);
        self.chi2 = self.chi2.as_ref().map(select_rows);
        self.fitcode = self.fitcode.as_ref().map(|a| {
            Array2::from_shape_fn((keep.len(), a.ncols()), |(ii, j)| a[[keep[ii], j]])
        });
    }
}

/// Median ignoring NaN entries; NaN when nothing survives.
fn nanmedian(values: impl Iterator<Item = f64>) -> f64 {
    let mut finite: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(|a, b| a.partial_cmp(b).expect("finite values compare"));
    let mid = finite.len() / 2;
    if finite.len() % 2 == 1 {
        finite[mid]
    } else {
        0.5 * (finite[mid - 1] + finite[mid])
    }
}

/// Per-session source of records.
pub trait RecordSource {
    fn load(&self) -> Result<RecordSet, SourceError>;
    fn filename(&self) -> &str;
}

/// Record source backed by a JSON file holding a serialized [`RecordSet`].
pub struct JsonSource {
    path: PathBuf,
    name: String,
}

impl JsonSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.to_string_lossy().into_owned();
        JsonSource { path, name }
    }
}

impl RecordSource for JsonSource {
    fn load(&self) -> Result<RecordSet, SourceError> {
        let text = std::fs::read_to_string(&self.path)?;
        let set: RecordSet = serde_json::from_str(&text)?;
        set.validate()?;
        Ok(set)
    }

    fn filename(&self) -> &str {
        &self.name
    }
}

/// In-memory source for tests and embedding callers.
pub struct MemorySource {
    pub records: RecordSet,
    pub name: String,
}

impl RecordSource for MemorySource {
    fn load(&self) -> Result<RecordSet, SourceError> {
        self.records.validate()?;
        Ok(self.records.clone())
    }

    fn filename(&self) -> &str {
        &self.name
    }
}
