//! The per-session fit orchestrator.
//!
//! One session: validate the configuration against the basis (fatal on
//! mismatch), build the penalty matrices once, load and screen the records,
//! pin the expansion center, then walk the records strictly in time order.
//! Each record is filtered, searched, solved, and scored independently;
//! anything that goes wrong at record granularity degrades that record to a
//! NaN-filled slot and the run continues. The result arrays stay
//! index-aligned with the timestamps so downstream consumers can tell "fit
//! attempted and failed" from "never attempted".

use crate::config::{ConfigError, ConfigSnapshot, FitConfig};
use crate::coords;
use crate::hull::convex_hull_vertices;
use crate::model::{CapBasis, CenterPoint, ModelEval};
use crate::penalty::{self, RegKind};
use crate::search::{ParamPrompt, ParamSearch, RegMethod};
use crate::solver::{chi_squared, solve_coefficients};
use crate::source::{RecordSource, SourceError};
use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to read or write coefficient file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode or decode coefficient file: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Everything one session produces, index-aligned across records, plus the
/// metadata needed to evaluate and audit the fit later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Per-record (start, end) timestamps, Unix seconds.
    pub utime: Vec<(f64, f64)>,
    /// Coefficient vectors, `nrecords × nbasis`; all-NaN rows mark
    /// disqualified records.
    #[serde(with = "crate::persist::array2")]
    pub coeffs: Array2<f64>,
    /// Covariance matrices, `nrecords × nbasis × nbasis`.
    #[serde(with = "crate::persist::array3")]
    pub covariance: Array3<f64>,
    /// Weighted residual sum of squares per record.
    #[serde(with = "crate::persist::array1")]
    pub chi_sq: Array1<f64>,
    /// Regularization kinds applied, by name.
    pub regularization_list: Vec<String>,
    /// Parameter-search method name.
    pub reg_method: String,
    /// Convex-hull vertices of the sample footprint (ECEF, m), bounding the
    /// spatial validity region.
    #[serde(with = "crate::persist::array2")]
    pub hull_vertices: Array2<f64>,
    /// The session's expansion center.
    pub center: CenterPoint,
    /// Basis configuration the coefficients refer to.
    pub basis: CapBasis,
    /// Name of the file the raw records came from.
    pub source_filename: String,
    /// Verbatim configuration used to produce this fit.
    pub config_snapshot: ConfigSnapshot,
}

impl FitResult {
    /// Persist to a JSON coefficient file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FitError> {
        let payload = serde_json::to_string_pretty(self)?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    /// Load a previously saved coefficient file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FitError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Evaluate the fitted model of the record covering `time` at geocentric
    /// spherical positions. Returns None when no record covers the time or
    /// when the covering record was disqualified (NaN coefficients).
    pub fn eval_at(
        &self,
        time: f64,
        r: ArrayView1<f64>,
        theta: ArrayView1<f64>,
        phi: ArrayView1<f64>,
        calcgrad: bool,
        calcerr: bool,
    ) -> Option<ModelEval> {
        let rec = self
            .utime
            .iter()
            .position(|&(t0, t1)| time >= t0 && time < t1)?;
        let c = self.coeffs.row(rec);
        if c.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let dc = self.covariance.index_axis(Axis(0), rec).to_owned();
        Some(
            self.basis
                .eval_model(&self.center, r, theta, phi, c, Some(&dc), calcgrad, calcerr),
        )
    }
}

/// A configured fit session over one record source.
pub struct Fit<S: RecordSource> {
    config: FitConfig,
    basis: CapBasis,
    kinds: Vec<RegKind>,
    method: RegMethod,
    manual: BTreeMap<RegKind, f64>,
    source: S,
    prompt: Option<Box<dyn ParamPrompt>>,
}

impl<S: RecordSource> Fit<S> {
    /// Validate the configuration and bind it to a record source. Unknown
    /// or unsupported regularization kinds and methods fail here, before
    /// any data is read.
    pub fn new(config: FitConfig, source: S) -> Result<Self, ConfigError> {
        let resolved = config.resolve()?;
        let basis = config.basis();
        Ok(Fit {
            basis,
            kinds: resolved.kinds,
            method: resolved.method,
            manual: resolved.manual,
            config,
            source,
            prompt: None,
        })
    }

    /// Attach an interactive parameter source for the prompt strategy.
    pub fn with_prompt(mut self, prompt: Box<dyn ParamPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// The basis model this session fits against.
    pub fn model(&self) -> &CapBasis {
        &self.basis
    }

    /// Fit every record in the (optionally time-bounded) session.
    pub fn run(&self, start: Option<f64>, end: Option<f64>) -> Result<FitResult, FitError> {
        log::info!(
            "[FIT] evaluating {} regularization matrices ({} basis functions); this may take a while",
            self.kinds.len(),
            self.basis.nbasis()
        );
        let reg_matrices =
            penalty::eval_penalty_matrices(&self.basis, &self.kinds, self.config.max_z_int);

        let mut records = self.source.load()?;
        records.apply_validity_mask();
        records.apply_quality_screen(&self.config);
        records.drop_invalid_bins();
        records.select_time_range(start, end);

        let nbins = records.nbins();
        let nrec = records.nrecords();
        log::info!("[FIT] {nrec} records over {nbins} spatial bins");

        // Footprint hull in earth-centered cartesian coordinates.
        let ecef: Vec<[f64; 3]> = (0..nbins)
            .map(|j| coords::geodetic_to_ecef(records.lat[j], records.lon[j], records.alt[j]))
            .collect();
        let hull_idx = convex_hull_vertices(&ecef);
        let hull_vertices =
            Array2::from_shape_fn((hull_idx.len(), 3), |(i, d)| ecef[hull_idx[i]][d]);

        // The expansion center is pinned once per session from the full
        // grid, so every record shares the same pole.
        let mut theta = Array1::<f64>::zeros(nbins);
        let mut phi = Array1::<f64>::zeros(nbins);
        for j in 0..nbins {
            let (_, t, p) = coords::geodetic_to_spherical(records.lat[j], records.lon[j], records.alt[j]);
            theta[j] = t;
            phi[j] = p;
        }
        let center = CenterPoint::from_spherical(theta.view(), phi.view());

        let nbasis = self.basis.nbasis();
        let mut coeffs = Array2::from_elem((nrec, nbasis), f64::NAN);
        let mut covariance = Array3::from_elem((nrec, nbasis, nbasis), f64::NAN);
        let mut chi_sq = Array1::from_elem(nrec, f64::NAN);

        let searcher = ParamSearch {
            method: self.method,
            kinds: &self.kinds,
            manual: &self.manual,
            prompt: self.prompt.as_deref(),
        };

        // The basis depends only on coordinates, which are shared across
        // records; the design matrix is rebuilt only when the NaN filter
        // changes which bins survive.
        let mut design_cache: Option<(Vec<bool>, Array2<f64>)> = None;

        for rec in 0..nrec {
            log::info!("[FIT] record {rec} (t0 = {})", records.utime[rec].0);

            let keep_mask: Vec<bool> = (0..nbins)
                .map(|j| {
                    records.value[[rec, j]].is_finite()
                        && records.error[[rec, j]].is_finite()
                        && records.error[[rec, j]] > 0.0
                })
                .collect();
            let kept: Vec<usize> = (0..nbins).filter(|&j| keep_mask[j]).collect();
            if kept.is_empty() {
                log::warn!("[FIT] record {rec}: no usable samples; leaving NaN result");
                continue;
            }

            if !design_cache.as_ref().is_some_and(|(m, _)| *m == keep_mask) {
                let lat = Array1::from_iter(kept.iter().map(|&j| records.lat[j]));
                let lon = Array1::from_iter(kept.iter().map(|&j| records.lon[j]));
                let alt = Array1::from_iter(kept.iter().map(|&j| records.alt[j]));
                let a = self.basis.basis(&center, lat.view(), lon.view(), alt.view());
                design_cache = Some((keep_mask, a));
            }
            let a = &design_cache.as_ref().expect("design cache was just filled").1;

            let b = Array1::from_iter(kept.iter().map(|&j| records.value[[rec, j]]));
            let w = Array1::from_iter(kept.iter().map(|&j| records.error[[rec, j]].powi(-2)));

            let reg_params = searcher.find_reg_params(a.view(), b.view(), w.view(), &reg_matrices);
            if reg_params.values().any(|v| !v.is_finite()) {
                log::warn!(
                    "[FIT] record {rec}: regularization parameter search failed; fit disqualified"
                );
                continue;
            }

            let (c, dc) = match solve_coefficients(
                a.view(),
                b.view(),
                w.view(),
                &reg_matrices,
                &reg_params,
                true,
            ) {
                Ok(solution) => solution,
                Err(e) => {
                    log::warn!("[FIT] record {rec}: solve failed ({e}); fit disqualified");
                    continue;
                }
            };

            chi_sq[rec] = chi_squared(a.view(), b.view(), w.view(), c.view());
            coeffs.row_mut(rec).assign(&c);
            if let Some(dc) = dc {
                covariance.index_axis_mut(Axis(0), rec).assign(&dc);
            }
        }

        Ok(FitResult {
            utime: records.utime.clone(),
            coeffs,
            covariance,
            chi_sq,
            regularization_list: self.kinds.iter().map(|k| k.to_string()).collect(),
            reg_method: self.method.to_string(),
            hull_vertices,
            center,
            basis: self.basis.clone(),
            source_filename: self.source.filename().to_string(),
            config_snapshot: self.config.snapshot.clone(),
        })
    }
}
