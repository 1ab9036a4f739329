//! The resolved fit configuration.
//!
//! Parsing a configuration file into this struct is a collaborator concern
//! (the CLI does it from JSON); the engine consumes the resolved values and
//! validates them once at session start. Validation failures are fatal:
//! there is no per-record recovery from a misconfigured session.

use crate::model::CapBasis;
use crate::penalty::RegKind;
use crate::search::RegMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Session-fatal configuration failure, raised before any record is
/// processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown regularization kind '{0}' in regularization list")]
    UnknownRegKind(String),
    #[error("regularization kind '{kind}' is not supported by the {basis} basis")]
    UnsupportedRegKind { kind: RegKind, basis: String },
    #[error("unknown regularization method '{0}' (expected chi2, gcv, manual, or prompt)")]
    UnknownMethod(String),
    #[error("manual regularization parameter for unknown kind '{0}'")]
    UnknownManualKind(String),
}

/// Verbatim copy of the configuration source, persisted alongside every
/// coefficient file for reproducibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub name: String,
    pub path: String,
    pub contents: String,
}

fn default_cap_lim() -> f64 {
    6.0
}

/// Resolved fit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Regularization kinds to apply, by name (validated at session start).
    pub regularization_list: Vec<String>,
    /// Parameter-search method name, one of chi2/gcv/manual/prompt.
    pub regularization_method: String,
    /// Number of radial basis orders.
    pub maxk: usize,
    /// Number of angular basis orders.
    pub maxl: usize,
    /// Cap half-width in degrees.
    #[serde(default = "default_cap_lim")]
    pub cap_lim: f64,
    /// Upper bound of the scaled-altitude coordinate for the penalty
    /// integrals.
    pub max_z_int: f64,
    /// Acceptable (low, high) error bounds for the upstream quality screen.
    pub errlim: (f64, f64),
    /// Acceptable (low, high) chi-squared bounds for the upstream quality
    /// screen.
    pub chi2lim: (f64, f64),
    /// Whitelist of acceptable upstream fit codes.
    pub goodfitcode: Vec<i64>,
    /// Name of the physical parameter being fit (e.g. "dens").
    pub param: String,
    /// Fixed per-kind parameters for the manual strategy.
    #[serde(default)]
    pub manual_params: BTreeMap<String, f64>,
    /// Verbatim source of this configuration, carried into the output file.
    #[serde(default)]
    pub snapshot: ConfigSnapshot,
}

/// Configuration after fail-fast validation against the active basis.
pub struct ResolvedConfig {
    pub kinds: Vec<RegKind>,
    pub method: RegMethod,
    pub manual: BTreeMap<RegKind, f64>,
}

impl FitConfig {
    /// Build the basis the configuration describes.
    pub fn basis(&self) -> CapBasis {
        CapBasis::new(self.maxk, self.maxl, self.cap_lim)
    }

    /// Validate the regularization surface against the basis' supported
    /// penalty kinds. Any unknown or unsupported name aborts the session
    /// here, before data is touched.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let supported = [RegKind::Curvature, RegKind::ZerothOrder];
        let mut kinds = Vec::with_capacity(self.regularization_list.len());
        for name in &self.regularization_list {
            let kind: RegKind = name
                .parse()
                .map_err(|_| ConfigError::UnknownRegKind(name.clone()))?;
            if !supported.contains(&kind) {
                return Err(ConfigError::UnsupportedRegKind {
                    kind,
                    basis: "spherical-cap".into(),
                });
            }
            kinds.push(kind);
        }

        let method: RegMethod = self
            .regularization_method
            .parse()
            .map_err(|_| ConfigError::UnknownMethod(self.regularization_method.clone()))?;

        let mut manual = BTreeMap::new();
        for (name, &value) in &self.manual_params {
            let kind: RegKind = name
                .parse()
                .map_err(|_| ConfigError::UnknownManualKind(name.clone()))?;
            manual.insert(kind, value);
        }

        Ok(ResolvedConfig {
            kinds,
            method,
            manual,
        })
    }
}
