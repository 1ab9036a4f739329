#![deny(dead_code)]
#![deny(unused_imports)]

//! Volumetric fits of scattered ionospheric measurements.
//!
//! Noisy 3-D samples (electron density or temperature located by
//! latitude/longitude/altitude) are fit per time record to a continuous
//! analytic model built from radial Laguerre functions crossed with
//! spherical-cap harmonics, by regularized weighted least squares. The
//! regularization strength is selected per kind by root-finding on
//! chi-squared, generalized cross-validation, fixed constants, or an
//! interactive prompt; each record yields a compact coefficient vector with
//! covariance, degraded to NaN when a record cannot be fit.

pub mod config;
pub mod coords;
pub mod fit;
pub mod hull;
pub mod linalg;
pub mod model;
pub mod penalty;
pub mod persist;
pub mod quadrature;
pub mod search;
pub mod solver;
pub mod source;
pub mod special;

pub use config::{ConfigError, ConfigSnapshot, FitConfig};
pub use fit::{Fit, FitError, FitResult};
pub use model::{CapBasis, CenterPoint, ModelCoords, ModelEval};
pub use penalty::{RegKind, RegMatrices, eval_penalty_matrices};
pub use search::{ParamPrompt, ParamSearch, RegMethod, SearchError, StdinPrompt};
pub use solver::{RegParams, chi_squared, solve_coefficients};
pub use source::{JsonSource, MemorySource, RecordSet, RecordSource, SourceError};
