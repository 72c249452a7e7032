//! Fitted constants consumed by the resource estimator and the state-count
//! predictor. The defaults reproduce the historical fits; sites override them
//! with a JSON file.

use crate::domain::ChainError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Calibration {
    pub overlaps: OverlapsCurve,
    pub grids: GridsCalibration,
    #[serde(rename = "statesPolynomial")]
    pub states_polynomial: StatesPolynomial,
}

/// Power-law fit of the parallel-efficiency derivative against total work.
///
/// `derivative(w) = -coefficient * w^-exponent`; the node count is the one
/// at which efficiency drops to `efficiency_level`, scaled by
/// `recalibration` for hardware other than the one the fit came from.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OverlapsCurve {
    #[serde(rename = "efficiencyLevel")]
    pub efficiency_level: f64,
    pub coefficient: f64,
    pub exponent: f64,
    pub recalibration: f64,
}

impl Default for OverlapsCurve {
    fn default() -> Self {
        Self {
            efficiency_level: 0.725,
            coefficient: 66.6881847337451,
            exponent: 0.357097330357440,
            recalibration: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridsCalibration {
    #[serde(rename = "pointsPerNode")]
    pub points_per_node: u64,
    #[serde(rename = "maxNodes")]
    pub max_nodes: u32,
}

impl Default for GridsCalibration {
    fn default() -> Self {
        Self {
            points_per_node: 500_000,
            max_nodes: 20,
        }
    }
}

/// `round(constant + j2*J^2 + j1*J + k2*K^2 + k1*K)`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatesPolynomial {
    pub constant: f64,
    pub j2: f64,
    pub j1: f64,
    pub k2: f64,
    pub k1: f64,
}

impl Default for StatesPolynomial {
    fn default() -> Self {
        Self {
            constant: 2500.0,
            j2: -0.177526537939908,
            j1: -1.1621474648769,
            k2: -0.867466517857143,
            k1: -59.6746651785714,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("failed to read calibration file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse calibration file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<CalibrationError> for ChainError {
    fn from(error: CalibrationError) -> Self {
        match error {
            CalibrationError::Read { .. } => ChainError::io_system("IO.CALIBRATION", error.to_string()),
            CalibrationError::Parse { .. } => ChainError::config("CONFIG.CALIBRATION", error.to_string()),
        }
    }
}

pub fn load_calibration(path: impl AsRef<Path>) -> Result<Calibration, CalibrationError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| CalibrationError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| CalibrationError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
