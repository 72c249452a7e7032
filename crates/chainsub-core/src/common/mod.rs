pub mod calibration;
pub mod config;
pub mod profile;
pub mod range;

pub use calibration::{
    Calibration, CalibrationError, GridsCalibration, OverlapsCurve, StatesPolynomial,
    load_calibration,
};
pub use config::{JOB_CONFIG_FILE_NAME, JobConfiguration, resolve_placeholder};
pub use profile::{ClusterProfile, PROFILE_NAMES};
pub use range::{RangeError, parse_value_list};
