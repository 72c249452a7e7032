use crate::common::{JobConfiguration, StatesPolynomial, resolve_placeholder};
use crate::domain::{ChainError, ChainResult};
use std::path::Path;

pub const NUM_STATES_PLACEHOLDER: &str = "num_states";

/// Number of states to request for `(J, K)` from the fitted polynomial.
pub fn predict_states(j: u32, k: u32, polynomial: &StatesPolynomial) -> ChainResult<u32> {
    let j = f64::from(j);
    let k = f64::from(k);
    let predicted = (polynomial.constant
        + polynomial.j2 * j * j
        + polynomial.j1 * j
        + polynomial.k2 * k * k
        + polynomial.k1 * k)
        .round();
    if !(1.0..=f64::from(u32::MAX)).contains(&predicted) {
        return Err(ChainError::estimation(
            "EST.STATES",
            format!("state-count fit predicts {} states for J = {}, K = {}", predicted, j, k),
        ));
    }
    Ok(predicted as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateAssignment {
    pub states: u32,
    /// `false` when the configuration had no placeholder left.
    pub written: bool,
}

/// Predicts the state count for the configuration's J and first K and
/// writes it into the `{num_states}` placeholder.
pub fn assign_states(config_path: &Path, polynomial: &StatesPolynomial) -> ChainResult<StateAssignment> {
    let config = JobConfiguration::load(config_path)?;
    let j = config.total_angular_momentum()?;
    let (k, _) = config.k_range()?;
    let states = predict_states(j, k, polynomial)?;
    let written = resolve_placeholder(config_path, NUM_STATES_PLACEHOLDER, &states.to_string())?;
    if written {
        tracing::info!(j, k, states, config = %config_path.display(), "assigned number of states");
    } else {
        tracing::debug!(config = %config_path.display(), "number of states already assigned");
    }
    Ok(StateAssignment { states, written })
}
