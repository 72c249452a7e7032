pub(crate) mod artifacts;

use crate::common::{Calibration, ClusterProfile, JobConfiguration, OverlapsCurve};
use crate::domain::{ChainError, ChainResult, ResourceRequest, Stage};
use artifacts::{
    BASIS_1D_FILE_NAME, BASIS_2D_FILE_NAME, PES_FILE_NAME, basis_artifact_path, column_sums,
    grid_file_path, read_1d_distribution, read_2d_distribution, read_grid_points,
    require_non_empty,
};
use std::path::PathBuf;

/// Diagonalization never asks for more than this many nodes' worth of cores.
pub const DIAGONALIZATION_MAX_NODE_MULTIPLE: u32 = 3;

/// Maps a stage and the artifacts left by its predecessor to a resource
/// request. Estimation reads files but never writes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceEstimator {
    calibration: Calibration,
    states_per_process: Option<u32>,
}

impl ResourceEstimator {
    pub fn new(calibration: Calibration) -> Self {
        Self {
            calibration,
            states_per_process: None,
        }
    }

    pub fn with_states_per_process(mut self, states_per_process: Option<u32>) -> Self {
        self.states_per_process = states_per_process.filter(|value| *value > 0);
        self
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn estimate(
        &self,
        stage: Stage,
        config: &JobConfiguration,
        profile: &ClusterProfile,
    ) -> ChainResult<ResourceRequest> {
        let request = match stage {
            Stage::Grids => self.estimate_grids(config, profile),
            Stage::Basis => estimate_basis(config, profile),
            Stage::Overlaps => self.estimate_overlaps(config, profile),
            Stage::Diagonalization => estimate_diagonalization(config, profile),
            Stage::Properties => self.estimate_properties(config, profile),
        }?;
        tracing::debug!(
            stage = %stage,
            nodes = request.nodes(),
            processes = request.processes(),
            cores_per_process = request.cores_per_process(),
            "estimated resources"
        );
        Ok(request)
    }

    fn estimate_grids(
        &self,
        config: &JobConfiguration,
        profile: &ClusterProfile,
    ) -> ChainResult<ResourceRequest> {
        let grid_root = config.grid_path()?;
        let mut total_points: u64 = 1;
        for axis in 0..artifacts::GRID_FILE_NAMES.len() {
            total_points = total_points.saturating_mul(read_grid_points(&grid_file_path(&grid_root, axis))?);
        }

        let grids = self.calibration.grids;
        let by_points = total_points / grids.points_per_node.max(1);
        let nodes = u32::try_from(by_points)
            .unwrap_or(u32::MAX)
            .min(grids.max_nodes)
            .max(1);
        tracing::debug!(total_points, nodes, "grids stage sizing");
        ResourceRequest::new(nodes, profile.processes_for_nodes(nodes)?, profile)
    }

    fn estimate_overlaps(
        &self,
        config: &JobConfiguration,
        profile: &ClusterProfile,
    ) -> ChainResult<ResourceRequest> {
        let root = config.root_path()?;
        let (k, _) = config.k_range()?;
        let symmetry = config.symmetry()?;
        let basis_2d_path = basis_artifact_path(&root, k, symmetry, BASIS_2D_FILE_NAME);
        let basis_1d_path = basis_artifact_path(&root, k, symmetry, BASIS_1D_FILE_NAME);

        let blocks = read_2d_distribution(&basis_2d_path)?;
        let basis_1d = read_1d_distribution(&basis_1d_path)?;
        let work = overlaps_work(&blocks, &basis_1d).map_err(|error| with_artifact(error, &basis_2d_path))?;
        let nodes = overlaps_nodes(work, &self.calibration.overlaps)?;
        ResourceRequest::new(nodes, profile.processes_for_nodes(nodes)?, profile)
    }

    fn estimate_properties(
        &self,
        config: &JobConfiguration,
        profile: &ClusterProfile,
    ) -> ChainResult<ResourceRequest> {
        let states = config.number_of_states()?;
        let processes = match self.states_per_process {
            Some(per_process) => states.div_ceil(per_process),
            None => states,
        };
        let nodes = profile.nodes_for_processes(processes);
        if nodes < 1 {
            return Err(ChainError::estimation(
                "EST.PROPERTIES_NODES",
                format!(
                    "properties stage resolved to {} node(s) (states: {}, states per process: {})",
                    nodes,
                    states,
                    self.states_per_process.unwrap_or(1)
                ),
            ));
        }
        ResourceRequest::new(nodes, processes, profile)
    }
}

fn estimate_basis(config: &JobConfiguration, profile: &ClusterProfile) -> ChainResult<ResourceRequest> {
    let grid_root = config.grid_path()?;
    require_non_empty(&grid_root.join(PES_FILE_NAME), "potential energy surface")?;

    let points = read_grid_points(&grid_file_path(&grid_root, 0))?;
    let processes = u32::try_from(points).map_err(|_| {
        ChainError::estimation(
            "EST.BASIS_PROCESSES",
            format!("{} grid points exceed the schedulable process range", points),
        )
    })?;
    ResourceRequest::new(profile.nodes_for_processes(processes), processes, profile)
}

fn estimate_diagonalization(
    config: &JobConfiguration,
    profile: &ClusterProfile,
) -> ChainResult<ResourceRequest> {
    let fixed_basis_k = if config.fix_basis()? {
        Some(config.basis_k()?)
    } else {
        None
    };
    let root: PathBuf = if fixed_basis_k.is_some() {
        config.basis_root_path()?
    } else {
        config.root_path()?
    };
    let (k_start, k_end) = config.k_range()?;

    // Symmetry of the first block follows K parity and flips with every K.
    let mut symmetry = crate::domain::Symmetry::from_code(config.symmetry()?.code() + k_start);
    let mut matrix_size: u64 = 0;
    for k in k_start..=k_end {
        let k_load = fixed_basis_k.unwrap_or(k);
        let path = basis_artifact_path(&root, k_load, symmetry, BASIS_2D_FILE_NAME);
        matrix_size += read_2d_distribution(&path)?.iter().sum::<u64>();
        symmetry = symmetry.toggled();
    }

    let retained_vectors = config.retained_vectors()?;
    let processes = diagonalization_processes(matrix_size, retained_vectors, profile.cores_per_node);
    let nodes = profile.nodes_for_processes(processes);
    tracing::debug!(matrix_size, retained_vectors, processes, nodes, "diagonalization sizing");
    if nodes < 1 {
        return Err(ChainError::estimation(
            "EST.DIAGONALIZATION_NODES",
            format!(
                "diagonalization resolved to {} node(s) (matrix size: {}, ncv: {})",
                nodes, matrix_size, retained_vectors
            ),
        ));
    }
    ResourceRequest::new(nodes, processes, profile)
}

/// Total overlap work: average pairwise block product times the average
/// 1-D basis size, summed over all block pairs.
pub fn overlaps_work(blocks: &[u64], basis_1d: &[Vec<u64>]) -> ChainResult<f64> {
    let mut pair_sum = 0.0_f64;
    let mut pair_count = 0_u64;
    for (index, first) in blocks.iter().enumerate() {
        for second in &blocks[index + 1..] {
            pair_sum += (*first as f64) * (*second as f64);
            pair_count += 1;
        }
    }
    if pair_count == 0 {
        return Err(ChainError::precondition(
            "PRE.BASIS_2D_BLOCKS",
            format!(
                "2-D basis distribution has {} non-empty block(s); at least two are required",
                blocks.len()
            ),
        ));
    }

    let sums = column_sums(basis_1d);
    if sums.is_empty() {
        return Err(ChainError::precondition(
            "PRE.BASIS_1D_COLUMNS",
            "1-D basis distribution has no usable columns",
        ));
    }

    let average_block_size = pair_sum / pair_count as f64;
    let average_basis_size = sums.iter().sum::<u64>() as f64 / sums.len() as f64;
    let average_block_work = average_block_size * average_basis_size;
    let total_work = average_block_work * pair_count as f64;
    tracing::debug!(
        average_block_size,
        average_basis_size,
        average_block_work,
        total_work,
        "overlaps work"
    );
    Ok(total_work)
}

/// Node count at which the fitted efficiency curve reaches its target level.
pub fn overlaps_nodes(total_work: f64, curve: &OverlapsCurve) -> ChainResult<u32> {
    let derivative = -curve.coefficient * total_work.powf(-curve.exponent);
    let fitted = ((curve.efficiency_level - 1.0) / derivative).round();
    let recalibrated = (fitted * curve.recalibration).round();
    if !recalibrated.is_finite() || recalibrated > f64::from(u32::MAX) {
        return Err(ChainError::estimation(
            "EST.OVERLAPS_CURVE",
            format!(
                "efficiency curve produced {} node(s) for total work {}",
                recalibrated, total_work
            ),
        ));
    }
    Ok((recalibrated as u32).max(1))
}

/// `matrix_size / ncv`, rounded down to whole nodes once it exceeds a single
/// node and capped at [`DIAGONALIZATION_MAX_NODE_MULTIPLE`] nodes.
pub fn diagonalization_processes(matrix_size: u64, retained_vectors: u32, cores_per_node: u32) -> u32 {
    let raw = matrix_size / u64::from(retained_vectors.max(1));
    let cores_per_node = u64::from(cores_per_node);
    let processes = if raw > cores_per_node {
        (raw - raw % cores_per_node).min(cores_per_node * u64::from(DIAGONALIZATION_MAX_NODE_MULTIPLE))
    } else {
        raw
    };
    u32::try_from(processes).unwrap_or(u32::MAX)
}

fn with_artifact(error: ChainError, path: &std::path::Path) -> ChainError {
    ChainError::new(
        error.category(),
        error.code(),
        format!("{} ({})", error.message(), path.display()),
    )
}
