use crate::domain::{ChainError, ChainResult, Symmetry};
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) const GRID_FILE_NAMES: [&str; 3] = ["grid_rho.dat", "grid_theta.dat", "grid_phi.dat"];
pub(crate) const PES_FILE_NAME: &str = "pes.out";
pub(crate) const BASIS_RESULTS_FOLDER: &str = "basis";
pub(crate) const BASIS_1D_FILE_NAME: &str = "nvec1.dat";
pub(crate) const BASIS_2D_FILE_NAME: &str = "nvec2.dat";

/// `<root>/K_<k>/<sym>/basis/basis/<file>`
pub(crate) fn basis_artifact_path(root: &Path, k: u32, symmetry: Symmetry, file_name: &str) -> PathBuf {
    root.join(format!("K_{}", k))
        .join(symmetry.folder_name())
        .join("basis")
        .join(BASIS_RESULTS_FOLDER)
        .join(file_name)
}

pub(crate) fn grid_file_path(grid_root: &Path, axis: usize) -> PathBuf {
    grid_root.join(GRID_FILE_NAMES[axis])
}

pub(crate) fn read_artifact(path: &Path, description: &str) -> ChainResult<String> {
    if !path.is_file() {
        return Err(ChainError::precondition(
            "PRE.ARTIFACT_MISSING",
            format!(
                "{} '{}' does not exist; has the previous stage completed?",
                description,
                path.display()
            ),
        ));
    }
    fs::read_to_string(path).map_err(|source| {
        ChainError::io_system(
            "IO.ARTIFACT_READ",
            format!("failed to read {} '{}': {}", description, path.display(), source),
        )
    })
}

pub(crate) fn require_non_empty(path: &Path, description: &str) -> ChainResult<()> {
    let populated = fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.len() > 0)
        .unwrap_or(false);
    if !populated {
        return Err(ChainError::precondition(
            "PRE.ARTIFACT_EMPTY",
            format!(
                "{} '{}' is missing or empty; has the previous stage completed?",
                description,
                path.display()
            ),
        ));
    }
    Ok(())
}

/// Point count of a grid-description artifact: the fourth token of its
/// first line.
pub(crate) fn read_grid_points(path: &Path) -> ChainResult<u64> {
    let source = read_artifact(path, "grid description")?;
    let first_line = source.lines().next().unwrap_or("");
    first_line
        .split_whitespace()
        .nth(3)
        .and_then(|token| token.parse::<u64>().ok())
        .ok_or_else(|| {
            structural_error(
                path,
                format!("first line '{}' has no integer fourth field", first_line.trim()),
            )
        })
}

/// Non-zero block sizes (second column) of a 2-D basis distribution.
pub(crate) fn read_2d_distribution(path: &Path) -> ChainResult<Vec<u64>> {
    let source = read_artifact(path, "2-D basis distribution")?;
    let mut sizes = Vec::new();
    for (line_index, line) in source.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let size = line
            .split_whitespace()
            .nth(1)
            .and_then(|token| token.parse::<u64>().ok())
            .ok_or_else(|| {
                structural_error(
                    path,
                    format!("line {} has no integer block size column", line_index + 1),
                )
            })?;
        if size > 0 {
            sizes.push(size);
        }
    }
    Ok(sizes)
}

/// Rows of a 1-D basis distribution without the header line and without
/// the leading index column.
pub(crate) fn read_1d_distribution(path: &Path) -> ChainResult<Vec<Vec<u64>>> {
    let source = read_artifact(path, "1-D basis distribution")?;
    let mut rows = Vec::new();
    for (line_index, line) in source.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .skip(1)
            .map(|token| token.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                structural_error(path, format!("line {} holds a non-integer size", line_index + 1))
            })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Per-column sums over rows, truncated to the shortest row.
pub(crate) fn column_sums(rows: &[Vec<u64>]) -> Vec<u64> {
    let width = rows.iter().map(Vec::len).min().unwrap_or(0);
    (0..width)
        .map(|column| rows.iter().map(|row| row[column]).sum())
        .collect()
}

/// First numeric field of the last non-empty line, if any.
pub(crate) fn read_last_value(path: &Path) -> ChainResult<Option<f64>> {
    let source = read_artifact(path, "results artifact")?;
    Ok(source
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.split_whitespace().find_map(|token| token.parse::<f64>().ok())))
}

fn structural_error(path: &Path, detail: String) -> ChainError {
    ChainError::precondition(
        "PRE.ARTIFACT_INVALID",
        format!("artifact '{}' is structurally invalid: {}", path.display(), detail),
    )
}
