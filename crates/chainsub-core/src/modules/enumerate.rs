//! Expansion of (K, parity, symmetry) combinations into working directories.
//!
//! Decoupled: `K_<k>/<sym>` for every K in `0..=J`.
//! Coupled: `K_all/parity_<p>/<sym>` for every parity in `0..=min(J, 1)`.

use crate::domain::{ChainError, ChainResult, KSelection, ParameterCombination, Stage, Symmetry};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymmetryFilter {
    #[default]
    Both,
    /// Starts at this symmetry and toggles with every K (or parity) step.
    Single(Symmetry),
}

impl std::str::FromStr for SymmetryFilter {
    type Err = ChainError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "all" | "both" => Ok(Self::Both),
            other => other.parse().map(Self::Single),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirectory {
    pub combination: ParameterCombination,
    pub relative_path: PathBuf,
}

impl WorkingDirectory {
    pub fn stage_directory(&self, base: &Path, stage: Stage) -> PathBuf {
        base.join(&self.relative_path).join(stage.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpace {
    j: u32,
    coupled: bool,
    symmetry: SymmetryFilter,
    parity: Option<u32>,
    allowed_only: bool,
}

impl ParameterSpace {
    /// Coupling applies only when enabled and `J >= coupling_threshold`.
    pub fn new(
        j: u32,
        coupling_enabled: bool,
        coupling_threshold: u32,
        symmetry: SymmetryFilter,
        parity: Option<u32>,
        allowed_only: bool,
    ) -> ChainResult<Self> {
        if let Some(parity) = parity.filter(|parity| *parity > j.min(1)) {
            return Err(ChainError::config(
                "CONFIG.PARITY",
                format!("parity {} is not available for J = {}", parity, j),
            ));
        }
        Ok(Self {
            j,
            coupled: coupling_enabled && j >= coupling_threshold,
            symmetry,
            parity,
            allowed_only,
        })
    }

    pub fn is_coupled(&self) -> bool {
        self.coupled
    }

    /// Fresh pass over the space; every call yields the same sequence.
    pub fn iter(&self) -> Enumeration {
        Enumeration {
            space: *self,
            position: 0,
        }
    }

    fn group_count(&self) -> u32 {
        match (self.coupled, self.parity) {
            (false, _) => self.j + 1,
            (true, Some(_)) => 1,
            (true, None) => self.j.min(1) + 1,
        }
    }

    fn group_width(&self) -> u32 {
        if (self.coupled && self.allowed_only) || matches!(self.symmetry, SymmetryFilter::Single(_)) {
            1
        } else {
            2
        }
    }

    fn combination(&self, group: u32, slot: u32) -> ParameterCombination {
        if !self.coupled {
            return ParameterCombination {
                k: KSelection::Single(group),
                parity: None,
                symmetry: self.symmetry_at(group, slot),
            };
        }
        let parity = self.parity.unwrap_or(group);
        let symmetry = if self.allowed_only {
            Symmetry::from_code(parity)
        } else {
            self.symmetry_at(group, slot)
        };
        ParameterCombination {
            k: KSelection::All,
            parity: Some(parity),
            symmetry,
        }
    }

    fn symmetry_at(&self, group: u32, slot: u32) -> Symmetry {
        match self.symmetry {
            SymmetryFilter::Both => Symmetry::from_code(slot),
            SymmetryFilter::Single(start) => Symmetry::from_code(start.code() + group),
        }
    }
}

impl<'a> IntoIterator for &'a ParameterSpace {
    type Item = WorkingDirectory;
    type IntoIter = Enumeration;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy cursor over a [`ParameterSpace`].
#[derive(Debug, Clone)]
pub struct Enumeration {
    space: ParameterSpace,
    position: u32,
}

impl Iterator for Enumeration {
    type Item = WorkingDirectory;

    fn next(&mut self) -> Option<Self::Item> {
        let width = self.space.group_width();
        let group = self.position / width;
        if group >= self.space.group_count() {
            return None;
        }
        let slot = self.position % width;
        self.position += 1;

        let combination = self.space.combination(group, slot);
        Some(WorkingDirectory {
            relative_path: relative_path(&combination),
            combination,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let total = self.space.group_count() * self.space.group_width();
        let remaining = total.saturating_sub(self.position) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Enumeration {}

pub fn relative_path(combination: &ParameterCombination) -> PathBuf {
    let mut path = PathBuf::from(combination.k.folder_name());
    if let (KSelection::All, Some(parity)) = (combination.k, combination.parity) {
        path.push(format!("parity_{}", parity));
    }
    path.push(combination.symmetry.folder_name());
    path
}

/// Number of K blocks a coupled calculation of parity `parity` carries.
pub fn coupled_block_count(j: u32, parity: u32) -> u32 {
    j + 1 - (j + parity) % 2
}

/// `J_<j>/K_<k>/<sym>/<stage>` for every listed combination with `K <= J`.
pub fn sweep_directories(js: &[u32], ks: &[u32], symmetries: &[Symmetry], stage: &str) -> Vec<PathBuf> {
    let mut directories = Vec::new();
    for &j in js {
        for &k in ks.iter().filter(|&&k| k <= j) {
            for symmetry in symmetries {
                directories.push(
                    PathBuf::from(format!("J_{}", j))
                        .join(format!("K_{}", k))
                        .join(symmetry.folder_name())
                        .join(stage),
                );
            }
        }
    }
    directories
}
