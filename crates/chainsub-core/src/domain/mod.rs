pub mod errors;

pub use errors::{ChainError, ChainErrorCategory, ChainResult, ExitStatusClass};

use crate::common::ClusterProfile;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Grids,
    Basis,
    Overlaps,
    Diagonalization,
    Properties,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grids => "grids",
            Self::Basis => "basis",
            Self::Overlaps => "overlaps",
            Self::Diagonalization => "diagonalization",
            Self::Properties => "properties",
        }
    }

    /// Position of this stage in [`PIPELINE`], 1-based. `None` for stages
    /// that are run standalone and never chained.
    pub fn chain_index(self) -> Option<usize> {
        PIPELINE
            .iter()
            .position(|descriptor| descriptor.stage == self)
            .map(|position| position + 1)
    }

    pub fn descriptor(self) -> Option<&'static StageDescriptor> {
        PIPELINE.iter().find(|descriptor| descriptor.stage == self)
    }

    /// Stages whose working directories live under the all-K coupled tree
    /// when Coriolis coupling is enabled.
    pub const fn supports_coupling(self) -> bool {
        matches!(self, Self::Diagonalization | Self::Properties)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

impl FromStr for Stage {
    type Err = ChainError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "grids" | "pesprint" => Ok(Self::Grids),
            "basis" => Ok(Self::Basis),
            "overlaps" => Ok(Self::Overlaps),
            "diagonalization" | "eigencalc" | "eigensolve" => Ok(Self::Diagonalization),
            "properties" => Ok(Self::Properties),
            other => Err(ChainError::config(
                "CONFIG.STAGE",
                format!("unknown stage name '{}'", other),
            )),
        }
    }
}

/// One node of the fixed pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub stage: Stage,
    /// Offset of this stage's working directory from the previous stage's.
    pub relative_path: &'static str,
    /// Human-readable pattern of the artifact the estimator requires.
    pub required_upstream_artifact: &'static str,
    /// Artifact (relative to the stage directory) that marks the stage done.
    pub result_artifact: Option<&'static str>,
    /// Whether completion is judged by comparing the result's last value
    /// against a convergence threshold.
    pub convergence_result: bool,
    pub is_terminal: bool,
}

pub const PIPELINE: [StageDescriptor; 4] = [
    StageDescriptor {
        stage: Stage::Basis,
        relative_path: ".",
        required_upstream_artifact: "<grid_path>/pes.out",
        result_artifact: Some("basis/nvec2.dat"),
        convergence_result: false,
        is_terminal: false,
    },
    StageDescriptor {
        stage: Stage::Overlaps,
        relative_path: "../overlaps",
        required_upstream_artifact: "<root>/K_<K>/<sym>/basis/basis/nvec{1,2}.dat",
        result_artifact: None,
        convergence_result: false,
        is_terminal: false,
    },
    StageDescriptor {
        stage: Stage::Diagonalization,
        relative_path: "../diagonalization",
        required_upstream_artifact: "<root>/K_<k>/<sym>/basis/basis/nvec2.dat",
        result_artifact: Some("3dsdt/spec.out"),
        convergence_result: true,
        is_terminal: false,
    },
    StageDescriptor {
        stage: Stage::Properties,
        relative_path: "../properties",
        required_upstream_artifact: "none",
        result_artifact: Some("state_properties.fwc"),
        convergence_result: false,
        is_terminal: true,
    },
];

pub fn descriptor_for_index(index: usize) -> Option<&'static StageDescriptor> {
    index.checked_sub(1).and_then(|position| PIPELINE.get(position))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Symmetry {
    Even,
    Odd,
}

impl Symmetry {
    pub const BOTH: [Symmetry; 2] = [Symmetry::Even, Symmetry::Odd];

    pub const fn from_code(code: u32) -> Self {
        if code % 2 == 0 { Self::Even } else { Self::Odd }
    }

    pub const fn code(self) -> u32 {
        match self {
            Self::Even => 0,
            Self::Odd => 1,
        }
    }

    pub const fn folder_name(self) -> &'static str {
        match self {
            Self::Even => "even",
            Self::Odd => "odd",
        }
    }

    pub const fn toggled(self) -> Self {
        match self {
            Self::Even => Self::Odd,
            Self::Odd => Self::Even,
        }
    }
}

impl Display for Symmetry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).folder_name())
    }
}

impl FromStr for Symmetry {
    type Err = ChainError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "0" | "even" => Ok(Self::Even),
            "1" | "odd" => Ok(Self::Odd),
            other => Err(ChainError::config(
                "CONFIG.SYMMETRY",
                format!("unknown symmetry '{}', expected even/odd or 0/1", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KSelection {
    Single(u32),
    /// Every K of a coupled (Coriolis) calculation.
    All,
}

impl KSelection {
    pub fn folder_name(self) -> String {
        match self {
            Self::Single(k) => format!("K_{}", k),
            Self::All => "K_all".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterCombination {
    pub k: KSelection,
    pub parity: Option<u32>,
    pub symmetry: Symmetry,
}

/// Resolved compute allocation for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    nodes: u32,
    processes: u32,
    cores_per_process: u32,
}

impl ResourceRequest {
    /// Validates `processes <= nodes * effective_cores_per_node` and derives
    /// the per-process CPU count.
    pub fn new(nodes: u32, processes: u32, profile: &ClusterProfile) -> ChainResult<Self> {
        if nodes < 1 || processes < 1 {
            return Err(ChainError::estimation(
                "EST.EMPTY_REQUEST",
                format!(
                    "resource request needs at least one node and one process (nodes={}, processes={})",
                    nodes, processes
                ),
            ));
        }

        let capacity = u64::from(nodes) * u64::from(profile.effective_cores_per_node());
        if u64::from(processes) > capacity {
            return Err(ChainError::estimation(
                "EST.OVERSUBSCRIBED",
                format!(
                    "{} processes do not fit on {} {} node(s) with {} slots each",
                    processes,
                    nodes,
                    profile.node_type_label,
                    profile.effective_cores_per_node()
                ),
            ));
        }

        Ok(Self {
            nodes,
            processes,
            cores_per_process: cores_per_process(nodes, processes, profile),
        })
    }

    pub const fn nodes(&self) -> u32 {
        self.nodes
    }

    pub const fn processes(&self) -> u32 {
        self.processes
    }

    pub const fn cores_per_process(&self) -> u32 {
        self.cores_per_process
    }
}

// floor(cores_per_node * nodes / processes) physical cores per process,
// scaled by the threads factor. A hyperthreaded request that places more
// than one process per physical core splits the logical CPUs directly.
fn cores_per_process(nodes: u32, processes: u32, profile: &ClusterProfile) -> u32 {
    let physical = u64::from(profile.cores_per_node) * u64::from(nodes);
    let factor = u64::from(profile.threads_factor());
    let per_process = physical / u64::from(processes);
    let logical = if per_process >= 1 {
        per_process * factor
    } else {
        physical * factor / u64::from(processes)
    };
    u32::try_from(logical.max(1)).unwrap_or(u32::MAX)
}

/// Semicolon-delimited per-stage option string carried along a chain.
///
/// Segment 0 holds options common to every stage; segment `i` holds the
/// overrides of chain stage `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StageOptionsFields")]
pub struct StageOptions {
    segments: Vec<String>,
}

#[derive(Deserialize)]
struct StageOptionsFields {
    segments: Vec<String>,
}

impl From<StageOptionsFields> for StageOptions {
    fn from(fields: StageOptionsFields) -> Self {
        Self::padded(fields.segments)
    }
}

impl StageOptions {
    pub fn parse(raw: &str) -> Self {
        Self::padded(raw.split(';').map(|segment| segment.trim().to_string()).collect())
    }

    fn padded(mut segments: Vec<String>) -> Self {
        if segments.len() < PIPELINE.len() + 1 {
            segments.resize(PIPELINE.len() + 1, String::new());
        }
        Self { segments }
    }

    pub fn common(&self) -> &str {
        self.for_stage(0)
    }

    pub fn for_stage(&self, index: usize) -> &str {
        self.segments.get(index).map(String::as_str).unwrap_or("")
    }

    /// Tokens for stage `index`: common options followed by its overrides.
    pub fn arguments_for_stage(&self, index: usize) -> Vec<String> {
        self.common()
            .split_whitespace()
            .chain(self.for_stage(index).split_whitespace())
            .map(str::to_string)
            .collect()
    }

    /// Adds `flag value` to the common segment unless the flag is present.
    pub fn ensure_common_flag(&mut self, flag: &str, value: &str) {
        let present = self.segments[0]
            .split_whitespace()
            .any(|token| token == flag || token.starts_with(&format!("{}=", flag)));
        if present {
            return;
        }
        if !self.segments[0].is_empty() {
            self.segments[0].push(' ');
        }
        self.segments[0].push_str(flag);
        self.segments[0].push(' ');
        self.segments[0].push_str(value);
    }

    /// Rewrites relative values of `flag` in every segment against `base`.
    pub fn absolutize_flag(&mut self, flag: &str, base: &Path) {
        let prefix = format!("{}=", flag);
        let resolve = |value: &str| {
            let path = Path::new(value);
            if path.is_absolute() {
                value.to_string()
            } else {
                base.join(path).display().to_string()
            }
        };
        for segment in &mut self.segments {
            let mut tokens: Vec<String> = segment.split_whitespace().map(str::to_string).collect();
            let mut index = 0;
            while index < tokens.len() {
                if tokens[index] == flag && index + 1 < tokens.len() {
                    tokens[index + 1] = resolve(&tokens[index + 1]);
                    index += 1;
                } else if let Some(value) = tokens[index].strip_prefix(&prefix) {
                    tokens[index] = format!("{}{}", prefix, resolve(value));
                }
                index += 1;
            }
            *segment = tokens.join(" ");
        }
    }
}

impl Default for StageOptions {
    fn default() -> Self {
        Self::parse("")
    }
}

impl Display for StageOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join(";"))
    }
}
