//! Hardware presets for the batch cluster.
//!
//! A profile is picked once per invocation and passed by value into every
//! estimator and builder call.

use crate::domain::{ChainError, ChainResult};

pub const PROFILE_NAMES: [&str; 3] = ["haswell", "amd", "knl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterProfile {
    pub cores_per_node: u32,
    pub threads_per_core: u32,
    pub hyperthreading: bool,
    pub max_debug_nodes: u32,
    pub node_type_label: &'static str,
}

impl ClusterProfile {
    pub const fn haswell(hyperthreading: bool) -> Self {
        Self {
            cores_per_node: 32,
            threads_per_core: 2,
            hyperthreading,
            max_debug_nodes: 64,
            node_type_label: "haswell",
        }
    }

    pub const fn amd(hyperthreading: bool) -> Self {
        Self {
            cores_per_node: 32,
            threads_per_core: 2,
            hyperthreading,
            max_debug_nodes: 64,
            node_type_label: "amd",
        }
    }

    pub const fn knl(hyperthreading: bool) -> Self {
        Self {
            cores_per_node: 68,
            threads_per_core: 4,
            hyperthreading,
            max_debug_nodes: 512,
            node_type_label: "knl",
        }
    }

    pub fn preset(name: &str, hyperthreading: bool) -> ChainResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "haswell" => Ok(Self::haswell(hyperthreading)),
            "amd" => Ok(Self::amd(hyperthreading)),
            "knl" => Ok(Self::knl(hyperthreading)),
            other => Err(ChainError::config(
                "CONFIG.NODE_TYPE",
                format!(
                    "unknown node type '{}', expected one of {}",
                    other,
                    PROFILE_NAMES.join(", ")
                ),
            )),
        }
    }

    pub const fn threads_factor(&self) -> u32 {
        if self.hyperthreading {
            self.threads_per_core
        } else {
            1
        }
    }

    /// Schedulable process slots on one node.
    pub const fn effective_cores_per_node(&self) -> u32 {
        self.cores_per_node * self.threads_factor()
    }

    pub const fn nodes_for_processes(&self, processes: u32) -> u32 {
        processes.div_ceil(self.effective_cores_per_node())
    }

    pub fn processes_for_nodes(&self, nodes: u32) -> ChainResult<u32> {
        nodes
            .checked_mul(self.effective_cores_per_node())
            .ok_or_else(|| {
                ChainError::estimation(
                    "EST.PROCESS_RANGE",
                    format!(
                        "{} {} node(s) x {} slots exceed the schedulable process range",
                        nodes,
                        self.node_type_label,
                        self.effective_cores_per_node()
                    ),
                )
            })
    }
}
