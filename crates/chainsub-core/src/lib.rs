//! Stage chaining and resource estimation for batch pipelines on a Slurm
//! cluster.

pub mod common;
pub mod domain;
pub mod modules;
