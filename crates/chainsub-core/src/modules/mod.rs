pub mod chain;
pub mod document;
pub mod enumerate;
pub mod estimator;
pub mod scheduler;
pub mod states;

mod traits;

pub use chain::{
    ChainController, ChainLink, ChainOutcome, ChainPhase, ChainReport, PROGRAM_LOCATION_FLAG,
    ResourceOverrides, StageInvocation, continuation_target, normalize_path, stage_directory,
};
pub use document::{
    Continuation, Directive, DirectiveKey, FilesystemRequirement, JobDocument, JobDocumentBuilder,
    QueueClass, SubmissionOptions,
};
pub use enumerate::{
    Enumeration, ParameterSpace, SymmetryFilter, WorkingDirectory, coupled_block_count,
    sweep_directories,
};
pub use estimator::ResourceEstimator;
pub use scheduler::SlurmScheduler;
pub use states::{StateAssignment, assign_states, predict_states};
pub use traits::{BatchScheduler, JobHandle};
