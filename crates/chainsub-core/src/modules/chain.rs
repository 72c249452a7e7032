//! One stage invocation: ESTIMATE -> ASSEMBLE -> (APPEND_CONTINUATION) ->
//! SUBMIT -> DONE, or ABORTED on the first failure.

use super::document::{Continuation, JobDocument, JobDocumentBuilder, SubmissionOptions};
use super::estimator::ResourceEstimator;
use super::estimator::artifacts::read_last_value;
use super::traits::{BatchScheduler, JobHandle};
use crate::common::{ClusterProfile, JobConfiguration};
use crate::domain::{
    ChainError, ChainResult, PIPELINE, ResourceRequest, Stage, StageDescriptor, StageOptions,
    descriptor_for_index,
};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::path::{Component, Path, PathBuf};

pub const PROGRAM_LOCATION_FLAG: &str = "--program-location";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainPhase {
    Estimate,
    Assemble,
    AppendContinuation,
    Submit,
    Done,
    Aborted,
}

impl Display for ChainPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Estimate => "ESTIMATE",
            Self::Assemble => "ASSEMBLE",
            Self::AppendContinuation => "APPEND_CONTINUATION",
            Self::Submit => "SUBMIT",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        })
    }
}

/// Explicit resources and scaling factors supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceOverrides {
    pub nodes: Option<u32>,
    pub processes: Option<u32>,
    pub node_multiplier: Option<f64>,
    pub process_multiplier: Option<f64>,
}

impl ResourceOverrides {
    /// `(node, process)` multipliers. A lone node multiplier above 1 keeps
    /// processes as they are; a lone process multiplier above 1 grows nodes
    /// along with it.
    pub fn multipliers(&self) -> (f64, f64) {
        match (self.node_multiplier, self.process_multiplier) {
            (None, None) => (1.0, 1.0),
            (Some(nodes), None) => (nodes, if nodes > 1.0 { 1.0 } else { nodes }),
            (None, Some(processes)) => (if processes > 1.0 { processes } else { 1.0 }, processes),
            (Some(nodes), Some(processes)) => (nodes, processes),
        }
    }
}

/// Everything one stage invocation needs, resolved by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct StageInvocation {
    pub config_path: PathBuf,
    pub profile: ClusterProfile,
    pub overrides: ResourceOverrides,
    pub submission: SubmissionOptions,
    pub resubmit: bool,
    pub convergence_threshold: Option<f64>,
    pub generate_only: bool,
}

/// Position of an invocation inside a chain and the options it carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub stage_index: usize,
    pub carried_options: StageOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Submitted { script_path: PathBuf, handle: JobHandle },
    Generated { script_path: PathBuf },
    Skipped { stage: Stage, result_artifact: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainReport {
    pub outcome: ChainOutcome,
    pub phases: Vec<ChainPhase>,
}

pub struct ChainController<'a, S: BatchScheduler> {
    estimator: ResourceEstimator,
    scheduler: &'a S,
    runner: PathBuf,
}

impl<'a, S: BatchScheduler> ChainController<'a, S> {
    /// `runner` is the executable a finished job calls to continue the chain.
    pub fn new(estimator: ResourceEstimator, scheduler: &'a S, runner: impl Into<PathBuf>) -> Self {
        Self {
            estimator,
            scheduler,
            runner: runner.into(),
        }
    }

    /// Standalone stage: no continuation is ever appended.
    pub fn run_stage(&self, invocation: &StageInvocation) -> ChainResult<ChainReport> {
        self.run(invocation, None)
    }

    /// Chained stage `link.stage_index`; unless terminal, the written
    /// document continues with stage `link.stage_index + 1`.
    pub fn run_chained(&self, invocation: &StageInvocation, link: &ChainLink) -> ChainResult<ChainReport> {
        self.run(invocation, Some(link))
    }

    fn run(&self, invocation: &StageInvocation, link: Option<&ChainLink>) -> ChainResult<ChainReport> {
        let mut phases = Vec::new();
        let config = JobConfiguration::load(&invocation.config_path)?;
        let stage = config.stage()?;
        let descriptor = match link {
            Some(link) => Some(chained_descriptor(link.stage_index, stage)?),
            None => stage.descriptor(),
        };

        if let Some(result_artifact) = self.satisfied_result(invocation, &config, descriptor)? {
            tracing::info!(
                stage = %stage,
                artifact = %result_artifact.display(),
                "stage result already present, skipping"
            );
            phases.push(ChainPhase::Done);
            return Ok(ChainReport {
                outcome: ChainOutcome::Skipped {
                    stage,
                    result_artifact,
                },
                phases,
            });
        }

        enter(&mut phases, ChainPhase::Estimate, stage);
        let resources = self
            .resolve_resources(stage, &config, invocation)
            .inspect_err(|error| abort(&mut phases, stage, error))?;

        enter(&mut phases, ChainPhase::Assemble, stage);
        let mut document = self
            .assemble(&resources, &config, invocation)
            .inspect_err(|error| abort(&mut phases, stage, error))?;

        let continues = link.zip(descriptor).filter(|(_, descriptor)| !descriptor.is_terminal);
        if let Some((link, _)) = continues {
            enter(&mut phases, ChainPhase::AppendContinuation, stage);
            next_continuation(link, &invocation.submission)
                .and_then(|continuation| document.append_continuation(continuation, &self.runner))
                .inspect_err(|error| abort(&mut phases, stage, error))?;
        }

        let script_path = document.script_path().to_path_buf();
        let outcome = if invocation.generate_only {
            tracing::info!(stage = %stage, script = %script_path.display(), "generated job document");
            ChainOutcome::Generated { script_path }
        } else {
            enter(&mut phases, ChainPhase::Submit, stage);
            let handle = self
                .scheduler
                .submit(&script_path)
                .inspect_err(|error| abort(&mut phases, stage, error))?;
            tracing::info!(stage = %stage, job = %handle, script = %script_path.display(), "submitted");
            ChainOutcome::Submitted {
                script_path,
                handle,
            }
        };
        phases.push(ChainPhase::Done);
        Ok(ChainReport { outcome, phases })
    }

    fn satisfied_result(
        &self,
        invocation: &StageInvocation,
        config: &JobConfiguration,
        descriptor: Option<&StageDescriptor>,
    ) -> ChainResult<Option<PathBuf>> {
        if invocation.resubmit {
            return Ok(None);
        }
        let Some(descriptor) = descriptor else {
            return Ok(None);
        };
        let Some(relative) = descriptor.result_artifact else {
            return Ok(None);
        };
        let artifact = config.directory().join(relative);
        if !artifact.is_file() {
            return Ok(None);
        }
        if !descriptor.convergence_result {
            return Ok(Some(artifact));
        }
        let Some(threshold) = invocation.convergence_threshold else {
            return Ok(Some(artifact));
        };
        match read_last_value(&artifact)? {
            Some(value) if value > threshold => Ok(Some(artifact)),
            last => {
                tracing::debug!(?last, threshold, "result below convergence threshold");
                Ok(None)
            }
        }
    }

    fn resolve_resources(
        &self,
        stage: Stage,
        config: &JobConfiguration,
        invocation: &StageInvocation,
    ) -> ChainResult<ResourceRequest> {
        let profile = &invocation.profile;
        let overrides = &invocation.overrides;
        let (nodes, processes) = match (overrides.nodes, overrides.processes) {
            (Some(nodes), Some(processes)) => (nodes, processes),
            (Some(nodes), None) => (nodes, profile.processes_for_nodes(nodes)?),
            (None, Some(processes)) => (profile.nodes_for_processes(processes), processes),
            (None, None) => {
                let estimated = self.estimator.estimate(stage, config, profile)?;
                (estimated.nodes(), estimated.processes())
            }
        };

        let (node_multiplier, process_multiplier) = overrides.multipliers();
        let nodes = scale(nodes, node_multiplier, "node")?;
        let processes = scale(processes, process_multiplier, "process")?;
        ResourceRequest::new(nodes, processes, profile)
    }

    fn assemble(
        &self,
        resources: &ResourceRequest,
        config: &JobConfiguration,
        invocation: &StageInvocation,
    ) -> ChainResult<JobDocument> {
        let document = JobDocumentBuilder.build(resources, config, &invocation.profile, &invocation.submission)?;
        document.write(&self.scheduler.render(&document))?;
        Ok(document)
    }
}

fn enter(phases: &mut Vec<ChainPhase>, phase: ChainPhase, stage: Stage) {
    tracing::info!(stage = %stage, phase = %phase, "chain phase");
    phases.push(phase);
}

fn abort(phases: &mut Vec<ChainPhase>, stage: Stage, error: &ChainError) {
    tracing::warn!(stage = %stage, phase = %ChainPhase::Aborted, code = error.code(), "{}", error.message());
    phases.push(ChainPhase::Aborted);
}

fn chained_descriptor(stage_index: usize, configured: Stage) -> ChainResult<&'static StageDescriptor> {
    let descriptor = descriptor_for_index(stage_index).ok_or_else(|| {
        ChainError::config(
            "CONFIG.STAGE_INDEX",
            format!(
                "stage index {} is outside the pipeline (1..={})",
                stage_index,
                PIPELINE.len()
            ),
        )
    })?;
    if descriptor.stage != configured {
        return Err(ChainError::config(
            "CONFIG.STAGE_MISMATCH",
            format!(
                "chain stage {} is '{}' but the job configuration says '{}'",
                stage_index, descriptor.stage, configured
            ),
        ));
    }
    Ok(descriptor)
}

fn next_continuation(link: &ChainLink, submission: &SubmissionOptions) -> ChainResult<Continuation> {
    let next_stage = link.stage_index + 1;
    let next = descriptor_for_index(next_stage).ok_or_else(|| {
        ChainError::internal(
            "RUN.NEXT_STAGE",
            format!("stage {} has no successor", link.stage_index),
        )
    })?;
    let mut carried_options = link.carried_options.clone();
    let location = absolute(&submission.program_location);
    carried_options.ensure_common_flag(PROGRAM_LOCATION_FLAG, &location.display().to_string());
    Ok(Continuation {
        next_stage,
        relative_path: PathBuf::from(next.relative_path),
        carried_options,
    })
}

fn scale(value: u32, multiplier: f64, what: &str) -> ChainResult<u32> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Err(ChainError::config(
            "CONFIG.MULTIPLIER",
            format!("{} multiplier must be a positive number, got {}", what, multiplier),
        ));
    }
    let scaled = (f64::from(value) * multiplier).ceil();
    if scaled > f64::from(u32::MAX) {
        return Err(ChainError::estimation(
            "EST.MULTIPLIER_RANGE",
            format!("{} count {} x {} is out of range", what, value, multiplier),
        ));
    }
    Ok(scaled as u32)
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|current| normalize_path(&current.join(path)))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Working directory of chain stage `stage_index` given the directory of the
/// stage before it.
pub fn stage_directory(base: &Path, stage_index: usize) -> ChainResult<PathBuf> {
    let descriptor = descriptor_for_index(stage_index).ok_or_else(|| {
        ChainError::config(
            "CONFIG.STAGE_INDEX",
            format!(
                "stage index {} is outside the pipeline (1..={})",
                stage_index,
                PIPELINE.len()
            ),
        )
    })?;
    Ok(normalize_path(&base.join(descriptor.relative_path)))
}

/// Where a finished job's continuation points: the next stage's directory
/// and the continuation itself, or `None` for a terminal document.
pub fn continuation_target(sidecar_path: &Path) -> ChainResult<Option<(PathBuf, Continuation)>> {
    let document = JobDocument::load(sidecar_path)?;
    let Some(continuation) = document.continuation().cloned() else {
        return Ok(None);
    };
    let directory = normalize_path(&document.working_directory().join(&continuation.relative_path));
    Ok(Some((directory, continuation)))
}

/// Lexically resolves `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(normalized.components().next_back(), Some(Component::Normal(_)))
                    && normalized.pop();
                if !popped && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::{
        ChainController, ChainLink, ChainOutcome, ChainPhase, ResourceOverrides, StageInvocation,
        continuation_target, next_continuation, normalize_path, stage_directory,
    };
    use crate::common::ClusterProfile;
    use crate::domain::{ChainErrorCategory, Stage, StageOptions};
    use crate::modules::document::{DirectiveKey, JobDocument, SubmissionOptions};
    use crate::modules::estimator::ResourceEstimator;
    use crate::modules::scheduler::recording::RecordingScheduler;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const RUNNER: &str = "/opt/bin/chainsub";

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().expect("path should have a parent"))
            .expect("directories should be created");
        fs::write(path, content).expect("file should be written");
    }

    fn invocation(directory: &Path) -> StageInvocation {
        StageInvocation {
            config_path: directory.join("spectrumsdt.config"),
            profile: ClusterProfile::haswell(false),
            overrides: ResourceOverrides::default(),
            submission: SubmissionOptions {
                program_location: PathBuf::from("/opt/spectrumsdt/bin"),
                ..SubmissionOptions::default()
            },
            resubmit: false,
            convergence_threshold: None,
            generate_only: false,
        }
    }

    /// `<root>/K_0/even/{basis,overlaps,diagonalization,properties}` with a
    /// finished grid stage.
    fn stage_tree(root: &Path) -> PathBuf {
        let sym = root.join("K_0/even");
        write(&root.join("grids/pes.out"), "0.0\n");
        write(&root.join("grids/grid_rho.dat"), "rho grid n 40\n");
        for stage in ["basis", "overlaps", "diagonalization", "properties"] {
            write(
                &sym.join(stage).join("spectrumsdt.config"),
                &format!(
                    "mode = {}\nK = 0\nsymmetry = 0\nroot_path = ../../..\ngrid_path = ../../../grids\n\
                     ncv = 10\nnum_states = 20\n",
                    stage
                ),
            );
        }
        sym
    }

    #[test]
    fn chained_stage_appends_one_continuation_and_submits() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        let scheduler = RecordingScheduler::default();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);
        let link = ChainLink {
            stage_index: 1,
            carried_options: StageOptions::parse("-t 1;;-n 2"),
        };

        let report = controller
            .run_chained(&invocation(&sym.join("basis")), &link)
            .expect("basis stage should submit");
        assert_eq!(
            report.phases,
            vec![
                ChainPhase::Estimate,
                ChainPhase::Assemble,
                ChainPhase::AppendContinuation,
                ChainPhase::Submit,
                ChainPhase::Done,
            ]
        );
        let ChainOutcome::Submitted { script_path, handle } = report.outcome else {
            panic!("expected a submission");
        };
        assert_eq!(handle.0, "1001");
        assert_eq!(scheduler.submissions(), 1);

        let document = JobDocument::load(&script_path.with_extension("job.json")).unwrap();
        assert_eq!(document.directive(DirectiveKey::Nodes), Some("2"));
        let continuation = document.continuation().expect("continuation should be recorded");
        assert_eq!(continuation.next_stage, 2);
        assert_eq!(continuation.relative_path, PathBuf::from("../overlaps"));
        assert_eq!(
            continuation.carried_options.common(),
            "-t 1 --program-location /opt/spectrumsdt/bin"
        );

        let script = fs::read_to_string(&script_path).unwrap();
        assert_eq!(script.matches(" continue ").count(), 1);

        let (next_directory, _) = continuation_target(&document.sidecar_path())
            .unwrap()
            .expect("non-terminal document should continue");
        assert_eq!(next_directory, sym.join("overlaps"));
    }

    #[test]
    fn terminal_stage_never_gets_a_continuation() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        let scheduler = RecordingScheduler::default();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);
        let link = ChainLink {
            stage_index: 4,
            carried_options: StageOptions::default(),
        };

        let report = controller
            .run_chained(&invocation(&sym.join("properties")), &link)
            .unwrap();
        assert!(!report.phases.contains(&ChainPhase::AppendContinuation));
        let ChainOutcome::Submitted { script_path, .. } = report.outcome else {
            panic!("expected a submission");
        };
        let sidecar = script_path.with_extension("job.json");
        assert!(JobDocument::load(&sidecar).unwrap().continuation().is_none());
        assert!(continuation_target(&sidecar).unwrap().is_none());
        assert!(!fs::read_to_string(&script_path).unwrap().contains(" continue "));
    }

    #[test]
    fn standalone_stage_and_generate_only_skip_continuation_and_submission() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        let scheduler = RecordingScheduler::default();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);
        let mut invocation = invocation(&sym.join("basis"));
        invocation.generate_only = true;

        let report = controller.run_stage(&invocation).unwrap();
        assert_eq!(
            report.phases,
            vec![ChainPhase::Estimate, ChainPhase::Assemble, ChainPhase::Done]
        );
        assert!(matches!(report.outcome, ChainOutcome::Generated { .. }));
        assert_eq!(scheduler.submissions(), 0);
        assert!(sym.join("basis/out.sbatch").is_file());
    }

    #[test]
    fn converged_result_short_circuits_repeated_invocation() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        let diagonalization = sym.join("diagonalization");
        write(&diagonalization.join("3dsdt/spec.out"), "100.0 0.1\n2500.5 0.3\n");

        let scheduler = RecordingScheduler::default();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);
        let link = ChainLink {
            stage_index: 3,
            carried_options: StageOptions::default(),
        };
        let mut invocation = invocation(&diagonalization);
        invocation.convergence_threshold = Some(2000.0);

        let report = controller.run_chained(&invocation, &link).unwrap();
        assert_eq!(report.phases, vec![ChainPhase::Done]);
        assert!(matches!(
            report.outcome,
            ChainOutcome::Skipped { stage: Stage::Diagonalization, .. }
        ));
        assert!(!diagonalization.join("out.sbatch").exists());
        assert_eq!(scheduler.submissions(), 0);

        // Same artifact, but the result has not crossed the threshold.
        invocation.convergence_threshold = Some(3000.0);
        invocation.overrides.nodes = Some(1);
        let report = controller.run_chained(&invocation, &link).unwrap();
        assert!(matches!(report.outcome, ChainOutcome::Submitted { .. }));

        invocation.convergence_threshold = Some(2000.0);
        invocation.resubmit = true;
        let report = controller.run_chained(&invocation, &link).unwrap();
        assert!(matches!(report.outcome, ChainOutcome::Submitted { .. }));
        assert_eq!(scheduler.submissions(), 2);
    }

    #[test]
    fn existing_result_skips_stages_without_convergence_check() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        write(&sym.join("basis/basis/nvec2.dat"), "1 10 20\n");
        write(&sym.join("properties/state_properties.fwc"), "");
        let scheduler = RecordingScheduler::default();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);

        let report = controller.run_stage(&invocation(&sym.join("basis"))).unwrap();
        assert_eq!(report.phases, vec![ChainPhase::Done]);
        assert!(matches!(report.outcome, ChainOutcome::Skipped { stage: Stage::Basis, .. }));

        // A threshold only applies to convergence results.
        let mut properties = invocation(&sym.join("properties"));
        properties.convergence_threshold = Some(1.0e9);
        let report = controller.run_stage(&properties).unwrap();
        let ChainOutcome::Skipped { stage, result_artifact } = report.outcome else {
            panic!("expected a skip");
        };
        assert_eq!(stage, Stage::Properties);
        assert_eq!(result_artifact, sym.join("properties/state_properties.fwc"));

        assert!(!sym.join("basis/out.sbatch").exists());
        assert!(!sym.join("properties/out.sbatch").exists());
        assert_eq!(scheduler.submissions(), 0);
    }

    #[test]
    fn missing_upstream_artifact_aborts_before_writing() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        let scheduler = RecordingScheduler::default();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);

        let error = controller
            .run_stage(&invocation(&sym.join("overlaps")))
            .expect_err("overlaps needs the basis distributions");
        assert_eq!(error.category(), ChainErrorCategory::PreconditionError);
        assert!(!sym.join("overlaps/out.sbatch").exists());
        assert_eq!(scheduler.submissions(), 0);
    }

    #[test]
    fn rejected_submission_is_a_submission_error() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        let scheduler = RecordingScheduler::rejecting();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);

        let error = controller
            .run_stage(&invocation(&sym.join("basis")))
            .expect_err("submission should fail");
        assert_eq!(error.category(), ChainErrorCategory::SubmissionError);
        assert!(sym.join("basis/out.sbatch").is_file());
    }

    #[test]
    fn overrides_take_precedence_and_multipliers_scale() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        let scheduler = RecordingScheduler::default();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);
        // No basis artifacts exist, so estimation for overlaps would fail.
        let mut invocation = invocation(&sym.join("overlaps"));
        invocation.generate_only = true;
        invocation.overrides.nodes = Some(3);
        invocation.overrides.node_multiplier = Some(1.5);

        controller.run_stage(&invocation).unwrap();
        let document = JobDocument::load(&sym.join("overlaps/out.job.json")).unwrap();
        assert_eq!(document.resources().nodes(), 5);
        assert_eq!(document.resources().processes(), 96);

        invocation.overrides = ResourceOverrides {
            processes: Some(10),
            process_multiplier: Some(0.5),
            ..ResourceOverrides::default()
        };
        controller.run_stage(&invocation).unwrap();
        let document = JobDocument::load(&sym.join("overlaps/out.job.json")).unwrap();
        assert_eq!((document.resources().nodes(), document.resources().processes()), (1, 5));

        invocation.overrides = ResourceOverrides {
            nodes: Some(1),
            processes: Some(64),
            ..ResourceOverrides::default()
        };
        let error = controller.run_stage(&invocation).expect_err("64 > 32 slots");
        assert_eq!(error.code(), "EST.OVERSUBSCRIBED");
    }

    #[test]
    fn node_override_beyond_process_range_is_an_estimation_error() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        let scheduler = RecordingScheduler::default();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);
        let mut invocation = invocation(&sym.join("overlaps"));
        invocation.overrides.nodes = Some(200_000_000);

        let error = controller.run_stage(&invocation).expect_err("process count overflows");
        assert_eq!(error.code(), "EST.PROCESS_RANGE");
        assert_eq!(error.category(), ChainErrorCategory::EstimationError);
        assert!(!sym.join("overlaps/out.sbatch").exists());
    }

    #[test]
    fn terminal_stage_has_no_successor_continuation() {
        let link = ChainLink {
            stage_index: 4,
            carried_options: StageOptions::default(),
        };
        let error = next_continuation(&link, &SubmissionOptions::default())
            .expect_err("properties has no successor");
        assert_eq!(error.code(), "RUN.NEXT_STAGE");
        assert_eq!(error.category(), ChainErrorCategory::InternalError);
    }

    #[test]
    fn multiplier_pairing_rules() {
        let only_nodes = |value| ResourceOverrides {
            node_multiplier: Some(value),
            ..ResourceOverrides::default()
        };
        let only_processes = |value| ResourceOverrides {
            process_multiplier: Some(value),
            ..ResourceOverrides::default()
        };
        assert_eq!(ResourceOverrides::default().multipliers(), (1.0, 1.0));
        assert_eq!(only_nodes(2.0).multipliers(), (2.0, 1.0));
        assert_eq!(only_nodes(0.5).multipliers(), (0.5, 0.5));
        assert_eq!(only_processes(2.0).multipliers(), (2.0, 2.0));
        assert_eq!(only_processes(0.5).multipliers(), (1.0, 0.5));
    }

    #[test]
    fn stage_mismatch_and_bad_index_are_config_errors() {
        let temp = TempDir::new().expect("tempdir should be created");
        let sym = stage_tree(temp.path());
        let scheduler = RecordingScheduler::default();
        let controller = ChainController::new(ResourceEstimator::default(), &scheduler, RUNNER);
        let link = ChainLink {
            stage_index: 2,
            carried_options: StageOptions::default(),
        };
        let error = controller
            .run_chained(&invocation(&sym.join("basis")), &link)
            .unwrap_err();
        assert_eq!(error.code(), "CONFIG.STAGE_MISMATCH");
        assert_eq!(stage_directory(&sym, 5).unwrap_err().code(), "CONFIG.STAGE_INDEX");
    }

    #[test]
    fn stage_directories_compose_lexically() {
        let base = Path::new("/w/J_2/K_1/odd/basis");
        assert_eq!(stage_directory(base, 1).unwrap(), base);
        assert_eq!(
            stage_directory(base, 2).unwrap(),
            Path::new("/w/J_2/K_1/odd/overlaps")
        );
        assert_eq!(normalize_path(Path::new("a/./b/../../..")), Path::new(".."));
        assert_eq!(normalize_path(Path::new("/../x")), Path::new("/x"));
    }
}
