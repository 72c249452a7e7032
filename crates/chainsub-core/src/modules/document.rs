//! Job documents: the resolved directive block, prologue and run command of
//! one stage invocation, plus the optional continuation that triggers the
//! next stage.
//!
//! Building is pure. Persisting writes two files next to each other: the
//! rendered batch script and a JSON sidecar holding the document itself.

use crate::common::{ClusterProfile, JobConfiguration};
use crate::domain::{ChainError, ChainResult, ResourceRequest, StageOptions};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_OUTPUT_NAME: &str = "out.slurm";
pub const DEFAULT_PROGRAM_OUTPUT: &str = "prg.out";
pub const DEFAULT_TIME_FILE: &str = "time.out";
pub const DEFAULT_PROGRAM_NAME: &str = "spectrumsdt";
pub const DEFAULT_JOB_NAME_ANCHOR: &str = "ozone";
pub const DEFAULT_TIME_HOURS: f64 = 0.5;
pub const SCRIPT_EXTENSION: &str = "sbatch";
pub const SIDECAR_EXTENSION: &str = "job.json";

/// Upper bound of the minimum-time directive, in minutes.
pub const MAX_MIN_TIME_MINUTES: u64 = 240;
const BROADCAST_DIRECTORY: &str = "/tmp";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueClass {
    Debug,
    Regular,
    Premium,
    Shared,
    Overrun,
    Other(String),
}

impl QueueClass {
    /// `debug` unless the job is longer than half an hour or larger than
    /// the debug partition, in which case `regular`.
    pub fn resolve(
        requested: Option<&QueueClass>,
        time_hours: f64,
        nodes: u32,
        profile: &ClusterProfile,
    ) -> Self {
        if let Some(queue) = requested {
            return queue.clone();
        }
        if time_hours > DEFAULT_TIME_HOURS || nodes > profile.max_debug_nodes {
            Self::Regular
        } else {
            Self::Debug
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Debug => "debug",
            Self::Regular => "regular",
            Self::Premium => "premium",
            Self::Shared => "shared",
            Self::Overrun => "overrun",
            Self::Other(name) => name,
        }
    }
}

impl Display for QueueClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueClass {
    type Err = ChainError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(ChainError::config(
                "CONFIG.QUEUE",
                format!("invalid queue class '{}'", token),
            ));
        }
        Ok(match token.to_ascii_lowercase().as_str() {
            "debug" => Self::Debug,
            "regular" => Self::Regular,
            "premium" => Self::Premium,
            "shared" => Self::Shared,
            "overrun" => Self::Overrun,
            other => Self::Other(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemRequirement {
    #[default]
    None,
    Scratch,
}

impl FromStr for FilesystemRequirement {
    type Err = ChainError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "scratch" => Ok(Self::Scratch),
            other => Err(ChainError::config(
                "CONFIG.FILESYSTEM",
                format!("unknown filesystem requirement '{}', expected none or scratch", other),
            )),
        }
    }
}

/// Scheduler directive kinds, in the order they appear in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectiveKey {
    Licenses,
    Queue,
    MinTime,
    Nodes,
    Tasks,
    WallTime,
    JobName,
    Output,
    Constraint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub key: DirectiveKey,
    pub value: String,
}

impl Directive {
    fn new(key: DirectiveKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// What a finished job does next: run `next_stage` in the directory reached
/// by `relative_path` from its own, with the same carried options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub next_stage: usize,
    pub relative_path: PathBuf,
    pub carried_options: StageOptions,
}

/// Caller-controlled inputs of the builder that are not resources.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOptions {
    pub queue: Option<QueueClass>,
    pub time_hours: f64,
    pub job_name: Option<String>,
    pub job_name_anchor: String,
    pub output_name: String,
    pub program_output: String,
    pub time_file: String,
    pub program_location: PathBuf,
    pub program_name: String,
    pub fast_broadcast: bool,
    pub filesystem: FilesystemRequirement,
}

impl Default for SubmissionOptions {
    fn default() -> Self {
        Self {
            queue: None,
            time_hours: DEFAULT_TIME_HOURS,
            job_name: None,
            job_name_anchor: DEFAULT_JOB_NAME_ANCHOR.to_string(),
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
            program_output: DEFAULT_PROGRAM_OUTPUT.to_string(),
            time_file: DEFAULT_TIME_FILE.to_string(),
            program_location: PathBuf::from("."),
            program_name: DEFAULT_PROGRAM_NAME.to_string(),
            fast_broadcast: false,
            filesystem: FilesystemRequirement::None,
        }
    }
}

impl SubmissionOptions {
    pub fn program_path(&self) -> PathBuf {
        self.program_location.join(&self.program_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDocument {
    script_path: PathBuf,
    resources: ResourceRequest,
    directives: Vec<Directive>,
    prologue: Vec<String>,
    run_command: String,
    continuation: Option<Continuation>,
}

impl JobDocument {
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.script_path.with_extension(SIDECAR_EXTENSION)
    }

    /// Directory the job runs in; the script lives there.
    pub fn working_directory(&self) -> &Path {
        self.script_path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn resources(&self) -> &ResourceRequest {
        &self.resources
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn directive(&self, key: DirectiveKey) -> Option<&str> {
        self.directives
            .iter()
            .find(|directive| directive.key == key)
            .map(|directive| directive.value.as_str())
    }

    pub fn prologue(&self) -> &[String] {
        &self.prologue
    }

    pub fn run_command(&self) -> &str {
        &self.run_command
    }

    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }

    /// Writes the rendered script and the sidecar.
    pub fn write(&self, rendered_script: &str) -> ChainResult<()> {
        fs::write(&self.script_path, rendered_script)
            .map_err(|source| write_error(&self.script_path, source))?;
        self.write_sidecar()
    }

    /// Records the continuation and appends its runner line to the already
    /// written script. A document takes at most one continuation.
    pub fn append_continuation(&mut self, continuation: Continuation, runner: &Path) -> ChainResult<()> {
        if self.continuation.is_some() {
            return Err(ChainError::internal(
                "RUN.CONTINUATION_TWICE",
                format!(
                    "job document '{}' already carries a continuation",
                    self.script_path.display()
                ),
            ));
        }
        self.continuation = Some(continuation);
        self.write_sidecar()?;

        let line = continuation_line(runner, &self.sidecar_path());
        let mut script = OpenOptions::new()
            .append(true)
            .open(&self.script_path)
            .map_err(|source| write_error(&self.script_path, source))?;
        script
            .write_all(line.as_bytes())
            .map_err(|source| write_error(&self.script_path, source))
    }

    pub fn load(sidecar_path: &Path) -> ChainResult<Self> {
        let source = fs::read_to_string(sidecar_path).map_err(|source| {
            ChainError::io_system(
                "IO.SIDECAR_READ",
                format!(
                    "failed to read job document '{}': {}",
                    sidecar_path.display(),
                    source
                ),
            )
        })?;
        let mut document: Self = serde_json::from_str(&source).map_err(|source| {
            ChainError::config(
                "CONFIG.SIDECAR",
                format!(
                    "job document '{}' is not valid: {}",
                    sidecar_path.display(),
                    source
                ),
            )
        })?;
        // The job tree may have moved since the document was written.
        if let (Some(directory), Some(file_name)) =
            (sidecar_path.parent(), document.script_path.file_name())
        {
            document.script_path = directory.join(file_name);
        }
        Ok(document)
    }

    fn write_sidecar(&self) -> ChainResult<()> {
        let path = self.sidecar_path();
        let payload = serde_json::to_string_pretty(self).map_err(|source| {
            ChainError::internal(
                "RUN.SIDECAR_ENCODE",
                format!("failed to encode job document: {}", source),
            )
        })?;
        fs::write(&path, payload).map_err(|source| write_error(&path, source))
    }
}

/// Shell line a finished job runs to hand over to the next stage.
pub fn continuation_line(runner: &Path, sidecar: &Path) -> String {
    format!("\"{}\" continue \"{}\"\n", runner.display(), sidecar.display())
}

pub struct JobDocumentBuilder;

impl JobDocumentBuilder {
    pub fn build(
        &self,
        resources: &ResourceRequest,
        config: &JobConfiguration,
        profile: &ClusterProfile,
        options: &SubmissionOptions,
    ) -> ChainResult<JobDocument> {
        let minutes = wall_time_minutes(options.time_hours)?;
        let queue = QueueClass::resolve(
            options.queue.as_ref(),
            options.time_hours,
            resources.nodes(),
            profile,
        );
        let job_name = match &options.job_name {
            Some(name) => name.clone(),
            None => derive_job_name(config.directory(), &options.job_name_anchor),
        };

        let mut directives = Vec::with_capacity(9);
        if options.filesystem == FilesystemRequirement::Scratch {
            directives.push(Directive::new(DirectiveKey::Licenses, "SCRATCH"));
        }
        directives.push(Directive::new(DirectiveKey::Queue, queue.as_str()));
        if queue == QueueClass::Overrun {
            directives.push(Directive::new(
                DirectiveKey::MinTime,
                minutes.min(MAX_MIN_TIME_MINUTES).to_string(),
            ));
        }
        directives.push(Directive::new(DirectiveKey::Nodes, resources.nodes().to_string()));
        if queue == QueueClass::Shared {
            directives.push(Directive::new(DirectiveKey::Tasks, resources.processes().to_string()));
        }
        directives.push(Directive::new(DirectiveKey::WallTime, minutes.to_string()));
        directives.push(Directive::new(DirectiveKey::JobName, job_name));
        directives.push(Directive::new(DirectiveKey::Output, options.output_name.clone()));
        directives.push(Directive::new(DirectiveKey::Constraint, profile.node_type_label));

        let program_path = options.program_path();
        let broadcast_path = Path::new(BROADCAST_DIRECTORY).join(&options.program_name);
        let mut prologue = vec![
            "date".to_string(),
            "echo $SLURM_JOB_ID".to_string(),
            format!("rm -f {}", options.time_file),
        ];
        if options.fast_broadcast {
            prologue.push("export PMI_MMAP_SYNC_WAIT_TIME=300".to_string());
            prologue.push(format!(
                "sbcast --compress=lz4 {} {}",
                program_path.display(),
                broadcast_path.display()
            ));
        }
        let call_location = if options.fast_broadcast {
            broadcast_path
        } else {
            program_path
        };
        let run_command = format!(
            "srun -n {} -c {} --cpu_bind=cores time -ao {} {} > {}",
            resources.processes(),
            resources.cores_per_process(),
            options.time_file,
            call_location.display(),
            options.program_output
        );

        Ok(JobDocument {
            script_path: script_path(config.directory(), &options.output_name),
            resources: *resources,
            directives,
            prologue,
            run_command,
            continuation: None,
        })
    }
}

/// `<dir>/<output stem>.sbatch`
pub fn script_path(directory: &Path, output_name: &str) -> PathBuf {
    let stem = Path::new(output_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());
    directory.join(format!("{}.{}", stem, SCRIPT_EXTENSION))
}

pub fn wall_time_minutes(time_hours: f64) -> ChainResult<u64> {
    if !time_hours.is_finite() || time_hours <= 0.0 {
        return Err(ChainError::config(
            "CONFIG.TIME",
            format!("time budget must be a positive number of hours, got {}", time_hours),
        ));
    }
    Ok(((time_hours * 60.0).round() as u64).max(1))
}

/// Path of `directory` below the last `anchor` component, or its last three
/// components when the anchor does not occur.
pub fn derive_job_name(directory: &Path, anchor: &str) -> String {
    let parts: Vec<String> = directory
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let start = match parts.iter().rposition(|part| part == anchor) {
        Some(position) if position + 1 < parts.len() => position + 1,
        _ => parts.len().saturating_sub(3),
    };
    let name = parts[start..].join("/");
    if name.is_empty() { "job".to_string() } else { name }
}

fn write_error(path: &Path, source: std::io::Error) -> ChainError {
    ChainError::io_system(
        "IO.DOCUMENT_WRITE",
        format!("failed to write '{}': {}", path.display(), source),
    )
}

#[cfg(test)]
mod tests {
    use super::{
        Continuation, DirectiveKey, FilesystemRequirement, JobDocument, JobDocumentBuilder,
        QueueClass, SubmissionOptions, derive_job_name, script_path, wall_time_minutes,
    };
    use crate::common::{ClusterProfile, JobConfiguration};
    use crate::domain::{ResourceRequest, StageOptions};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn config_in(directory: &Path) -> JobConfiguration {
        JobConfiguration::from_source(directory.join("spectrumsdt.config"), "mode = basis\n")
            .expect("config should parse")
    }

    fn keys(document: &JobDocument) -> Vec<DirectiveKey> {
        document.directives().iter().map(|directive| directive.key).collect()
    }

    #[test]
    fn default_document_has_minimal_directive_set() {
        let profile = ClusterProfile::haswell(false);
        let request = ResourceRequest::new(2, 64, &profile).unwrap();
        let config = config_in(Path::new("/scratch/ozone/686/J_3/K_0/even/basis"));
        let options = SubmissionOptions {
            program_location: PathBuf::from("/opt/bin"),
            ..SubmissionOptions::default()
        };

        let document = JobDocumentBuilder.build(&request, &config, &profile, &options).unwrap();
        assert_eq!(
            keys(&document),
            vec![
                DirectiveKey::Queue,
                DirectiveKey::Nodes,
                DirectiveKey::WallTime,
                DirectiveKey::JobName,
                DirectiveKey::Output,
                DirectiveKey::Constraint,
            ]
        );
        assert_eq!(document.directive(DirectiveKey::Queue), Some("debug"));
        assert_eq!(document.directive(DirectiveKey::WallTime), Some("30"));
        assert_eq!(
            document.directive(DirectiveKey::JobName),
            Some("686/J_3/K_0/even/basis")
        );
        assert_eq!(
            document.run_command(),
            "srun -n 64 -c 1 --cpu_bind=cores time -ao time.out /opt/bin/spectrumsdt > prg.out"
        );
        assert_eq!(
            document.script_path(),
            Path::new("/scratch/ozone/686/J_3/K_0/even/basis/out.sbatch")
        );
        assert!(document.continuation().is_none());
    }

    #[test]
    fn conditional_directives_follow_queue_and_filesystem() {
        let profile = ClusterProfile::knl(false);
        let request = ResourceRequest::new(1, 10, &profile).unwrap();
        let config = config_in(Path::new("/a/b/c/d"));

        let overrun = SubmissionOptions {
            queue: Some(QueueClass::Overrun),
            time_hours: 6.0,
            filesystem: FilesystemRequirement::Scratch,
            ..SubmissionOptions::default()
        };
        let document = JobDocumentBuilder.build(&request, &config, &profile, &overrun).unwrap();
        assert_eq!(
            keys(&document)[..4],
            [
                DirectiveKey::Licenses,
                DirectiveKey::Queue,
                DirectiveKey::MinTime,
                DirectiveKey::Nodes
            ]
        );
        assert_eq!(document.directive(DirectiveKey::MinTime), Some("240"));
        assert_eq!(document.directive(DirectiveKey::WallTime), Some("360"));
        assert_eq!(document.directive(DirectiveKey::Tasks), None);
        assert_eq!(document.directive(DirectiveKey::JobName), Some("b/c/d"));
        assert_eq!(document.directive(DirectiveKey::Constraint), Some("knl"));

        let shared = SubmissionOptions {
            queue: Some(QueueClass::Shared),
            ..SubmissionOptions::default()
        };
        let document = JobDocumentBuilder.build(&request, &config, &profile, &shared).unwrap();
        assert_eq!(document.directive(DirectiveKey::Tasks), Some("10"));
        assert_eq!(document.directive(DirectiveKey::MinTime), None);
        assert_eq!(document.directive(DirectiveKey::Licenses), None);
    }

    #[test]
    fn fast_broadcast_runs_from_local_copy() {
        let profile = ClusterProfile::haswell(true);
        let request = ResourceRequest::new(1, 16, &profile).unwrap();
        let config = config_in(Path::new("/w"));
        let options = SubmissionOptions {
            program_location: PathBuf::from("/opt/bin"),
            fast_broadcast: true,
            ..SubmissionOptions::default()
        };

        let document = JobDocumentBuilder.build(&request, &config, &profile, &options).unwrap();
        assert_eq!(
            document.prologue(),
            [
                "date",
                "echo $SLURM_JOB_ID",
                "rm -f time.out",
                "export PMI_MMAP_SYNC_WAIT_TIME=300",
                "sbcast --compress=lz4 /opt/bin/spectrumsdt /tmp/spectrumsdt",
            ]
        );
        assert!(document.run_command().contains(" -c 4 "));
        assert!(document.run_command().contains("/tmp/spectrumsdt > prg.out"));
    }

    #[test]
    fn cores_never_exceed_allocation() {
        for profile in [ClusterProfile::haswell(false), ClusterProfile::haswell(true), ClusterProfile::knl(true)] {
            for nodes in 1..4_u32 {
                let capacity = nodes * profile.effective_cores_per_node();
                for processes in [1, 7, capacity / 3, capacity / 2, capacity] {
                    let request = ResourceRequest::new(nodes, processes.max(1), &profile).unwrap();
                    let used = request.cores_per_process() * request.processes();
                    let available = profile.cores_per_node * nodes * profile.threads_factor();
                    assert!(used <= available, "{:?} on {:?}", request, profile);
                }
            }
        }
    }

    #[test]
    fn queue_defaults_upgrade_for_long_or_wide_jobs() {
        let profile = ClusterProfile::haswell(false);
        assert_eq!(QueueClass::resolve(None, 0.5, 64, &profile), QueueClass::Debug);
        assert_eq!(QueueClass::resolve(None, 0.75, 1, &profile), QueueClass::Regular);
        assert_eq!(QueueClass::resolve(None, 0.5, 65, &profile), QueueClass::Regular);
        assert_eq!(
            QueueClass::resolve(Some(&QueueClass::Premium), 10.0, 1000, &profile),
            QueueClass::Premium
        );
        assert_eq!("low".parse::<QueueClass>().unwrap(), QueueClass::Other("low".to_string()));
    }

    #[test]
    fn naming_helpers() {
        assert_eq!(wall_time_minutes(1.5).unwrap(), 90);
        assert_eq!(wall_time_minutes(0.001).unwrap(), 1);
        assert_eq!(wall_time_minutes(0.0).unwrap_err().code(), "CONFIG.TIME");
        assert_eq!(script_path(Path::new("/w"), "run.log"), Path::new("/w/run.sbatch"));
        assert_eq!(derive_job_name(Path::new("/x/ozone/J_1/even"), "ozone"), "J_1/even");
        assert_eq!(derive_job_name(Path::new("/x/y/z/ozone"), "ozone"), "y/z/ozone");
        assert_eq!(derive_job_name(Path::new("/"), "ozone"), "job");
    }

    #[test]
    fn continuation_is_appended_once_and_round_trips_through_sidecar() {
        let temp = TempDir::new().expect("tempdir should be created");
        let profile = ClusterProfile::haswell(false);
        let request = ResourceRequest::new(1, 4, &profile).unwrap();
        let config = config_in(temp.path());
        let mut document = JobDocumentBuilder
            .build(&request, &config, &profile, &SubmissionOptions::default())
            .unwrap();
        document.write("#!/bin/bash\nsrun\n").unwrap();

        let continuation = Continuation {
            next_stage: 2,
            relative_path: PathBuf::from("../overlaps"),
            carried_options: StageOptions::parse("-t 1;;-n 4"),
        };
        document
            .append_continuation(continuation.clone(), Path::new("/opt/chainsub"))
            .unwrap();
        let error = document
            .append_continuation(continuation.clone(), Path::new("/opt/chainsub"))
            .expect_err("second continuation should be rejected");
        assert_eq!(error.code(), "RUN.CONTINUATION_TWICE");

        let script = fs::read_to_string(document.script_path()).unwrap();
        let runner_lines: Vec<&str> = script.lines().filter(|line| line.contains(" continue ")).collect();
        assert_eq!(runner_lines.len(), 1);
        assert!(runner_lines[0].starts_with("\"/opt/chainsub\" continue "));
        assert!(runner_lines[0].ends_with("out.job.json\""));

        let loaded = JobDocument::load(&document.sidecar_path()).unwrap();
        assert_eq!(loaded.continuation(), Some(&continuation));
        assert_eq!(loaded, document);
    }
}
