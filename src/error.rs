use camino::Utf8PathBuf;
use thiserror::Error;

/// Top-level error returned by [`crate::Workflow`] entry points.
#[derive(Debug, Error)]
pub enum SvflowError {
    #[error("Invalid configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while planning the workflow:\n{0}")]
    Plan(#[from] PlanError),

    #[error("Error while running the workflow:\n{0}")]
    Run(#[from] RunError),

    #[error("Couldn't prepare the run directory:\n{0}")]
    Layout(#[from] std::io::Error),
}

/// Problems detected before a single task is submitted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read configuration file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse configuration file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, serde_json::Error),

    #[error("No reference fasta defined")]
    NoReference,

    #[error("Reference fasta '{0}' does not exist")]
    MissingReference(Utf8PathBuf),

    #[error("Reference fasta index '{0}' does not exist")]
    MissingReferenceIndex(Utf8PathBuf),

    #[error("Couldn't read reference fasta index '{0}'.\n{1}")]
    ReadReferenceIndex(Utf8PathBuf, std::io::Error),

    #[error("Malformed reference fasta index '{path}' at line {line}: {reason}")]
    MalformedReferenceIndex {
        path: Utf8PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Reference genome yields no segments to partition")]
    EmptyPartition,

    #[error("At least one normal or tumor alignment file is required")]
    NoAlignments,

    #[error("Alignment file '{0}' is listed more than once")]
    DuplicateAlignment(Utf8PathBuf),

    #[error("Unstranded RNA mode requires RNA mode")]
    UnstrandedWithoutRna,

    #[error("Option '{0}' must be greater than zero")]
    NotPositive(&'static str),

    #[error("Invalid call region '{0}': {1}")]
    InvalidRegion(String, &'static str),
}

/// Problems raised while the task graph is being assembled.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No SV locus graphs to create. Possible target region parse error.")]
    EmptyGraph,

    #[error("Task name '{0}' is already used in this workflow")]
    DuplicateTask(String),

    #[error("Task '{task}' depends on a task handle unknown to this graph ({dependency})")]
    UnknownDependency { task: String, dependency: usize },
}

/// Failure of one submitted task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Couldn't start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}, see log '{log}'")]
    Exit {
        program: String,
        status: std::process::ExitStatus,
        log: Utf8PathBuf,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Task panicked: {0}")]
    Panic(String),
}

/// Failure of a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task '{task}' failed ({skipped} dependent tasks were not started):\n{source}")]
    TaskFailure {
        task: String,
        skipped: usize,
        source: TaskError,
    },

    #[error("Couldn't build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
