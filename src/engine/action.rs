//! What a task does when it runs.
//!
//! Shell strings joined with `|`, `>` and `&&` are replaced by a small typed
//! description: a [`Pipeline`] is an ordered list of [`Invocation`]s where the
//! standard output of each stage feeds the next, and an [`Action::Sequence`]
//! runs its steps in order, stopping at the first failure. A pipeline only
//! succeeds when every one of its stages exits successfully.

use std::fmt::{Display, Formatter, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::process::{Child, Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::TaskError;

/// One program with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Display) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// Appends `flag value`.
    pub fn opt(self, flag: &str, value: impl Display) -> Self {
        self.arg(flag).arg(value)
    }

    /// Appends `flag value` once per value.
    pub fn opts<I>(mut self, flag: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Display,
    {
        for value in values {
            self = self.opt(flag, value);
        }
        self
    }

    pub fn flag_if(self, condition: bool, flag: &str) -> Self {
        if condition { self.arg(flag) } else { self }
    }

    /// Whether `flag` appears among the arguments.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Every value following an occurrence of `flag`.
    pub fn values_of<'a>(&'a self, flag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.args
            .windows(2)
            .filter(move |w| w[0] == flag)
            .map(|w| w[1].as_str())
    }
}

/// Stages connected stdout to stdin, with optional file redirections at the ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pipeline {
    pub stages: Vec<Invocation>,
    pub stdin: Option<Utf8PathBuf>,
    pub stdout: Option<Utf8PathBuf>,
}

impl Pipeline {
    pub fn new(first: Invocation) -> Self {
        Self {
            stages: vec![first],
            stdin: None,
            stdout: None,
        }
    }

    pub fn pipe(mut self, next: Invocation) -> Self {
        self.stages.push(next);
        self
    }

    pub fn stdin(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    fn execute(&self, log: &Utf8Path) -> Result<(), TaskError> {
        let log_file = OpenOptions::new().create(true).append(true).open(log)?;
        let last = self.stages.len().saturating_sub(1);

        // Redirections are opened before anything is spawned, so a bad path
        // fails the task without leaving earlier stages running.
        let mut stdin = self.stdin.as_ref().map(File::open).transpose()?;
        let mut stdout = self.stdout.as_ref().map(File::create).transpose()?;

        let mut children: Vec<(&str, Child)> = Vec::with_capacity(self.stages.len());
        let mut previous = None;

        for (i, stage) in self.stages.iter().enumerate() {
            let mut command = Command::new(&stage.program);
            command.args(&stage.args).stderr(log_file.try_clone()?);

            match previous.take() {
                Some(piped) => command.stdin(Stdio::from(piped)),
                None => match stdin.take() {
                    Some(file) => command.stdin(file),
                    None => command.stdin(Stdio::null()),
                },
            };

            if i < last {
                command.stdout(Stdio::piped());
            } else {
                match stdout.take() {
                    Some(file) => command.stdout(file),
                    None => command.stdout(log_file.try_clone()?),
                };
            }

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(source) => {
                    for (_, child) in &mut children {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                    return Err(TaskError::Spawn {
                        program: stage.program.clone(),
                        source,
                    });
                }
            };

            previous = child.stdout.take();
            children.push((&stage.program, child));
        }

        // Every stage is waited on, the first failing one is reported.
        let mut failure = None;
        for (program, mut child) in children {
            let error = match child.wait() {
                Ok(status) if status.success() => continue,
                Ok(status) => TaskError::Exit {
                    program: program.to_string(),
                    status,
                    log: log.to_owned(),
                },
                Err(error) => TaskError::Io(error),
            };
            if failure.is_none() {
                failure = Some(error);
            }
        }

        failure.map_or(Ok(()), Err)
    }
}

impl From<Invocation> for Pipeline {
    fn from(value: Invocation) -> Self {
        Pipeline::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Run(Pipeline),
    /// Steps run in order; the first failure stops the sequence.
    Sequence(Vec<Action>),
    MakeDir(Utf8PathBuf),
    RemoveDir(Utf8PathBuf),
    RemoveFile(Utf8PathBuf),
    Rename {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
    },
    /// Writes one path per line and syncs the file before the task completes.
    WriteManifest {
        path: Utf8PathBuf,
        entries: Vec<Utf8PathBuf>,
    },
}

impl From<Invocation> for Action {
    fn from(value: Invocation) -> Self {
        Action::Run(Pipeline::new(value))
    }
}

impl From<Pipeline> for Action {
    fn from(value: Pipeline) -> Self {
        Action::Run(value)
    }
}

impl Action {
    /// Runs the action on this host. Standard error of every spawned program
    /// is appended to `log`.
    pub(crate) fn execute(&self, log: &Utf8Path) -> Result<(), TaskError> {
        match self {
            Action::Run(pipeline) => pipeline.execute(log),
            Action::Sequence(steps) => {
                for step in steps {
                    step.execute(log)?;
                }
                Ok(())
            }
            Action::MakeDir(path) => Ok(fs::create_dir_all(path)?),
            Action::RemoveDir(path) => ignore_missing(fs::remove_dir_all(path)),
            Action::RemoveFile(path) => ignore_missing(fs::remove_file(path)),
            Action::Rename { from, to } => Ok(fs::rename(from, to)?),
            Action::WriteManifest { path, entries } => {
                let mut file = BufWriter::new(File::create(path)?);
                for entry in entries {
                    writeln!(file, "{entry}")?;
                }
                file.flush()?;
                file.get_ref().sync_all()?;
                Ok(())
            }
        }
    }

    /// Files this action reads and writes by itself, independent of what the
    /// programs it starts do with their arguments.
    pub(crate) fn collect_io(&self, reads: &mut Vec<Utf8PathBuf>, writes: &mut Vec<Utf8PathBuf>) {
        match self {
            Action::Run(pipeline) => {
                reads.extend(pipeline.stdin.iter().cloned());
                writes.extend(pipeline.stdout.iter().cloned());
            }
            Action::Sequence(steps) => {
                for step in steps {
                    step.collect_io(reads, writes);
                }
            }
            Action::MakeDir(path) | Action::RemoveFile(path) => writes.push(path.clone()),
            Action::RemoveDir(_) => {}
            Action::Rename { from, to } => {
                reads.push(from.clone());
                writes.push(to.clone());
            }
            Action::WriteManifest { path, .. } => writes.push(path.clone()),
        }
    }

    /// Every program invocation, in execution order.
    pub fn invocations(&self) -> Vec<&Invocation> {
        match self {
            Action::Run(pipeline) => pipeline.stages.iter().collect(),
            Action::Sequence(steps) => steps.iter().flat_map(Action::invocations).collect(),
            _ => Vec::new(),
        }
    }

    pub fn removed_dir(&self) -> Option<&Utf8Path> {
        match self {
            Action::RemoveDir(path) => Some(path),
            _ => None,
        }
    }
}

fn ignore_missing(result: std::io::Result<()>) -> Result<(), TaskError> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => Ok(other?),
    }
}

fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));

    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

impl Display for Pipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut line = String::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                line.push_str(" | ");
            }
            write!(line, "{stage}")?;
            if i == 0
                && let Some(stdin) = &self.stdin
            {
                write!(line, " < {}", quote(stdin.as_str()))?;
            }
        }
        if let Some(stdout) = &self.stdout {
            write!(line, " > {}", quote(stdout.as_str()))?;
        }
        f.write_str(&line)
    }
}

/// Renders the action as the equivalent shell line, for logs and dry runs.
impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Run(pipeline) => write!(f, "{pipeline}"),
            Action::Sequence(steps) => {
                for (i, step) in steps.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" && ")?;
                    }
                    write!(f, "{step}")?;
                }
                Ok(())
            }
            Action::MakeDir(path) => write!(f, "mkdir -p {}", quote(path.as_str())),
            Action::RemoveDir(path) => write!(f, "rm -rf {}", quote(path.as_str())),
            Action::RemoveFile(path) => write!(f, "rm -f {}", quote(path.as_str())),
            Action::Rename { from, to } => {
                write!(f, "mv -f {} {}", quote(from.as_str()), quote(to.as_str()))
            }
            Action::WriteManifest { path, entries } => {
                write!(f, "<write {} entries to {}>", entries.len(), quote(path.as_str()))
            }
        }
    }
}
