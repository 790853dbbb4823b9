mod diagnostics;

use std::collections::{HashMap, VecDeque};
use std::num::NonZero;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::Workflow;
use crate::error::{RunError, TaskError};
use crate::utils::{RUN_STYLE, TASK_STYLE};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Something able to carry out a planned workflow.
pub trait Executor {
    fn execute(&self, workflow: &Workflow) -> Result<Diagnostics, RunError>;
}

/// Runs every task as child processes on this host.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    jobs: usize,
    memory_mb: Option<u64>,
}

impl LocalExecutor {
    /// `jobs` caps the number of tasks running at once; zero means one per
    /// available core.
    pub fn new(jobs: usize) -> Self {
        let jobs = match jobs {
            0 => std::thread::available_parallelism().map_or(1, NonZero::get),
            n => n,
        };

        Self {
            jobs,
            memory_mb: None,
        }
    }

    /// Total memory the running tasks may claim through their hints. Hints
    /// larger than the budget are clipped to it so such tasks still run, alone.
    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    fn claim(&self, hint: Option<u64>) -> u64 {
        let hint = hint.unwrap_or(0);
        self.memory_mb.map_or(hint, |budget| hint.min(budget))
    }

    fn admissible(&self, in_use: u64, claim: u64) -> bool {
        self.memory_mb.is_none_or(|budget| in_use + claim <= budget)
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Executes the task graph on a thread pool. Tasks are started as soon as
/// their dependencies have succeeded and there is a free job slot and enough
/// of the memory budget left.
///
/// When a task fails, nothing that depends on it is started, but unrelated
/// branches keep running until the graph is exhausted. The first failure is
/// then reported together with the number of tasks that never ran.
impl Executor for LocalExecutor {
    fn execute(&self, workflow: &Workflow) -> Result<Diagnostics, RunError> {
        let layout = workflow.layout();
        let plan = workflow.blueprint();
        let graph = &plan.graph;

        layout.create_dirs()?;

        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for edge in graph.raw_edges() {
            dependents
                .entry(edge.source())
                .or_default()
                .push(edge.target());
        }

        let mut dependency_counts: HashMap<NodeIndex, usize> = graph
            .node_indices()
            .map(|i| (i, graph.neighbors_directed(i, Direction::Incoming).count()))
            .collect();

        let total_tasks = graph.node_count();
        if total_tasks == 0 {
            return Ok(Diagnostics::default());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("svflow-worker-{i}"))
            .build()?;

        let root_span = tracing::span!(Level::INFO, "running_tasks");
        root_span.pb_set_length(total_tasks as u64);
        root_span.pb_set_style(&RUN_STYLE);
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        let mut ready: VecDeque<NodeIndex> = graph
            .node_indices()
            .filter(|i| dependency_counts[i] == 0)
            .collect();

        let mut execution_times = HashMap::new();
        let mut finished = 0;

        let failure = pool.scope(|s| {
            // (index, result, start, duration)
            let (result_sender, result_receiver) =
                channel::<(NodeIndex, Result<(), TaskError>, Instant, Duration)>();

            let spawn_task = |index: NodeIndex| {
                let task = &graph[index];
                let log = layout.task_log(&task.name);
                let sender = result_sender.clone();

                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "task", name = task.name.as_str());
                    span.pb_set_style(&TASK_STYLE);
                    span.pb_set_message(&format!("Running {}", task.name));
                    let _enter = span.enter();

                    tracing::debug!("{}", task.action);
                    let start_time = Instant::now();

                    // A panic inside one task only ever touches data owned by
                    // that task, so it is reported as an ordinary failure.
                    let result = match catch_unwind(AssertUnwindSafe(|| task.action.execute(&log))) {
                        Ok(result) => result,
                        Err(panic) => {
                            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                                s.to_string()
                            } else if let Some(s) = panic.downcast_ref::<String>() {
                                s.clone()
                            } else {
                                String::from("unknown payload")
                            };

                            Err(TaskError::Panic(msg))
                        }
                    };

                    let elapsed = start_time.elapsed();
                    let _ = sender.send((index, result, start_time, elapsed));
                });
            };

            let mut failure: Option<(NodeIndex, TaskError)> = None;
            let mut running = 0;
            let mut in_use = 0;

            loop {
                while running < self.jobs
                    && let Some(position) = ready
                        .iter()
                        .position(|&i| self.admissible(in_use, self.claim(graph[i].memory_mb)))
                {
                    if let Some(index) = ready.remove(position) {
                        in_use += self.claim(graph[index].memory_mb);
                        running += 1;
                        spawn_task(index);
                    }
                }

                if running == 0 {
                    break;
                }

                let Ok((index, result, start, duration)) = result_receiver.recv() else {
                    break;
                };

                running -= 1;
                in_use -= self.claim(graph[index].memory_mb);
                finished += 1;
                root_span.pb_inc(1);
                execution_times.insert(plan.id_of(index), TaskExecution { start, duration });

                match result {
                    Ok(()) => {
                        tracing::debug!(task = graph[index].name.as_str(), ?duration, "done");

                        for &next in dependents.get(&index).into_iter().flatten() {
                            if let Some(count) = dependency_counts.get_mut(&next) {
                                *count -= 1;
                                if *count == 0 {
                                    ready.push_back(next);
                                }
                            }
                        }
                    }
                    Err(error) => {
                        tracing::error!(task = graph[index].name.as_str(), "{error}");
                        if failure.is_none() {
                            failure = Some((index, error));
                        }
                    }
                }
            }

            failure
        });

        if let Some((index, source)) = failure {
            return Err(RunError::TaskFailure {
                task: graph[index].name.clone(),
                skipped: total_tasks - finished,
                source,
            });
        }

        tracing::info!("Workflow complete!");
        Ok(Diagnostics { execution_times })
    }
}

/// Logs every task in submission order without running anything or touching
/// the file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRun;

impl Executor for DryRun {
    fn execute(&self, workflow: &Workflow) -> Result<Diagnostics, RunError> {
        let plan = workflow.blueprint();

        for id in plan.ids() {
            let task = plan.get(id);
            let dependencies: Vec<_> = plan
                .dependencies(id)
                .into_iter()
                .map(|dep| plan.get(dep).name())
                .collect();

            tracing::info!(
                task = task.name(),
                after = ?dependencies,
                memory_mb = task.memory_mb(),
                "{}",
                task.action()
            );
        }

        Ok(Diagnostics::default())
    }
}
