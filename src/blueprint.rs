use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};
use serde::Serialize;

use crate::engine::{Action, Dependencies, Task, TaskId};
use crate::error::PlanError;

/// The plan of a workflow run.
///
/// `Blueprint` holds the task graph. Tasks are added through [`task`], which
/// returns a builder; finishing the builder with [`TaskDef::run`] hands back a
/// [`TaskId`] that later tasks use to declare what they wait for. Since a task
/// can only depend on ids that already exist, the graph is acyclic by
/// construction and insertion order is a topological order.
///
/// # Example
///
/// ```rust
/// use svflow::{Action, Blueprint, Invocation};
///
/// let mut plan = Blueprint::new();
/// let dir = plan.task("makeTmpDir").force_local().run(Action::MakeDir("tmp".into()))?;
/// plan.task("work").depends_on(dir).run(Invocation::new("true"))?;
/// assert_eq!(plan.len(), 2);
/// # Ok::<(), svflow::PlanError>(())
/// ```
///
/// [`task`]: Blueprint::task
#[derive(Debug)]
pub struct Blueprint {
    id: u32,
    pub(crate) graph: Graph<Task, ()>,
    names: HashMap<String, TaskId>,
}

static NEXT_PLAN: AtomicU32 = AtomicU32::new(1);

impl Blueprint {
    /// Creates a new, empty plan.
    pub fn new() -> Self {
        Self {
            id: NEXT_PLAN.fetch_add(1, Ordering::Relaxed),
            graph: Graph::new(),
            names: HashMap::new(),
        }
    }

    pub(crate) fn id_of(&self, node: NodeIndex) -> TaskId {
        TaskId {
            plan: self.id,
            node,
        }
    }

    /// Starts defining a task with a unique label.
    pub fn task(&mut self, name: impl Into<String>) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            dependencies: Vec::new(),
            memory_mb: None,
            force_local: false,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    fn add_task(&mut self, task: Task, dependencies: Vec<TaskId>) -> Result<TaskId, PlanError> {
        if self.names.contains_key(&task.name) {
            return Err(PlanError::DuplicateTask(task.name));
        }

        if let Some(unknown) = dependencies
            .iter()
            .find(|dep| dep.plan != self.id || dep.index() >= self.graph.node_count())
        {
            return Err(PlanError::UnknownDependency {
                task: task.name,
                dependency: unknown.index(),
            });
        }

        let name = task.name.clone();
        let node = self.graph.add_node(task);
        let id = self.id_of(node);

        let unique: HashSet<TaskId> = dependencies.into_iter().collect();
        let mut unique: Vec<_> = unique.into_iter().collect();
        unique.sort();

        for dep in unique {
            self.graph.add_edge(dep.node, id.node, ());
        }

        self.names.insert(name, id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All task ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.graph.node_indices().map(|node| self.id_of(node))
    }

    pub fn get(&self, id: TaskId) -> &Task {
        &self.graph[id.node]
    }

    pub fn find(&self, name: &str) -> Option<TaskId> {
        self.names.get(name).copied()
    }

    /// Direct dependencies of a task, sorted.
    pub fn dependencies(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks that directly wait for this one, sorted.
    pub fn dependents(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: TaskId, direction: Direction) -> Vec<TaskId> {
        let mut ids: Vec<_> = self
            .graph
            .neighbors_directed(id.node, direction)
            .map(|node| self.id_of(node))
            .collect();
        ids.sort();
        ids
    }

    /// Every (dependency, dependent) pair.
    pub fn edges(&self) -> impl Iterator<Item = (TaskId, TaskId)> + '_ {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| (self.id_of(edge.source()), self.id_of(edge.target())))
    }

    /// Every task that must finish before `id` may start.
    pub fn ancestors(&self, id: TaskId) -> HashSet<TaskId> {
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, id.node);
        let mut found = HashSet::new();

        while let Some(index) = dfs.next(reversed) {
            if index != id.node {
                found.insert(self.id_of(index));
            }
        }

        found
    }

    /// Checks that every directory removal runs after each task that reads or
    /// writes inside that directory.
    pub fn check_cleanup_order(&self) -> Result<(), CleanupViolation> {
        for remover in self.ids() {
            let Some(dir) = self.get(remover).action.removed_dir() else {
                continue;
            };

            let ancestors = self.ancestors(remover);
            let offender = self
                .ids()
                .filter(|&id| id != remover && !ancestors.contains(&id))
                .find(|&id| self.get(id).touches(dir));

            if let Some(offender) = offender {
                return Err(CleanupViolation {
                    cleanup: self.get(remover).name.clone(),
                    task: self.get(offender).name.clone(),
                    dir: dir.to_owned(),
                });
            }
        }

        Ok(())
    }

    /// Machine readable rendition of the plan.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let tasks: Vec<_> = self
            .ids()
            .map(|id| {
                let task = self.get(id);
                PlannedTask {
                    id: id.index(),
                    name: &task.name,
                    dependencies: self.dependencies(id).iter().map(TaskId::index).collect(),
                    memory_mb: task.memory_mb,
                    local: task.force_local,
                    command: task.action.to_string(),
                    action: &task.action,
                }
            })
            .collect();

        serde_json::to_string_pretty(&tasks)
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct PlannedTask<'a> {
    id: usize,
    name: &'a str,
    dependencies: Vec<usize>,
    memory_mb: Option<u64>,
    local: bool,
    command: String,
    action: &'a Action,
}

/// A task touching a directory that may already be gone when it runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task '{task}' uses {dir} but is not ordered before '{cleanup}'")]
pub struct CleanupViolation {
    pub cleanup: String,
    pub task: String,
    pub dir: Utf8PathBuf,
}

/// Builder returned by [`Blueprint::task`].
pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: String,
    dependencies: Vec<TaskId>,
    memory_mb: Option<u64>,
    force_local: bool,
    reads: Vec<Utf8PathBuf>,
    writes: Vec<Utf8PathBuf>,
}

impl<'a> TaskDef<'a> {
    pub fn depends_on(mut self, dependencies: impl Dependencies) -> Self {
        self.dependencies.extend(dependencies.dependencies());
        self
    }

    pub fn memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn force_local(mut self) -> Self {
        self.force_local = true;
        self
    }

    /// Declares files the task's programs read. Redirections and built-in
    /// file operations are picked up from the action itself.
    pub fn reads<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Utf8Path>,
    {
        self.reads
            .extend(paths.into_iter().map(|p| p.as_ref().to_owned()));
        self
    }

    pub fn writes<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Utf8Path>,
    {
        self.writes
            .extend(paths.into_iter().map(|p| p.as_ref().to_owned()));
        self
    }

    pub fn run(self, action: impl Into<Action>) -> Result<TaskId, PlanError> {
        let action = action.into();
        let mut reads = self.reads;
        let mut writes = self.writes;
        action.collect_io(&mut reads, &mut writes);

        let task = Task {
            name: self.name,
            action,
            memory_mb: self.memory_mb,
            force_local: self.force_local,
            reads,
            writes,
        };

        self.blueprint.add_task(task, self.dependencies)
    }
}

impl Display for Blueprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name.replace('"', "#quot;");
            write_node(f, index, &name, task.force_local)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

fn write_node(
    f: &mut Formatter<'_>,
    index: NodeIndex,
    name: &str,
    local: bool,
) -> std::fmt::Result {
    if local {
        writeln!(f, "    {:?}([\"{}\"])", index.index(), name)
    } else {
        writeln!(f, "    {:?}[\"{}\"]", index.index(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Invocation;

    #[test]
    fn test_insertion_order_is_topological() {
        let mut plan = Blueprint::new();
        let a = plan.task("a").run(Invocation::new("true")).unwrap();
        let b = plan.task("b").depends_on(a).run(Invocation::new("true")).unwrap();
        let c = plan.task("c").depends_on((a, b)).run(Invocation::new("true")).unwrap();

        for (source, target) in plan.edges() {
            assert!(source < target);
        }

        assert_eq!(plan.dependencies(c), vec![a, b]);
        assert_eq!(plan.dependents(a), vec![b, c]);
        assert_eq!(plan.ancestors(c), HashSet::from([a, b]));
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let mut plan = Blueprint::new();
        let a = plan.task("a").run(Invocation::new("true")).unwrap();
        let b = plan
            .task("b")
            .depends_on((a, a, vec![a]))
            .run(Invocation::new("true"))
            .unwrap();

        assert_eq!(plan.dependencies(b), vec![a]);
        assert_eq!(plan.edges().count(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut plan = Blueprint::new();
        plan.task("a").run(Invocation::new("true")).unwrap();

        let err = plan.task("a").run(Invocation::new("true")).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateTask(name) if name == "a"));
    }

    #[test]
    fn test_foreign_dependency_rejected() {
        let mut other = Blueprint::new();
        other.task("x").run(Invocation::new("true")).unwrap();
        let foreign = other.task("y").run(Invocation::new("true")).unwrap();

        let mut plan = Blueprint::new();
        let err = plan
            .task("a")
            .depends_on(foreign)
            .run(Invocation::new("true"))
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { dependency: 1, .. }));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_foreign_id_in_range_rejected() {
        let mut other = Blueprint::new();
        let foreign = other.task("x").run(Invocation::new("true")).unwrap();

        let mut plan = Blueprint::new();
        let a = plan.task("a").run(Invocation::new("true")).unwrap();
        plan.task("b").depends_on(a).run(Invocation::new("true")).unwrap();

        // same index as `a`, issued by another plan
        assert_eq!(foreign.index(), a.index());
        let err = plan
            .task("c")
            .depends_on((a, foreign))
            .run(Invocation::new("true"))
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { dependency: 0, .. }));
        assert_eq!(plan.len(), 2);
        assert!(plan.find("c").is_none());
    }

    #[test]
    fn test_cleanup_order() {
        let mut plan = Blueprint::new();
        let dir = plan.task("mk").run(Action::MakeDir("tmp".into())).unwrap();
        let work = plan
            .task("work")
            .depends_on(dir)
            .writes(["tmp/part.txt"])
            .run(Invocation::new("true"))
            .unwrap();
        plan.task("late")
            .depends_on(dir)
            .reads(["tmp/part.txt"])
            .run(Invocation::new("true"))
            .unwrap();
        plan.task("rm")
            .depends_on(work)
            .run(Action::RemoveDir("tmp".into()))
            .unwrap();

        let violation = plan.check_cleanup_order().unwrap_err();
        assert_eq!(violation.task, "late");
        assert_eq!(violation.cleanup, "rm");
    }

    #[test]
    fn test_mermaid() {
        let mut plan = Blueprint::new();
        let a = plan.task("mk").force_local().run(Action::MakeDir("d".into())).unwrap();
        plan.task("work").depends_on(a).run(Invocation::new("true")).unwrap();

        let text = plan.to_string();
        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("    0([\"mk\"])"));
        assert!(text.contains("    1[\"work\"]"));
        assert!(text.contains("    0 --> 1"));
    }

    #[test]
    fn test_mermaid_quotes() {
        let mut plan = Blueprint::new();
        plan.task(r#"say "hi""#).run(Invocation::new("true")).unwrap();

        let text = plan.to_string();
        assert!(text.contains("    0[\"say #quot;hi#quot;\"]"));
        assert!(!text.contains("\\\""));
    }

    #[test]
    fn test_json_export() {
        let mut plan = Blueprint::new();
        let a = plan.task("mk").run(Action::MakeDir("d".into())).unwrap();
        plan.task("work")
            .depends_on(a)
            .memory_mb(100)
            .run(Invocation::new("echo").arg("hi"))
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json[1]["name"], "work");
        assert_eq!(json[1]["dependencies"], serde_json::json!([0]));
        assert_eq!(json[1]["memory_mb"], 100);
        assert_eq!(json[1]["command"], "echo hi");
    }
}
