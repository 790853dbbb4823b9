use std::collections::BTreeSet;
use std::collections::btree_set;

use petgraph::graph::NodeIndex;

/// A reference to a task in the plan.
///
/// A `TaskId` is a lightweight, copyable token handed out when a task is
/// added to a [`Blueprint`](crate::Blueprint). It is only ever used to name
/// dependencies of tasks added later, so a task can never depend on itself or
/// on anything that comes after it.
///
/// Every id carries a tag of the plan that issued it, so an id from another
/// plan is rejected instead of naming an unrelated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub(crate) plan: u32,
    pub(crate) node: NodeIndex,
}

impl TaskId {
    /// Position of the task in insertion order.
    pub fn index(&self) -> usize {
        self.node.index()
    }
}

/// The set of tasks a later stage must wait for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontier(BTreeSet<TaskId>);

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TaskId) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<TaskId> for Frontier {
    fn from_iter<T: IntoIterator<Item = TaskId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<TaskId> for Frontier {
    fn extend<T: IntoIterator<Item = TaskId>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Frontier {
    type Item = TaskId;
    type IntoIter = btree_set::IntoIter<TaskId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Frontier {
    type Item = TaskId;
    type IntoIter = std::iter::Copied<btree_set::Iter<'a, TaskId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

// Things that can be waited on
pub trait Dependencies {
    fn dependencies(&self) -> Vec<TaskId>;
}

impl Dependencies for () {
    fn dependencies(&self) -> Vec<TaskId> {
        Vec::new()
    }
}

impl Dependencies for TaskId {
    fn dependencies(&self) -> Vec<TaskId> {
        vec![*self]
    }
}

impl Dependencies for Option<TaskId> {
    fn dependencies(&self) -> Vec<TaskId> {
        self.iter().copied().collect()
    }
}

impl Dependencies for Frontier {
    fn dependencies(&self) -> Vec<TaskId> {
        self.iter().collect()
    }
}

impl Dependencies for [TaskId] {
    fn dependencies(&self) -> Vec<TaskId> {
        self.to_vec()
    }
}

impl Dependencies for Vec<TaskId> {
    fn dependencies(&self) -> Vec<TaskId> {
        self.clone()
    }
}

impl<D> Dependencies for &D
where
    D: Dependencies + ?Sized,
{
    fn dependencies(&self) -> Vec<TaskId> {
        (**self).dependencies()
    }
}

macro_rules! impl_deps {
    ($($D:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($D),*> Dependencies for ($($D,)*)
        where
            $($D: Dependencies),* {
            fn dependencies(&self) -> Vec<TaskId> {
                let ($($D,)*) = self;
                let mut all = Vec::new();
                $(all.extend($D.dependencies());)*
                all
            }
        }
    };
}

impl_deps!(A);
impl_deps!(A, B);
impl_deps!(A, B, C);
impl_deps!(A, B, C, D);
impl_deps!(A, B, C, D, E);
impl_deps!(A, B, C, D, E, F);
