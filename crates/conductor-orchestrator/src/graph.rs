use conductor_core::{AgentTask, Dependency, TaskId, ValidationError};
use std::collections::{HashMap, HashSet};

/// DFS colouring for cycle detection.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Agent tasks plus their dependency edges, validated to be a DAG.
///
/// Tasks live in an arena (`Vec`) and edges are stored as index lists, so
/// traversals never chase pointers. Built once per workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    tasks: Vec<AgentTask>,
    index: HashMap<TaskId, usize>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
}

impl WorkflowGraph {
    /// Build a graph from `tasks`, their own `dependencies` lists, and any
    /// extra `edges`.
    ///
    /// Fails with [`ValidationError::DuplicateTask`],
    /// [`ValidationError::UnknownDependency`], or
    /// [`ValidationError::CycleDetected`].
    pub fn build(tasks: Vec<AgentTask>, edges: &[Dependency]) -> Result<Self, ValidationError> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(ValidationError::DuplicateTask(task.id.clone()));
            }
        }

        let lookup = |task: &TaskId, dep: &TaskId| -> Result<usize, ValidationError> {
            index
                .get(dep)
                .copied()
                .ok_or_else(|| ValidationError::UnknownDependency {
                    task: task.clone(),
                    dependency: dep.clone(),
                })
        };

        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut predecessors = vec![Vec::new(); tasks.len()];
        let mut successors = vec![Vec::new(); tasks.len()];
        let mut add_edge = |from: usize, to: usize| {
            if seen.insert((from, to)) {
                successors[from].push(to);
                predecessors[to].push(from);
            }
        };

        for (i, task) in tasks.iter().enumerate() {
            for dep in &task.dependencies {
                add_edge(lookup(&task.id, dep)?, i);
            }
        }
        for edge in edges {
            let to = lookup(&edge.before, &edge.after)?;
            add_edge(lookup(&edge.after, &edge.before)?, to);
        }

        let graph = Self {
            tasks,
            index,
            predecessors,
            successors,
        };
        if let Some(path) = graph.detect_cycle() {
            return Err(ValidationError::CycleDetected { path });
        }
        Ok(graph)
    }

    /// Chain `tasks` in the given order: each task depends on the one before.
    pub fn chain(tasks: Vec<AgentTask>) -> Result<Self, ValidationError> {
        let edges: Vec<Dependency> = tasks
            .windows(2)
            .map(|w| Dependency::new(w[0].id.clone(), w[1].id.clone()))
            .collect();
        Self::build(tasks, &edges)
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in submission order.
    pub fn tasks(&self) -> &[AgentTask] {
        &self.tasks
    }

    /// Look up a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&AgentTask> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    /// Direct predecessors of `id`, in submission order.
    pub fn predecessors(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbours(id, &self.predecessors)
    }

    /// Direct successors of `id`, in submission order.
    pub fn successors(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbours(id, &self.successors)
    }

    fn neighbours<'a>(&'a self, id: &TaskId, adjacency: &'a [Vec<usize>]) -> Vec<&'a TaskId> {
        let Some(&i) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<usize> = adjacency[i].clone();
        out.sort_unstable();
        out.into_iter().map(|j| &self.tasks[j].id).collect()
    }

    /// Group tasks into ready batches (Kahn's algorithm, one level at a time).
    ///
    /// Batch `i` holds every task whose predecessors all lie in batches
    /// `< i`. Within a batch tasks keep submission order, though they are
    /// meant to run concurrently.
    pub fn topological_batches(&self) -> Vec<Vec<TaskId>> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut current: Vec<usize> = (0..self.tasks.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut batches = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for &i in &current {
                for &succ in &self.successors[i] {
                    in_degree[succ] -= 1;
                    if in_degree[succ] == 0 {
                        next.push(succ);
                    }
                }
            }
            next.sort_unstable();
            batches.push(current.iter().map(|&i| self.tasks[i].id.clone()).collect());
            current = next;
        }

        batches
    }

    /// Three-colour DFS over successor edges. Returns the cycle closed by the
    /// first back edge found, e.g. `[a, b, a]`.
    ///
    /// Iterative, with an explicit `(node, next successor)` stack, so chain
    /// depth is bounded by the heap rather than the thread stack.
    fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut colors = vec![Color::White; self.tasks.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.tasks.len() {
            if colors[start] != Color::White {
                continue;
            }
            colors[start] = Color::Gray;
            stack.push((start, 0));

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let Some(&next) = self.successors[node].get(frame.1) else {
                    colors[node] = Color::Black;
                    stack.pop();
                    continue;
                };
                frame.1 += 1;
                match colors[next] {
                    Color::Gray => {
                        // back edge = cycle
                        let pos = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                        let mut path: Vec<TaskId> = stack[pos..]
                            .iter()
                            .map(|&(n, _)| self.tasks[n].id.clone())
                            .collect();
                        path.push(self.tasks[next].id.clone());
                        return Some(path);
                    }
                    Color::White => {
                        colors[next] = Color::Gray;
                        stack.push((next, 0));
                    }
                    Color::Black => {}
                }
            }
        }
        None
    }
}
