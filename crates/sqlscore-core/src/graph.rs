use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{GraphError, Result, TaskError};
use crate::scheduler::{ExecutionReport, TaskInputs, TaskOutput};

/// Boxed task body: named inputs in, type-erased payload out.
pub type Executable =
    Arc<dyn Fn(&TaskInputs) -> std::result::Result<TaskOutput, TaskError> + Send + Sync>;

/// A named unit of work with explicitly declared dependencies.
///
/// Nodes are assembled with the builder methods and become immutable once
/// handed to a [`TaskGraph`].
#[derive(Clone)]
pub struct TaskNode {
    pub(crate) name: String,
    pub(crate) executable: Executable,
    pub(crate) depends_on: Vec<String>,
    pub(crate) description: Option<String>,
}

impl TaskNode {
    /// Wrap a typed task body. The returned payload is shared with dependents
    /// under this task's name.
    pub fn new<F, T, E>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TaskInputs) -> std::result::Result<T, E> + Send + Sync + 'static,
        T: Send + Sync + 'static,
        E: Into<TaskError>,
    {
        let executable: Executable = Arc::new(move |inputs: &TaskInputs| {
            body(inputs)
                .map(|value| Arc::new(value) as TaskOutput)
                .map_err(Into::into)
        });
        Self {
            name: name.into(),
            executable,
            depends_on: Vec::new(),
            description: None,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Static and (optionally) runtime information about one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub description: Option<String>,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Directed acyclic graph of tasks, stored as a node list plus a name index.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    name: String,
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Assemble a graph from nodes declared in any order.
    ///
    /// Only duplicate names are rejected here; unknown dependencies and
    /// cycles are reported by [`TaskGraph::validate`].
    pub fn from_nodes(name: impl Into<String>, nodes: Vec<TaskNode>) -> Result<Self> {
        let mut graph = Self::new(name);
        for node in nodes {
            graph.insert(node)?;
        }
        Ok(graph)
    }

    /// Register a task. Every dependency must already be registered.
    pub fn add_task(&mut self, node: TaskNode) -> Result<()> {
        if self.index.contains_key(&node.name) {
            return Err(GraphError::DuplicateTask(node.name));
        }
        if let Some(missing) = node
            .depends_on
            .iter()
            .find(|dependency| !self.index.contains_key(*dependency))
        {
            return Err(GraphError::UnknownDependency {
                task: node.name.clone(),
                dependency: missing.clone(),
            });
        }
        tracing::debug!(
            task = %node.name,
            dependencies = node.depends_on.len(),
            "task registered"
        );
        self.insert(node)
    }

    fn insert(&mut self, node: TaskNode) -> Result<()> {
        if self.index.contains_key(&node.name) {
            return Err(GraphError::DuplicateTask(node.name));
        }
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, name: &str) -> Option<&TaskNode> {
        self.index.get(name).map(|idx| &self.nodes[*idx])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|node| node.depends_on.len()).sum()
    }

    /// Tasks that list `name` as a dependency, in registration order.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| node.depends_on.iter().any(|dep| dep == name))
            .map(|node| node.name.as_str())
            .collect()
    }

    /// Check that every dependency resolves and that the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            if let Some(missing) = node
                .depends_on
                .iter()
                .find(|dependency| !self.index.contains_key(*dependency))
            {
                return Err(GraphError::UnknownDependency {
                    task: node.name.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        if let Some(path) = self.find_cycle() {
            tracing::error!(graph = %self.name, cycle = %path.join(" -> "), "graph contains a cycle");
            return Err(GraphError::Cycle { path });
        }

        Ok(())
    }

    /// Topological order (Kahn). Independent tasks keep registration order.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        self.validate()?;

        let mut indegree: Vec<usize> = self
            .nodes
            .iter()
            .map(|node| node.depends_on.len())
            .collect();
        let dependents = self.dependent_indices();

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter_map(|(idx, count)| (*count == 0).then_some(idx))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = ready.pop_first() {
            order.push(self.nodes[idx].name.clone());
            for &target in &dependents[idx] {
                indegree[target] = indegree[target].saturating_sub(1);
                if indegree[target] == 0 {
                    ready.insert(target);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let path = self.find_cycle().unwrap_or_default();
            return Err(GraphError::Cycle { path });
        }
        Ok(order)
    }

    pub fn task_info(&self, name: &str, report: Option<&ExecutionReport>) -> Result<TaskInfo> {
        let node = self
            .node(name)
            .ok_or_else(|| GraphError::UnknownTask(name.to_string()))?;
        let result = report.and_then(|report| report.result(name));

        Ok(TaskInfo {
            name: node.name.clone(),
            description: node.description.clone(),
            dependencies: node.depends_on.clone(),
            dependents: self
                .dependents(name)
                .into_iter()
                .map(str::to_string)
                .collect(),
            executed: result.is_some(),
            success: result.map(|result| result.success),
            duration_ms: result.map(|result| result.duration.as_secs_f64() * 1000.0),
            error: result
                .and_then(|result| result.error.as_ref())
                .map(ToString::to_string),
        })
    }

    /// Edges in execution direction: `dependents[i]` lists nodes waiting on `i`.
    fn dependent_indices(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            for dependency in &node.depends_on {
                if let Some(&dep_idx) = self.index.get(dependency) {
                    dependents[dep_idx].push(idx);
                }
            }
        }
        dependents
    }

    /// Depth-first search along dependency edges; returns the first cycle
    /// found as a closed path (`a -> b -> a`).
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();
        for start in 0..self.nodes.len() {
            if marks[start] == Mark::Unvisited {
                if let Some(cycle) = self.visit(start, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(&self, idx: usize, marks: &mut [Mark], stack: &mut Vec<usize>) -> Option<Vec<String>> {
        marks[idx] = Mark::InProgress;
        stack.push(idx);

        for dependency in &self.nodes[idx].depends_on {
            let Some(&dep_idx) = self.index.get(dependency) else {
                continue;
            };
            match marks[dep_idx] {
                Mark::InProgress => {
                    let start = stack.iter().position(|&item| item == dep_idx)?;
                    let mut path: Vec<String> = stack[start..]
                        .iter()
                        .map(|&item| self.nodes[item].name.clone())
                        .collect();
                    path.push(self.nodes[dep_idx].name.clone());
                    return Some(path);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(dep_idx, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[idx] = Mark::Done;
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> TaskNode {
        TaskNode::new(name, |_: &TaskInputs| Ok::<_, TaskError>(()))
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut graph = TaskGraph::new("test");
        graph.add_task(noop("load")).unwrap();
        let err = graph.add_task(noop("load")).unwrap_err();
        assert_eq!(err, GraphError::DuplicateTask("load".to_string()));
    }

    #[test]
    fn rejects_forward_references_at_registration() {
        let mut graph = TaskGraph::new("test");
        let err = graph
            .add_task(noop("aggregate").depends_on(["evaluate"]))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                task: "aggregate".to_string(),
                dependency: "evaluate".to_string(),
            }
        );
        assert!(graph.is_empty());
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let mut graph = TaskGraph::new("test");
        graph.add_task(noop("config")).unwrap();
        graph.add_task(noop("dataset")).unwrap();
        graph
            .add_task(noop("metrics").depends_on(["config"]))
            .unwrap();
        graph
            .add_task(noop("evaluate").depends_on(["dataset", "metrics"]))
            .unwrap();
        graph
            .add_task(noop("report").depends_on(["evaluate"]))
            .unwrap();

        let order = graph.execution_order().expect("acyclic graph");
        assert_eq!(order.len(), 5);
        let position = |name: &str| order.iter().position(|item| item == name).unwrap();
        assert!(position("config") < position("metrics"));
        assert!(position("dataset") < position("evaluate"));
        assert!(position("metrics") < position("evaluate"));
        assert!(position("evaluate") < position("report"));
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn validate_reports_a_concrete_cycle() {
        let graph = TaskGraph::from_nodes(
            "cyclic",
            vec![
                noop("a").depends_on(["c"]),
                noop("b").depends_on(["a"]),
                noop("c").depends_on(["b"]),
                noop("d"),
            ],
        )
        .unwrap();

        let err = graph.validate().unwrap_err();
        let GraphError::Cycle { path } = err else {
            panic!("expected cycle error");
        };
        assert_eq!(path.first(), path.last());
        assert_eq!(path.len(), 4);
        for name in ["a", "b", "c"] {
            assert!(path.iter().any(|item| item == name));
        }
        assert!(graph.execution_order().is_err());
    }

    #[test]
    fn validate_reports_unknown_dependencies_from_declared_nodes() {
        let graph =
            TaskGraph::from_nodes("loose", vec![noop("report").depends_on(["missing"])]).unwrap();
        assert!(matches!(
            graph.validate(),
            Err(GraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn from_nodes_accepts_out_of_order_declarations() {
        let graph = TaskGraph::from_nodes(
            "declared",
            vec![noop("report").depends_on(["load"]), noop("load")],
        )
        .unwrap();
        assert_eq!(graph.execution_order().unwrap(), vec!["load", "report"]);
    }

    #[test]
    fn task_info_lists_dependents() {
        let mut graph = TaskGraph::new("test");
        graph.add_task(noop("load").describe("load data")).unwrap();
        graph.add_task(noop("score").depends_on(["load"])).unwrap();

        let info = graph.task_info("load", None).unwrap();
        assert_eq!(info.description.as_deref(), Some("load data"));
        assert_eq!(info.dependents, vec!["score".to_string()]);
        assert!(!info.executed);
        assert!(graph.task_info("unknown", None).is_err());
    }
}
