use crate::case::CaseState;
use crate::orchestration::error::EngineError;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub type RoutePredicate = fn(&CaseState) -> bool;

/// Named predicate guarding an edge.
#[derive(Clone, Copy)]
pub struct Guard {
    label: &'static str,
    predicate: RoutePredicate,
}

impl Guard {
    pub fn new(label: &'static str, predicate: RoutePredicate) -> Self {
        Self { label, predicate }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn matches(&self, state: &CaseState) -> bool {
        (self.predicate)(state)
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Guard").field(&self.label).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Normal { step: String },
    ApprovalGate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNode {
    pub id: String,
    pub kind: NodeKind,
}

impl StepNode {
    pub fn step(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Normal { step } => Some(step),
            NodeKind::ApprovalGate => None,
        }
    }

    pub fn is_gate(&self) -> bool {
        matches!(self.kind, NodeKind::ApprovalGate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Node(usize),
    Terminal,
}

#[derive(Debug, Clone)]
pub struct Edge {
    guard: Option<Guard>,
    target_id: String,
    target: Target,
}

impl Edge {
    pub fn guard(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn is_fallback(&self) -> bool {
        self.guard.is_none()
    }
}

/// Where routing leads after a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next<'a> {
    Node(&'a StepNode),
    Terminal(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("workflow `{workflow}` has no start node")]
    MissingStart { workflow: String },
    #[error("workflow `{workflow}` starts at unknown node `{start}`")]
    UnknownStart { workflow: String, start: String },
    #[error("workflow `{workflow}` has no terminal")]
    NoTerminal { workflow: String },
    #[error("workflow `{workflow}` declares `{id}` more than once")]
    DuplicateNode { workflow: String, id: String },
    #[error("workflow `{workflow}` has an edge from unknown node `{from}`")]
    UnknownSource { workflow: String, from: String },
    #[error("workflow `{workflow}` routes `{from}` to unknown node `{target}`")]
    UnknownTarget {
        workflow: String,
        from: String,
        target: String,
    },
    #[error("workflow `{workflow}` node `{node}` has no outgoing edges")]
    NoEdges { workflow: String, node: String },
    #[error("workflow `{workflow}` node `{node}` has no unconditional fallback edge")]
    MissingFallback { workflow: String, node: String },
    #[error("workflow `{workflow}` node `{node}` declares edges after its fallback")]
    EdgeAfterFallback { workflow: String, node: String },
    #[error("workflow `{workflow}` node `{node}` is unreachable from the start")]
    UnreachableNode { workflow: String, node: String },
}

/// Immutable workflow graph. Nodes live in an arena indexed by id; edges of
/// a node are evaluated in declaration order and the last one is always an
/// unguarded fallback.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    id: String,
    start: usize,
    nodes: Vec<StepNode>,
    index: BTreeMap<String, usize>,
    terminals: BTreeSet<String>,
    edges: Vec<Vec<Edge>>,
}

impl WorkflowDefinition {
    pub fn builder(id: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder::new(id.into())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start(&self) -> &StepNode {
        &self.nodes[self.start]
    }

    pub fn node(&self, id: &str) -> Option<&StepNode> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    pub fn terminals(&self) -> &BTreeSet<String> {
        &self.terminals
    }

    pub fn is_terminal(&self, id: &str) -> bool {
        self.terminals.contains(id)
    }

    pub fn edges(&self, node: &str) -> &[Edge] {
        match self.index.get(node) {
            Some(&idx) => &self.edges[idx],
            None => &[],
        }
    }

    /// Step names referenced by normal nodes.
    pub fn step_names(&self) -> BTreeSet<&str> {
        self.nodes.iter().filter_map(StepNode::step).collect()
    }

    /// First matching edge out of `from` for `state`.
    pub fn next(&self, from: &str, state: &CaseState) -> Result<Next<'_>, EngineError> {
        let routing_error = || EngineError::Routing {
            workflow: self.id.clone(),
            node: from.to_string(),
        };
        let idx = *self.index.get(from).ok_or_else(routing_error)?;
        let edge = self.edges[idx]
            .iter()
            .find(|edge| edge.guard.map_or(true, |guard| guard.matches(state)))
            .ok_or_else(routing_error)?;
        Ok(match edge.target {
            Target::Node(target) => Next::Node(&self.nodes[target]),
            Target::Terminal => Next::Terminal(&edge.target_id),
        })
    }
}

struct PendingEdge {
    source: String,
    guard: Option<Guard>,
    target: String,
}

pub struct WorkflowDefinitionBuilder {
    id: String,
    start: Option<String>,
    nodes: Vec<StepNode>,
    terminals: Vec<String>,
    edges: Vec<PendingEdge>,
}

impl WorkflowDefinitionBuilder {
    fn new(id: String) -> Self {
        Self {
            id,
            start: None,
            nodes: Vec::new(),
            terminals: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn start(mut self, node: impl Into<String>) -> Self {
        self.start = Some(node.into());
        self
    }

    pub fn step(mut self, id: impl Into<String>, step: impl Into<String>) -> Self {
        self.nodes.push(StepNode {
            id: id.into(),
            kind: NodeKind::Normal { step: step.into() },
        });
        self
    }

    pub fn gate(mut self, id: impl Into<String>) -> Self {
        self.nodes.push(StepNode {
            id: id.into(),
            kind: NodeKind::ApprovalGate,
        });
        self
    }

    pub fn terminal(mut self, id: impl Into<String>) -> Self {
        self.terminals.push(id.into());
        self
    }

    /// Unconditional edge. Also serves as the fallback of a branching node.
    pub fn edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(PendingEdge {
            source: source.into(),
            guard: None,
            target: target.into(),
        });
        self
    }

    pub fn edge_when(
        mut self,
        source: impl Into<String>,
        label: &'static str,
        predicate: RoutePredicate,
        target: impl Into<String>,
    ) -> Self {
        self.edges.push(PendingEdge {
            source: source.into(),
            guard: Some(Guard::new(label, predicate)),
            target: target.into(),
        });
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        let workflow = self.id;

        let mut index = BTreeMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), idx).is_some() {
                return Err(DefinitionError::DuplicateNode {
                    workflow,
                    id: node.id.clone(),
                });
            }
        }
        let mut terminals = BTreeSet::new();
        for terminal in self.terminals {
            if index.contains_key(&terminal) || !terminals.insert(terminal.clone()) {
                return Err(DefinitionError::DuplicateNode {
                    workflow,
                    id: terminal,
                });
            }
        }
        if terminals.is_empty() {
            return Err(DefinitionError::NoTerminal { workflow });
        }

        let Some(start_id) = self.start else {
            return Err(DefinitionError::MissingStart { workflow });
        };
        let Some(&start) = index.get(&start_id) else {
            return Err(DefinitionError::UnknownStart {
                workflow,
                start: start_id,
            });
        };

        let mut edges: Vec<Vec<Edge>> = vec![Vec::new(); self.nodes.len()];
        for pending in self.edges {
            let Some(&source) = index.get(&pending.source) else {
                return Err(DefinitionError::UnknownSource {
                    workflow,
                    from: pending.source,
                });
            };
            let target = if let Some(&target) = index.get(&pending.target) {
                Target::Node(target)
            } else if terminals.contains(&pending.target) {
                Target::Terminal
            } else {
                return Err(DefinitionError::UnknownTarget {
                    workflow,
                    from: pending.source,
                    target: pending.target,
                });
            };
            if edges[source].last().is_some_and(Edge::is_fallback) {
                return Err(DefinitionError::EdgeAfterFallback {
                    workflow,
                    node: pending.source,
                });
            }
            edges[source].push(Edge {
                guard: pending.guard,
                target_id: pending.target,
                target,
            });
        }

        for (node, out) in self.nodes.iter().zip(&edges) {
            match out.last() {
                None => {
                    return Err(DefinitionError::NoEdges {
                        workflow,
                        node: node.id.clone(),
                    })
                }
                Some(last) if !last.is_fallback() => {
                    return Err(DefinitionError::MissingFallback {
                        workflow,
                        node: node.id.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        while let Some(idx) = queue.pop_front() {
            for edge in &edges[idx] {
                if let Target::Node(next) = edge.target {
                    if !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        if let Some(unreachable) = seen.iter().position(|reached| !reached) {
            return Err(DefinitionError::UnreachableNode {
                workflow,
                node: self.nodes[unreachable].id.clone(),
            });
        }

        Ok(WorkflowDefinition {
            id: workflow,
            start,
            nodes: self.nodes,
            index,
            terminals,
            edges,
        })
    }
}
