use std::collections::{BTreeMap, BTreeSet, HashMap};

use flowforge_core::error::{FlowError, Result};
use flowforge_core::types::{WorkflowDefinition, WorkflowEdge, WorkflowNode};

/// Predecessor and successor sets for every node in a graph.
///
/// Built from a node list and edge list. Edges whose endpoints are not in
/// the node list are ignored; structural validation reports them separately.
/// Parallel edges between the same pair count once.
#[derive(Debug, Clone, Default)]
pub struct DependencyMap {
    predecessors: BTreeMap<String, BTreeSet<String>>,
    successors: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyMap {
    pub fn new(nodes: &[WorkflowNode], edges: &[WorkflowEdge]) -> Self {
        let mut predecessors: BTreeMap<String, BTreeSet<String>> = nodes
            .iter()
            .map(|n| (n.id.clone(), BTreeSet::new()))
            .collect();
        let mut successors = predecessors.clone();

        for edge in edges {
            if !predecessors.contains_key(&edge.source) || !predecessors.contains_key(&edge.target)
            {
                continue;
            }
            if let Some(preds) = predecessors.get_mut(&edge.target) {
                preds.insert(edge.source.clone());
            }
            if let Some(succs) = successors.get_mut(&edge.source) {
                succs.insert(edge.target.clone());
            }
        }

        Self {
            predecessors,
            successors,
        }
    }

    pub fn from_workflow(workflow: &WorkflowDefinition) -> Self {
        Self::new(&workflow.nodes, &workflow.edges)
    }

    pub fn len(&self) -> usize {
        self.predecessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predecessors.is_empty()
    }

    /// Direct predecessors of a node, sorted by id.
    pub fn predecessors(&self, id: &str) -> Vec<String> {
        self.predecessors
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct successors of a node, sorted by id.
    pub fn successors(&self, id: &str) -> Vec<String> {
        self.successors
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes with no predecessors, sorted by id.
    pub fn start_nodes(&self) -> Vec<String> {
        self.predecessors
            .iter()
            .filter(|(_, preds)| preds.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether a node has no outgoing edges.
    pub fn is_sink(&self, id: &str) -> bool {
        self.successors.get(id).map_or(false, BTreeSet::is_empty)
    }

    /// Predecessor lists keyed by node id, for progress reporting.
    pub fn dependencies(&self) -> BTreeMap<String, Vec<String>> {
        self.predecessors
            .iter()
            .map(|(id, preds)| (id.clone(), preds.iter().cloned().collect()))
            .collect()
    }

    /// Three-color depth-first search over every node, including nodes not
    /// reachable from any start node.
    pub fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<&str, Color> = self
            .successors
            .keys()
            .map(|id| (id.as_str(), Color::White))
            .collect();

        for root in self.successors.keys() {
            if color.get(root.as_str()) != Some(&Color::White) {
                continue;
            }

            // (node, its successors, index of the next successor to visit)
            let mut stack: Vec<(&str, Vec<&str>, usize)> = Vec::new();
            color.insert(root.as_str(), Color::Gray);
            stack.push((root.as_str(), self.successor_refs(root), 0));

            loop {
                let next = match stack.last_mut() {
                    None => break,
                    Some((_, succs, idx)) => {
                        let next = succs.get(*idx).copied();
                        *idx += 1;
                        next
                    }
                };

                match next {
                    Some(succ) => match color.get(succ).copied() {
                        Some(Color::Gray) => return true,
                        Some(Color::White) => {
                            color.insert(succ, Color::Gray);
                            stack.push((succ, self.successor_refs(succ), 0));
                        }
                        _ => {}
                    },
                    None => {
                        if let Some((done, _, _)) = stack.pop() {
                            color.insert(done, Color::Black);
                        }
                    }
                }
            }
        }

        false
    }

    fn successor_refs(&self, id: &str) -> Vec<&str> {
        self.successors
            .get(id)
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Kahn's algorithm with lexicographic tie-break.
    ///
    /// Fails with [`FlowError::CyclicGraph`] instead of returning a partial
    /// order when some nodes can never become ready.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut ready = self.ready_set();
        let mut order = Vec::with_capacity(self.len());
        while let Some(id) = ready.pop() {
            ready.complete(&id);
            order.push(id);
        }
        if order.len() < self.len() {
            return Err(FlowError::CyclicGraph);
        }
        Ok(order)
    }

    /// Iterative view: nodes become available once all their predecessors
    /// have completed.
    pub fn ready_set(&self) -> ReadySet<'_> {
        let pending: HashMap<String, usize> = self
            .predecessors
            .iter()
            .map(|(id, preds)| (id.clone(), preds.len()))
            .collect();
        let ready = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ReadySet {
            deps: self,
            pending,
            ready,
            taken: BTreeSet::new(),
        }
    }
}

/// Incremental ready-set over a [`DependencyMap`].
///
/// `pop` hands out the smallest eligible node id; `complete` releases its
/// successors. Draining it fully yields the topological order.
#[derive(Debug)]
pub struct ReadySet<'a> {
    deps: &'a DependencyMap,
    pending: HashMap<String, usize>,
    ready: BTreeSet<String>,
    taken: BTreeSet<String>,
}

impl ReadySet<'_> {
    /// Take the next eligible node, if any.
    pub fn pop(&mut self) -> Option<String> {
        let id = self.ready.pop_first()?;
        self.taken.insert(id.clone());
        Some(id)
    }

    /// Mark a taken node as executed, making successors eligible when their
    /// last predecessor completes.
    pub fn complete(&mut self, id: &str) {
        for succ in self.deps.successors(id) {
            if let Some(count) = self.pending.get_mut(&succ) {
                *count = count.saturating_sub(1);
                if *count == 0 && !self.taken.contains(&succ) {
                    self.ready.insert(succ);
                }
            }
        }
    }

    /// Nodes never taken, sorted by id.
    pub fn remaining(&self) -> Vec<String> {
        self.pending
            .keys()
            .filter(|id| !self.taken.contains(*id))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_exhausted(&self) -> bool {
        self.taken.len() == self.pending.len()
    }
}

/// Whether the workflow's edges contain a directed cycle.
pub fn has_cycle(workflow: &WorkflowDefinition) -> bool {
    DependencyMap::from_workflow(workflow).has_cycle()
}

/// Deterministic execution order for a workflow.
pub fn topological_order(workflow: &WorkflowDefinition) -> Result<Vec<String>> {
    DependencyMap::from_workflow(workflow).topological_order()
}
