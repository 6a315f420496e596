//! The static stage dependency graph.
//!
//! Dependencies are data: an explicit upstream adjacency map, the derived
//! downstream map, and a pure [`StageGraph::closure`] over them.

use crate::core::StageId;
use crate::errors::GraphError;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

static EMPTY: BTreeSet<StageId> = BTreeSet::new();

/// A directed acyclic graph over [`StageId`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGraph {
    upstream: BTreeMap<StageId, BTreeSet<StageId>>,
    downstream: BTreeMap<StageId, BTreeSet<StageId>>,
    execution_order: Vec<StageId>,
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::standard()
    }
}

impl StageGraph {
    /// Returns the standard graph.
    ///
    /// design ← requirements; backend ← requirements, design;
    /// frontend ← requirements, design, backend; verify ← all.
    #[must_use]
    pub fn standard() -> Self {
        use StageId::{Backend, Design, Frontend, Requirements, Verify};

        let upstream = BTreeMap::from([
            (Requirements, BTreeSet::new()),
            (Design, BTreeSet::from([Requirements])),
            (Backend, BTreeSet::from([Requirements, Design])),
            (Frontend, BTreeSet::from([Requirements, Design, Backend])),
            (Verify, BTreeSet::from([Requirements, Design, Backend, Frontend])),
        ]);
        Self::build(upstream)
    }

    /// Builds a graph from an upstream map after validating it.
    ///
    /// Every stage must be declared, the map must be acyclic, and the verify
    /// stage must consume every other stage while feeding none.
    pub fn from_upstream(upstream: BTreeMap<StageId, BTreeSet<StageId>>) -> Result<Self, GraphError> {
        for stage in StageId::ALL {
            if !upstream.contains_key(&stage) {
                return Err(GraphError::MissingStage(stage.to_string()));
            }
        }

        if let Some(cycle) = find_cycle(&upstream) {
            return Err(GraphError::CycleDetected(
                cycle.into_iter().map(|s| s.to_string()).collect(),
            ));
        }

        for (stage, deps) in &upstream {
            if deps.contains(&StageId::Verify) {
                return Err(GraphError::InvalidVerify(format!("'{stage}' depends on verify")));
            }
        }
        let verify_deps = upstream.get(&StageId::Verify).unwrap_or(&EMPTY);
        if let Some(missing) = StageId::ALL
            .into_iter()
            .find(|s| !s.is_verify() && !verify_deps.contains(s))
        {
            return Err(GraphError::InvalidVerify(format!("verify does not consume '{missing}'")));
        }

        Ok(Self::build(upstream))
    }

    fn build(upstream: BTreeMap<StageId, BTreeSet<StageId>>) -> Self {
        let mut downstream: BTreeMap<StageId, BTreeSet<StageId>> =
            StageId::ALL.into_iter().map(|s| (s, BTreeSet::new())).collect();
        for (&stage, deps) in &upstream {
            if stage.is_verify() {
                continue;
            }
            for dep in deps {
                downstream.entry(*dep).or_default().insert(stage);
            }
        }

        let execution_order = topological_sort(&upstream);
        Self {
            upstream,
            downstream,
            execution_order,
        }
    }

    /// Returns the stages whose output `stage` consumes.
    #[must_use]
    pub fn upstream(&self, stage: StageId) -> &BTreeSet<StageId> {
        self.upstream.get(&stage).unwrap_or(&EMPTY)
    }

    /// Returns the non-verify stages invalidated when `stage` reruns.
    #[must_use]
    pub fn downstream(&self, stage: StageId) -> &BTreeSet<StageId> {
        self.downstream.get(&stage).unwrap_or(&EMPTY)
    }

    /// Returns every stage in dependency order.
    #[must_use]
    pub fn execution_order(&self) -> &[StageId] {
        &self.execution_order
    }

    /// Returns the non-verify stages in dependency order.
    pub fn build_order(&self) -> impl Iterator<Item = StageId> + '_ {
        self.execution_order.iter().copied().filter(|s| !s.is_verify())
    }

    /// Returns the members of `stages` in dependency order.
    #[must_use]
    pub fn ordered(&self, stages: &BTreeSet<StageId>) -> Vec<StageId> {
        self.execution_order
            .iter()
            .copied()
            .filter(|s| stages.contains(s))
            .collect()
    }

    /// Returns `requested` plus everything transitively downstream of it.
    ///
    /// Idempotent and monotonic; `closure(∅) = ∅`.
    #[must_use]
    pub fn closure(&self, requested: &BTreeSet<StageId>) -> BTreeSet<StageId> {
        let mut closed = requested.clone();
        let mut queue: VecDeque<StageId> = requested.iter().copied().collect();

        while let Some(stage) = queue.pop_front() {
            for &next in self.downstream(stage) {
                if closed.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        closed
    }
}

fn topological_sort(upstream: &BTreeMap<StageId, BTreeSet<StageId>>) -> Vec<StageId> {
    fn visit(
        node: StageId,
        upstream: &BTreeMap<StageId, BTreeSet<StageId>>,
        visited: &mut BTreeSet<StageId>,
        result: &mut Vec<StageId>,
    ) {
        if !visited.insert(node) {
            return;
        }
        if let Some(deps) = upstream.get(&node) {
            for &dep in deps {
                visit(dep, upstream, visited, result);
            }
        }
        result.push(node);
    }

    let mut result = Vec::new();
    let mut visited = BTreeSet::new();
    // Declaration order keeps the result deterministic.
    for stage in StageId::ALL {
        visit(stage, upstream, &mut visited, &mut result);
    }
    result
}

fn find_cycle(upstream: &BTreeMap<StageId, BTreeSet<StageId>>) -> Option<Vec<StageId>> {
    fn visit(
        node: StageId,
        upstream: &BTreeMap<StageId, BTreeSet<StageId>>,
        done: &mut BTreeSet<StageId>,
        path: &mut Vec<StageId>,
    ) -> Option<Vec<StageId>> {
        if let Some(pos) = path.iter().position(|&s| s == node) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if done.contains(&node) {
            return None;
        }

        path.push(node);
        if let Some(deps) = upstream.get(&node) {
            for &dep in deps {
                if let Some(cycle) = visit(dep, upstream, done, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    let mut done = BTreeSet::new();
    StageId::ALL
        .into_iter()
        .find_map(|stage| visit(stage, upstream, &mut done, &mut Vec::new()))
}
