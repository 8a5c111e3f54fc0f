//! The in-progress selection graph.
//!
//! Records which candidates the ongoing resolution pass has already
//! committed to, with edges from each requesting package to the candidate
//! chosen for one of its atoms. The disjunction resolver consults it to
//! prefer branches that are already part of the plan.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use hearth_core::atom::Atom;
use hearth_core::candidate::Candidate;
use hearth_core::matching::match_from_list;

/// A directed graph of selected candidates. Nodes are deduplicated by
/// candidate key; edges carry the atom that pulled the child in.
pub struct SelectionGraph {
    graph: DiGraph<Arc<Candidate>, Atom>,
    index: HashMap<String, NodeIndex>,
    by_cp: HashMap<String, Vec<NodeIndex>>,
}

impl SelectionGraph {
    pub fn new() -> Self {
        SelectionGraph {
            graph: DiGraph::new(),
            index: HashMap::new(),
            by_cp: HashMap::new(),
        }
    }

    /// Add or retrieve a candidate node.
    pub fn add(&mut self, candidate: Arc<Candidate>) -> NodeIndex {
        let key = candidate.key();
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let cp = candidate.cpv.cp().to_string();
        let idx = self.graph.add_node(candidate);
        self.index.insert(key, idx);
        self.by_cp.entry(cp).or_default().push(idx);
        idx
    }

    /// Record that `parent` pulled `child` in through `atom`.
    pub fn add_edge(&mut self, parent: NodeIndex, child: NodeIndex, atom: Atom) {
        if !self.graph.edges(parent).any(|e| e.target() == child) {
            self.graph.add_edge(parent, child, atom);
        }
    }

    pub fn contains(&self, candidate: &Candidate) -> bool {
        self.index.contains_key(&candidate.key())
    }

    /// Selected candidates matching `atom`.
    pub fn match_atom(&self, atom: &Atom) -> Vec<Arc<Candidate>> {
        let nodes = match self.by_cp.get(atom.cp()) {
            Some(nodes) => nodes,
            None => return Vec::new(),
        };
        let candidates: Vec<Arc<Candidate>> =
            nodes.iter().map(|&idx| self.graph[idx].clone()).collect();
        match_from_list(atom, &candidates)
    }

    /// The parents that pulled a candidate in, with the atoms they used.
    pub fn parents_of(&self, candidate: &Candidate) -> Vec<(Arc<Candidate>, Atom)> {
        let idx = match self.index.get(&candidate.key()) {
            Some(&idx) => idx,
            None => return Vec::new(),
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (self.graph[e.source()].clone(), e.weight().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl Default for SelectionGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::cpv::Cpv;

    fn cand(cpv: &str) -> Arc<Candidate> {
        Arc::new(Candidate::new(Cpv::parse(cpv).unwrap()))
    }

    #[test]
    fn dedupes_by_key() {
        let mut graph = SelectionGraph::new();
        let a = graph.add(cand("cat/pkg-1.0"));
        let b = graph.add(cand("cat/pkg-1.0"));
        assert_eq!(a, b);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn matches_selected_candidates() {
        let mut graph = SelectionGraph::new();
        graph.add(cand("cat/pkg-1.0"));
        graph.add(cand("cat/pkg-2.0"));

        let atom = Atom::new(">=cat/pkg-2.0").unwrap();
        assert_eq!(graph.match_atom(&atom).len(), 1);
        let atom = Atom::new("cat/other").unwrap();
        assert!(graph.match_atom(&atom).is_empty());
    }

    #[test]
    fn records_parent_edges() {
        let mut graph = SelectionGraph::new();
        let parent = graph.add(cand("app/tool-1.0"));
        let child_candidate = cand("cat/pkg-1.0");
        let child = graph.add(child_candidate.clone());
        graph.add_edge(parent, child, Atom::new("cat/pkg").unwrap());

        let parents = graph.parents_of(&child_candidate);
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].0.to_string(), "app/tool-1.0");
        assert_eq!(parents[0].1.to_string(), "cat/pkg");
    }
}
