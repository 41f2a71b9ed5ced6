//! Unbalanced three-phase feeder data for the LinDist3Flow sweep.
//!
//! Impedances and loads are per-unit on the feeder base. Phase order is
//! always `a, b, c`; a missing phase is represented by zero rows.

use crate::error::TopologyError;
use crate::topology::{self, Edge, RadialTree};
use serde::{Deserialize, Serialize};

pub type PhaseMatrix = [[f64; 3]; 3];
pub type PhaseVector = [f64; 3];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseLine {
    pub name: String,
    pub from: usize,
    pub to: usize,
    pub r: PhaseMatrix,
    pub x: PhaseMatrix,
}

/// Three-phase radial feeder; construct with [`ThreePhaseFeeder::new`] so
/// lines are oriented parent to child.
#[derive(Debug, Clone)]
pub struct ThreePhaseFeeder {
    nodes: Vec<String>,
    root: usize,
    lines: Vec<PhaseLine>,
    load_p: Vec<PhaseVector>,
    load_q: Vec<PhaseVector>,
    tree: RadialTree,
}

impl ThreePhaseFeeder {
    pub fn new(
        nodes: Vec<String>,
        root: usize,
        lines: Vec<PhaseLine>,
    ) -> Result<Self, TopologyError> {
        let edges: Vec<Edge<'_>> = lines
            .iter()
            .map(|l| Edge {
                a: l.from,
                b: l.to,
                name: &l.name,
            })
            .collect();
        let tree = topology::radial_tree(&nodes, root, &edges)?;

        let mut lines = lines;
        for (bus, edge) in tree.parent_edge.iter().enumerate() {
            if let (Some(edge), Some(parent)) = (edge, tree.parent[bus]) {
                let line = &mut lines[*edge];
                line.from = parent;
                line.to = bus;
            }
        }

        let n = nodes.len();
        Ok(Self {
            nodes,
            root,
            lines,
            load_p: vec![[0.0; 3]; n],
            load_q: vec![[0.0; 3]; n],
            tree,
        })
    }

    /// Add per-phase load (p.u., consumption positive) at `node`.
    pub fn add_load(&mut self, node: usize, p: PhaseVector, q: PhaseVector) {
        for ph in 0..3 {
            self.load_p[node][ph] += p[ph];
            self.load_q[node][ph] += q[ph];
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == name)
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn lines(&self) -> &[PhaseLine] {
        &self.lines
    }

    pub fn tree(&self) -> &RadialTree {
        &self.tree
    }

    pub fn load_p(&self, node: usize) -> PhaseVector {
        self.load_p[node]
    }

    pub fn load_q(&self, node: usize) -> PhaseVector {
        self.load_q[node]
    }

    /// Line feeding `node` from its parent.
    pub fn line_into(&self, node: usize) -> Option<&PhaseLine> {
        self.tree.parent_edge[node].map(|e| &self.lines[e])
    }
}
