//! Radial-tree checks and orientation for feeder graphs.
//!
//! Feeder files list lines as unordered bus pairs. [`radial_tree`] loads them
//! into a petgraph `UnGraph`, rejects anything that is not a single tree
//! containing the slack, and returns the breadth-first orientation every
//! downstream algorithm relies on (parents before children).

use crate::error::TopologyError;
use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use std::collections::VecDeque;

/// Undirected edge between two bus indices, tagged with the line's name for
/// error reporting.
#[derive(Debug, Clone)]
pub struct Edge<'a> {
    pub a: usize,
    pub b: usize,
    pub name: &'a str,
}

/// Breadth-first orientation of a radial feeder.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialTree {
    /// Bus indices in BFS order starting at the slack.
    pub order: Vec<usize>,
    /// For each bus, the index of the edge to its parent (`None` at the slack).
    pub parent_edge: Vec<Option<usize>>,
    /// For each bus, its parent bus (`None` at the slack).
    pub parent: Vec<Option<usize>>,
    /// Number of lines between each bus and the slack.
    pub depth: Vec<usize>,
    entry: Vec<usize>,
    exit: Vec<usize>,
}

impl RadialTree {
    /// `true` when `bus` lies in the subtree hanging below `root` (inclusive).
    pub fn in_subtree(&self, root: usize, bus: usize) -> bool {
        self.entry[root] <= self.entry[bus] && self.exit[bus] <= self.exit[root]
    }

    pub fn children(&self, bus: usize) -> impl Iterator<Item = usize> + '_ {
        self.order
            .iter()
            .copied()
            .filter(move |&b| self.parent[b] == Some(bus))
    }
}

/// Validate that `edges` form a tree spanning all `names` and orient it away
/// from `slack`.
pub fn radial_tree(
    names: &[String],
    slack: usize,
    edges: &[Edge<'_>],
) -> Result<RadialTree, TopologyError> {
    let n = names.len();
    if n == 0 {
        return Err(TopologyError::Empty);
    }

    let mut graph: UnGraph<usize, usize> = UnGraph::with_capacity(n, edges.len());
    let nodes: Vec<NodeIndex> = (0..n).map(|i| graph.add_node(i)).collect();
    let mut forest = UnionFind::<usize>::new(n);

    for (idx, edge) in edges.iter().enumerate() {
        if edge.a == edge.b {
            return Err(TopologyError::SelfLoop(edge.name.to_string()));
        }
        // union() is false when both ends already share a component, which
        // also catches parallel lines.
        if !forest.union(edge.a, edge.b) {
            return Err(TopologyError::Cycle {
                lines: edges.len(),
                buses: n,
                closing_line: edge.name.to_string(),
            });
        }
        graph.add_edge(nodes[edge.a], nodes[edge.b], idx);
    }

    let mut parent = vec![None; n];
    let mut parent_edge = vec![None; n];
    let mut depth = vec![0usize; n];
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    let mut queue = VecDeque::new();
    visited[slack] = true;
    queue.push_back(slack);
    while let Some(bus) = queue.pop_front() {
        order.push(bus);
        // Sort neighbours by edge index so orientation does not depend on
        // petgraph's internal adjacency order.
        let mut next: Vec<(usize, usize)> = graph
            .edges(nodes[bus])
            .map(|e| {
                let other = if e.source() == nodes[bus] {
                    e.target()
                } else {
                    e.source()
                };
                (*e.weight(), graph[other])
            })
            .collect();
        next.sort_unstable();
        for (edge_idx, child) in next {
            if !visited[child] {
                visited[child] = true;
                parent[child] = Some(bus);
                parent_edge[child] = Some(edge_idx);
                depth[child] = depth[bus] + 1;
                queue.push_back(child);
            }
        }
    }

    if connected_components(&graph) > 1 || order.len() < n {
        let stranded: Vec<String> = (0..n)
            .filter(|&i| !visited[i])
            .map(|i| names[i].clone())
            .collect();
        return Err(TopologyError::Unreachable(stranded));
    }

    let (entry, exit) = euler_times(n, slack, &order, &parent);

    Ok(RadialTree {
        order,
        parent_edge,
        parent,
        depth,
        entry,
        exit,
    })
}

/// Pre/post-order DFS timestamps; a bus sits under `root` iff its interval
/// nests inside root's.
fn euler_times(
    n: usize,
    slack: usize,
    order: &[usize],
    parent: &[Option<usize>],
) -> (Vec<usize>, Vec<usize>) {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &bus in order {
        if let Some(p) = parent[bus] {
            children[p].push(bus);
        }
    }

    let mut entry = vec![0; n];
    let mut exit = vec![0; n];
    let mut clock = 0;
    let mut stack = vec![(slack, 0usize)];
    entry[slack] = clock;
    while let Some((bus, next_child)) = stack.pop() {
        if let Some(&child) = children[bus].get(next_child) {
            stack.push((bus, next_child + 1));
            clock += 1;
            entry[child] = clock;
            stack.push((child, 0));
        } else {
            clock += 1;
            exit[bus] = clock;
        }
    }
    (entry, exit)
}
