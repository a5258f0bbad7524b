use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::AdjacencyStatus;

/// Undirected "may be physically merged" relation between tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(Ulid, Ulid)>", into = "Vec<(Ulid, Ulid)>")]
pub struct AdjacencyGraph {
    edges: BTreeMap<Ulid, BTreeSet<Ulid>>,
}

impl From<Vec<(Ulid, Ulid)>> for AdjacencyGraph {
    fn from(pairs: Vec<(Ulid, Ulid)>) -> Self {
        Self::from_edges(pairs)
    }
}

impl From<AdjacencyGraph> for Vec<(Ulid, Ulid)> {
    fn from(graph: AdjacencyGraph) -> Self {
        graph.edge_list()
    }
}

impl AdjacencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(pairs: impl IntoIterator<Item = (Ulid, Ulid)>) -> Self {
        let mut graph = Self::new();
        for (a, b) in pairs {
            graph.connect(a, b);
        }
        graph
    }

    pub fn connect(&mut self, a: Ulid, b: Ulid) {
        if a == b {
            return;
        }
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    pub fn are_adjacent(&self, a: &Ulid, b: &Ulid) -> bool {
        self.edges.get(a).is_some_and(|n| n.contains(b))
    }

    pub fn neighbors(&self, id: &Ulid) -> impl Iterator<Item = &Ulid> {
        self.edges.get(id).into_iter().flatten()
    }

    /// Each undirected edge once, smaller id first.
    pub fn edge_list(&self) -> Vec<(Ulid, Ulid)> {
        self.edges
            .iter()
            .flat_map(|(a, ns)| ns.iter().filter(move |b| a < *b).map(move |b| (*a, *b)))
            .collect()
    }

    /// Number of connected pieces the tables form when only merge edges
    /// between them count.
    pub fn components(&self, tables: &[Ulid]) -> usize {
        let members: BTreeSet<Ulid> = tables.iter().copied().collect();
        let mut seen = BTreeSet::new();
        let mut components = 0;
        for start in &members {
            if !seen.insert(*start) {
                continue;
            }
            components += 1;
            let mut stack = vec![*start];
            while let Some(cur) = stack.pop() {
                for next in self.neighbors(&cur) {
                    if members.contains(next) && seen.insert(*next) {
                        stack.push(*next);
                    }
                }
            }
        }
        components
    }

    pub fn is_connected(&self, tables: &[Ulid]) -> bool {
        self.components(tables) <= 1
    }

    pub fn status(&self, tables: &[Ulid]) -> AdjacencyStatus {
        match tables.len() {
            0 | 1 => AdjacencyStatus::Single,
            _ if self.is_connected(tables) => AdjacencyStatus::Adjacent,
            _ => AdjacencyStatus::NonAdjacent,
        }
    }
}
