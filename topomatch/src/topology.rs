// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The hardware topology model.
//!
//! A topology is a balanced tree: every node at depth `d` has
//! `tiers[d].arity` children. The leaves are the placement units (cores or
//! hardware threads). Communicating through a node at depth `d` costs
//! `tiers[d].cost`; two processes on the same leaf communicate for free.
//!
//! The tree is stored as a `petgraph` directed graph with edges from parent
//! to child. Each edge is labelled with the depth of its parent, i.e., the
//! tier whose cost applies to traffic crossing it.
//!
//! Example, `tleaf 2 2 10 3 1`:
//! <pre>
//!                 machine
//!          /                 \
//!      node(10)            node(10)
//!     /   |   \           /   |   \
//!    0    1    2         3    4    5       cost 1 within a node
//! </pre>

use crate::config::Numbering;
use crate::constraints::Binding;
use crate::error::{Error, Result};
use itertools::Itertools;
use petgraph::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

mod tgt;
mod transform;
mod xml;

pub use tgt::TgtParser;
pub use xml::XmlParser;

/// One level of the tree: the children of every node at the same depth.
#[derive(Clone, Debug, PartialEq)]
pub struct Tier {
    /// Kind of the child objects (e.g. "Core").
    pub label: String,
    pub arity: usize,
    /// Cost of communicating through a node of the parent depth.
    pub cost: f64,
}

impl Tier {
    pub fn new(label: &str, arity: usize, cost: f64) -> Self {
        Self {
            label: label.to_string(),
            arity,
            cost,
        }
    }
}

/// A placement slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Leaf {
    /// Position in tree order.
    pub index: usize,
    /// Identifier under the numbering the topology was loaded with.
    pub id: usize,
    /// Index of the leaf of the untransformed topology this slot comes from.
    pub origin: usize,
}

#[derive(Clone, Debug)]
pub struct TopologyNode {
    pub label: String,
    pub depth: usize,
    pub leaf: Option<Leaf>,
}

/// Format tag of a topology description.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TopologyFormat {
    /// `tleaf` descriptions.
    Tgt,
    /// hwloc-style XML.
    Xml,
}

/// Interface to the topology description readers.
pub trait TopologyParser {
    fn parse(&self, text: &str, numbering: Numbering) -> Result<Topology>;
}

/// Read and parse a topology description.
pub fn load_topology(
    path: &Path,
    format: TopologyFormat,
    numbering: Numbering,
) -> Result<Topology> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::TopologyLoad(format!("cannot read {}: {}", path.display(), e))
    })?;
    let topology = match format {
        TopologyFormat::Tgt => TgtParser.parse(&text, numbering),
        TopologyFormat::Xml => XmlParser.parse(&text, numbering),
    }
    .map_err(|e| match e {
        Error::TopologyLoad(msg) => Error::TopologyLoad(format!("{}: {}", path.display(), msg)),
        other => other,
    })?;
    log::debug!(
        "loaded topology {} with {} leaves",
        path.display(),
        topology.leaf_count()
    );
    Ok(topology)
}

#[derive(Clone, Debug)]
pub struct Topology {
    graph: DiGraph<TopologyNode, usize>,
    tiers: Vec<Tier>,
    leaves: Vec<NodeIndex>,
    oversubscription: usize,
    bindings: BTreeMap<usize, usize>,
}

impl Topology {
    /// Build the balanced tree described by `tiers`.
    ///
    /// `ids` gives the identifier of every leaf in tree order; `origins`
    /// defaults to the leaf positions.
    pub fn from_tiers(
        tiers: Vec<Tier>,
        ids: Vec<usize>,
        origins: Option<Vec<usize>>,
    ) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::TopologyLoad("a topology needs at least one tier".into()));
        }
        if let Some(tier) = tiers.iter().find(|t| t.arity == 0) {
            return Err(Error::TopologyLoad(format!(
                "tier {} has arity 0",
                tier.label
            )));
        }
        if let Some(tier) = tiers.iter().find(|t| !(t.cost >= 0.0)) {
            return Err(Error::TopologyLoad(format!(
                "tier {} has an invalid cost {}",
                tier.label, tier.cost
            )));
        }
        let leaf_count = tiers
            .iter()
            .try_fold(1usize, |acc, t| acc.checked_mul(t.arity))
            .ok_or_else(|| Error::TopologyLoad("too many leaves".into()))?;
        if ids.len() != leaf_count {
            return Err(Error::TopologyLoad(format!(
                "{} leaf identifiers for {} leaves",
                ids.len(),
                leaf_count
            )));
        }
        let origins = origins.unwrap_or_else(|| (0..leaf_count).collect());
        if origins.len() != leaf_count {
            return Err(Error::TopologyLoad(format!(
                "{} leaf origins for {} leaves",
                origins.len(),
                leaf_count
            )));
        }

        let mut graph = DiGraph::new();
        let root = graph.add_node(TopologyNode {
            label: "Machine".to_string(),
            depth: 0,
            leaf: None,
        });
        let mut level = vec![root];
        for (depth, tier) in tiers.iter().enumerate() {
            let mut next = Vec::with_capacity(level.len() * tier.arity);
            for &parent in level.iter() {
                for _ in 0..tier.arity {
                    let child = graph.add_node(TopologyNode {
                        label: tier.label.clone(),
                        depth: depth + 1,
                        leaf: None,
                    });
                    graph.add_edge(parent, child, depth);
                    next.push(child);
                }
            }
            level = next;
        }
        for (index, &node) in level.iter().enumerate() {
            graph[node].leaf = Some(Leaf {
                index,
                id: ids[index],
                origin: origins[index],
            });
        }

        Ok(Self {
            graph,
            tiers,
            leaves: level,
            oversubscription: 1,
            bindings: BTreeMap::new(),
        })
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Depth of the leaves.
    pub fn depth(&self) -> usize {
        self.tiers.len()
    }

    pub fn graph(&self) -> &DiGraph<TopologyNode, usize> {
        &self.graph
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Number of processes the topology can host.
    pub fn capacity(&self) -> usize {
        self.leaf_count()
    }

    pub fn oversubscription(&self) -> usize {
        self.oversubscription
    }

    pub fn leaf(&self, index: usize) -> Leaf {
        self.graph[self.leaves[index]]
            .leaf
            .expect("leaf nodes carry a slot")
    }

    pub fn leaves(&self) -> impl Iterator<Item = Leaf> + '_ {
        (0..self.leaf_count()).map(move |i| self.leaf(i))
    }

    /// Position of the leaf with identifier `id`.
    pub fn find_leaf(&self, id: usize) -> Option<usize> {
        self.leaves().find(|l| l.id == id).map(|l| l.index)
    }

    /// Pinned processes: process -> origin leaf.
    pub fn bindings(&self) -> &BTreeMap<usize, usize> {
        &self.bindings
    }

    pub(crate) fn set_bindings(&mut self, bindings: &[Binding]) {
        self.bindings = bindings.iter().map(|b| (b.process, b.origin)).collect();
    }

    pub fn parent(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.graph.neighbors_directed(node, Incoming).next()
    }

    /// Depth of the lowest common ancestor of two leaves.
    ///
    /// Equal to `depth()` when both indices name the same leaf.
    pub fn lca_depth(&self, a: usize, b: usize) -> usize {
        let (mut x, mut y) = (self.leaves[a], self.leaves[b]);
        while x != y {
            // balanced: both walks are always at the same depth
            x = self.parent(x).expect("walked above the root");
            y = self.parent(y).expect("walked above the root");
        }
        self.graph[x].depth
    }

    /// Cost of communicating between two leaves.
    pub fn cost(&self, a: usize, b: usize) -> f64 {
        let depth = self.lca_depth(a, b);
        self.tiers.get(depth).map(|t| t.cost).unwrap_or(0.0)
    }

    /// Number of links on the path between two leaves.
    pub fn hops(&self, a: usize, b: usize) -> usize {
        2 * (self.depth() - self.lca_depth(a, b))
    }

    /// Links on the path from leaf `a` to leaf `b`.
    pub fn path_links(&self, a: usize, b: usize) -> Vec<EdgeIndex> {
        let (mut x, mut y) = (self.leaves[a], self.leaves[b]);
        let mut links = Vec::new();
        while x != y {
            let (px, py) = (
                self.parent(x).expect("walked above the root"),
                self.parent(y).expect("walked above the root"),
            );
            links.extend(self.graph.find_edge(px, x));
            links.extend(self.graph.find_edge(py, y));
            x = px;
            y = py;
        }
        links
    }

    /// Cost applied to traffic crossing `link`.
    pub fn link_cost(&self, link: EdgeIndex) -> f64 {
        self.tiers[self.graph[link]].cost
    }

    /// The one line summary: arity(cost) per tier.
    pub fn arity_summary(&self) -> String {
        format!(
            "Topology arity: {}",
            self.tiers
                .iter()
                .map(|t| format!("{}({})", t.arity, t.cost))
                .format(" ")
        )
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "Topology: {} tiers, {} leaves, oversubscription {}",
            self.depth(),
            self.leaf_count(),
            self.oversubscription
        )?;
        for (depth, tier) in self.tiers.iter().enumerate() {
            let parents = self
                .graph
                .node_indices()
                .filter(|n| self.graph[*n].depth == depth)
                .count();
            writeln!(
                f,
                "  tier {}: {} x {} (arity {}, cost {})",
                depth + 1,
                parents * tier.arity,
                tier.label,
                tier.arity,
                tier.cost
            )?;
        }
        writeln!(
            f,
            "  leaf ids: {}",
            self.leaves().map(|l| l.id).format(",")
        )?;
        write!(
            f,
            "  leaf origins: {}",
            self.leaves().map(|l| l.origin).format(",")
        )
    }
}
