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

//! The mapping solver.
//!
//! Every strategy computes a *layout*: the process hosted by every slot of
//! the topology, in tree order. Empty slots come from virtual processes the
//! strategies add at each tier so that the entities fill whole groups.
//! Binding constraints are then enforced by swapping pinned processes into
//! a slot of their leaf.

use crate::affinity::AffinityMatrix;
use crate::config::{ActiveStrategy, MappingConfiguration};
use crate::error::{Error, Result};
use crate::topology::Topology;
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashSet;

mod grouping;
mod partition;

pub use grouping::Grouping;
pub use partition::{GreedyPartitioner, Partitioner, RefiningPartitioner};

/// A placement of every process on a leaf.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Solution {
    /// process -> slot of the topology the solution was computed on
    slots: Vec<usize>,
    /// process -> position of the leaf in the original topology
    origins: Vec<usize>,
    /// process -> leaf identifier
    ids: Vec<usize>,
}

impl Solution {
    /// Place process `p` on slot `slots[p]` of `topology`.
    pub fn from_slots(topology: &Topology, slots: Vec<usize>) -> Self {
        let (origins, ids) = slots
            .iter()
            .map(|&s| {
                let leaf = topology.leaf(s);
                (leaf.origin, leaf.id)
            })
            .unzip();
        Self {
            slots,
            origins,
            ids,
        }
    }

    pub fn process_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    pub fn origins(&self) -> &[usize] {
        &self.origins
    }

    /// The leaf identifier of every process.
    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    /// Check that the solution is a valid placement on `topology`.
    pub fn validate(&self, topology: &Topology) -> Result<()> {
        if let Some(slot) = self.slots.iter().find(|&&s| s >= topology.capacity()) {
            return Err(Error::Solver(format!("slot {} does not exist", slot)));
        }
        if self.slots.iter().collect::<HashSet<_>>().len() != self.slots.len() {
            return Err(Error::Solver("two processes share a slot".into()));
        }
        Ok(())
    }
}

/// Interface to the mapping algorithms.
pub trait MappingSolver {
    fn solve(
        &self,
        topology: &Topology,
        matrix: &AffinityMatrix,
        config: &MappingConfiguration,
    ) -> Result<Solution>;
}

/// The tree-aware solver. Strategy selection follows the configuration.
#[derive(Default)]
pub struct TreeMatchSolver;

impl TreeMatchSolver {
    /// The strategy `solve` runs for this topology and configuration.
    pub fn strategy(topology: &Topology, config: &MappingConfiguration) -> ActiveStrategy {
        let bottom = topology.tiers().last().map(|t| t.arity).unwrap_or(1);
        config.active_strategy(topology.capacity() / bottom)
    }
}

impl MappingSolver for TreeMatchSolver {
    fn solve(
        &self,
        topology: &Topology,
        matrix: &AffinityMatrix,
        config: &MappingConfiguration,
    ) -> Result<Solution> {
        let processes = matrix.order();
        if processes > topology.capacity() {
            return Err(Error::Capacity {
                processes,
                capacity: topology.capacity(),
            });
        }
        let strategy = Self::strategy(topology, config);
        log::info!(
            "mapping {} processes on {} slots with the {} strategy",
            processes,
            topology.capacity(),
            strategy
        );

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = config.max_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| Error::Solver(format!("cannot start the thread pool: {}", e)))?;

        let arities = topology.tiers().iter().map(|t| t.arity).collect::<Vec<_>>();
        let mut layout = pool.install(|| match strategy {
            ActiveStrategy::Native => {
                grouping::bottom_up(&arities, matrix.symmetric(), Grouping::Greedy)
            }
            ActiveStrategy::Exhaustive => {
                grouping::bottom_up(&arities, matrix.symmetric(), Grouping::Exhaustive)
            }
            ActiveStrategy::BucketGrouping => {
                grouping::bottom_up(&arities, matrix.symmetric(), Grouping::Bucket)
            }
            ActiveStrategy::KPartition => {
                partition::top_down(&arities, matrix.symmetric(), &GreedyPartitioner)
            }
            ActiveStrategy::Partitioner => partition::top_down(
                &arities,
                matrix.sparsify(config.sparse_factor).symmetric(),
                &RefiningPartitioner::default(),
            ),
        });
        if layout.len() != topology.capacity() {
            return Err(Error::Solver(format!(
                "layout covers {} slots out of {}",
                layout.len(),
                topology.capacity()
            )));
        }
        log::trace!(
            "layout: {}",
            layout
                .iter()
                .map(|e| e.map_or_else(|| "-".to_string(), |p| p.to_string()))
                .format(",")
        );

        let mut slot_of = vec![None; processes];
        for (slot, process) in layout.iter().enumerate() {
            if let Some(p) = *process {
                slot_of[p] = Some(slot);
            }
        }
        let mut slot_of = slot_of
            .into_iter()
            .enumerate()
            .map(|(p, slot)| {
                slot.ok_or_else(|| Error::Solver(format!("process {} was not placed", p)))
            })
            .collect::<Result<Vec<_>>>()?;
        apply_bindings(topology, &mut layout, &mut slot_of)?;

        let solution = Solution::from_slots(topology, slot_of);
        solution.validate(topology)?;
        Ok(solution)
    }
}

/// Move every pinned process to a slot of its leaf.
///
/// `layout` maps every slot to the process it hosts, if any, and `slot_of`
/// is its inverse. Both are kept in sync.
fn apply_bindings(
    topology: &Topology,
    layout: &mut [Option<usize>],
    slot_of: &mut [usize],
) -> Result<()> {
    let bindings = topology.bindings();
    if bindings.is_empty() {
        return Ok(());
    }
    let mut fixed = vec![false; layout.len()];
    for (&process, &origin) in bindings.iter() {
        if topology.leaf(slot_of[process]).origin == origin {
            fixed[slot_of[process]] = true;
        }
    }
    for (&process, &origin) in bindings.iter() {
        let current = slot_of[process];
        if fixed[current] && topology.leaf(current).origin == origin {
            continue;
        }
        let target = topology
            .leaves()
            .filter(|l| l.origin == origin && !fixed[l.index])
            .map(|l| l.index)
            .next()
            .ok_or_else(|| {
                Error::Constraint(format!(
                    "no free slot left on leaf {} for process {}",
                    origin, process
                ))
            })?;
        if let Some(other) = layout[target] {
            slot_of[other] = current;
        }
        layout.swap(current, target);
        slot_of[process] = target;
        fixed[target] = true;
    }
    Ok(())
}
