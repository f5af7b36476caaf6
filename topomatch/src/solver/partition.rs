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

//! Top-down partitioning: the entities are split by the arity of the root
//! tier, then every part is split by the arity of the next tier.

use super::grouping::{pad, Pool};
use rayon::prelude::*;

const MIN_GAIN: f64 = 1e-9;

/// Splits a set of entities into balanced parts.
pub trait Partitioner: Sync {
    /// Split `entities` into `parts` sets of equal size, keeping heavy
    /// communicators of `matrix` together.
    fn partition(&self, matrix: &[Vec<f64>], entities: Vec<usize>, parts: usize)
        -> Vec<Vec<usize>>;
}

/// Grow each part from its heaviest free entity.
pub struct GreedyPartitioner;

impl Partitioner for GreedyPartitioner {
    fn partition(
        &self,
        matrix: &[Vec<f64>],
        entities: Vec<usize>,
        parts: usize,
    ) -> Vec<Vec<usize>> {
        let size = entities.len() / parts;
        let mut pool = Pool::new(matrix, entities);
        (0..parts).map(|_| pool.grow(size)).collect()
    }
}

/// Greedy partitioning followed by pairwise swap refinement.
pub struct RefiningPartitioner {
    pub passes: usize,
}

impl Default for RefiningPartitioner {
    fn default() -> Self {
        Self { passes: 8 }
    }
}

impl Partitioner for RefiningPartitioner {
    fn partition(
        &self,
        matrix: &[Vec<f64>],
        entities: Vec<usize>,
        parts: usize,
    ) -> Vec<Vec<usize>> {
        let mut result = GreedyPartitioner.partition(matrix, entities, parts);
        for pass in 0..self.passes {
            let mut improved = false;
            for a in 0..result.len() {
                for b in a + 1..result.len() {
                    improved |= swap_pass(matrix, &mut result, a, b);
                }
            }
            if !improved {
                log::trace!("refinement converged after {} passes", pass + 1);
                break;
            }
        }
        for part in result.iter_mut() {
            part.sort_unstable();
        }
        result
    }
}

fn link(matrix: &[Vec<f64>], e: usize, part: &[usize]) -> f64 {
    part.iter().map(|&p| matrix[e][p]).sum()
}

/// Swap entities between parts `a` and `b` while it increases the volume
/// kept inside the parts.
fn swap_pass(matrix: &[Vec<f64>], parts: &mut [Vec<usize>], a: usize, b: usize) -> bool {
    let mut improved = false;
    for i in 0..parts[a].len() {
        for j in 0..parts[b].len() {
            let (x, y) = (parts[a][i], parts[b][j]);
            let gain = link(matrix, x, &parts[b]) - link(matrix, x, &parts[a])
                + link(matrix, y, &parts[a])
                - link(matrix, y, &parts[b])
                - 2.0 * matrix[x][y];
            if gain > MIN_GAIN {
                parts[a][i] = y;
                parts[b][j] = x;
                improved = true;
            }
        }
    }
    improved
}

/// Compute the layout of the leaves by recursive partitioning.
///
/// A node only splits its entities over as many children as they need;
/// the other children stay empty.
pub(crate) fn top_down<P: Partitioner>(
    arities: &[usize],
    matrix: Vec<Vec<f64>>,
    partitioner: &P,
) -> Vec<Option<usize>> {
    let real = matrix.len();
    let widest = arities.iter().copied().max().unwrap_or(1);
    let mut matrix = matrix;
    // virtual entities used to balance the parts
    pad(&mut matrix, widest - 1);
    split(arities, &matrix, partitioner, (0..real).collect(), real)
}

fn split<P: Partitioner>(
    arities: &[usize],
    matrix: &[Vec<f64>],
    partitioner: &P,
    entities: Vec<usize>,
    real: usize,
) -> Vec<Option<usize>> {
    let (arity, rest) = match arities.split_first() {
        Some((&arity, rest)) => (arity, rest),
        None => return vec![entities.first().copied()],
    };
    let width = rest.iter().product::<usize>();
    if entities.is_empty() {
        return vec![None; arity * width];
    }
    let used = (entities.len() + width - 1) / width;
    let mut parts = if used == 1 {
        vec![entities]
    } else {
        let virtuals = (used - entities.len() % used) % used;
        let mut entities = entities;
        entities.extend(real..real + virtuals);
        partitioner
            .partition(matrix, entities, used)
            .into_iter()
            .map(|part| part.into_iter().filter(|&e| e < real).collect::<Vec<_>>())
            .collect()
    };
    parts.resize(arity, Vec::new());
    parts
        .into_par_iter()
        .map(|part| split(rest, matrix, partitioner, part, real))
        .collect::<Vec<_>>()
        .concat()
}
