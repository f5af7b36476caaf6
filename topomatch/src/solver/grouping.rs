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

//! Bottom-up grouping.
//!
//! At every tier, starting from the leaves, the current entities are
//! grouped by the tier's arity so that heavy communicators end up in the
//! same group. The groups become the entities of the tier above and the
//! matrix is aggregated accordingly.

use itertools::Itertools;
use rayon::prelude::*;
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;

/// Number of partitions above which exhaustive grouping gives up.
const EXHAUSTIVE_LIMIT: f64 = 1e6;

/// How the entities of one tier are grouped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Grouping {
    /// Seed a group with the heaviest entity and add its best partners.
    Greedy,
    /// Enumerate every partition and keep the best one.
    Exhaustive,
    /// Merge pairs by decreasing order of magnitude of their weight.
    Bucket,
}

impl Grouping {
    /// Split the entities of `matrix` into groups of `arity`.
    pub fn group(&self, matrix: &[Vec<f64>], arity: usize) -> Vec<Vec<usize>> {
        if arity == 1 {
            return (0..matrix.len()).map(|e| vec![e]).collect();
        }
        match self {
            Grouping::Greedy => greedy(matrix, arity),
            Grouping::Exhaustive => exhaustive(matrix, arity).unwrap_or_else(|| {
                log::warn!(
                    "too many ways to group {} entities by {}, using the greedy grouping",
                    matrix.len(),
                    arity
                );
                greedy(matrix, arity)
            }),
            Grouping::Bucket => bucket(matrix, arity),
        }
    }
}

/// Compute the layout of the leaves by grouping tier by tier.
///
/// Before grouping a tier, virtual entities are added so that their count
/// is a multiple of the arity. A virtual entity stands for an empty
/// subtree.
pub(crate) fn bottom_up(
    arities: &[usize],
    matrix: Vec<Vec<f64>>,
    method: Grouping,
) -> Vec<Option<usize>> {
    let mut members = (0..matrix.len()).map(|e| vec![Some(e)]).collect::<Vec<_>>();
    let mut matrix = matrix;
    // slots below one entity of the current tier
    let mut width = 1;
    for (depth, &arity) in arities.iter().enumerate().rev() {
        let virtuals = (arity - matrix.len() % arity) % arity;
        pad(&mut matrix, virtuals);
        members.extend(std::iter::repeat(vec![None; width]).take(virtuals));
        let groups = method.group(&matrix, arity);
        log::debug!(
            "tier {}: {} groups of {} ({:?}, {} virtual)",
            depth + 1,
            groups.len(),
            arity,
            method,
            virtuals
        );
        members = groups
            .iter()
            .map(|g| g.iter().flat_map(|&e| members[e].iter().copied()).collect())
            .collect();
        matrix = aggregate(&matrix, &groups);
        width *= arity;
    }
    members.into_iter().next().unwrap_or_default()
}

/// Append `extra` entities that communicate with nobody.
pub(super) fn pad(matrix: &mut Vec<Vec<f64>>, extra: usize) {
    let order = matrix.len() + extra;
    for row in matrix.iter_mut() {
        row.resize(order, 0.0);
    }
    matrix.resize(order, vec![0.0; order]);
}

/// Communication volume between groups.
pub(crate) fn aggregate(matrix: &[Vec<f64>], groups: &[Vec<usize>]) -> Vec<Vec<f64>> {
    groups
        .par_iter()
        .enumerate()
        .map(|(g, a)| {
            groups
                .iter()
                .enumerate()
                .map(|(h, b)| {
                    if g == h {
                        0.0
                    } else {
                        a.iter()
                            .map(|&x| b.iter().map(|&y| matrix[x][y]).sum::<f64>())
                            .sum()
                    }
                })
                .collect()
        })
        .collect()
}

/// The candidate with the highest score; ties go to the lowest entity.
pub(super) fn best<F>(candidates: &[usize], score: F) -> Option<usize>
where
    F: Fn(usize) -> f64 + Sync,
{
    candidates
        .par_iter()
        .map(|&e| (e, score(e)))
        .max_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(b.0.cmp(&a.0))
        })
        .map(|(e, _)| e)
}

/// Entities not yet assigned to a group.
pub(super) struct Pool<'a> {
    matrix: &'a [Vec<f64>],
    free: Vec<usize>,
    /// entity -> volume exchanged with the free entities
    weight: Vec<f64>,
}

impl<'a> Pool<'a> {
    pub(super) fn new(matrix: &'a [Vec<f64>], free: Vec<usize>) -> Self {
        let weight = (0..matrix.len())
            .into_par_iter()
            .map(|e| free.iter().map(|&f| matrix[e][f]).sum::<f64>())
            .collect();
        Self {
            matrix,
            free,
            weight,
        }
    }

    pub(super) fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    fn take(&mut self, e: usize) {
        self.free.retain(|&f| f != e);
        for &f in self.free.iter() {
            self.weight[f] -= self.matrix[f][e];
        }
    }

    /// Take a group of at most `size` entities.
    ///
    /// The group is seeded with the free entity that communicates most with
    /// the others, then grows with the entity most connected to the group.
    pub(super) fn grow(&mut self, size: usize) -> Vec<usize> {
        let mut group = Vec::with_capacity(size);
        let mut link = vec![0.0; self.matrix.len()];
        while group.len() < size {
            let next = if group.is_empty() {
                best(&self.free, |e| self.weight[e])
            } else {
                best(&self.free, |e| link[e])
            };
            let next = match next {
                Some(next) => next,
                None => break,
            };
            self.take(next);
            for &f in self.free.iter() {
                link[f] += self.matrix[f][next];
            }
            group.push(next);
        }
        group.sort_unstable();
        group
    }
}

fn greedy(matrix: &[Vec<f64>], arity: usize) -> Vec<Vec<usize>> {
    let mut pool = Pool::new(matrix, (0..matrix.len()).collect());
    let mut groups = Vec::with_capacity(matrix.len() / arity);
    while !pool.is_empty() {
        groups.push(pool.grow(arity));
    }
    groups
}

/// Number of ways to split `n` entities in groups of `k`, as a float.
fn partition_count(n: usize, k: usize) -> f64 {
    let mut count = 1.0;
    let mut remaining = n;
    while remaining > k {
        // the first free entity picks k - 1 partners among the others
        let mut choices = 1.0;
        for i in 0..k - 1 {
            choices *= (remaining - 1 - i) as f64 / (i + 1) as f64;
        }
        count *= choices;
        remaining -= k;
    }
    count
}

fn internal_weight(matrix: &[Vec<f64>], group: &[usize]) -> f64 {
    group
        .iter()
        .tuple_combinations()
        .map(|(&a, &b)| matrix[a][b])
        .sum()
}

/// Best grouping of `free` and its internal volume.
fn search(matrix: &[Vec<f64>], free: &[usize], arity: usize) -> (f64, Vec<Vec<usize>>) {
    let (first, rest) = match free.split_first() {
        Some(split) => split,
        None => return (0.0, Vec::new()),
    };
    let mut chosen = (f64::NEG_INFINITY, Vec::new());
    for partners in rest.iter().copied().combinations(arity - 1) {
        let (weight, groups) = complete(matrix, *first, partners, rest, arity);
        if weight > chosen.0 {
            chosen = (weight, groups);
        }
    }
    chosen
}

fn complete(
    matrix: &[Vec<f64>],
    first: usize,
    partners: Vec<usize>,
    rest: &[usize],
    arity: usize,
) -> (f64, Vec<Vec<usize>>) {
    let mut group = vec![first];
    group.extend(partners);
    let remaining = rest
        .iter()
        .copied()
        .filter(|e| !group.contains(e))
        .collect::<Vec<_>>();
    let (weight, mut groups) = search(matrix, &remaining, arity);
    let weight = weight + internal_weight(matrix, &group);
    groups.insert(0, group);
    (weight, groups)
}

fn exhaustive(matrix: &[Vec<f64>], arity: usize) -> Option<Vec<Vec<usize>>> {
    let n = matrix.len();
    if partition_count(n, arity) > EXHAUSTIVE_LIMIT {
        return None;
    }
    let entities = (0..n).collect::<Vec<_>>();
    let (first, rest) = entities.split_first()?;
    // the choices of the first group are explored in parallel
    let candidates = rest.iter().copied().combinations(arity - 1).collect::<Vec<_>>();
    let results = candidates
        .into_par_iter()
        .map(|partners| complete(matrix, *first, partners, rest, arity))
        .collect::<Vec<_>>();
    let mut chosen: Option<(f64, Vec<Vec<usize>>)> = None;
    for (weight, groups) in results {
        if chosen.as_ref().map_or(true, |c| weight > c.0) {
            chosen = Some((weight, groups));
        }
    }
    chosen.map(|(_, groups)| groups)
}

fn bucket(matrix: &[Vec<f64>], arity: usize) -> Vec<Vec<usize>> {
    let n = matrix.len();
    let mut buckets = BTreeMap::<Reverse<i32>, Vec<(usize, usize)>>::new();
    for i in 0..n {
        for j in i + 1..n {
            let w = matrix[i][j];
            if w > 0.0 {
                buckets
                    .entry(Reverse(w.log2().floor() as i32))
                    .or_default()
                    .push((i, j));
            }
        }
    }

    let mut group_of = vec![None; n];
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, j) in buckets.into_values().flatten() {
        match (group_of[i], group_of[j]) {
            (None, None) => {
                group_of[i] = Some(groups.len());
                group_of[j] = Some(groups.len());
                groups.push(vec![i, j]);
            }
            (Some(g), None) if groups[g].len() < arity => {
                group_of[j] = Some(g);
                groups[g].push(j);
            }
            (None, Some(g)) if groups[g].len() < arity => {
                group_of[i] = Some(g);
                groups[g].push(i);
            }
            (Some(a), Some(b)) if a != b && groups[a].len() + groups[b].len() <= arity => {
                let moved = std::mem::take(&mut groups[b]);
                for &e in moved.iter() {
                    group_of[e] = Some(a);
                }
                groups[a].extend(moved);
            }
            _ => {}
        }
    }

    // pack the partial groups, largest first, then fill with the rest
    let mut partial = groups.into_iter().filter(|g| !g.is_empty()).collect::<Vec<_>>();
    partial.sort_by_key(|g| Reverse(g.len()));
    let mut bins = vec![Vec::with_capacity(arity); n / arity];
    let mut singles = (0..n).filter(|&e| group_of[e].is_none()).collect::<Vec<_>>();
    for group in partial {
        match bins.iter_mut().find(|b| b.len() + group.len() <= arity) {
            Some(bin) => bin.extend(group),
            None => singles.extend(group),
        }
    }
    singles.sort_unstable();
    let mut singles = singles.into_iter();
    for bin in bins.iter_mut() {
        bin.extend(singles.by_ref().take(arity - bin.len()));
        bin.sort_unstable();
    }
    bins
}
