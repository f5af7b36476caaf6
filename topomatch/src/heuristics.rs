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

//! Baseline placements the solver is compared against.

use crate::affinity::AffinityMatrix;
use crate::config::Metric;
use crate::evaluate::{evaluate, pair_cost};
use crate::solver::Solution;
use crate::topology::Topology;
use itertools::Itertools;
use petgraph::graph::EdgeIndex;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::Serialize;
use std::fmt;

const RANDOM_SEED: u64 = 0x7090_5EED;
const GREEDY_SWAP_PASSES: usize = 4;
/// Steps `GreedySwap` may spend before it keeps the placement it has.
const GREEDY_SWAP_BUDGET: usize = 1 << 24;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Heuristic {
    /// Process i on slot i.
    Packed,
    /// Processes dealt over the subtrees of the root.
    RoundRobin,
    /// A fixed-seed shuffle of the slots.
    Random,
    /// Pairwise swaps improving the packed placement.
    GreedySwap,
}

impl Heuristic {
    /// Every heuristic, in reporting order.
    pub const ALL: [Heuristic; 4] = [
        Heuristic::Packed,
        Heuristic::RoundRobin,
        Heuristic::Random,
        Heuristic::GreedySwap,
    ];

    /// Place the processes of `matrix` on the slots of `topology`.
    ///
    /// `original` is the topology the placement is scored on, which only
    /// matters for `GreedySwap`.
    pub fn place(
        &self,
        topology: &Topology,
        original: &Topology,
        matrix: &AffinityMatrix,
        metric: Metric,
    ) -> Solution {
        let n = matrix.order();
        debug_assert!(n <= topology.capacity());
        match self {
            Heuristic::Packed => Solution::from_slots(topology, (0..n).collect()),
            Heuristic::RoundRobin => {
                let subtrees = topology.tiers()[0].arity;
                let width = topology.capacity() / subtrees;
                let slots = (0..n)
                    .map(|p| (p % subtrees) * width + p / subtrees)
                    .collect();
                Solution::from_slots(topology, slots)
            }
            Heuristic::Random => {
                let mut rng = Pcg64::seed_from_u64(RANDOM_SEED);
                let mut slots = (0..topology.capacity()).collect::<Vec<_>>();
                slots.shuffle(&mut rng);
                slots.truncate(n);
                Solution::from_slots(topology, slots)
            }
            Heuristic::GreedySwap => greedy_swap(topology, original, matrix, metric),
        }
    }
}

impl fmt::Display for Heuristic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Heuristic::Packed => "Packed",
            Heuristic::RoundRobin => "RoundRobin",
            Heuristic::Random => "Random",
            Heuristic::GreedySwap => "GreedySwap",
        };
        f.write_str(name)
    }
}

/// A heuristic placement and its score.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeuristicResult {
    pub heuristic: Heuristic,
    pub solution: Solution,
    pub score: f64,
}

/// Run every heuristic and score it on `original`.
pub fn compare_heuristics(
    topology: &Topology,
    original: &Topology,
    matrix: &AffinityMatrix,
    metric: Metric,
) -> Vec<HeuristicResult> {
    Heuristic::ALL
        .iter()
        .map(|&heuristic| {
            let solution = heuristic.place(topology, original, matrix, metric);
            let score = evaluate(original, matrix, &solution, metric);
            HeuristicResult {
                heuristic,
                solution,
                score,
            }
        })
        .collect()
}

fn greedy_swap(
    topology: &Topology,
    original: &Topology,
    matrix: &AffinityMatrix,
    metric: Metric,
) -> Solution {
    let search = swap_search(topology, original, matrix, metric, GREEDY_SWAP_BUDGET);
    log::debug!(
        "greedy swap: {} = {:.6} after {} steps",
        metric,
        search.score,
        search.spent
    );
    Solution::from_slots(topology, search.slots)
}

struct SwapSearch {
    slots: Vec<usize>,
    score: f64,
    /// elementary steps: one per pair cost or link update
    spent: usize,
}

/// Improve the packed placement by pairwise swaps until no swap helps, the
/// passes run out or `budget` steps are spent.
fn swap_search(
    topology: &Topology,
    original: &Topology,
    matrix: &AffinityMatrix,
    metric: Metric,
    budget: usize,
) -> SwapSearch {
    let n = matrix.order();
    let mut slots = (0..n).collect::<Vec<_>>();
    let mut origins = slots
        .iter()
        .map(|&s| topology.leaf(s).origin)
        .collect::<Vec<_>>();
    let mut links = match metric {
        Metric::MaxCom => Some(LinkTraffic::new(original, matrix, &origins)),
        _ => None,
    };
    let mut score = evaluate(
        original,
        matrix,
        &Solution::from_slots(topology, slots.clone()),
        metric,
    );
    let mut spent = 0;
    'passes: for _ in 0..GREEDY_SWAP_PASSES {
        let mut improved = false;
        for i in 0..n {
            for j in i + 1..n {
                if spent >= budget {
                    log::warn!(
                        "greedy swap stopped after {} steps on {} processes",
                        spent,
                        n
                    );
                    break 'passes;
                }
                spent += 1;
                let (oi, oj) = (origins[i], origins[j]);
                if oi == oj {
                    continue;
                }
                match links.as_mut() {
                    Some(links) => {
                        let (traffic, steps) = links.swapped(matrix, &origins, i, j);
                        spent += steps;
                        let swapped = links.score(&traffic);
                        if swapped < score - 1e-9 {
                            links.traffic = traffic;
                            score = swapped;
                        } else {
                            continue;
                        }
                    }
                    None => {
                        spent += n;
                        let delta = (0..n)
                            .filter(|&k| k != i && k != j)
                            .map(|k| {
                                let ok = origins[k];
                                let moved = pair_cost(original, metric, oj, ok)
                                    - pair_cost(original, metric, oi, ok);
                                (matrix.weight(i, k) - matrix.weight(j, k)) * moved
                            })
                            .sum::<f64>();
                        if delta < -1e-9 {
                            score += delta;
                        } else {
                            continue;
                        }
                    }
                }
                slots.swap(i, j);
                origins.swap(i, j);
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }
    SwapSearch {
        slots,
        score,
        spent,
    }
}

/// Traffic on every link of the original topology.
struct LinkTraffic<'a> {
    topology: &'a Topology,
    traffic: Vec<f64>,
}

impl<'a> LinkTraffic<'a> {
    fn new(topology: &'a Topology, matrix: &AffinityMatrix, origins: &[usize]) -> Self {
        let mut traffic = vec![0.0; topology.graph().edge_count()];
        for (i, j) in (0..origins.len()).tuple_combinations() {
            let w = matrix.weight(i, j);
            if w > 0.0 {
                for link in topology.path_links(origins[i], origins[j]) {
                    traffic[link.index()] += w;
                }
            }
        }
        Self { topology, traffic }
    }

    /// The traffic once processes `i` and `j` trade places, and the number
    /// of steps it took.
    ///
    /// Only the paths from `i` and `j` to the other processes change: what
    /// `i` sent towards `k` now leaves from `j`'s leaf and the other way
    /// round.
    fn swapped(
        &self,
        matrix: &AffinityMatrix,
        origins: &[usize],
        i: usize,
        j: usize,
    ) -> (Vec<f64>, usize) {
        let mut traffic = self.traffic.clone();
        let mut steps = traffic.len();
        for k in (0..origins.len()).filter(|&k| k != i && k != j) {
            let shift = matrix.weight(i, k) - matrix.weight(j, k);
            if shift == 0.0 {
                continue;
            }
            for link in self.topology.path_links(origins[i], origins[k]) {
                traffic[link.index()] -= shift;
                steps += 1;
            }
            for link in self.topology.path_links(origins[j], origins[k]) {
                traffic[link.index()] += shift;
                steps += 1;
            }
        }
        (traffic, steps)
    }

    fn score(&self, traffic: &[f64]) -> f64 {
        traffic
            .iter()
            .enumerate()
            .map(|(e, t)| t * self.topology.link_cost(EdgeIndex::new(e)))
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Numbering;
    use crate::topology::tests::two_by_three;
    use crate::topology::{TgtParser, Tier, TopologyParser};

    /// 0-3 and 1-2 are the heavy pairs.
    fn crossed() -> AffinityMatrix {
        AffinityMatrix::parse("0 1 0 9\n1 0 9 0\n0 9 0 1\n9 0 1 0").unwrap()
    }

    #[test]
    fn packed_and_round_robin() {
        let topo = two_by_three();
        let m = crossed();
        let packed = Heuristic::Packed.place(&topo, &topo, &m, Metric::SumCom);
        assert_eq!(packed.slots(), &[0, 1, 2, 3]);
        let spread = Heuristic::RoundRobin.place(&topo, &topo, &m, Metric::SumCom);
        assert_eq!(spread.slots(), &[0, 3, 1, 4]);
    }

    #[test]
    fn random_is_reproducible() {
        let topo = two_by_three();
        let m = crossed();
        let a = Heuristic::Random.place(&topo, &topo, &m, Metric::SumCom);
        let b = Heuristic::Random.place(&topo, &topo, &m, Metric::SumCom);
        assert_eq!(a, b);
        a.validate(&topo).unwrap();
    }

    #[test]
    fn greedy_swap_improves_packed() {
        let topo = Topology::from_tiers(
            vec![
                Tier::new("Socket", 2, 10.0),
                Tier::new("Core", 2, 1.0),
            ],
            (0..4).collect(),
            None,
        )
        .unwrap();
        let m = crossed();
        for metric in [Metric::SumCom, Metric::MaxCom, Metric::HopByte] {
            let results = compare_heuristics(&topo, &topo, &m, metric);
            assert_eq!(
                results.iter().map(|r| r.heuristic).collect::<Vec<_>>(),
                Heuristic::ALL.to_vec()
            );
            let packed = &results[0];
            let swapped = &results[3];
            assert!(swapped.score < packed.score, "{} did not improve", metric);
            swapped.solution.validate(&topo).unwrap();
        }
    }

    fn machine() -> Topology {
        TgtParser
            .parse("tleaf 3 4 100 4 10 6 1", Numbering::Logical)
            .unwrap()
    }

    fn scattered(n: usize) -> AffinityMatrix {
        let rows = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if i == j { 0.0 } else { ((i + j) * (i * j + 1) % 7) as f64 })
                    .collect()
            })
            .collect();
        AffinityMatrix::from_rows(rows).unwrap()
    }

    #[test]
    fn link_traffic_tracks_the_max_com_score() {
        let topo = machine();
        let m = scattered(24);
        let search = swap_search(&topo, &topo, &m, Metric::MaxCom, usize::MAX);
        let solution = Solution::from_slots(&topo, search.slots);
        let packed = Solution::from_slots(&topo, (0..24).collect());
        let packed = evaluate(&topo, &m, &packed, Metric::MaxCom);
        let score = evaluate(&topo, &m, &solution, Metric::MaxCom);
        assert!((search.score - score).abs() < 1e-6);
        assert!(score <= packed);
    }

    #[test]
    fn swap_work_is_bounded() {
        let topo = machine();
        let n = topo.capacity();
        let m = scattered(n);
        // one candidate swap never costs more than this
        let step = 1 + n + 4 * n * topo.depth() + topo.graph().edge_count();
        for metric in [Metric::SumCom, Metric::MaxCom] {
            let search = swap_search(&topo, &topo, &m, metric, 20_000);
            assert!(search.spent >= 20_000);
            assert!(search.spent < 20_000 + step);
            let solution = Solution::from_slots(&topo, search.slots);
            solution.validate(&topo).unwrap();
            assert!((evaluate(&topo, &m, &solution, metric) - search.score).abs() < 1e-6);
        }
    }
}
