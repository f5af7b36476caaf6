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

//! Scoring of a placement.
//!
//! Scores are always computed on the original topology: processes are
//! located by the origin of their slot, so a solution found on an
//! oversubscribed or optimized tree is scored like any other.

use crate::affinity::AffinityMatrix;
use crate::config::Metric;
use crate::solver::Solution;
use crate::topology::Topology;
use itertools::Itertools;
use petgraph::graph::EdgeIndex;

/// Score `solution` under `metric`; lower is better.
pub fn evaluate(
    topology: &Topology,
    matrix: &AffinityMatrix,
    solution: &Solution,
    metric: Metric,
) -> f64 {
    debug_assert_eq!(solution.process_count(), matrix.order());
    let origins = solution.origins();
    let pairs = (0..matrix.order())
        .tuple_combinations()
        .map(|(i, j)| (origins[i], origins[j], matrix.weight(i, j)))
        .filter(|&(_, _, w)| w > 0.0);
    match metric {
        Metric::SumCom | Metric::HopByte => pairs
            .map(|(a, b, w)| w * pair_cost(topology, metric, a, b))
            .sum(),
        Metric::MaxCom => {
            let mut traffic = vec![0.0; topology.graph().edge_count()];
            for (a, b, w) in pairs {
                for link in topology.path_links(a, b) {
                    traffic[link.index()] += w;
                }
            }
            traffic
                .iter()
                .enumerate()
                .map(|(e, t)| t * topology.link_cost(EdgeIndex::new(e)))
                .fold(0.0, f64::max)
        }
    }
}

/// Cost of one unit of traffic between leaves `a` and `b` for the metrics
/// that sum over pairs.
pub(crate) fn pair_cost(topology: &Topology, metric: Metric, a: usize, b: usize) -> f64 {
    match metric {
        Metric::HopByte => topology.hops(a, b) as f64,
        _ => topology.cost(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::two_by_three;
    use crate::topology::Tier;

    fn two_leaves() -> Topology {
        Topology::from_tiers(vec![Tier::new("Core", 2, 1.0)], vec![0, 1], None).unwrap()
    }

    #[test]
    fn two_processes_on_two_leaves() {
        let topo = two_leaves();
        let matrix = AffinityMatrix::parse("0 5\n5 0").unwrap();
        let sol = Solution::from_slots(&topo, vec![0, 1]);
        assert_eq!(evaluate(&topo, &matrix, &sol, Metric::SumCom), 5.0);
        assert_eq!(evaluate(&topo, &matrix, &sol, Metric::HopByte), 10.0);
        assert_eq!(evaluate(&topo, &matrix, &sol, Metric::MaxCom), 5.0);
    }

    #[test]
    fn co_located_processes_cost_nothing() {
        let topo = two_leaves();
        let over = topo.oversubscribe(2).unwrap();
        let matrix = AffinityMatrix::parse("0 5\n5 0").unwrap();
        let sol = Solution::from_slots(&over, vec![2, 3]);
        assert_eq!(sol.origins(), &[1, 1]);
        for metric in [Metric::SumCom, Metric::MaxCom, Metric::HopByte] {
            assert_eq!(evaluate(&topo, &matrix, &sol, metric), 0.0);
        }
    }

    #[test]
    fn hierarchy_costs() {
        let topo = two_by_three();
        let matrix = AffinityMatrix::parse("0 2 1\n2 0 0\n1 0 0").unwrap();
        // 0 and 1 share a socket, 2 is on the other one
        let sol = Solution::from_slots(&topo, vec![0, 1, 3]);
        assert_eq!(evaluate(&topo, &matrix, &sol, Metric::SumCom), 2.0 + 10.0);
        assert_eq!(evaluate(&topo, &matrix, &sol, Metric::HopByte), 2.0 * 2.0 + 4.0);
        // the socket link of process 0 carries 1 unit at cost 10
        assert_eq!(evaluate(&topo, &matrix, &sol, Metric::MaxCom), 10.0);
    }

    #[test]
    fn evaluation_is_pure() {
        let topo = two_by_three();
        let matrix = AffinityMatrix::parse("0 2 1\n2 0 3\n1 3 0").unwrap();
        let sol = Solution::from_slots(&topo, vec![5, 0, 2]);
        for metric in [Metric::SumCom, Metric::MaxCom, Metric::HopByte] {
            assert_eq!(
                evaluate(&topo, &matrix, &sol, metric),
                evaluate(&topo, &matrix, &sol, metric)
            );
        }
    }
}
