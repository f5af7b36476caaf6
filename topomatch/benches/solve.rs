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

use bencher::Bencher;
use bencher::{benchmark_group, benchmark_main};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use topomatch::*;

fn machine() -> Topology {
    Topology::from_tiers(
        vec![
            Tier::new("Socket", 4, 100.0),
            Tier::new("Core", 4, 10.0),
            Tier::new("PU", 4, 1.0),
        ],
        (0..64).collect(),
        None,
    )
    .expect("valid topology")
}

/// Random traffic between 64 processes.
fn traffic() -> AffinityMatrix {
    let mut rng = Pcg64::seed_from_u64(17);
    let rows = (0..64)
        .map(|i| {
            (0..64)
                .map(|j| if i == j { 0.0 } else { rng.gen_range(0.0..1000.0) })
                .collect()
        })
        .collect();
    AffinityMatrix::from_rows(rows).expect("valid matrix")
}

fn solve_with(bench: &mut Bencher, config: MappingConfiguration) {
    let topology = machine().optimize().expect("optimized topology");
    let matrix = traffic();
    bench.iter(|| {
        TreeMatchSolver
            .solve(&topology, &matrix, &config)
            .expect("Failed mapping")
    });
}

fn native(bench: &mut Bencher) {
    solve_with(bench, MappingConfiguration::default());
}

fn bucket(bench: &mut Bencher) {
    solve_with(
        bench,
        MappingConfiguration {
            bucket_grouping_threshold: 0,
            ..Default::default()
        },
    );
}

fn k_partition(bench: &mut Bencher) {
    solve_with(
        bench,
        MappingConfiguration {
            greedy: true,
            ..Default::default()
        },
    );
}

fn partitioner(bench: &mut Bencher) {
    solve_with(
        bench,
        MappingConfiguration {
            strategy: MappingStrategy::Partitioner,
            sparse_factor: 0.1,
            ..Default::default()
        },
    );
}

fn heuristics(bench: &mut Bencher) {
    let topology = machine();
    let matrix = traffic();
    bench.iter(|| compare_heuristics(&topology, &topology, &matrix, Metric::SumCom));
}

benchmark_group!(benches, native, bucket, k_partition, partitioner, heuristics);
benchmark_main!(benches);
