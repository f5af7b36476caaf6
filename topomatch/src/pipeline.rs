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

//! The mapping pipeline.
//!
//! A run loads the topology and the affinity matrix, applies the binding
//! constraints, expands and reshapes the topology, solves, and reports.
//! Stages run in that fixed order and the first error ends the run.

use crate::affinity::AffinityMatrix;
use crate::config::{ActiveStrategy, PipelineConfiguration, Verbosity};
use crate::constraints::BindingConstraints;
use crate::error::Result;
use crate::evaluate::evaluate;
use crate::heuristics::compare_heuristics;
use crate::report::{MetricsReport, TimingReport, VerboseSink};
use crate::solver::{MappingSolver, Solution, TreeMatchSolver};
use crate::topology::{load_topology, Topology, TopologyFormat};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Clone, Debug, PartialEq)]
pub struct TopologySource {
    pub path: PathBuf,
    pub format: TopologyFormat,
}

/// The files a run reads.
#[derive(Clone, Debug, PartialEq)]
pub struct MappingInputs {
    pub topology: TopologySource,
    pub affinity: PathBuf,
    pub bindings: Option<PathBuf>,
}

/// What a successful run produces.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MappingOutcome {
    pub strategy: ActiveStrategy,
    pub solution: Solution,
    /// Present when the solution is displayed.
    pub metrics: Option<MetricsReport>,
    pub timing: TimingReport,
}

fn summarize(topology: &Topology, sink: &mut VerboseSink) {
    sink.emit_exactly(Verbosity::INFO, topology.arity_summary());
    sink.emit(Verbosity::DEBUG, topology);
}

/// Run the pipeline with a validated configuration.
pub fn run(
    inputs: &MappingInputs,
    config: &PipelineConfiguration,
    sink: &mut VerboseSink,
) -> Result<MappingOutcome> {
    let start = Instant::now();
    let mut topology = load_topology(
        &inputs.topology.path,
        inputs.topology.format,
        config.solver.numbering,
    )?;
    let matrix = AffinityMatrix::load(&inputs.affinity)?;
    log::info!("{}", matrix);
    if let Some(path) = &inputs.bindings {
        BindingConstraints::load(path)?.inject(
            &mut topology,
            matrix.order(),
            config.oversubscription,
        )?;
    }
    let io = start.elapsed();
    summarize(&topology, sink);

    // scores are computed on this one
    let original = topology;
    // and the baselines are placed on this one
    let expanded = original.oversubscribe(config.oversubscription)?;

    let optimize_start = Instant::now();
    let optimized = if config.optimize_topology {
        Some(expanded.optimize()?)
    } else {
        None
    };
    let working = optimized.as_ref().unwrap_or(&expanded);
    let optimize = optimize_start.elapsed();
    summarize(working, sink);

    let mapping_start = Instant::now();
    let strategy = TreeMatchSolver::strategy(working, &config.solver);
    let solution = TreeMatchSolver.solve(working, &matrix, &config.solver)?;
    let mapping = mapping_start.elapsed();
    let total = start.elapsed();

    let metrics = if config.display_solution {
        let report = MetricsReport {
            metric: config.metric,
            score: evaluate(&original, &matrix, &solution, config.metric),
            heuristics: compare_heuristics(&expanded, &original, &matrix, config.metric),
        };
        for line in report.lines(&solution) {
            sink.display(line);
        }
        Some(report)
    } else {
        None
    };

    let timing = TimingReport {
        io_ms: TimingReport::millis(io),
        optimize_ms: TimingReport::millis(optimize),
        mapping_ms: TimingReport::millis(mapping),
        total_ms: TimingReport::millis(total),
    };
    sink.emit(Verbosity::TIMING, &timing);
    sink.flush();

    Ok(MappingOutcome {
        strategy,
        solution,
        metrics,
        timing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MappingStrategy, Metric, Numbering};
    use crate::error::Error;
    use crate::report::SharedBuffer;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let _logger = env_logger::builder().is_test(true).try_init();
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn file(&self, name: &str, text: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, text).unwrap();
            path
        }

        fn inputs(&self, tgt: &str, matrix: &str) -> MappingInputs {
            MappingInputs {
                topology: TopologySource {
                    path: self.file("topo.tgt", tgt),
                    format: TopologyFormat::Tgt,
                },
                affinity: self.file("matrix.txt", matrix),
                bindings: None,
            }
        }
    }

    fn uniform_matrix(n: usize) -> String {
        (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if i == j { "0" } else { "1" })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn quiet() -> VerboseSink {
        VerboseSink::new(
            Verbosity::NONE,
            Box::new(std::io::sink()),
            Box::new(std::io::sink()),
        )
    }

    fn run_quiet(inputs: &MappingInputs, config: &PipelineConfiguration) -> Result<MappingOutcome> {
        run(inputs, config, &mut quiet())
    }

    #[test]
    fn two_processes_on_two_leaves() {
        let fixture = Fixture::new();
        let inputs = fixture.inputs("tleaf 1 2 1", "0 5\n5 0");
        let outcome = run_quiet(&inputs, &PipelineConfiguration::default()).unwrap();
        let mut ids = outcome.solution.ids().to_vec();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(outcome.metrics.unwrap().score, 5.0);
        assert_eq!(outcome.strategy, ActiveStrategy::Native);
    }

    #[test]
    fn oversubscription_bounds_the_capacity() {
        let fixture = Fixture::new();
        let config = PipelineConfiguration {
            oversubscription: 2,
            ..Default::default()
        };
        let fits = fixture.inputs("tleaf 2 2 10 2 1", &uniform_matrix(8));
        let outcome = run_quiet(&fits, &config).unwrap();
        assert_eq!(outcome.solution.process_count(), 8);
        for leaf in 0..4 {
            let hosted = outcome.solution.origins().iter().filter(|&&o| o == leaf).count();
            assert_eq!(hosted, 2);
        }

        let too_many = fixture.inputs("tleaf 2 2 10 2 1", &uniform_matrix(9));
        assert_eq!(
            run_quiet(&too_many, &config).unwrap_err(),
            Error::Capacity {
                processes: 9,
                capacity: 8
            }
        );
    }

    fn load_fixture(inputs: &MappingInputs) -> Topology {
        load_topology(
            &inputs.topology.path,
            inputs.topology.format,
            Numbering::Logical,
        )
        .unwrap()
    }

    #[test]
    fn runs_are_idempotent() {
        let fixture = Fixture::new();
        let inputs = fixture.inputs("tleaf 3 2 100 3 10 2 1", &uniform_matrix(12));
        let config = PipelineConfiguration::default();
        let a = run_quiet(&inputs, &config).unwrap();
        let b = run_quiet(&inputs, &config).unwrap();
        assert_eq!(a.solution, b.solution);
        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn optimization_is_transparent() {
        let fixture = Fixture::new();
        let inputs = fixture.inputs("tleaf 2 1 100 6 1", "0 4 1\n4 0 1\n1 1 0");
        let original = load_fixture(&inputs);
        for optimize_topology in [true, false] {
            let config = PipelineConfiguration {
                optimize_topology,
                ..Default::default()
            };
            let outcome = run_quiet(&inputs, &config).unwrap();
            let solution = &outcome.solution;
            assert!(solution.origins().iter().all(|&o| o < original.leaf_count()));
            let reported = outcome.metrics.unwrap().score;
            assert_eq!(reported, evaluate(&original, &matrix(&inputs), solution, Metric::SumCom));
        }
    }

    #[test]
    fn baselines_ignore_optimization() {
        let fixture = Fixture::new();
        let inputs = fixture.inputs("tleaf 1 12 1", &uniform_matrix(6));
        let baselines = |optimize_topology: bool| {
            let config = PipelineConfiguration {
                optimize_topology,
                ..Default::default()
            };
            run_quiet(&inputs, &config).unwrap().metrics.unwrap().heuristics
        };
        let optimized = baselines(true);
        assert_eq!(optimized, baselines(false));
        // one process per root subtree of the unoptimized tree
        assert_eq!(optimized[1].solution.slots(), &[0, 1, 2, 3, 4, 5]);
    }

    fn matrix(inputs: &MappingInputs) -> AffinityMatrix {
        AffinityMatrix::load(&inputs.affinity).unwrap()
    }

    #[test]
    fn sparse_factor_is_clamped() {
        let fixture = Fixture::new();
        let inputs = fixture.inputs("tleaf 2 2 10 2 1", "0 8 1 0\n8 0 0 1\n1 0 0 6\n0 1 6 0");
        let with = |factor: f64| {
            let mut config = PipelineConfiguration::default();
            config.solver.strategy = MappingStrategy::Partitioner;
            config.solver.sparse_factor = factor;
            run_quiet(&inputs, &config.validate().unwrap()).unwrap()
        };
        assert_eq!(with(-0.5).solution, with(0.0).solution);
        assert_eq!(with(1.5).solution, with(1.0).solution);
    }

    #[test]
    fn constraints_abort_the_run() {
        let fixture = Fixture::new();
        let mut inputs = fixture.inputs("tleaf 1 2 1", "0 5\n5 0");
        inputs.bindings = Some(fixture.file("bindings.txt", "0 7\n"));
        let display = SharedBuffer::default();
        let mut sink = VerboseSink::new(
            Verbosity::EXTRA,
            Box::new(std::io::sink()),
            Box::new(display.clone()),
        );
        let err = run(&inputs, &PipelineConfiguration::default(), &mut sink).unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
        assert_eq!(display.contents(), "");
    }

    #[test]
    fn bindings_are_reported_on_their_leaf() {
        let fixture = Fixture::new();
        let mut inputs = fixture.inputs("tleaf 2 2 10 2 1", &uniform_matrix(4));
        inputs.bindings = Some(fixture.file("bindings.txt", "# pin\n2 0\n"));
        let outcome = run_quiet(&inputs, &PipelineConfiguration::default()).unwrap();
        assert_eq!(outcome.solution.ids()[2], 0);
    }

    #[test]
    fn load_errors_name_their_stage() {
        let fixture = Fixture::new();
        let config = PipelineConfiguration::default();
        let bad_topology = fixture.inputs("tleaf 2 2", "0 5\n5 0");
        assert!(matches!(
            run_quiet(&bad_topology, &config),
            Err(Error::TopologyLoad(_))
        ));
        let mut bad_matrix = fixture.inputs("tleaf 1 2 1", "0 5\n5 0");
        bad_matrix.affinity = Path::new("/nonexistent/matrix.txt").to_path_buf();
        assert!(matches!(
            run_quiet(&bad_matrix, &config),
            Err(Error::AffinityLoad(_))
        ));
    }

    #[test]
    fn verbose_output_follows_the_thresholds() {
        let fixture = Fixture::new();
        let inputs = fixture.inputs("tleaf 2 2 10 2 1", &uniform_matrix(4));
        let output = |verbosity: Verbosity, display_solution: bool| {
            let (verbose, display) = (SharedBuffer::default(), SharedBuffer::default());
            let mut sink =
                VerboseSink::new(verbosity, Box::new(verbose.clone()), Box::new(display.clone()));
            let config = PipelineConfiguration {
                verbosity,
                display_solution,
                ..Default::default()
            };
            run(&inputs, &config, &mut sink).unwrap();
            (verbose.contents(), display.contents())
        };

        let (verbose, display) = output(Verbosity::ERROR, true);
        assert_eq!(verbose, "");
        let lines = display.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("TopoMatch: "));
        assert!(lines[1].starts_with("Packed: "));
        assert!(lines[4].starts_with("GreedySwap: "));

        let (verbose, display) = output(Verbosity::TIMING, false);
        assert_eq!(display, "");
        assert_eq!(verbose.lines().count(), 4);
        assert!(verbose.starts_with("I/O:"));

        let (verbose, _) = output(Verbosity::INFO, false);
        assert_eq!(verbose.matches("Topology arity: ").count(), 2);

        let (verbose, _) = output(Verbosity::DEBUG, false);
        assert!(!verbose.contains("Topology arity: "));
        assert_eq!(verbose.matches("leaf origins: ").count(), 2);
    }
}
