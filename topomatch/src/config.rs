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

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

/// Default threshold, in thousands of groups, above which bucket grouping is used.
pub const BUCKET_GROUPING_THRESHOLD: u64 = 30;

/// Default sparsification factor: keep only the heaviest entries.
pub const SPARSE_FACTOR: f64 = 1.0;

/// Cost function used to score a solution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Sum of the pairwise communication weighted by the cost of the tier
    /// where the two processes meet.
    SumCom,
    /// Heaviest weighted traffic crossing a single link of the tree.
    MaxCom,
    /// Pairwise communication weighted by the number of hops.
    HopByte,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::SumCom
    }
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::SumCom => "sum_com",
            Metric::MaxCom => "max_com",
            Metric::HopByte => "hop_byte",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1" | "sum_com" => Ok(Metric::SumCom),
            "2" | "max_com" => Ok(Metric::MaxCom),
            "3" | "hop_byte" => Ok(Metric::HopByte),
            _ => Err(Error::Usage(format!(
                "invalid metric {}: expected 1 (sum_com), 2 (max_com) or 3 (hop_byte)",
                s
            ))),
        }
    }
}

/// How leaves are identified in solutions and binding constraints.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Numbering {
    /// Leaves are numbered 0..L-1 in tree order.
    Logical,
    /// Leaves keep the identifiers of the topology description.
    Physical,
}

impl Default for Numbering {
    fn default() -> Self {
        Numbering::Logical
    }
}

/// The mapping strategy variant for the leaves of the tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStrategy {
    /// Bottom-up grouping over the tiers of the tree.
    TreeMatch,
    /// Recursive partitioning of a sparsified affinity graph.
    Partitioner,
}

impl Default for MappingStrategy {
    fn default() -> Self {
        MappingStrategy::TreeMatch
    }
}

impl FromStr for MappingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" | "tree_match" => Ok(MappingStrategy::TreeMatch),
            "1" | "partitioner" => Ok(MappingStrategy::Partitioner),
            _ => Err(Error::Usage(format!(
                "invalid leaf strategy {}: expected 0 (default) or 1 (partitioner)",
                s
            ))),
        }
    }
}

/// The one strategy the solver runs with, resolved from the configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveStrategy {
    /// Greedy bottom-up grouping.
    Native,
    /// Bottom-up grouping enumerating every partition of each tier.
    Exhaustive,
    /// Bottom-up grouping driven by bucketed pair weights.
    BucketGrouping,
    /// Greedy top-down k-way partitioning.
    KPartition,
    /// Top-down partitioning with swap refinement on a sparsified matrix.
    Partitioner,
}

impl fmt::Display for ActiveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ActiveStrategy::Native => "native",
            ActiveStrategy::Exhaustive => "exhaustive",
            ActiveStrategy::BucketGrouping => "bucket-grouping",
            ActiveStrategy::KPartition => "k-partition",
            ActiveStrategy::Partitioner => "partitioner",
        };
        f.write_str(name)
    }
}

/// Verbosity of the diagnostic output, from 0 (silent) to 7.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Verbosity(pub u8);

impl Verbosity {
    pub const NONE: Verbosity = Verbosity(0);
    pub const CRITICAL: Verbosity = Verbosity(1);
    pub const ERROR: Verbosity = Verbosity(2);
    pub const WARNING: Verbosity = Verbosity(3);
    pub const TIMING: Verbosity = Verbosity(4);
    pub const INFO: Verbosity = Verbosity(5);
    pub const DEBUG: Verbosity = Verbosity(6);
    pub const EXTRA: Verbosity = Verbosity(7);

    /// true if a message at `level` is emitted at this verbosity.
    pub fn includes(&self, level: Verbosity) -> bool {
        *self != Verbosity::NONE && *self >= level
    }

    /// The `log` filter matching this verbosity.
    pub fn log_filter(&self) -> log::LevelFilter {
        match self.0 {
            0 => log::LevelFilter::Off,
            1 | 2 => log::LevelFilter::Error,
            3 | 4 => log::LevelFilter::Warn,
            5 => log::LevelFilter::Info,
            6 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::ERROR
    }
}

/// Solver configuration, fixed before a run and read-only during it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MappingConfiguration {
    pub exhaustive_search: bool,
    pub greedy: bool,
    pub numbering: Numbering,
    /// In thousands of groups.
    pub bucket_grouping_threshold: u64,
    /// Entries below `max * sparse_factor` are ignored by the partitioner.
    pub sparse_factor: f64,
    /// `None` uses every available core.
    pub max_threads: Option<usize>,
    pub strategy: MappingStrategy,
}

impl Default for MappingConfiguration {
    fn default() -> Self {
        Self {
            exhaustive_search: false,
            greedy: false,
            numbering: Numbering::Logical,
            bucket_grouping_threshold: BUCKET_GROUPING_THRESHOLD,
            sparse_factor: SPARSE_FACTOR,
            max_threads: None,
            strategy: MappingStrategy::TreeMatch,
        }
    }
}

impl MappingConfiguration {
    /// Exhaustive search never falls back to bucket grouping.
    pub fn force_exhaustive_search(&mut self) {
        self.exhaustive_search = true;
        self.bucket_grouping_threshold = u64::MAX;
    }

    /// Stores the factor clamped to [0, 1].
    pub fn set_sparse_factor(&mut self, factor: f64) {
        self.sparse_factor = clamp_sparse_factor(factor);
    }

    /// Resolve the single strategy to run for a problem whose widest tier
    /// has `groups` groups.
    pub fn active_strategy(&self, groups: usize) -> ActiveStrategy {
        if self.strategy == MappingStrategy::Partitioner {
            ActiveStrategy::Partitioner
        } else if self.greedy {
            ActiveStrategy::KPartition
        } else if self.exhaustive_search {
            ActiveStrategy::Exhaustive
        } else if (groups as u64) > self.bucket_grouping_threshold.saturating_mul(1000) {
            ActiveStrategy::BucketGrouping
        } else {
            ActiveStrategy::Native
        }
    }
}

fn clamp_sparse_factor(factor: f64) -> f64 {
    if factor < 0.0 {
        0.0
    } else if factor > 1.0 {
        1.0
    } else {
        factor
    }
}

/// Everything a pipeline run needs besides its inputs.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfiguration {
    pub metric: Metric,
    pub oversubscription: usize,
    pub optimize_topology: bool,
    pub display_solution: bool,
    pub verbosity: Verbosity,
    pub solver: MappingConfiguration,
}

impl Default for PipelineConfiguration {
    fn default() -> Self {
        Self {
            metric: Metric::SumCom,
            oversubscription: 1,
            optimize_topology: true,
            display_solution: true,
            verbosity: Verbosity::default(),
            solver: MappingConfiguration::default(),
        }
    }
}

impl PipelineConfiguration {
    pub fn from_file(file_name: &Path) -> Result<Self> {
        let file = File::open(file_name).map_err(|e| {
            Error::Usage(format!(
                "cannot open configuration {}: {}",
                file_name.display(),
                e
            ))
        })?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).map_err(|e| {
            Error::Usage(format!(
                "invalid configuration {}: {}",
                file_name.display(),
                e
            ))
        })
    }

    pub fn from_str(config: &str) -> Result<Self> {
        serde_yaml::from_str(config)
            .map_err(|e| Error::Usage(format!("invalid configuration: {}", e)))
    }

    /// Check the invariants of the configuration.
    ///
    /// The sparsification factor is clamped rather than rejected.
    pub fn validate(mut self) -> Result<Self> {
        if self.solver.sparse_factor.is_nan() {
            return Err(Error::Usage("sparsification factor is not a number".into()));
        }
        self.solver.sparse_factor = clamp_sparse_factor(self.solver.sparse_factor);
        if self.oversubscription == 0 {
            return Err(Error::Usage(
                "oversubscription factor must be at least 1".into(),
            ));
        }
        if self.solver.max_threads == Some(0) {
            return Err(Error::Usage("thread count must be at least 1".into()));
        }
        if self.verbosity > Verbosity::EXTRA {
            self.verbosity = Verbosity::EXTRA;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_factor_is_clamped() {
        let mut config = PipelineConfiguration::default();
        config.solver.sparse_factor = -0.5;
        assert_eq!(config.validate().unwrap().solver.sparse_factor, 0.0);

        let mut config = PipelineConfiguration::default();
        config.solver.sparse_factor = 1.5;
        assert_eq!(config.validate().unwrap().solver.sparse_factor, 1.0);

        let mut solver = MappingConfiguration::default();
        solver.set_sparse_factor(0.25);
        assert_eq!(solver.sparse_factor, 0.25);
    }

    #[test]
    fn invalid_values_are_usage_errors() {
        let config = PipelineConfiguration {
            oversubscription: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Usage(_))));

        let mut config = PipelineConfiguration::default();
        config.solver.max_threads = Some(0);
        assert!(matches!(config.validate(), Err(Error::Usage(_))));

        assert!(matches!("4".parse::<Metric>(), Err(Error::Usage(_))));
        assert!(matches!("2".parse::<MappingStrategy>(), Err(Error::Usage(_))));
    }

    #[test]
    fn strategy_precedence() {
        let mut solver = MappingConfiguration::default();
        assert_eq!(solver.active_strategy(10), ActiveStrategy::Native);
        assert_eq!(solver.active_strategy(30_001), ActiveStrategy::BucketGrouping);

        solver.force_exhaustive_search();
        assert_eq!(solver.active_strategy(30_001), ActiveStrategy::Exhaustive);

        solver.greedy = true;
        assert_eq!(solver.active_strategy(10), ActiveStrategy::KPartition);

        solver.strategy = MappingStrategy::Partitioner;
        assert_eq!(solver.active_strategy(10), ActiveStrategy::Partitioner);
    }

    #[test]
    fn verbosity_thresholds() {
        assert!(!Verbosity::NONE.includes(Verbosity::NONE));
        assert!(Verbosity::TIMING.includes(Verbosity::TIMING));
        assert!(!Verbosity::WARNING.includes(Verbosity::TIMING));
        assert!(Verbosity::EXTRA.includes(Verbosity::DEBUG));
        assert_eq!(Verbosity::NONE.log_filter(), log::LevelFilter::Off);
    }

    #[test]
    fn read_yaml_config() {
        let conf_str = "---
metric: hop_byte
oversubscription: 2
verbosity: 4
solver:
  greedy: true
  max_threads: 3
";
        let config = PipelineConfiguration::from_str(conf_str).unwrap();
        assert_eq!(config.metric, Metric::HopByte);
        assert_eq!(config.oversubscription, 2);
        assert_eq!(config.verbosity, Verbosity::TIMING);
        assert!(config.optimize_topology);
        assert!(config.solver.greedy);
        assert_eq!(config.solver.max_threads, Some(3));
        assert_eq!(
            config.solver.bucket_grouping_threshold,
            BUCKET_GROUPING_THRESHOLD
        );
    }
}
