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

mod affinity;
mod config;
mod constraints;
mod error;
mod evaluate;
mod heuristics;
mod pipeline;
mod report;
mod solver;
mod topology;

// Public types
pub use crate::affinity::AffinityMatrix;
pub use crate::config::{
    ActiveStrategy, MappingConfiguration, MappingStrategy, Metric, Numbering,
    PipelineConfiguration, Verbosity,
};
pub use crate::config::{BUCKET_GROUPING_THRESHOLD, SPARSE_FACTOR};
pub use crate::constraints::{Binding, BindingConstraints};
pub use crate::error::{Error, Result};
pub use crate::evaluate::evaluate;
pub use crate::heuristics::{compare_heuristics, Heuristic, HeuristicResult};
pub use crate::pipeline::{run, MappingInputs, MappingOutcome, TopologySource};
pub use crate::report::{MetricsReport, SharedBuffer, TimingReport, VerboseSink};
pub use crate::solver::{
    GreedyPartitioner, Grouping, MappingSolver, Partitioner, RefiningPartitioner, Solution,
    TreeMatchSolver,
};
pub use crate::topology::{
    load_topology, Leaf, TgtParser, Tier, Topology, TopologyFormat, TopologyNode, TopologyParser,
    XmlParser,
};
pub use petgraph::graph::{EdgeIndex, NodeIndex};
