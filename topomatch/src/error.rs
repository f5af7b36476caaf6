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

use std::fmt;

/// Errors raised by the mapping pipeline.
///
/// None of them is recoverable: the pipeline stops at the first one.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Bad or missing configuration, detected before any stage runs.
    Usage(String),
    /// The topology description could not be read or is malformed.
    TopologyLoad(String),
    /// The affinity matrix could not be read or is malformed.
    AffinityLoad(String),
    /// Binding constraints are inconsistent with the topology.
    Constraint(String),
    /// More processes than the (possibly oversubscribed) topology can host.
    Capacity { processes: usize, capacity: usize },
    /// The solver could not produce a mapping.
    Solver(String),
}

impl Error {
    /// Short name of the error class, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Usage(_) => "UsageError",
            Self::TopologyLoad(_) => "TopologyLoadError",
            Self::AffinityLoad(_) => "AffinityLoadError",
            Self::Constraint(_) => "ConstraintError",
            Self::Capacity { .. } => "CapacityError",
            Self::Solver(_) => "SolverError",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Capacity {
                processes,
                capacity,
            } => write!(
                f,
                "{}: {} processes do not fit on a topology of capacity {}",
                self.kind(),
                processes,
                capacity
            ),
            Self::Usage(msg)
            | Self::TopologyLoad(msg)
            | Self::AffinityLoad(msg)
            | Self::Constraint(msg)
            | Self::Solver(msg) => write!(f, "{}: {}", self.kind(), msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
