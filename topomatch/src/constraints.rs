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
use crate::topology::Topology;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// A process pinned to a leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub process: usize,
    /// Position of the leaf in the original topology.
    pub origin: usize,
}

/// Externally supplied process-to-leaf assignments.
///
/// Read from lines of `<process> <leaf>`; `#` starts a comment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindingConstraints {
    pins: BTreeMap<usize, usize>,
}

impl BindingConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `process` to the leaf identified by `leaf`.
    pub fn pin(&mut self, process: usize, leaf: usize) -> Result<()> {
        if let Some(prev) = self.pins.insert(process, leaf) {
            return Err(Error::Constraint(format!(
                "process {} is bound twice (leaves {} and {})",
                process, prev, leaf
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut constraints = Self::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("");
            let fields = line.split_whitespace().collect::<Vec<_>>();
            match fields.as_slice() {
                [] => continue,
                [process, leaf] => {
                    let parse = |v: &str| {
                        v.parse::<usize>().map_err(|_| {
                            Error::Constraint(format!("line {}: invalid number '{}'", n + 1, v))
                        })
                    };
                    constraints.pin(parse(*process)?, parse(*leaf)?)?;
                }
                _ => {
                    return Err(Error::Constraint(format!(
                        "line {}: expected '<process> <leaf>'",
                        n + 1
                    )))
                }
            }
        }
        Ok(constraints)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Constraint(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Check the constraints against the topology and store them in it.
    ///
    /// Every leaf must exist, every process must be below `processes`, and a
    /// leaf may hold at most `per_leaf` pinned processes.
    pub fn inject(&self, topology: &mut Topology, processes: usize, per_leaf: usize) -> Result<()> {
        let mut bindings = Vec::with_capacity(self.pins.len());
        let mut load = HashMap::<usize, usize>::new();
        for (&process, &leaf) in self.pins.iter() {
            if process >= processes {
                return Err(Error::Constraint(format!(
                    "process {} is out of range: there are {} processes",
                    process, processes
                )));
            }
            let index = topology.find_leaf(leaf).ok_or_else(|| {
                Error::Constraint(format!("leaf {} does not exist in the topology", leaf))
            })?;
            let origin = topology.leaf(index).origin;
            let count = load.entry(origin).or_insert(0);
            *count += 1;
            if *count > per_leaf {
                return Err(Error::Constraint(format!(
                    "leaf {} holds more than {} bound processes",
                    leaf, per_leaf
                )));
            }
            bindings.push(Binding { process, origin });
        }
        topology.set_bindings(&bindings);
        log::info!("bound {} processes", bindings.len());
        Ok(())
    }
}
