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

//! Rendering of a run: verbosity-gated messages, the displayed solution
//! and the stage timings.

use crate::config::{Metric, Verbosity};
use crate::heuristics::HeuristicResult;
use crate::solver::Solution;
use itertools::Itertools;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Duration;

/// Where a run writes what it reports.
///
/// Messages go to the verbose stream when the verbosity allows them; the
/// solution display always goes to the display stream.
pub struct VerboseSink {
    verbosity: Verbosity,
    verbose: Box<dyn Write>,
    display: Box<dyn Write>,
}

impl VerboseSink {
    pub fn new(verbosity: Verbosity, verbose: Box<dyn Write>, display: Box<dyn Write>) -> Self {
        Self {
            verbosity,
            verbose,
            display,
        }
    }

    /// Emit `message` if the verbosity includes `level`.
    pub fn emit<T: fmt::Display>(&mut self, level: Verbosity, message: T) {
        if self.verbosity.includes(level) {
            if let Err(e) = writeln!(self.verbose, "{}", message) {
                log::warn!("cannot write verbose output: {}", e);
            }
        }
    }

    /// Emit `message` only at exactly `level`.
    pub fn emit_exactly<T: fmt::Display>(&mut self, level: Verbosity, message: T) {
        if self.verbosity == level {
            self.emit(level, message);
        }
    }

    pub fn display<T: fmt::Display>(&mut self, message: T) {
        if let Err(e) = writeln!(self.display, "{}", message) {
            log::warn!("cannot write the solution: {}", e);
        }
    }

    pub fn flush(&mut self) {
        let flushed = self.verbose.flush().and_then(|_| self.display.flush());
        if let Err(e) = flushed {
            log::warn!("cannot flush output: {}", e);
        }
    }
}

/// An in-memory stream that can be read back after a run.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Duration of the pipeline stages, in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimingReport {
    pub io_ms: f64,
    pub optimize_ms: f64,
    pub mapping_ms: f64,
    pub total_ms: f64,
}

impl TimingReport {
    pub fn millis(duration: Duration) -> f64 {
        duration.as_nanos() as f64 / 1e6
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "I/O:            {:10.4} ms", self.io_ms)?;
        writeln!(f, "Optimize:       {:10.4} ms", self.optimize_ms)?;
        writeln!(f, "Mapping:        {:10.4} ms", self.mapping_ms)?;
        write!(f, "Total duration: {:10.4} ms", self.total_ms)
    }
}

/// Scores of the solution and of the baselines, on the original topology.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricsReport {
    pub metric: Metric,
    pub score: f64,
    pub heuristics: Vec<HeuristicResult>,
}

/// One placement line: leaf ids of the processes and the score.
pub fn solution_line(solution: &Solution, metric: Metric, score: f64) -> String {
    format!(
        "{} : {} = {:.6}",
        solution.ids().iter().format(","),
        metric.name(),
        score
    )
}

impl MetricsReport {
    /// The display lines, solver first.
    pub fn lines(&self, solution: &Solution) -> Vec<String> {
        std::iter::once(format!(
            "TopoMatch: {}",
            solution_line(solution, self.metric, self.score)
        ))
        .chain(self.heuristics.iter().map(|h| {
            format!(
                "{}: {}",
                h.heuristic,
                solution_line(&h.solution, self.metric, h.score)
            )
        }))
        .collect()
    }
}
