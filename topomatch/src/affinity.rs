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
use std::fmt;
use std::path::Path;

/// Pairwise communication volume between processes.
///
/// The matrix is dense, square and non-negative. The diagonal is kept as
/// read but never used.
#[derive(Clone, Debug, PartialEq)]
pub struct AffinityMatrix {
    order: usize,
    values: Vec<f64>,
    nnz: usize,
}

impl AffinityMatrix {
    /// Build a matrix from its rows.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let order = rows.len();
        if order == 0 {
            return Err(Error::AffinityLoad("empty matrix".into()));
        }
        let mut values = Vec::with_capacity(order * order);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != order {
                return Err(Error::AffinityLoad(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    order
                )));
            }
            if let Some(v) = row.iter().find(|v| !(**v >= 0.0) || v.is_infinite()) {
                return Err(Error::AffinityLoad(format!(
                    "row {} holds an invalid weight {}",
                    i, v
                )));
            }
            values.extend(row);
        }
        Ok(Self::from_values(order, values))
    }

    fn from_values(order: usize, values: Vec<f64>) -> Self {
        let nnz = (0..order * order)
            .filter(|&k| k / order != k % order && values[k] > 0.0)
            .count();
        Self {
            order,
            values,
            nnz,
        }
    }

    /// Parse whitespace separated rows; `#` starts a comment.
    pub fn parse(text: &str) -> Result<Self> {
        let rows = text
            .lines()
            .enumerate()
            .map(|(n, line)| (n, line.split('#').next().unwrap_or("")))
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                line.split_whitespace()
                    .map(|token| {
                        token.parse::<f64>().map_err(|_| {
                            Error::AffinityLoad(format!(
                                "line {}: invalid weight '{}'",
                                n + 1,
                                token
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_rows(rows)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::AffinityLoad(format!("cannot read {}: {}", path.display(), e))
        })?;
        let matrix = Self::parse(&text).map_err(|e| match e {
            Error::AffinityLoad(msg) => {
                Error::AffinityLoad(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        log::debug!(
            "loaded {}x{} affinity matrix from {} ({} non-zero)",
            matrix.order,
            matrix.order,
            path.display(),
            matrix.nnz
        );
        Ok(matrix)
    }

    /// Number of processes.
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.order + j]
    }

    /// Volume exchanged between `i` and `j`, symmetrized.
    pub fn weight(&self, i: usize, j: usize) -> f64 {
        if i == j {
            0.0
        } else {
            (self.get(i, j) + self.get(j, i)) / 2.0
        }
    }

    /// Number of non-zero off-diagonal entries.
    pub fn nnz(&self) -> usize {
        self.nnz
    }

    pub fn max_value(&self) -> f64 {
        self.values.iter().cloned().fold(0.0, f64::max)
    }

    /// Drop every entry below `max * factor`.
    ///
    /// A factor of 0 keeps the matrix as is.
    pub fn sparsify(&self, factor: f64) -> AffinityMatrix {
        let threshold = self.max_value() * factor;
        let values = self
            .values
            .iter()
            .map(|&v| if v >= threshold { v } else { 0.0 })
            .collect();
        Self::from_values(self.order, values)
    }

    /// The symmetrized weights as rows, with a zero diagonal.
    pub(crate) fn symmetric(&self) -> Vec<Vec<f64>> {
        (0..self.order)
            .map(|i| (0..self.order).map(|j| self.weight(i, j)).collect())
            .collect()
    }
}

impl fmt::Display for AffinityMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Affinity matrix: {} processes, {} non-zero entries",
            self.order, self.nnz
        )
    }
}
