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

//! Structural transforms of a topology.
//!
//! Both transforms keep the leaf order and the origin of every leaf, so a
//! solution computed on the transformed tree can be reported on the
//! original one.

use super::{Tier, Topology};
use crate::error::Result;

/// Tier label of the slots added by oversubscription.
pub const OVERSUBSCRIPTION_TIER: &str = "Slot";

impl Topology {
    /// Multiply the capacity of every leaf by `factor`.
    ///
    /// Each leaf gets `factor` slots in a new bottom tier of cost 0. The slots
    /// keep the identifier and origin of their leaf.
    pub fn oversubscribe(&self, factor: usize) -> Result<Topology> {
        if factor <= 1 {
            return Ok(self.clone());
        }
        let mut tiers = self.tiers.clone();
        tiers.push(Tier::new(OVERSUBSCRIPTION_TIER, factor, 0.0));
        let (ids, origins): (Vec<_>, Vec<_>) = self
            .leaves()
            .flat_map(|l| std::iter::repeat((l.id, l.origin)).take(factor))
            .unzip();
        let mut topology = Topology::from_tiers(tiers, ids, Some(origins))?;
        topology.oversubscription = self.oversubscription * factor;
        topology.bindings = self.bindings.clone();
        log::debug!(
            "oversubscribed by {}: capacity {} -> {}",
            factor,
            self.capacity(),
            topology.capacity()
        );
        Ok(topology)
    }

    /// Reshape the tree so that the solver deals with small arities.
    ///
    /// Tiers of arity 1 are merged into their parent and composite arities
    /// are split into prime factors, largest first, each sub-tier keeping
    /// the cost of the tier it comes from.
    pub fn optimize(&self) -> Result<Topology> {
        let mut tiers = Vec::new();
        for tier in self.tiers.iter() {
            let factors = prime_factors(tier.arity);
            let split = factors.len() > 1;
            for (k, factor) in factors.into_iter().enumerate() {
                let label = if split {
                    format!("{}.{}", tier.label, k)
                } else {
                    tier.label.clone()
                };
                tiers.push(Tier::new(&label, factor, tier.cost));
            }
        }
        if tiers.is_empty() {
            // a single leaf: keep the bottom tier
            tiers.push(self.tiers[self.tiers.len() - 1].clone());
        }
        let (ids, origins): (Vec<_>, Vec<_>) = self.leaves().map(|l| (l.id, l.origin)).unzip();
        let mut topology = Topology::from_tiers(tiers, ids, Some(origins))?;
        topology.oversubscription = self.oversubscription;
        topology.bindings = self.bindings.clone();
        log::debug!(
            "optimized topology from {} to {} tiers",
            self.depth(),
            topology.depth()
        );
        Ok(topology)
    }
}

/// Prime factors of `n` in decreasing order; empty for 1.
fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors.reverse();
    factors
}
