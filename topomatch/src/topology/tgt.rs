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

use super::{Tier, Topology, TopologyParser};
use crate::config::Numbering;
use crate::error::{Error, Result};

/// Reader for `tleaf` descriptions:
///
/// `tleaf <levels> <arity_1> <cost_1> ... <arity_levels> <cost_levels>`
///
/// Anything after a `#` is a comment. Leaves have no physical identifiers
/// in this format, so both numberings are identical.
pub struct TgtParser;

impl TopologyParser for TgtParser {
    fn parse(&self, text: &str, _numbering: Numbering) -> Result<Topology> {
        let mut tokens = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or(""))
            .flat_map(|line| line.split_whitespace());

        match tokens.next() {
            Some("tleaf") => {}
            Some(other) => {
                return Err(Error::TopologyLoad(format!(
                    "expected 'tleaf', found '{}'",
                    other
                )))
            }
            None => return Err(Error::TopologyLoad("empty description".into())),
        }
        let levels: usize = next_number(&mut tokens, "level count")?;
        let mut tiers = Vec::with_capacity(levels);
        for level in 1..=levels {
            let arity: usize = next_number(&mut tokens, "arity")?;
            let cost: f64 = next_number(&mut tokens, "cost")?;
            tiers.push(Tier::new(&format!("level{}", level), arity, cost));
        }
        if let Some(extra) = tokens.next() {
            return Err(Error::TopologyLoad(format!(
                "unexpected token '{}' after {} levels",
                extra, levels
            )));
        }
        let leaves = tiers.iter().map(|t| t.arity).product();
        Topology::from_tiers(tiers, (0..leaves).collect(), None)
    }
}

fn next_number<'a, T, I>(tokens: &mut I, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    I: Iterator<Item = &'a str>,
{
    let token = tokens
        .next()
        .ok_or_else(|| Error::TopologyLoad(format!("missing {}", what)))?;
    token
        .parse()
        .map_err(|_| Error::TopologyLoad(format!("invalid {} '{}'", what, token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tleaf() {
        let topo = TgtParser
            .parse("# two sockets\ntleaf 2 2 10\n 4 1 # cores\n", Numbering::Logical)
            .unwrap();
        assert_eq!(topo.leaf_count(), 8);
        assert_eq!(topo.tiers()[0], Tier::new("level1", 2, 10.0));
        assert_eq!(topo.tiers()[1], Tier::new("level2", 4, 1.0));
        assert_eq!(topo.leaf(5).id, 5);
    }

    #[test]
    fn reject_malformed() {
        for text in [
            "",
            "tree 1 2 1",
            "tleaf",
            "tleaf 2 2 10 4",
            "tleaf 1 x 1",
            "tleaf 1 2 1 7",
            "tleaf 1 0 1",
            "tleaf 1 2 -3",
        ] {
            assert!(
                matches!(
                    TgtParser.parse(text, Numbering::Logical),
                    Err(Error::TopologyLoad(_))
                ),
                "accepted '{}'",
                text
            );
        }
    }
}
