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

//! Reader for hwloc-style XML topologies.
//!
//! Only the nesting of `<object>` elements matters: each nesting depth is a
//! tier, labelled by the `type` attribute of its objects. I/O and misc
//! objects are skipped, and so are memory objects that have no object
//! children (hwloc 2 attaches NUMA nodes as memory children). Physical leaf
//! identifiers come from the `os_index` attribute.

use super::{Tier, Topology, TopologyParser};
use crate::config::Numbering;
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Object types that never hold processing units.
const IGNORED_TYPES: [&str; 4] = ["Bridge", "PCIDev", "OSDev", "Misc"];
/// Object types that are kept only when they have children.
const MEMORY_TYPES: [&str; 2] = ["NUMANode", "MemCache"];

pub struct XmlParser;

#[derive(Debug, Default)]
struct Object {
    kind: String,
    os_index: Option<usize>,
    children: Vec<Object>,
}

enum Tag<'a> {
    Open(&'a str, bool),
    Close(&'a str),
}

impl TopologyParser for XmlParser {
    fn parse(&self, text: &str, numbering: Numbering) -> Result<Topology> {
        let root = parse_objects(text)?;
        let root = prune(root).ok_or_else(|| {
            Error::TopologyLoad("the root object holds no processing units".into())
        })?;

        let mut tiers = Vec::new();
        let mut level = vec![&root];
        while !level[0].children.is_empty() {
            let arity = level[0].children.len();
            let label = &level[0].children[0].kind;
            for object in level.iter() {
                if object.children.len() != arity {
                    return Err(Error::TopologyLoad(format!(
                        "unbalanced topology: {} objects have {} and {} children",
                        object.kind,
                        arity,
                        object.children.len()
                    )));
                }
                if let Some(child) = object.children.iter().find(|c| &c.kind != label) {
                    return Err(Error::TopologyLoad(format!(
                        "mixed object types {} and {} at depth {}",
                        label,
                        child.kind,
                        tiers.len() + 1
                    )));
                }
            }
            tiers.push(Tier::new(label, arity, 0.0));
            level = level.iter().flat_map(|o| o.children.iter()).collect();
        }
        if tiers.is_empty() {
            return Err(Error::TopologyLoad("the topology has a single object".into()));
        }
        let levels = tiers.len();
        for (depth, tier) in tiers.iter_mut().enumerate() {
            tier.cost = (levels - depth) as f64;
        }

        let ids = match numbering {
            Numbering::Logical => (0..level.len()).collect::<Vec<_>>(),
            Numbering::Physical => {
                let ids = level
                    .iter()
                    .enumerate()
                    .map(|(i, o)| o.os_index.unwrap_or(i))
                    .collect::<Vec<_>>();
                if ids.iter().collect::<HashSet<_>>().len() != ids.len() {
                    return Err(Error::TopologyLoad(
                        "duplicate os_index among the leaves".into(),
                    ));
                }
                ids
            }
        };
        Topology::from_tiers(tiers, ids, None)
    }
}

/// Remove the objects that cannot host processes.
fn prune(mut object: Object) -> Option<Object> {
    if IGNORED_TYPES.contains(&object.kind.as_str()) {
        return None;
    }
    let had_children = !object.children.is_empty();
    object.children = object.children.into_iter().filter_map(prune).collect();
    if MEMORY_TYPES.contains(&object.kind.as_str()) && object.children.is_empty() {
        return None;
    }
    if had_children && object.children.is_empty() {
        // only memory or I/O below: not a processing unit
        return None;
    }
    Some(object)
}

fn parse_objects(text: &str) -> Result<Object> {
    let mut stack: Vec<Object> = Vec::new();
    let mut root = None;
    for tag in tags(text)? {
        match tag {
            Tag::Open(body, self_closing) => {
                if tag_name(body) != "object" {
                    continue;
                }
                let object = Object {
                    kind: attribute(body, "type")
                        .ok_or_else(|| Error::TopologyLoad("object without a type".into()))?
                        .to_string(),
                    os_index: match attribute(body, "os_index") {
                        Some(v) => Some(v.parse().map_err(|_| {
                            Error::TopologyLoad(format!("invalid os_index '{}'", v))
                        })?),
                        None => None,
                    },
                    children: Vec::new(),
                };
                if self_closing {
                    attach(&mut stack, &mut root, object)?;
                } else {
                    stack.push(object);
                }
            }
            Tag::Close(name) => {
                if name != "object" {
                    continue;
                }
                let object = stack
                    .pop()
                    .ok_or_else(|| Error::TopologyLoad("unbalanced </object>".into()))?;
                attach(&mut stack, &mut root, object)?;
            }
        }
    }
    if !stack.is_empty() {
        return Err(Error::TopologyLoad("unterminated <object>".into()));
    }
    root.ok_or_else(|| Error::TopologyLoad("no <object> element".into()))
}

fn attach(stack: &mut Vec<Object>, root: &mut Option<Object>, object: Object) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(object),
        None if root.is_none() => *root = Some(object),
        None => return Err(Error::TopologyLoad("more than one root object".into())),
    }
    Ok(())
}

/// Split the document into element tags, skipping the prolog, comments and
/// text content.
fn tags(text: &str) -> Result<Vec<Tag>> {
    let mut tags = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        rest = &rest[start..];
        if rest.starts_with("<!--") {
            let end = rest
                .find("-->")
                .ok_or_else(|| Error::TopologyLoad("unterminated comment".into()))?;
            rest = &rest[end + 3..];
            continue;
        }
        let end = rest
            .find('>')
            .ok_or_else(|| Error::TopologyLoad("unterminated tag".into()))?;
        let body = &rest[1..end];
        rest = &rest[end + 1..];
        if body.starts_with('?') || body.starts_with('!') {
            continue;
        }
        if let Some(name) = body.strip_prefix('/') {
            tags.push(Tag::Close(name.trim()));
        } else if let Some(body) = body.strip_suffix('/') {
            tags.push(Tag::Open(body, true));
        } else {
            tags.push(Tag::Open(body, false));
        }
    }
    Ok(tags)
}

fn tag_name(body: &str) -> &str {
    body.split_whitespace().next().unwrap_or("")
}

fn attribute<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = body;
    while let Some(pos) = rest.find(name) {
        let before = rest[..pos].chars().last();
        let after = rest[pos + name.len()..].trim_start();
        rest = &rest[pos + name.len()..];
        if !matches!(before, Some(c) if c.is_whitespace()) {
            continue;
        }
        if let Some(value) = after.strip_prefix('=') {
            let value = value.trim_start();
            let quote = value.chars().next()?;
            if quote != '"' && quote != '\'' {
                return None;
            }
            let value = &value[1..];
            return value.find(quote).map(|end| &value[..end]);
        }
    }
    None
}
