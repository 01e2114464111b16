//! Content digests of resources.
//!
//! A resource digest is its synthetic, rename-invariant identity. It covers
//! the resource type and its identity-relevant properties, with every
//! reference to another resource replaced by that resource's own digest.
//! Renaming a resource together with everything that refers to it therefore
//! leaves all digests unchanged, while any semantic change propagates to
//! every dependent.
//!
//! Digests are computed in dependency order over the strongly connected
//! components of the reference graph. References that stay inside one
//! component (self references and true cycles) hash as a fixed marker.

mod schema;

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::consts::CYCLE_MARKER;
use crate::model::{Resource, ResourceReference, Stack, map_sub_variables};
use crate::util::hash::{ResourceDigest, digest_value};

pub use schema::PrimaryIdentifiers;

pub(crate) const IMPORT_VALUE: &str = "Fn::ImportValue";

/// Errors raised while preparing digest computation.
#[derive(Debug, Error)]
pub enum DigestError {
  #[error("failed to read primary identifiers {path}: {source}")]
  ReadIdentifiers {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse primary identifiers {path}: {source}")]
  ParseIdentifiers {
    path: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Key of a resource in the digest map: `StackName.LogicalId`.
pub fn digest_key(stack_name: &str, logical_id: &str) -> String {
  format!("{stack_name}.{logical_id}")
}

/// Index of export name -> (exporting stack, exported value expression).
pub(crate) fn export_index(stacks: &[Stack]) -> HashMap<String, (String, Value)> {
  stacks
    .iter()
    .flat_map(|s| {
      s.template
        .exports()
        .map(|(name, _, output)| (name.to_string(), (s.stack_name.clone(), output.value.clone())))
    })
    .collect()
}

/// Resolve an `{"Fn::ImportValue": "<name>"}` value to the reference behind the export.
pub(crate) fn resolve_import(value: &Value, exports: &HashMap<String, (String, Value)>) -> Option<ResourceReference> {
  let obj = value.as_object()?;
  if obj.len() != 1 {
    return None;
  }
  let name = obj.get(IMPORT_VALUE)?.as_str()?;
  let (stack, exported) = exports.get(name)?;
  match ResourceReference::from_value(stack, exported)? {
    r @ (ResourceReference::Ref { .. } | ResourceReference::GetAtt { .. }) => Some(r),
    _ => None,
  }
}

struct Entry<'a> {
  stack: &'a str,
  resource: &'a Resource,
  identity: Value,
}

/// Compute the digest of every resource in `stacks`.
///
/// Keys are `StackName.LogicalId`. Toolkit bookkeeping resources are not
/// digested.
pub fn compute_resource_digests(
  stacks: &[Stack],
  identifiers: &PrimaryIdentifiers,
) -> BTreeMap<String, ResourceDigest> {
  let exports = export_index(stacks);

  let mut entries: BTreeMap<String, Entry<'_>> = BTreeMap::new();
  for stack in stacks {
    for (logical_id, resource) in &stack.template.resources {
      if resource.is_cdk_metadata() {
        continue;
      }
      let identity = Value::Object(identifiers.identity_properties(&resource.resource_type, &resource.properties));
      entries.insert(
        digest_key(&stack.stack_name, logical_id),
        Entry {
          stack: &stack.stack_name,
          resource,
          identity,
        },
      );
    }
  }

  let mut graph: DiGraph<&str, ()> = DiGraph::new();
  let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
  for key in entries.keys() {
    nodes.insert(key.as_str(), graph.add_node(key.as_str()));
  }

  for (key, entry) in &entries {
    let mut deps = Vec::new();
    collect_dependencies(entry.stack, &entry.identity, &exports, &mut deps);
    deps.extend(entry.resource.depends_on.iter().map(|id| digest_key(entry.stack, id)));

    for dep in deps {
      if dep == *key {
        continue;
      }
      if let Some(&dep_idx) = nodes.get(dep.as_str()) {
        graph.update_edge(nodes[key.as_str()], dep_idx, ());
      }
    }
  }

  let mut digests: BTreeMap<String, ResourceDigest> = BTreeMap::new();

  // Components come out dependencies-first.
  for component in tarjan_scc(&graph) {
    let members: HashSet<&str> = component.iter().map(|&idx| graph[idx]).collect();
    if members.len() > 1 {
      debug!(resources = ?members, "dependency cycle between resources");
    }

    let mut computed = Vec::with_capacity(component.len());
    for idx in &component {
      let key = graph[*idx];
      let entry = &entries[key];

      let lookup = |target: &str| -> Option<String> {
        if members.contains(target) {
          Some(CYCLE_MARKER.to_string())
        } else {
          digests.get(target).map(|d| d.0.clone())
        }
      };

      let properties = substitute(entry.stack, &entry.identity, &exports, &lookup);
      let mut depends_on: Vec<String> = entry
        .resource
        .depends_on
        .iter()
        .map(|id| lookup(&digest_key(entry.stack, id)).unwrap_or_else(|| id.clone()))
        .collect();
      depends_on.sort();

      let digest = digest_value(&json!({
        "Type": entry.resource.resource_type,
        "Properties": properties,
        "DependsOn": depends_on,
      }));
      computed.push((key.to_string(), digest));
    }
    digests.extend(computed);
  }

  digests
}

/// Collect the digest keys of everything `value` refers to.
fn collect_dependencies(stack: &str, value: &Value, exports: &HashMap<String, (String, Value)>, out: &mut Vec<String>) {
  if let Some(reference) = ResourceReference::from_value(stack, value) {
    for target in reference.targets() {
      out.push(digest_key(stack, &target.logical_id));
    }
    if let ResourceReference::FnSub { variables, .. } = &reference {
      for v in variables.values() {
        collect_dependencies(stack, v, exports, out);
      }
    }
    return;
  }

  if let Some(imported) = resolve_import(value, exports) {
    for target in imported.targets() {
      out.push(digest_key(imported.stack(), &target.logical_id));
    }
    return;
  }

  match value {
    Value::Object(map) => map.values().for_each(|v| collect_dependencies(stack, v, exports, out)),
    Value::Array(items) => items.iter().for_each(|v| collect_dependencies(stack, v, exports, out)),
    _ => {}
  }
}

/// Replace every resolvable resource reference in `value` with the target's digest.
fn substitute<F>(stack: &str, value: &Value, exports: &HashMap<String, (String, Value)>, lookup: &F) -> Value
where
  F: Fn(&str) -> Option<String>,
{
  if let Some(reference) = ResourceReference::from_value(stack, value) {
    return substitute_reference(reference, exports, lookup).to_value();
  }

  // An import hashes like a direct reference so identity survives a stack boundary.
  if let Some(imported) = resolve_import(value, exports) {
    return substitute_reference(imported, exports, lookup).to_value();
  }

  match value {
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), substitute(stack, v, exports, lookup)))
        .collect(),
    ),
    Value::Array(items) => Value::Array(items.iter().map(|v| substitute(stack, v, exports, lookup)).collect()),
    other => other.clone(),
  }
}

fn substitute_reference<F>(
  reference: ResourceReference,
  exports: &HashMap<String, (String, Value)>,
  lookup: &F,
) -> ResourceReference
where
  F: Fn(&str) -> Option<String>,
{
  match reference {
    ResourceReference::Ref { stack, logical_id } => {
      let logical_id = lookup(&digest_key(&stack, &logical_id)).unwrap_or(logical_id);
      ResourceReference::Ref { stack, logical_id }
    }
    ResourceReference::GetAtt {
      stack,
      logical_id,
      attribute,
    } => {
      let logical_id = lookup(&digest_key(&stack, &logical_id)).unwrap_or(logical_id);
      ResourceReference::GetAtt {
        stack,
        logical_id,
        attribute,
      }
    }
    ResourceReference::FnSub {
      stack,
      template,
      variables,
    } => {
      let template = map_sub_variables(&template, |id, attr| {
        if variables.contains_key(id) {
          return None;
        }
        let digest = lookup(&digest_key(&stack, id))?;
        Some(match attr {
          Some(a) => format!("{digest}.{a}"),
          None => digest,
        })
      });
      let variables = variables
        .iter()
        .map(|(k, v)| (k.clone(), substitute(&stack, v, exports, lookup)))
        .collect();
      ResourceReference::FnSub {
        stack,
        template,
        variables,
      }
    }
    other @ ResourceReference::DependsOn { .. } => other,
  }
}
