//! Rewriting templates so a refactor operation sees only moved resources.
//!
//! [`generate_stack_definitions`] produces, for every stack touched by a
//! mapping, the template the stack should have right after the move: local
//! resources that correspond to something deployed, deployed resources the
//! local templates have not caught up with, and references re-rendered for
//! wherever their targets now live. Newly added resources are left out; they
//! follow a normal deployment afterwards.

mod exports;
mod references;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::digest::export_index;
use crate::model::{Resource, ResourceMapping, Stack, Template, TemplateError};

use exports::{Exports, prune_outputs};
use references::{Dangling, Namespaces, Origin, Renderer};

/// Errors that can occur while generating stack definitions.
#[derive(Debug, Error)]
pub enum RewriteError {
  #[error("stack '{stack}' would have no resources left after the refactor")]
  EmptyStack { stack: String },

  #[error("cannot move {from} onto {stack}.{logical_id}: a deployed resource that stays in place already uses that ID")]
  OccupiedDestination {
    stack: String,
    logical_id: String,
    from: String,
  },

  #[error("failed to render template for stack '{stack}': {source}")]
  Render {
    stack: String,
    #[source]
    source: TemplateError,
  },
}

/// A stack and the template to submit for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackDefinition {
  pub stack_name: String,
  pub template_body: String,
}

type Placed = BTreeMap<String, (Resource, Origin)>;

struct Assembled {
  template: Template,
  placed: Placed,
  metadata: Option<(String, Resource)>,
}

/// Generate the templates of every stack named by `mappings`.
///
/// Neither input slice is modified. Fails if a mapping lands on a deployed
/// resource that is not itself moving away, or if a returned stack would be
/// left without resources.
pub fn generate_stack_definitions(
  mappings: &[ResourceMapping],
  deployed: &[Stack],
  local: &[Stack],
) -> Result<Vec<StackDefinition>, RewriteError> {
  let deployed_by: HashMap<&str, &Stack> = deployed.iter().map(|s| (s.stack_name.as_str(), s)).collect();
  let local_by: HashMap<&str, &Stack> = local.iter().map(|s| (s.stack_name.as_str(), s)).collect();

  for m in mappings {
    let destination = &m.destination;
    let occupied = deployed_by
      .get(destination.stack_name.as_str())
      .is_some_and(|s| s.template.resources.contains_key(&destination.logical_id));
    let vacated = mappings
      .iter()
      .any(|o| o.source.is(&destination.stack_name, &destination.logical_id));
    if occupied && !vacated {
      return Err(RewriteError::OccupiedDestination {
        stack: destination.stack_name.clone(),
        logical_id: destination.logical_id.clone(),
        from: m.source.to_string(),
      });
    }
  }

  let involved: BTreeSet<&str> = mappings
    .iter()
    .flat_map(|m| [m.source.stack_name.as_str(), m.destination.stack_name.as_str()])
    .collect();
  let names: BTreeSet<&str> = deployed_by
    .keys()
    .chain(local_by.keys())
    .copied()
    .chain(involved.iter().copied())
    .collect();

  let mut templates = BTreeMap::new();
  let mut placements = BTreeMap::new();
  let mut metadata = BTreeMap::new();
  let mut present = HashMap::new();

  for name in &names {
    let assembled = assemble(
      name,
      local_by.get(name).copied(),
      deployed_by.get(name).copied(),
      &deployed_by,
      mappings,
    );
    let mut template = assembled.template;
    template.resources = assembled.placed.iter().map(|(id, (r, _))| (id.clone(), r.clone())).collect();
    prune_outputs(name, &mut template);

    present.insert(name.to_string(), assembled.placed.keys().cloned().collect());
    templates.insert(name.to_string(), template);
    placements.insert(name.to_string(), assembled.placed);
    if let Some(m) = assembled.metadata {
      metadata.insert(name.to_string(), m);
    }
  }

  let ns = Namespaces {
    mappings,
    deployed: &deployed_by,
    local: &local_by,
    deployed_exports: export_index(deployed),
    local_exports: local
      .iter()
      .flat_map(|s| s.template.exports().map(|(name, _, _)| name.to_string()))
      .collect(),
    present,
  };
  let mut exports = Exports {
    outputs: templates,
    deployed: &deployed_by,
    mappings,
  };

  for (name, placed) in placements {
    let mut resources = BTreeMap::new();
    for (logical_id, (body, origin)) in placed {
      let rendered = render(&ns, &mut exports, &name, &logical_id, &body, &origin);
      resources.insert(logical_id, rendered);
    }
    if let Some((id, resource)) = metadata.remove(&name) {
      resources.insert(id, resource);
    }
    exports.outputs.entry(name).or_default().resources = resources;
  }

  let mut definitions = Vec::with_capacity(involved.len());
  for name in involved {
    let template = exports.outputs.get(name).cloned().unwrap_or_default();
    if template.resources.values().all(Resource::is_cdk_metadata) {
      return Err(RewriteError::EmptyStack {
        stack: name.to_string(),
      });
    }
    let template_body = template.to_json().map_err(|source| RewriteError::Render {
      stack: name.to_string(),
      source,
    })?;
    definitions.push(StackDefinition {
      stack_name: name.to_string(),
      template_body,
    });
  }

  info!(stacks = definitions.len(), mappings = mappings.len(), "generated stack definitions");
  Ok(definitions)
}

/// Decide which resource bodies make up the template of stack `name`.
fn assemble(
  name: &str,
  local: Option<&Stack>,
  deployed: Option<&Stack>,
  deployed_by: &HashMap<&str, &Stack>,
  mappings: &[ResourceMapping],
) -> Assembled {
  let mut template = local.or(deployed).map(|s| s.template.clone()).unwrap_or_default();
  template.resources.clear();

  let deployed_resource = |stack: &str, id: &str| deployed_by.get(stack).and_then(|s| s.template.resources.get(id));
  let is_source = |id: &str| mappings.iter().any(|m| m.source.is(name, id));
  let mut placed = Placed::new();

  for (id, resource) in local.map(|s| &s.template.resources).into_iter().flatten() {
    if resource.is_cdk_metadata() {
      continue;
    }
    if let Some(m) = mappings.iter().find(|m| m.destination.is(name, id)) {
      let mut resource = resource.clone();
      // The refactor API cannot change construct paths during a move.
      if let Some(source) = deployed_resource(&m.source.stack_name, &m.source.logical_id) {
        resource.set_construct_path(source.construct_path());
      }
      placed.insert(id.clone(), (resource, Origin::Local));
    } else if deployed_resource(name, id).is_some() && !is_source(id) {
      placed.insert(id.clone(), (resource.clone(), Origin::Local));
    } else {
      debug!(stack = name, resource = %id, "leaving out resource not yet deployed");
    }
  }

  for m in mappings.iter().filter(|m| m.destination.stack_name == name) {
    if placed.contains_key(&m.destination.logical_id) {
      continue;
    }
    match deployed_resource(&m.source.stack_name, &m.source.logical_id) {
      Some(resource) => {
        placed.insert(
          m.destination.logical_id.clone(),
          (
            resource.clone(),
            Origin::Deployed {
              stack: m.source.stack_name.clone(),
            },
          ),
        );
      }
      None => warn!(source = %m.source, "mapping source is not deployed"),
    }
  }

  for (id, resource) in deployed.map(|s| &s.template.resources).into_iter().flatten() {
    if resource.is_cdk_metadata() || is_source(id) || placed.contains_key(id) {
      continue;
    }
    placed.insert(
      id.clone(),
      (
        resource.clone(),
        Origin::Deployed {
          stack: name.to_string(),
        },
      ),
    );
  }

  let metadata = deployed.and_then(|d| {
    let id = d.template.cdk_metadata_id()?;
    let resource = d.template.resources.get(id)?.clone();
    carry_condition(&mut template, &d.template, &resource);
    Some((id.to_string(), resource))
  });

  Assembled {
    template,
    placed,
    metadata,
  }
}

/// Copy the condition guarding a deployed resource if `template` lacks it.
fn carry_condition(template: &mut Template, deployed: &Template, resource: &Resource) {
  let Some(condition) = resource.extra.get("Condition").and_then(Value::as_str) else {
    return;
  };
  let Some(definition) = deployed.extra.get("Conditions").and_then(|c| c.get(condition)) else {
    return;
  };
  let conditions = template
    .extra
    .entry("Conditions")
    .or_insert_with(|| Value::Object(Map::new()));
  if let Value::Object(map) = conditions {
    map.entry(condition.to_string()).or_insert_with(|| definition.clone());
  }
}

/// Render one placed body, falling back to its deployed form when a local
/// body points at something that is being left out.
fn render<'a>(
  ns: &Namespaces<'a>,
  exports: &mut Exports<'a>,
  stack: &str,
  logical_id: &str,
  body: &Resource,
  origin: &Origin,
) -> Resource {
  let mut renderer = Renderer {
    ns,
    exports,
    stack,
    origin,
  };
  let dangling = match renderer.resource(body) {
    Ok(resource) => return resource,
    Err(Dangling(target)) => target,
  };

  let (from, from_id) = match ns.mappings.iter().find(|m| m.destination.is(stack, logical_id)) {
    Some(m) => (m.source.stack_name.clone(), m.source.logical_id.clone()),
    None => (stack.to_string(), logical_id.to_string()),
  };
  let Some(deployed_body) = ns.deployed.get(from.as_str()).and_then(|s| s.template.resources.get(&from_id)) else {
    warn!(stack, resource = logical_id, target = %dangling, "reference to a resource that is left out");
    return body.clone();
  };

  debug!(stack, resource = logical_id, target = %dangling, "using deployed body of resource");
  let fallback = Origin::Deployed { stack: from };
  let mut renderer = Renderer {
    ns,
    exports,
    stack,
    origin: &fallback,
  };
  renderer.resource(deployed_body).unwrap_or_else(|_| body.clone())
}
