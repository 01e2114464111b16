//! Outputs of rewritten templates: pruning and export lookup.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::debug;

use crate::consts::EXPORT_HASH_LEN;
use crate::model::{Output, ResourceMapping, ResourceReference, Stack, Template};
use crate::util::hash::short_hash;

/// Drop outputs whose value points at a resource the template no longer has.
pub(super) fn prune_outputs(stack_name: &str, template: &mut Template) {
  let parameters = template.extra.get("Parameters").and_then(Value::as_object).cloned().unwrap_or_default();
  let resources = &template.resources;
  let is_missing = |id: &str| !id.contains("::") && !resources.contains_key(id) && !parameters.contains_key(id);

  template.outputs.retain(|output_id, output| {
    let mut missing = None;
    visit_targets(stack_name, &output.value, &mut |id| {
      if missing.is_none() && is_missing(id) {
        missing = Some(id.to_string());
      }
    });
    match missing {
      Some(id) => {
        debug!(stack = stack_name, output = %output_id, resource = %id, "dropping output of removed resource");
        false
      }
      None => true,
    }
  });
}

fn visit_targets(stack_name: &str, value: &Value, f: &mut dyn FnMut(&str)) {
  if let Some(reference) = ResourceReference::from_value(stack_name, value) {
    for target in reference.targets() {
      f(&target.logical_id);
    }
    if let ResourceReference::FnSub { variables, .. } = reference {
      for v in variables.values() {
        visit_targets(stack_name, v, f);
      }
    }
    return;
  }
  match value {
    Value::Object(map) => map.values().for_each(|v| visit_targets(stack_name, v, f)),
    Value::Array(items) => items.iter().for_each(|v| visit_targets(stack_name, v, f)),
    _ => {}
  }
}

/// Export lookup over the templates being rewritten.
pub(super) struct Exports<'a> {
  pub outputs: BTreeMap<String, Template>,
  pub deployed: &'a HashMap<&'a str, &'a Stack>,
  pub mappings: &'a [ResourceMapping],
}

impl Exports<'_> {
  /// Whether any rewritten template exports `name`.
  pub fn is_exported(&self, name: &str) -> bool {
    self
      .outputs
      .values()
      .any(|t| t.exports().any(|(export, _, _)| export == name))
  }

  /// Name of an export of `logical_id` (or its `attribute`) in `stack`,
  /// creating one if needed.
  ///
  /// Existing exports in the rewritten template win, then exports the
  /// deployed stack already has for the same resource, then a generated one.
  pub fn ensure(&mut self, stack: &str, logical_id: &str, attribute: Option<&str>) -> String {
    let wanted = reference(stack, logical_id, attribute);

    let existing = self.outputs.get(stack).and_then(|t| {
      t.exports()
        .find(|(_, _, o)| ResourceReference::from_value(stack, &o.value).as_ref() == Some(&wanted))
        .map(|(name, _, _)| name.to_string())
    });
    if let Some(name) = existing {
      return name;
    }

    let reusable = self.deployed_export(stack, logical_id, attribute);
    let template = self.outputs.entry(stack.to_string()).or_default();

    if let Some((output_id, name)) = reusable {
      if !template.outputs.contains_key(&output_id) {
        debug!(stack, output = %output_id, export = %name, "reusing deployed export");
        template
          .outputs
          .insert(output_id, Output::exported(wanted.to_value(), name.clone()));
        return name;
      }
    }

    let output_id = generated_output_id(stack, logical_id, attribute);
    let name = format!("{stack}:{output_id}");
    debug!(stack, output = %output_id, export = %name, "creating export");
    template
      .outputs
      .insert(output_id, Output::exported(wanted.to_value(), name.clone()));
    name
  }

  /// Export the deployed `stack` already declares for the resource that now
  /// lives at `stack.logical_id`.
  fn deployed_export(&self, stack: &str, logical_id: &str, attribute: Option<&str>) -> Option<(String, String)> {
    let deployed = self.deployed.get(stack)?;

    let moved_here = self.mappings.iter().find(|m| m.destination.is(stack, logical_id));
    let deployed_id = match moved_here {
      Some(m) if m.source.stack_name == stack => m.source.logical_id.as_str(),
      Some(_) => return None,
      None if self.mappings.iter().any(|m| m.source.is(stack, logical_id)) => return None,
      None => logical_id,
    };

    let wanted = reference(stack, deployed_id, attribute);
    deployed
      .template
      .exports()
      .find(|(_, _, o)| ResourceReference::from_value(stack, &o.value).as_ref() == Some(&wanted))
      .map(|(name, output_id, _)| (output_id.to_string(), name.to_string()))
  }
}

fn reference(stack: &str, logical_id: &str, attribute: Option<&str>) -> ResourceReference {
  match attribute {
    Some(attr) => ResourceReference::GetAtt {
      stack: stack.to_string(),
      logical_id: logical_id.to_string(),
      attribute: attr.to_string(),
    },
    None => ResourceReference::Ref {
      stack: stack.to_string(),
      logical_id: logical_id.to_string(),
    },
  }
}

/// `ExportsOutputRef<Id><hash>` or `ExportsOutputFnGetAtt<Id><Attr><hash>`.
fn generated_output_id(stack: &str, logical_id: &str, attribute: Option<&str>) -> String {
  let alnum = |s: &str| s.chars().filter(char::is_ascii_alphanumeric).collect::<String>();
  match attribute {
    Some(attr) => format!(
      "ExportsOutputFnGetAtt{}{}{}",
      alnum(logical_id),
      alnum(attr),
      short_hash(&format!("{stack}/{logical_id}/{attr}"), EXPORT_HASH_LEN)
    ),
    None => format!(
      "ExportsOutputRef{}{}",
      alnum(logical_id),
      short_hash(&format!("{stack}/{logical_id}"), EXPORT_HASH_LEN)
    ),
  }
}
