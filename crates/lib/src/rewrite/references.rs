//! Re-rendering references of resource bodies placed into rewritten templates.
//!
//! A body is written in one of two namespaces. Bodies copied from a deployed
//! template name deployed logical IDs and are always followed through the
//! mapping set. Bodies taken from a local template already use the new
//! names, and are only touched where a reference no longer resolves.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value, json};

use crate::digest::{IMPORT_VALUE, resolve_import};
use crate::model::{Resource, ResourceMapping, ResourceReference, Stack, map_sub_variables};

use super::exports::Exports;

/// Where a resource body was taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Origin {
  Local,
  /// Copied from the deployed template of `stack`.
  Deployed { stack: String },
}

/// A local body points at a resource that will not exist after the refactor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Dangling(pub String);

/// Read-only state shared by every rendering.
pub(super) struct Namespaces<'a> {
  pub mappings: &'a [ResourceMapping],
  pub deployed: &'a HashMap<&'a str, &'a Stack>,
  pub local: &'a HashMap<&'a str, &'a Stack>,
  pub deployed_exports: HashMap<String, (String, Value)>,
  pub local_exports: BTreeSet<String>,
  /// Final logical IDs of every rewritten template.
  pub present: HashMap<String, BTreeSet<String>>,
}

enum Target {
  /// The reference stays exactly as written.
  Keep,
  /// The reference names a deployed resource and follows the mappings.
  Follow,
}

/// Outcome for one `${Id}` / `${Id.Attr}` variable of a `Fn::Sub`.
enum SubVariable {
  Keep,
  Rename {
    logical_id: String,
    attribute: Option<String>,
  },
  Import {
    stack: String,
    logical_id: String,
    attribute: Option<String>,
  },
}

impl Namespaces<'_> {
  fn is_source(&self, stack: &str, logical_id: &str) -> bool {
    self.mappings.iter().any(|m| m.source.is(stack, logical_id))
  }

  fn is_present(&self, stack: &str, logical_id: &str) -> bool {
    self.present.get(stack).is_some_and(|ids| ids.contains(logical_id))
  }
}

/// Renders one body into the template of `stack`.
pub(super) struct Renderer<'r, 'a> {
  pub ns: &'r Namespaces<'a>,
  pub exports: &'r mut Exports<'a>,
  pub stack: &'r str,
  pub origin: &'r Origin,
}

impl Renderer<'_, '_> {
  /// Stack whose logical IDs the body is written in.
  fn namespace(&self) -> &str {
    match self.origin {
      Origin::Local => self.stack,
      Origin::Deployed { stack } => stack,
    }
  }

  /// Decide whether a logical ID seen in the body must be followed.
  fn resolve(&self, logical_id: &str) -> Result<Target, Dangling> {
    match self.origin {
      Origin::Local => {
        if self.ns.is_present(self.stack, logical_id) {
          return Ok(Target::Keep);
        }
        if self.ns.is_source(self.stack, logical_id) {
          return Ok(Target::Follow);
        }
        let declared = self
          .ns
          .local
          .get(self.stack)
          .is_some_and(|s| s.template.resources.contains_key(logical_id));
        if declared {
          Err(Dangling(logical_id.to_string()))
        } else {
          Ok(Target::Keep)
        }
      }
      Origin::Deployed { stack: from } => {
        let declared = self
          .ns
          .deployed
          .get(from.as_str())
          .is_some_and(|s| s.template.resources.contains_key(logical_id));
        Ok(if declared { Target::Follow } else { Target::Keep })
      }
    }
  }

  /// `Ref`/`GetAtt` to `stack.logical_id` as seen from the rendering stack.
  fn point_at(&mut self, stack: &str, logical_id: &str, attribute: Option<&str>) -> Value {
    if stack == self.stack {
      return match attribute {
        Some(attr) => json!({"Fn::GetAtt": [logical_id, attr]}),
        None => json!({"Ref": logical_id}),
      };
    }
    json!({ IMPORT_VALUE: self.exports.ensure(stack, logical_id, attribute) })
  }

  /// Render a followed reference from the rendering stack.
  fn render(&mut self, moved: &ResourceReference, original: &Value) -> Value {
    match moved {
      ResourceReference::Ref { stack, logical_id } => self.point_at(stack, logical_id, None),
      ResourceReference::GetAtt {
        stack,
        logical_id,
        attribute,
      } => self.point_at(stack, logical_id, Some(attribute)),
      ResourceReference::DependsOn { .. } | ResourceReference::FnSub { .. } => original.clone(),
    }
  }

  /// Rewrite the reference-bearing parts of a resource.
  pub fn resource(&mut self, resource: &Resource) -> Result<Resource, Dangling> {
    let mut out = resource.clone();
    out.properties = self.map(&resource.properties)?;
    out.extra = self.map(&resource.extra)?;
    out.depends_on = self.depends_on(&resource.depends_on);
    Ok(out)
  }

  fn map(&mut self, map: &Map<String, Value>) -> Result<Map<String, Value>, Dangling> {
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
      out.insert(key.clone(), self.value(value)?);
    }
    Ok(out)
  }

  /// Keep the dependencies that still live in the rendering stack.
  ///
  /// Cross-stack ordering is carried by the import itself.
  fn depends_on(&self, logical_ids: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(logical_ids.len());
    let mut follow = Vec::new();
    for id in logical_ids {
      match self.resolve(id) {
        Ok(Target::Keep) => out.push(id.clone()),
        Ok(Target::Follow) => follow.push(id.clone()),
        Err(_) => {}
      }
    }

    let namespace = self.namespace();
    if namespace == self.stack {
      let moved = ResourceReference::depends_on(namespace, &follow).replace(self.ns.mappings);
      out.extend(moved.targets().into_iter().map(|t| t.logical_id));
    } else {
      // The holder itself moved; only dependencies that moved along survive.
      for logical_id in follow {
        let moved = ResourceReference::Ref {
          stack: namespace.to_string(),
          logical_id,
        }
        .replace(self.ns.mappings);
        if moved.stack() == self.stack {
          out.extend(moved.targets().into_iter().map(|t| t.logical_id));
        }
      }
    }

    let mut seen = BTreeSet::new();
    out.retain(|id| self.ns.is_present(self.stack, id) && seen.insert(id.clone()));
    out
  }

  fn value(&mut self, value: &Value) -> Result<Value, Dangling> {
    match value {
      Value::Object(map) if map.len() == 1 => {
        if let Some(import) = map.get(IMPORT_VALUE) {
          return match import {
            Value::String(name) => self.import(value, name),
            other => Ok(json!({ IMPORT_VALUE: self.value(other)? })),
          };
        }
        match ResourceReference::from_value(self.namespace(), value) {
          Some(reference @ (ResourceReference::Ref { .. } | ResourceReference::GetAtt { .. })) => {
            self.direct(value, &reference)
          }
          Some(ResourceReference::FnSub {
            template, variables, ..
          }) => self.sub(&template, &variables),
          // `DependsOn` lives beside the properties, never inside them.
          Some(ResourceReference::DependsOn { .. }) | None => Ok(Value::Object(self.map(map)?)),
        }
      }
      Value::Object(map) => Ok(Value::Object(self.map(map)?)),
      Value::Array(items) => items.iter().map(|v| self.value(v)).collect::<Result<Vec<_>, _>>().map(Value::Array),
      other => Ok(other.clone()),
    }
  }

  fn direct(&mut self, original: &Value, reference: &ResourceReference) -> Result<Value, Dangling> {
    for target in reference.targets() {
      if let Target::Keep = self.resolve(&target.logical_id)? {
        return Ok(original.clone());
      }
    }
    let moved = reference.replace(self.ns.mappings);
    if moved == *reference && moved.stack() == self.stack {
      return Ok(original.clone());
    }
    Ok(self.render(&moved, original))
  }

  fn import(&mut self, original: &Value, name: &str) -> Result<Value, Dangling> {
    if matches!(self.origin, Origin::Local) {
      if self.exports.is_exported(name) {
        return Ok(original.clone());
      }
      if self.ns.local_exports.contains(name) {
        return Err(Dangling(name.to_string()));
      }
    }

    let Some(reference) = resolve_import(original, &self.ns.deployed_exports) else {
      return Ok(original.clone());
    };
    let moved = reference.replace(self.ns.mappings);
    Ok(self.render(&moved, original))
  }

  /// Classify one `Fn::Sub` variable that the variable map does not bind.
  fn sub_variable(&self, logical_id: &str, attribute: Option<&str>) -> Result<SubVariable, Dangling> {
    if let Target::Keep = self.resolve(logical_id)? {
      return Ok(SubVariable::Keep);
    }
    let stack = self.namespace().to_string();
    let reference = match attribute {
      Some(attr) => ResourceReference::GetAtt {
        stack,
        logical_id: logical_id.to_string(),
        attribute: attr.to_string(),
      },
      None => ResourceReference::Ref {
        stack,
        logical_id: logical_id.to_string(),
      },
    };

    let (stack, logical_id, attribute) = match reference.replace(self.ns.mappings) {
      ResourceReference::Ref { stack, logical_id } => (stack, logical_id, None),
      ResourceReference::GetAtt {
        stack,
        logical_id,
        attribute,
      } => (stack, logical_id, Some(attribute)),
      ResourceReference::DependsOn { .. } | ResourceReference::FnSub { .. } => return Ok(SubVariable::Keep),
    };
    Ok(if stack == self.stack {
      SubVariable::Rename { logical_id, attribute }
    } else {
      SubVariable::Import {
        stack,
        logical_id,
        attribute,
      }
    })
  }

  fn sub(&mut self, template: &str, variables: &Map<String, Value>) -> Result<Value, Dangling> {
    let mut variables = self.map(variables)?;
    let mut dangling = None;

    // Names the rewritten `Fn::Sub` keeps using; generated imports avoid them.
    let mut taken: BTreeSet<String> = variables.keys().cloned().collect();
    map_sub_variables(template, |id, attr| {
      if variables.contains_key(id) {
        return None;
      }
      match self.sub_variable(id, attr) {
        Ok(SubVariable::Keep) => {
          taken.insert(id.to_string());
        }
        Ok(SubVariable::Rename { logical_id, .. }) => {
          taken.insert(logical_id);
        }
        Ok(SubVariable::Import { .. }) => {}
        Err(d) => {
          dangling.get_or_insert(d);
        }
      }
      None
    });
    if let Some(d) = dangling {
      return Err(d);
    }

    let mut imports: Vec<(String, (String, String, Option<String>))> = Vec::new();
    let rendered = map_sub_variables(template, |id, attr| {
      if variables.contains_key(id) {
        return None;
      }
      match self.sub_variable(id, attr) {
        Ok(SubVariable::Rename { logical_id, attribute }) => Some(match attribute {
          Some(a) => format!("{logical_id}.{a}"),
          None => logical_id,
        }),
        Ok(SubVariable::Import {
          stack,
          logical_id,
          attribute,
        }) => {
          let target = (stack, logical_id, attribute);
          if let Some((name, _)) = imports.iter().find(|(_, t)| *t == target) {
            return Some(name.clone());
          }
          let name = import_variable_name(&target.1, target.2.as_deref(), &mut taken);
          imports.push((name.clone(), target));
          Some(name)
        }
        Ok(SubVariable::Keep) | Err(_) => None,
      }
    });

    for (name, (stack, logical_id, attribute)) in imports {
      let value = self.point_at(&stack, &logical_id, attribute.as_deref());
      variables.insert(name, value);
    }

    Ok(if variables.is_empty() {
      json!({ "Fn::Sub": rendered })
    } else {
      json!({ "Fn::Sub": [rendered, variables] })
    })
  }
}

/// Alphanumeric `<Id><Attr>`, suffixed with a counter until it is not `taken`.
fn import_variable_name(logical_id: &str, attribute: Option<&str>, taken: &mut BTreeSet<String>) -> String {
  let base: String = format!("{logical_id}{}", attribute.unwrap_or_default())
    .chars()
    .filter(char::is_ascii_alphanumeric)
    .collect();
  let mut name = base.clone();
  let mut counter = 2;
  while taken.contains(&name) {
    name = format!("{base}{counter}");
    counter += 1;
  }
  taken.insert(name.clone());
  name
}
