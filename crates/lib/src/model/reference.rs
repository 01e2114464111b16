//! References between resources of the same template.
//!
//! A template expresses "resource A points at resource B" in four ways:
//!
//! - `{"Ref": "B"}`
//! - `{"Fn::GetAtt": ["B", "Arn"]}` (or `"B.Arn"`)
//! - `"DependsOn": ["B"]` on the resource itself
//! - `{"Fn::Sub": "arn:${B}/${B.Arn}"}`, where only `${Id}` and `${Id.Attr}`
//!   variables not bound by the variable map denote resources
//!
//! [`ResourceReference`] is the closed set of these shapes. Every variant
//! knows the stack whose namespace its logical IDs live in.

use serde_json::{Map, Value};

use super::location::ResourceMapping;

const REF: &str = "Ref";
const GET_ATT: &str = "Fn::GetAtt";
const SUB: &str = "Fn::Sub";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceReference {
  Ref {
    stack: String,
    logical_id: String,
  },
  GetAtt {
    stack: String,
    logical_id: String,
    attribute: String,
  },
  DependsOn {
    stack: String,
    logical_ids: Vec<String>,
  },
  FnSub {
    stack: String,
    template: String,
    variables: Map<String, Value>,
  },
}

/// One resource pointed at by a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
  pub logical_id: String,
  pub attribute: Option<String>,
}

impl ResourceReference {
  /// Recognize a reference-shaped JSON value.
  ///
  /// Returns `None` for anything that is not exactly a single-key `Ref`,
  /// `Fn::GetAtt` or `Fn::Sub` object with literal arguments.
  pub fn from_value(stack: &str, value: &Value) -> Option<Self> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
      return None;
    }
    let (key, arg) = obj.iter().next()?;
    let stack = stack.to_string();

    match key.as_str() {
      REF => Some(Self::Ref {
        stack,
        logical_id: arg.as_str()?.to_string(),
      }),
      GET_ATT => {
        let (logical_id, attribute) = match arg {
          Value::String(s) => {
            let (id, attr) = s.split_once('.')?;
            (id.to_string(), attr.to_string())
          }
          Value::Array(items) if items.len() == 2 => (items[0].as_str()?.to_string(), items[1].as_str()?.to_string()),
          _ => return None,
        };
        Some(Self::GetAtt {
          stack,
          logical_id,
          attribute,
        })
      }
      SUB => {
        let (template, variables) = match arg {
          Value::String(s) => (s.clone(), Map::new()),
          Value::Array(items) if items.len() == 2 => (items[0].as_str()?.to_string(), items[1].as_object()?.clone()),
          _ => return None,
        };
        Some(Self::FnSub {
          stack,
          template,
          variables,
        })
      }
      _ => None,
    }
  }

  pub fn depends_on(stack: &str, logical_ids: &[String]) -> Self {
    Self::DependsOn {
      stack: stack.to_string(),
      logical_ids: logical_ids.to_vec(),
    }
  }

  /// Stack whose namespace the referenced logical IDs belong to.
  pub fn stack(&self) -> &str {
    match self {
      Self::Ref { stack, .. } | Self::GetAtt { stack, .. } | Self::DependsOn { stack, .. } | Self::FnSub { stack, .. } => {
        stack
      }
    }
  }

  /// Render back to the template shape.
  pub fn to_value(&self) -> Value {
    match self {
      Self::Ref { logical_id, .. } => single(REF, Value::String(logical_id.clone())),
      Self::GetAtt {
        logical_id, attribute, ..
      } => single(
        GET_ATT,
        Value::Array(vec![Value::String(logical_id.clone()), Value::String(attribute.clone())]),
      ),
      Self::DependsOn { logical_ids, .. } => {
        Value::Array(logical_ids.iter().map(|id| Value::String(id.clone())).collect())
      }
      Self::FnSub {
        template, variables, ..
      } => {
        if variables.is_empty() {
          single(SUB, Value::String(template.clone()))
        } else {
          single(
            SUB,
            Value::Array(vec![Value::String(template.clone()), Value::Object(variables.clone())]),
          )
        }
      }
    }
  }

  /// Every resource this reference may point at.
  ///
  /// Callers decide which targets are real resources; pseudo parameters and
  /// template parameters show up here too.
  pub fn targets(&self) -> Vec<ReferenceTarget> {
    match self {
      Self::Ref { logical_id, .. } => vec![ReferenceTarget {
        logical_id: logical_id.clone(),
        attribute: None,
      }],
      Self::GetAtt {
        logical_id, attribute, ..
      } => vec![ReferenceTarget {
        logical_id: logical_id.clone(),
        attribute: Some(attribute.clone()),
      }],
      Self::DependsOn { logical_ids, .. } => logical_ids
        .iter()
        .map(|id| ReferenceTarget {
          logical_id: id.clone(),
          attribute: None,
        })
        .collect(),
      Self::FnSub {
        template, variables, ..
      } => {
        let mut targets = Vec::new();
        map_sub_variables(template, |id, attr| {
          if !variables.contains_key(id) {
            targets.push(ReferenceTarget {
              logical_id: id.to_string(),
              attribute: attr.map(str::to_string),
            });
          }
          None
        });
        targets
      }
    }
  }

  /// Substitute logical IDs according to `mappings`.
  ///
  /// `Ref` and `GetAtt` follow their target to whichever stack it moved to.
  /// `DependsOn` and `FnSub` stay within their stack: entries that moved to
  /// another stack are dropped from `DependsOn` and left untouched in
  /// `FnSub`. Without a matching mapping the reference is returned as is.
  pub fn replace(&self, mappings: &[ResourceMapping]) -> Self {
    let lookup = |stack: &str, id: &str| mappings.iter().find(|m| m.source.is(stack, id)).map(|m| &m.destination);

    match self {
      Self::Ref { stack, logical_id } => match lookup(stack, logical_id) {
        Some(dest) => Self::Ref {
          stack: dest.stack_name.clone(),
          logical_id: dest.logical_id.clone(),
        },
        None => self.clone(),
      },
      Self::GetAtt {
        stack,
        logical_id,
        attribute,
      } => match lookup(stack, logical_id) {
        Some(dest) => Self::GetAtt {
          stack: dest.stack_name.clone(),
          logical_id: dest.logical_id.clone(),
          attribute: attribute.clone(),
        },
        None => self.clone(),
      },
      Self::DependsOn { stack, logical_ids } => Self::DependsOn {
        stack: stack.clone(),
        logical_ids: logical_ids
          .iter()
          .filter_map(|id| match lookup(stack, id) {
            Some(dest) if dest.stack_name == *stack => Some(dest.logical_id.clone()),
            Some(_) => None,
            None => Some(id.clone()),
          })
          .collect(),
      },
      Self::FnSub {
        stack,
        template,
        variables,
      } => {
        let template = map_sub_variables(template, |id, attr| {
          if variables.contains_key(id) {
            return None;
          }
          match lookup(stack, id) {
            Some(dest) if dest.stack_name == *stack => Some(match attr {
              Some(a) => format!("{}.{}", dest.logical_id, a),
              None => dest.logical_id.clone(),
            }),
            _ => None,
          }
        });
        Self::FnSub {
          stack: stack.clone(),
          template,
          variables: variables.clone(),
        }
      }
    }
  }
}

fn single(key: &str, value: Value) -> Value {
  let mut map = Map::new();
  map.insert(key.to_string(), value);
  Value::Object(map)
}

/// Visit every `${Id}` / `${Id.Attr}` variable of a `Fn::Sub` template.
///
/// `f` receives the logical ID and optional attribute; returning `Some(name)`
/// replaces the variable with `${name}`. Literal `${!...}` sequences and
/// pseudo parameters (`${AWS::Region}`) are never visited. Returns the
/// rewritten template.
pub fn map_sub_variables<F>(template: &str, mut f: F) -> String
where
  F: FnMut(&str, Option<&str>) -> Option<String>,
{
  let mut out = String::with_capacity(template.len());
  let mut rest = template;

  while let Some(start) = rest.find("${") {
    out.push_str(&rest[..start]);
    let after = &rest[start + 2..];
    let Some(end) = after.find('}') else {
      out.push_str(&rest[start..]);
      return out;
    };
    let content = &after[..end];

    let replacement = if content.starts_with('!') || content.contains("::") || content.is_empty() {
      None
    } else {
      match content.split_once('.') {
        Some((id, attr)) => f(id, Some(attr)),
        None => f(content, None),
      }
    };

    out.push_str("${");
    out.push_str(replacement.as_deref().unwrap_or(content));
    out.push('}');
    rest = &after[end + 1..];
  }

  out.push_str(rest);
  out
}
