//! Resource locations and the mappings between them.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::consts::UNKNOWN_RESOURCE_TYPE;

use super::stack::{Environment, Stack};

/// Where a resource lives: a logical ID within a named stack.
///
/// Identity is the `(stack name, logical ID)` pair. The construct path and
/// resource type are captured from the stack when the location is created
/// and are informational only.
#[derive(Debug, Clone)]
pub struct ResourceLocation {
  pub stack_name: String,
  pub logical_id: String,
  pub environment: Environment,
  construct_path: Option<String>,
  resource_type: Option<String>,
}

impl ResourceLocation {
  /// Locate `logical_id` within `stack`.
  ///
  /// The resource does not need to exist; such a location has no construct
  /// path and an unknown type.
  pub fn new(stack: &Stack, logical_id: impl Into<String>) -> Self {
    let logical_id = logical_id.into();
    let resource = stack.template.resources.get(&logical_id);
    Self {
      stack_name: stack.stack_name.clone(),
      environment: stack.environment.clone(),
      construct_path: resource.and_then(|r| r.construct_path()).map(str::to_string),
      resource_type: resource.map(|r| r.resource_type.clone()),
      logical_id,
    }
  }

  /// Locate a resource in a stack that is not part of either snapshot.
  pub fn unresolved(environment: &Environment, stack_name: impl Into<String>, logical_id: impl Into<String>) -> Self {
    Self {
      stack_name: stack_name.into(),
      logical_id: logical_id.into(),
      environment: environment.clone(),
      construct_path: None,
      resource_type: None,
    }
  }

  /// Human-readable path: the construct path if known, else `Stack.LogicalId`.
  pub fn path(&self) -> String {
    self.construct_path.clone().unwrap_or_else(|| self.to_string())
  }

  /// Declared resource type, or `"Unknown"`.
  pub fn resource_type(&self) -> &str {
    self.resource_type.as_deref().unwrap_or(UNKNOWN_RESOURCE_TYPE)
  }

  pub fn construct_path(&self) -> Option<&str> {
    self.construct_path.as_deref()
  }

  /// Whether this location addresses `logical_id` in `stack_name`.
  pub fn is(&self, stack_name: &str, logical_id: &str) -> bool {
    self.stack_name == stack_name && self.logical_id == logical_id
  }

  pub fn to_api(&self) -> ApiLocation {
    ApiLocation {
      stack_name: self.stack_name.clone(),
      logical_resource_id: self.logical_id.clone(),
    }
  }
}

impl std::fmt::Display for ResourceLocation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{}", self.stack_name, self.logical_id)
  }
}

impl PartialEq for ResourceLocation {
  fn eq(&self, other: &Self) -> bool {
    self.stack_name == other.stack_name && self.logical_id == other.logical_id
  }
}

impl Eq for ResourceLocation {}

impl Hash for ResourceLocation {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.stack_name.hash(state);
    self.logical_id.hash(state);
  }
}

impl PartialOrd for ResourceLocation {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for ResourceLocation {
  fn cmp(&self, other: &Self) -> Ordering {
    (&self.stack_name, &self.logical_id).cmp(&(&other.stack_name, &other.logical_id))
  }
}

/// Split a `StackName.LogicalId` string.
///
/// Exactly one `.` is allowed; both halves must be non-empty and consist of
/// characters valid in stack names (alphanumerics and `-`) and logical IDs
/// (alphanumerics) respectively.
pub fn parse_location_string(s: &str) -> Option<(&str, &str)> {
  let (stack, logical_id) = s.split_once('.')?;
  if logical_id.contains('.') {
    return None;
  }
  let stack_ok = !stack.is_empty() && stack.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
  let id_ok = !logical_id.is_empty() && logical_id.chars().all(|c| c.is_ascii_alphanumeric());
  (stack_ok && id_ok).then_some((stack, logical_id))
}

/// A resource moving from `source` (deployed) to `destination` (local).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceMapping {
  pub source: ResourceLocation,
  pub destination: ResourceLocation,
}

impl ResourceMapping {
  pub fn new(source: ResourceLocation, destination: ResourceLocation) -> Self {
    Self { source, destination }
  }

  /// Whether the mapping moves the resource to another stack.
  pub fn crosses_stacks(&self) -> bool {
    self.source.stack_name != self.destination.stack_name
  }

  /// Reporting form: `{type, sourcePath, destinationPath}`.
  pub fn to_typed(&self) -> TypedMapping {
    TypedMapping {
      resource_type: self.source.resource_type().to_string(),
      source_path: self.source.path(),
      destination_path: self.destination.path(),
    }
  }

  /// Form accepted by the refactor API.
  pub fn to_api(&self) -> ApiResourceMapping {
    ApiResourceMapping {
      source: self.source.to_api(),
      destination: self.destination.to_api(),
    }
  }
}

/// A mapping rendered with resource type and human-readable paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedMapping {
  #[serde(rename = "type")]
  pub resource_type: String,
  pub source_path: String,
  pub destination_path: String,
}

/// Location as the refactor API expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiLocation {
  pub stack_name: String,
  pub logical_resource_id: String,
}

/// Mapping as the refactor API expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiResourceMapping {
  pub source: ApiLocation,
  pub destination: ApiLocation,
}
