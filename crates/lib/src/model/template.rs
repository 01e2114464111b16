//! CloudFormation template types.
//!
//! Only the sections the engine reasons about are typed. Everything else
//! (parameters, conditions, per-resource policies) is carried through
//! untouched in flattened `extra` maps so a rewritten template round-trips.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::consts::{CDK_METADATA_RESOURCE_TYPE, CDK_PATH_METADATA_KEY};

/// Errors raised while reading template documents.
#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("failed to parse template: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize template: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// A declarative template for one stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
  #[serde(rename = "Resources", default, skip_serializing_if = "BTreeMap::is_empty")]
  pub resources: BTreeMap<String, Resource>,

  #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
  pub outputs: BTreeMap<String, Output>,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Template {
  /// Parse a template from its JSON body.
  pub fn from_json(body: &str) -> Result<Self, TemplateError> {
    serde_json::from_str(body).map_err(TemplateError::Parse)
  }

  /// Render the template as a JSON body.
  pub fn to_json(&self) -> Result<String, TemplateError> {
    serde_json::to_string(self).map_err(TemplateError::Serialize)
  }

  /// Iterate over exports declared by this template as `(export name, output ID, output)`.
  ///
  /// Outputs whose export name is not a literal string are skipped.
  pub fn exports(&self) -> impl Iterator<Item = (&str, &str, &Output)> {
    self
      .outputs
      .iter()
      .filter_map(|(id, output)| output.export_name().map(|name| (name, id.as_str(), output)))
  }

  /// Logical ID of the toolkit bookkeeping resource, if present.
  pub fn cdk_metadata_id(&self) -> Option<&str> {
    self
      .resources
      .iter()
      .find(|(_, r)| r.is_cdk_metadata())
      .map(|(id, _)| id.as_str())
  }
}

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
  #[serde(rename = "Type")]
  pub resource_type: String,

  #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
  pub properties: Map<String, Value>,

  #[serde(rename = "Metadata", default, skip_serializing_if = "Map::is_empty")]
  pub metadata: Map<String, Value>,

  #[serde(
    rename = "DependsOn",
    default,
    skip_serializing_if = "Vec::is_empty",
    deserialize_with = "one_or_many"
  )]
  pub depends_on: Vec<String>,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Resource {
  /// Create a resource of the given type with the given properties.
  pub fn new(resource_type: impl Into<String>, properties: Map<String, Value>) -> Self {
    Self {
      resource_type: resource_type.into(),
      properties,
      metadata: Map::new(),
      depends_on: Vec::new(),
      extra: Map::new(),
    }
  }

  /// The construct path recorded in metadata, if any.
  pub fn construct_path(&self) -> Option<&str> {
    self.metadata.get(CDK_PATH_METADATA_KEY).and_then(Value::as_str)
  }

  /// Set or clear the construct path metadata.
  pub fn set_construct_path(&mut self, path: Option<&str>) {
    match path {
      Some(p) => {
        self
          .metadata
          .insert(CDK_PATH_METADATA_KEY.to_string(), Value::String(p.to_string()));
      }
      None => {
        self.metadata.remove(CDK_PATH_METADATA_KEY);
      }
    }
  }

  pub fn is_cdk_metadata(&self) -> bool {
    self.resource_type == CDK_METADATA_RESOURCE_TYPE
  }
}

/// A template output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
  #[serde(rename = "Value")]
  pub value: Value,

  #[serde(rename = "Export", default, skip_serializing_if = "Option::is_none")]
  pub export: Option<Export>,

  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Output {
  /// Create an exported output.
  pub fn exported(value: Value, name: impl Into<String>) -> Self {
    Self {
      value,
      export: Some(Export {
        name: Value::String(name.into()),
      }),
      extra: Map::new(),
    }
  }

  /// The literal export name, if this output is exported under one.
  pub fn export_name(&self) -> Option<&str> {
    self.export.as_ref().and_then(|e| e.name.as_str())
  }
}

/// Export declaration of an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
  #[serde(rename = "Name")]
  pub name: Value,
}

/// `DependsOn` accepts either a single logical ID or a list of them.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum OneOrMany {
    One(String),
    Many(Vec<String>),
  }

  Ok(match OneOrMany::deserialize(deserializer)? {
    OneOrMany::One(id) => vec![id],
    OneOrMany::Many(ids) => ids,
  })
}
