//! Primary identifiers of resource types.
//!
//! A primary identifier is the set of properties that name the physical
//! resource. Two declarations with equal identifier values denote the same
//! physical object, whatever else differs between them.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use super::DigestError;

/// Built-in identifiers for common resource types.
const BUILTIN: &[(&str, &[&str])] = &[
  ("AWS::DynamoDB::Table", &["TableName"]),
  ("AWS::ECR::Repository", &["RepositoryName"]),
  ("AWS::IAM::Role", &["RoleName"]),
  ("AWS::IAM::User", &["UserName"]),
  ("AWS::Kinesis::Stream", &["Name"]),
  ("AWS::Lambda::Function", &["FunctionName"]),
  ("AWS::Logs::LogGroup", &["LogGroupName"]),
  ("AWS::S3::Bucket", &["BucketName"]),
  ("AWS::SecretsManager::Secret", &["Name"]),
  ("AWS::SSM::Parameter", &["Name"]),
];

/// Registry of resource type -> primary identifier property names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryIdentifiers {
  by_type: BTreeMap<String, Vec<String>>,
}

impl Default for PrimaryIdentifiers {
  fn default() -> Self {
    Self::builtin()
  }
}

impl PrimaryIdentifiers {
  /// Registry with no identifiers: every resource is hashed in full.
  pub fn empty() -> Self {
    Self { by_type: BTreeMap::new() }
  }

  pub fn builtin() -> Self {
    let by_type = BUILTIN
      .iter()
      .map(|(ty, fields)| (ty.to_string(), fields.iter().map(|f| f.to_string()).collect()))
      .collect();
    Self { by_type }
  }

  /// Extend the registry from a JSON file of `{ "Type": ["Field", ...] }`.
  ///
  /// Entries in the file replace built-in entries for the same type.
  pub fn extend_from_file(&mut self, path: &Path) -> Result<(), DigestError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| DigestError::ReadIdentifiers {
      path: display.clone(),
      source,
    })?;
    let entries: BTreeMap<String, Vec<String>> =
      serde_json::from_str(&content).map_err(|source| DigestError::ParseIdentifiers { path: display, source })?;
    self.by_type.extend(entries);
    Ok(())
  }

  pub fn insert(&mut self, resource_type: impl Into<String>, fields: Vec<String>) {
    self.by_type.insert(resource_type.into(), fields);
  }

  pub fn get(&self, resource_type: &str) -> Option<&[String]> {
    self.by_type.get(resource_type).map(Vec::as_slice)
  }

  /// Properties relevant to the identity of a resource.
  ///
  /// Only the identifier fields are kept, and only when every one of them is
  /// set; an unnamed resource is identified by its full property set.
  pub fn identity_properties(&self, resource_type: &str, properties: &Map<String, Value>) -> Map<String, Value> {
    match self.get(resource_type) {
      Some(fields) if !fields.is_empty() && fields.iter().all(|f| properties.contains_key(f)) => fields
        .iter()
        .filter_map(|f| properties.get(f).map(|v| (f.clone(), v.clone())))
        .collect(),
      _ => properties.clone(),
    }
  }
}
