//! Cloud assembly manifest.
//!
//! Only the parts the refactor engine consumes are modelled: stack
//! artifacts, their stack names, and the per-path
//! metadata entries used to flag resources.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::consts::STACK_ARTIFACT_TYPE;

#[derive(Debug, Error)]
pub enum AssemblyError {
  #[error("failed to read assembly manifest {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse assembly manifest {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Top-level `manifest.json` of a cloud assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
  #[serde(default)]
  pub artifacts: BTreeMap<String, ArtifactManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
  #[serde(rename = "type")]
  pub artifact_type: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub environment: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub properties: Option<StackProperties>,

  /// Construct path -> metadata entries recorded at that path.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub metadata: BTreeMap<String, Vec<MetadataEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackProperties {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stack_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
  #[serde(rename = "type")]
  pub entry_type: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

/// A stack artifact with its resolved stack name.
#[derive(Debug, Clone, Copy)]
pub struct StackArtifact<'a> {
  pub stack_name: &'a str,
  pub manifest: &'a ArtifactManifest,
}

impl AssemblyManifest {
  pub fn load(path: &Path) -> Result<Self, AssemblyError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| AssemblyError::Read {
      path: display.clone(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| AssemblyError::Parse { path: display, source })
  }

  /// CloudFormation stack artifacts; other artifact types are ignored.
  ///
  /// The stack name defaults to the artifact ID.
  pub fn stack_artifacts(&self) -> impl Iterator<Item = StackArtifact<'_>> {
    self
      .artifacts
      .iter()
      .filter(|(_, a)| a.artifact_type == STACK_ARTIFACT_TYPE)
      .map(|(id, a)| StackArtifact {
        stack_name: a
          .properties
          .as_ref()
          .and_then(|p| p.stack_name.as_deref())
          .unwrap_or(id),
        manifest: a,
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const MANIFEST: &str = r#"{
    "version": "40.0.0",
    "artifacts": {
      "Tree": {"type": "cdk:tree", "properties": {"file": "tree.json"}},
      "AppStack": {
        "type": "aws:cloudformation:stack",
        "environment": "aws://123456789012/us-east-1",
        "properties": {"stackName": "app-prod", "assumeRoleArn": "arn:aws:iam::123456789012:role/deploy"},
        "metadata": {"/AppStack/Bucket/Resource": [{"type": "aws:cdk:logicalId", "data": "Bucket83908E77"}]}
      },
      "Other": {"type": "aws:cloudformation:stack"}
    }
  }"#;

  #[test]
  fn loads_stack_artifacts_only() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");
    fs::write(&path, MANIFEST).unwrap();

    let manifest = AssemblyManifest::load(&path).unwrap();
    let stacks: Vec<_> = manifest.stack_artifacts().map(|a| a.stack_name).collect();
    assert_eq!(stacks, vec!["app-prod", "Other"]);

    let app = manifest.stack_artifacts().next().unwrap();
    assert_eq!(app.manifest.metadata.len(), 1);
  }

  #[test]
  fn malformed_manifest_fails() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");
    fs::write(&path, "{\"artifacts\": []}").unwrap();
    assert!(matches!(AssemblyManifest::load(&path), Err(AssemblyError::Parse { .. })));
  }
}
