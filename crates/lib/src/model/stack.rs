//! Stacks and the environments they are deployed into.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::template::Template;

/// Target environment of a stack: one account in one region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Environment {
  pub account: String,
  pub region: String,
  /// Display name; derived as `aws://<account>/<region>` when absent.
  #[serde(default)]
  pub name: String,
}

impl Environment {
  pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
    let account = account.into();
    let region = region.into();
    let name = format!("aws://{account}/{region}");
    Self { account, region, name }
  }

  /// Whether both environments target the same account and region.
  pub fn same_target(&self, other: &Environment) -> bool {
    self.account == other.account && self.region == other.region
  }

  /// Fill in the display name if the document omitted it.
  fn normalized(mut self) -> Self {
    if self.name.is_empty() {
      self.name = format!("aws://{}/{}", self.account, self.region);
    }
    self
  }
}

impl std::fmt::Display for Environment {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.name)
  }
}

/// One snapshot of a stack, either as deployed or as freshly synthesized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
  pub environment: Environment,
  pub stack_name: String,
  pub template: Template,
  /// Deployment role declared for this stack (local stacks only).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assume_role_arn: Option<String>,
}

impl Stack {
  pub fn new(environment: Environment, stack_name: impl Into<String>, template: Template) -> Self {
    Self {
      environment,
      stack_name: stack_name.into(),
      template,
      assume_role_arn: None,
    }
  }
}

/// Errors that can occur when loading stack-set files.
#[derive(Debug, Error)]
pub enum StackSetError {
  #[error("failed to read stack set {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse stack set {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("duplicate stack {stack} in {path}")]
  DuplicateStack { path: String, stack: String },
}

/// A file holding a set of stacks, used to feed the engine offline.
///
/// # Format
///
/// ```json
/// {
///   "stacks": [
///     {
///       "stackName": "Storage",
///       "environment": { "account": "123456789012", "region": "us-east-1" },
///       "template": { "Resources": { ... } }
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackSet {
  pub stacks: Vec<Stack>,
}

impl StackSet {
  /// Load a stack set from a JSON file.
  pub fn load(path: &Path) -> Result<Self, StackSetError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| StackSetError::Read {
      path: display.clone(),
      source,
    })?;
    let mut set: StackSet = serde_json::from_str(&content).map_err(|source| StackSetError::Parse {
      path: display.clone(),
      source,
    })?;

    let mut seen = std::collections::HashSet::new();
    for stack in &mut set.stacks {
      if !seen.insert((stack.environment.account.clone(), stack.environment.region.clone(), stack.stack_name.clone())) {
        return Err(StackSetError::DuplicateStack {
          path: display,
          stack: stack.stack_name.clone(),
        });
      }
      stack.environment = stack.environment.clone().normalized();
    }

    Ok(set)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn environment_display_name() {
    let env = Environment::new("111111111111", "eu-west-1");
    assert_eq!(env.to_string(), "aws://111111111111/eu-west-1");
  }

  #[test]
  fn load_stack_set_normalizes_environment() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("stacks.json");
    fs::write(
      &path,
      r#"{"stacks":[{"stackName":"A","environment":{"account":"1","region":"r"},"template":{"Resources":{}}}]}"#,
    )
    .unwrap();

    let set = StackSet::load(&path).unwrap();
    assert_eq!(set.stacks.len(), 1);
    assert_eq!(set.stacks[0].environment.name, "aws://1/r");
    assert!(set.stacks[0].assume_role_arn.is_none());
  }

  #[test]
  fn load_stack_set_rejects_duplicates() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("stacks.json");
    let stack = r#"{"stackName":"A","environment":{"account":"1","region":"r"},"template":{}}"#;
    fs::write(&path, format!(r#"{{"stacks":[{stack},{stack}]}}"#)).unwrap();

    let err = StackSet::load(&path).unwrap_err();
    assert!(matches!(err, StackSetError::DuplicateStack { ref stack, .. } if stack == "A"));
  }

  #[test]
  fn load_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    let err = StackSet::load(&temp.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, StackSetError::Read { .. }));
  }
}
