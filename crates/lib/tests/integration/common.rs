//! Shared helpers for library integration tests.

use std::path::PathBuf;

use serde_json::{Value, json};
use tempfile::TempDir;

/// A temporary directory holding input files.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write `content` as JSON to `name` and return its path.
  pub fn write_json(&self, name: &str, content: &Value) -> PathBuf {
    let path = self.temp.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(content).unwrap()).unwrap();
    path
  }
}

pub fn environment() -> Value {
  json!({"account": "123456789012", "region": "us-east-1"})
}

/// Stack-set document with one entry per `(name, template)`.
pub fn stack_set(stacks: &[(&str, Value)]) -> Value {
  let stacks: Vec<Value> = stacks
    .iter()
    .map(|(name, template)| {
      json!({
        "stackName": name,
        "environment": environment(),
        "template": template,
        "assumeRoleArn": "arn:aws:iam::123456789012:role/deploy"
      })
    })
    .collect();
  json!({ "stacks": stacks })
}
