//! Options, requests and reports of a refactor run.

use std::time::Duration;

use serde::Serialize;

use crate::detect::AmbiguousPaths;
use crate::model::{ApiResourceMapping, Environment, TypedMapping};
use crate::rewrite::StackDefinition;

/// How often and how long to poll a refactor operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
  pub interval: Duration,
  pub max_attempts: u32,
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(5),
      max_attempts: 720,
    }
  }
}

/// Options for [`refactor`](super::refactor).
#[derive(Debug, Clone, Default)]
pub struct RefactorOptions {
  /// Compute and report mappings without calling the refactor API.
  pub dry_run: bool,
  /// Proceed with default credentials when no stack declares a deployment role.
  pub allow_missing_role: bool,
  /// Only consider moves touching these stacks.
  pub stack_filter: Option<Vec<String>>,
  pub poll: PollConfig,
}

/// Body of a create-refactor call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RefactorRequest {
  pub enable_stack_creation: bool,
  pub resource_mappings: Vec<ApiResourceMapping>,
  pub stack_definitions: Vec<StackDefinition>,
}

/// What happened to one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
  Succeeded,
  Failed(String),
  Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentReport {
  pub environment: Environment,
  pub mappings: Vec<TypedMapping>,
  pub ambiguous: Vec<AmbiguousPaths>,
  pub outcome: Outcome,
}

/// Result of a refactor run across environments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefactorReport {
  pub environments: Vec<EnvironmentReport>,
}

impl RefactorReport {
  /// True unless an environment that was attempted failed.
  pub fn is_success(&self) -> bool {
    self
      .environments
      .iter()
      .all(|e| !matches!(e.outcome, Outcome::Failed(_)))
  }

  pub fn failed(&self) -> impl Iterator<Item = &EnvironmentReport> {
    self
      .environments
      .iter()
      .filter(|e| matches!(e.outcome, Outcome::Failed(_)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn report(outcome: Outcome) -> EnvironmentReport {
    EnvironmentReport {
      environment: Environment::new("1", "r"),
      mappings: Vec::new(),
      ambiguous: Vec::new(),
      outcome,
    }
  }

  #[test]
  fn success_ignores_skipped_environments() {
    let r = RefactorReport {
      environments: vec![report(Outcome::Succeeded), report(Outcome::Skipped("dry run".into()))],
    };
    assert!(r.is_success());
  }

  #[test]
  fn any_failure_fails_the_run() {
    let r = RefactorReport {
      environments: vec![report(Outcome::Succeeded), report(Outcome::Failed("boom".into()))],
    };
    assert!(!r.is_success());
    assert_eq!(r.failed().count(), 1);
  }

  #[test]
  fn request_uses_api_field_names() {
    let request = RefactorRequest {
      enable_stack_creation: true,
      resource_mappings: Vec::new(),
      stack_definitions: vec![StackDefinition {
        stack_name: "S".into(),
        template_body: "{}".into(),
      }],
    };
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["EnableStackCreation"], true);
    assert_eq!(value["StackDefinitions"][0]["StackName"], "S");
    assert_eq!(value["StackDefinitions"][0]["TemplateBody"], "{}");
  }

  #[test]
  fn outcome_serializes_with_reason() {
    let value = serde_json::to_value(Outcome::Failed("boom".into())).unwrap();
    assert_eq!(value, serde_json::json!({"status": "failed", "reason": "boom"}));
  }

  #[test]
  fn default_poll_waits_up_to_an_hour() {
    let poll = PollConfig::default();
    assert_eq!(poll.interval * poll.max_attempts, Duration::from_secs(3600));
  }
}
