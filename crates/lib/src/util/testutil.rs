//! Test utilities for stackmove-lib.
//!
//! In-memory fakes of the control-plane seams plus small builders for
//! stacks and mappings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{Environment, ResourceLocation, ResourceMapping, Stack};
use crate::refactor::{
  ClientError, CloudFormationClient, ExecutionStatus, PollConfig, RefactorDescription, RefactorRequest, SdkProvider,
  StackRefactorStatus, StackSummary,
};

/// Build a stack from a JSON template.
pub fn stack(environment: &Environment, name: &str, template: Value) -> Stack {
  Stack::new(
    environment.clone(),
    name,
    serde_json::from_value(template).expect("valid template"),
  )
}

/// A mapping between two locations, independent of any snapshot.
pub fn mapping(environment: &Environment, source: (&str, &str), destination: (&str, &str)) -> ResourceMapping {
  ResourceMapping::new(
    ResourceLocation::unresolved(environment, source.0, source.1),
    ResourceLocation::unresolved(environment, destination.0, destination.1),
  )
}

/// Poll without waiting.
pub fn fast_poll() -> PollConfig {
  PollConfig {
    interval: Duration::ZERO,
    max_attempts: 5,
  }
}

#[derive(Default)]
struct Recorded {
  requests: Vec<RefactorRequest>,
  executed: Vec<String>,
  describes: usize,
}

/// Scriptable in-memory control plane for one environment.
pub struct FakeCloudFormation {
  stacks: Vec<(String, String, String)>,
  bootstrap_version: Option<u32>,
  create_polls: usize,
  create_failure: Option<String>,
  api_failure: Option<String>,
  list_calls: AtomicUsize,
  recorded: Mutex<Recorded>,
}

impl Default for FakeCloudFormation {
  fn default() -> Self {
    Self {
      stacks: Vec::new(),
      bootstrap_version: Some(30),
      create_polls: 0,
      create_failure: None,
      api_failure: None,
      list_calls: AtomicUsize::new(0),
      recorded: Mutex::new(Recorded::default()),
    }
  }
}

impl FakeCloudFormation {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_stack(self, name: &str, status: &str, template: Value) -> Self {
    self.with_raw_stack(name, status, &template.to_string())
  }

  pub fn with_stacks(self, stacks: &[Stack]) -> Self {
    stacks.iter().fold(self, |fake, s| {
      let body = s.template.to_json().expect("serializable template");
      fake.with_raw_stack(&s.stack_name, "CREATE_COMPLETE", &body)
    })
  }

  pub fn with_raw_stack(mut self, name: &str, status: &str, body: &str) -> Self {
    self.stacks.push((name.to_string(), status.to_string(), body.to_string()));
    self
  }

  /// `None` makes the version lookup fail.
  pub fn with_bootstrap_version(mut self, version: Option<u32>) -> Self {
    self.bootstrap_version = version;
    self
  }

  /// Report creation in progress this many times before completing.
  pub fn with_create_polls(mut self, polls: usize) -> Self {
    self.create_polls = polls;
    self
  }

  /// Creation ends in `CREATE_FAILED` with this reason.
  pub fn with_create_failure(mut self, reason: &str) -> Self {
    self.create_failure = Some(reason.to_string());
    self
  }

  /// The create call itself is rejected.
  pub fn with_api_failure(mut self, message: &str) -> Self {
    self.api_failure = Some(message.to_string());
    self
  }

  pub fn requests(&self) -> Vec<RefactorRequest> {
    self.recorded.lock().unwrap().requests.clone()
  }

  pub fn executed(&self) -> Vec<String> {
    self.recorded.lock().unwrap().executed.clone()
  }

  pub fn list_calls(&self) -> usize {
    self.list_calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl CloudFormationClient for FakeCloudFormation {
  async fn list_stacks(&self) -> Result<Vec<StackSummary>, ClientError> {
    self.list_calls.fetch_add(1, Ordering::SeqCst);
    Ok(
      self
        .stacks
        .iter()
        .map(|(name, status, _)| StackSummary {
          stack_name: name.clone(),
          status: status.clone(),
        })
        .collect(),
    )
  }

  async fn get_template(&self, stack_name: &str) -> Result<String, ClientError> {
    self
      .stacks
      .iter()
      .find(|(name, _, _)| name == stack_name)
      .map(|(_, _, body)| body.clone())
      .ok_or_else(|| ClientError::StackNotFound(stack_name.to_string()))
  }

  async fn bootstrap_version(&self, _parameter: &str) -> Result<u32, ClientError> {
    self.bootstrap_version.ok_or_else(|| ClientError::Api {
      operation: "GetParameter",
      message: "parameter not found".to_string(),
    })
  }

  async fn create_stack_refactor(&self, request: &RefactorRequest) -> Result<String, ClientError> {
    if let Some(message) = &self.api_failure {
      return Err(ClientError::Api {
        operation: "CreateStackRefactor",
        message: message.clone(),
      });
    }
    let mut recorded = self.recorded.lock().unwrap();
    recorded.requests.push(request.clone());
    Ok(format!("refactor-{}", recorded.requests.len()))
  }

  async fn describe_stack_refactor(&self, refactor_id: &str) -> Result<RefactorDescription, ClientError> {
    let mut recorded = self.recorded.lock().unwrap();
    recorded.describes += 1;

    if let Some(reason) = &self.create_failure {
      return Ok(RefactorDescription {
        status: StackRefactorStatus::CreateFailed,
        execution_status: ExecutionStatus::Unavailable,
        status_reason: Some(reason.clone()),
      });
    }
    if recorded.describes <= self.create_polls {
      return Ok(RefactorDescription {
        status: StackRefactorStatus::CreateInProgress,
        execution_status: ExecutionStatus::Unavailable,
        status_reason: None,
      });
    }

    let executed = recorded.executed.iter().any(|id| id == refactor_id);
    Ok(RefactorDescription {
      status: StackRefactorStatus::CreateComplete,
      execution_status: if executed {
        ExecutionStatus::ExecuteComplete
      } else {
        ExecutionStatus::Available
      },
      status_reason: None,
    })
  }

  async fn execute_stack_refactor(&self, refactor_id: &str) -> Result<(), ClientError> {
    self.recorded.lock().unwrap().executed.push(refactor_id.to_string());
    Ok(())
  }
}

/// Provider handing out one fake client per `(account, region)`.
#[derive(Default)]
pub struct FakeProvider {
  clients: HashMap<(String, String), Arc<FakeCloudFormation>>,
  roles: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeProvider {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_client(mut self, environment: &Environment, client: FakeCloudFormation) -> Self {
    self.clients.insert(
      (environment.account.clone(), environment.region.clone()),
      Arc::new(client),
    );
    self
  }

  pub fn client(&self, environment: &Environment) -> Arc<FakeCloudFormation> {
    Arc::clone(&self.clients[&(environment.account.clone(), environment.region.clone())])
  }

  /// `(environment, role)` pairs requested so far.
  pub fn requested_roles(&self) -> Vec<(String, Option<String>)> {
    self.roles.lock().unwrap().clone()
  }
}

#[async_trait]
impl SdkProvider for FakeProvider {
  async fn for_environment(
    &self,
    environment: &Environment,
    role_arn: Option<&str>,
  ) -> Result<Arc<dyn CloudFormationClient>, ClientError> {
    self
      .roles
      .lock()
      .unwrap()
      .push((environment.to_string(), role_arn.map(str::to_string)));
    match self.clients.get(&(environment.account.clone(), environment.region.clone())) {
      Some(client) => Ok(Arc::clone(client) as Arc<dyn CloudFormationClient>),
      None => Err(ClientError::Credentials {
        environment: environment.to_string(),
        message: "no client configured".to_string(),
      }),
    }
  }
}
