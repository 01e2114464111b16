//! Seams to the remote control plane.
//!
//! Credential resolution, role assumption and the wire protocol live behind
//! [`SdkProvider`]; the engine only names the environment and, when known,
//! the role to act as.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Environment;

use super::types::RefactorRequest;

/// Errors surfaced by a control-plane client.
#[derive(Debug, Error)]
pub enum ClientError {
  #[error("{operation} failed: {message}")]
  Api { operation: &'static str, message: String },

  #[error("no credentials available for {environment}: {message}")]
  Credentials { environment: String, message: String },

  #[error("stack {0} does not exist")]
  StackNotFound(String),
}

/// One entry of a stack listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSummary {
  pub stack_name: String,
  pub status: String,
}

/// Lifecycle of a refactor operation's creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackRefactorStatus {
  CreateInProgress,
  CreateComplete,
  CreateFailed,
  DeleteInProgress,
  DeleteComplete,
  DeleteFailed,
}

/// Lifecycle of a refactor operation's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
  Unavailable,
  Available,
  Obsolete,
  ExecuteInProgress,
  ExecuteComplete,
  ExecuteFailed,
  RollbackInProgress,
  RollbackComplete,
  RollbackFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefactorDescription {
  pub status: StackRefactorStatus,
  pub execution_status: ExecutionStatus,
  pub status_reason: Option<String>,
}

/// Control-plane operations the engine needs in one environment.
#[async_trait]
pub trait CloudFormationClient: Send + Sync {
  /// List every stack of the environment, whatever its status.
  async fn list_stacks(&self) -> Result<Vec<StackSummary>, ClientError>;

  /// Current template body of a stack.
  async fn get_template(&self, stack_name: &str) -> Result<String, ClientError>;

  /// Version recorded by the bootstrap stack under `parameter`.
  async fn bootstrap_version(&self, parameter: &str) -> Result<u32, ClientError>;

  /// Submit a refactor and return its ID.
  async fn create_stack_refactor(&self, request: &RefactorRequest) -> Result<String, ClientError>;

  async fn describe_stack_refactor(&self, refactor_id: &str) -> Result<RefactorDescription, ClientError>;

  async fn execute_stack_refactor(&self, refactor_id: &str) -> Result<(), ClientError>;
}

/// Hands out authenticated clients per environment.
#[async_trait]
pub trait SdkProvider: Send + Sync {
  async fn for_environment(
    &self,
    environment: &Environment,
    role_arn: Option<&str>,
  ) -> Result<Arc<dyn CloudFormationClient>, ClientError>;
}
