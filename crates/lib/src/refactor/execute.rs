//! The refactor lifecycle of one environment.

use std::fmt;

use tracing::{debug, info, warn};

use crate::consts::{BOOTSTRAP_VERSION_PARAMETER, MIN_REFACTOR_BOOTSTRAP_VERSION};
use crate::model::{Environment, ResourceMapping};
use crate::rewrite::StackDefinition;

use super::RefactorError;
use super::client::{CloudFormationClient, ExecutionStatus, StackRefactorStatus};
use super::types::{PollConfig, RefactorRequest};

/// Stage of an environment's refactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefactorState {
  Idle,
  ResolvingCredentials,
  CheckingCompatibility,
  BuildingRequest,
  Creating,
  WaitingCreate,
  Executing,
  WaitingExecute,
  Done,
  Failed,
}

impl fmt::Display for RefactorState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Idle => "idle",
      Self::ResolvingCredentials => "resolving-credentials",
      Self::CheckingCompatibility => "checking-compatibility",
      Self::BuildingRequest => "building-request",
      Self::Creating => "creating",
      Self::WaitingCreate => "waiting-create",
      Self::Executing => "executing",
      Self::WaitingExecute => "waiting-execute",
      Self::Done => "done",
      Self::Failed => "failed",
    };
    f.write_str(s)
  }
}

pub(super) fn transition(environment: &Environment, state: RefactorState) {
  debug!(environment = %environment, state = %state, "refactor state");
}

/// Fail if the environment's bootstrap stack is too old to refactor.
///
/// A version that cannot be read is not treated as a failure; the create
/// call reports unsupported environments on its own.
async fn check_bootstrap(environment: &Environment, client: &dyn CloudFormationClient) -> Result<(), RefactorError> {
  match client.bootstrap_version(BOOTSTRAP_VERSION_PARAMETER).await {
    Ok(version) if version < MIN_REFACTOR_BOOTSTRAP_VERSION => Err(RefactorError::BootstrapTooOld {
      environment: environment.to_string(),
      version,
      minimum: MIN_REFACTOR_BOOTSTRAP_VERSION,
    }),
    Ok(version) => {
      debug!(environment = %environment, version, "bootstrap version supports refactoring");
      Ok(())
    }
    Err(e) => {
      warn!(environment = %environment, error = %e, "could not read bootstrap version, continuing");
      Ok(())
    }
  }
}

/// Create and execute a refactor of `mappings` in `environment`.
///
/// `client` must already act in `environment`.
pub async fn execute(
  environment: &Environment,
  client: &dyn CloudFormationClient,
  mappings: &[ResourceMapping],
  definitions: &[StackDefinition],
  poll: &PollConfig,
) -> Result<(), RefactorError> {
  transition(environment, RefactorState::CheckingCompatibility);
  check_bootstrap(environment, client).await?;

  transition(environment, RefactorState::BuildingRequest);
  let request = RefactorRequest {
    enable_stack_creation: true,
    resource_mappings: mappings.iter().map(ResourceMapping::to_api).collect(),
    stack_definitions: definitions.to_vec(),
  };

  transition(environment, RefactorState::Creating);
  let refactor_id = client.create_stack_refactor(&request).await?;
  info!(environment = %environment, refactor = %refactor_id, mappings = mappings.len(), "created stack refactor");

  transition(environment, RefactorState::WaitingCreate);
  wait_for_creation(client, &refactor_id, poll).await?;

  transition(environment, RefactorState::Executing);
  client.execute_stack_refactor(&refactor_id).await?;

  transition(environment, RefactorState::WaitingExecute);
  wait_for_execution(client, &refactor_id, poll).await?;

  transition(environment, RefactorState::Done);
  info!(environment = %environment, refactor = %refactor_id, "stack refactor complete");
  Ok(())
}

fn reason(status_reason: Option<String>, fallback: &str) -> String {
  status_reason.unwrap_or_else(|| fallback.to_string())
}

async fn wait_for_creation(
  client: &dyn CloudFormationClient,
  refactor_id: &str,
  poll: &PollConfig,
) -> Result<(), RefactorError> {
  for attempt in 1..=poll.max_attempts {
    let description = client.describe_stack_refactor(refactor_id).await?;
    match description.status {
      StackRefactorStatus::CreateComplete => return Ok(()),
      StackRefactorStatus::CreateInProgress => {
        debug!(refactor = refactor_id, attempt, "refactor creation in progress");
      }
      status => {
        return Err(RefactorError::CreateFailed {
          refactor_id: refactor_id.to_string(),
          reason: reason(description.status_reason, &format!("{status:?}")),
        });
      }
    }
    tokio::time::sleep(poll.interval).await;
  }

  Err(RefactorError::Timeout {
    refactor_id: refactor_id.to_string(),
    operation: "create",
  })
}

async fn wait_for_execution(
  client: &dyn CloudFormationClient,
  refactor_id: &str,
  poll: &PollConfig,
) -> Result<(), RefactorError> {
  for attempt in 1..=poll.max_attempts {
    let description = client.describe_stack_refactor(refactor_id).await?;
    match description.execution_status {
      ExecutionStatus::ExecuteComplete => return Ok(()),
      ExecutionStatus::Available | ExecutionStatus::ExecuteInProgress => {
        debug!(refactor = refactor_id, attempt, "refactor execution in progress");
      }
      status => {
        return Err(RefactorError::ExecuteFailed {
          refactor_id: refactor_id.to_string(),
          reason: reason(description.status_reason, &format!("{status:?}")),
        });
      }
    }
    tokio::time::sleep(poll.interval).await;
  }

  Err(RefactorError::Timeout {
    refactor_id: refactor_id.to_string(),
    operation: "execute",
  })
}
