//! Running detected moves against the remote control plane.
//!
//! A run has two phases. Planning visits every environment of the local
//! stacks: it resolves the deployment role, fetches what is deployed,
//! detects (or reads) the moves and renders the templates to submit.
//! Configuration and rewrite problems abort the whole run here, before
//! anything is changed remotely. Execution then processes the planned
//! environments one after another; a failure in one environment is recorded
//! and the next environment still runs.

mod cache;
mod client;
mod execute;
mod roles;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::detect::{DetectOptions, detect_moves};
use crate::digest::PrimaryIdentifiers;
use crate::exclude::ExcludeList;
use crate::model::{Environment, ResourceMapping, Stack, TemplateError};
use crate::overrides::{MappingOverrides, OverrideError};
use crate::rewrite::{RewriteError, StackDefinition, generate_stack_definitions};

pub use cache::{DeployedStacksCache, fetch_deployed_stacks};
pub use client::{
  ClientError, CloudFormationClient, ExecutionStatus, RefactorDescription, SdkProvider, StackRefactorStatus,
  StackSummary,
};
pub use execute::{RefactorState, execute};
pub use roles::resolve_role;
pub use types::{EnvironmentReport, Outcome, PollConfig, RefactorOptions, RefactorReport, RefactorRequest};

use execute::transition;

/// Errors that can occur during a refactor run.
#[derive(Debug, Error)]
pub enum RefactorError {
  #[error("no deployment role is declared by the stacks in {environment}")]
  MissingRole { environment: String },

  #[error("stacks in {environment} declare more than one deployment role: {}", roles.join(", "))]
  AmbiguousRole { environment: String, roles: Vec<String> },

  #[error(
    "bootstrap stack in {environment} is version {version}, refactoring needs version {minimum} or later; re-bootstrap the environment"
  )]
  BootstrapTooOld {
    environment: String,
    version: u32,
    minimum: u32,
  },

  #[error(transparent)]
  Client(#[from] ClientError),

  #[error("failed to fetch deployed stacks of {environment}: {message}")]
  Fetch { environment: String, message: String },

  #[error("deployed template of stack {stack} is invalid: {source}")]
  DeployedTemplate {
    stack: String,
    #[source]
    source: TemplateError,
  },

  #[error(transparent)]
  Override(#[from] OverrideError),

  #[error(transparent)]
  Rewrite(#[from] RewriteError),

  #[error("stack refactor {refactor_id} could not be created: {reason}")]
  CreateFailed { refactor_id: String, reason: String },

  #[error("stack refactor {refactor_id} failed: {reason}")]
  ExecuteFailed { refactor_id: String, reason: String },

  #[error("timed out waiting for stack refactor {refactor_id} to {operation}")]
  Timeout {
    refactor_id: String,
    operation: &'static str,
  },
}

/// Collaborators of a refactor run.
pub struct RefactorContext<'a> {
  pub provider: &'a dyn SdkProvider,
  pub cache: &'a DeployedStacksCache,
  pub exclude: &'a dyn ExcludeList,
  pub overrides: Option<&'a MappingOverrides>,
  pub identifiers: &'a PrimaryIdentifiers,
}

/// An environment ready to execute.
struct Plan {
  client: Arc<dyn CloudFormationClient>,
  mappings: Vec<ResourceMapping>,
  definitions: Vec<StackDefinition>,
}

/// Distinct target environments of `local`, ordered by account and region.
fn environments(local: &[Stack]) -> Vec<Environment> {
  let mut seen: BTreeMap<(&str, &str), &Environment> = BTreeMap::new();
  for stack in local {
    seen
      .entry((stack.environment.account.as_str(), stack.environment.region.as_str()))
      .or_insert(&stack.environment);
  }
  seen.into_values().cloned().collect()
}

/// Detect and perform the moves between what is deployed and `local`.
///
/// Returns an error only for problems that make the whole run unsafe.
/// Remote failures are reported per environment in the returned report.
pub async fn refactor(
  ctx: &RefactorContext<'_>,
  local: &[Stack],
  options: &RefactorOptions,
) -> Result<RefactorReport, RefactorError> {
  let environments = environments(local);

  let mut roles = Vec::with_capacity(environments.len());
  for environment in &environments {
    roles.push(resolve_role(environment, local, options.allow_missing_role)?);
  }

  let mut report = RefactorReport::default();
  let mut plans = Vec::new();

  for (environment, role) in environments.into_iter().zip(roles) {
    transition(&environment, RefactorState::Idle);
    let local_env: Vec<Stack> = local
      .iter()
      .filter(|s| s.environment.same_target(&environment))
      .cloned()
      .collect();

    transition(&environment, RefactorState::ResolvingCredentials);
    let fetched = match ctx.provider.for_environment(&environment, role.as_deref()).await {
      Ok(client) => match ctx.cache.get_or_fetch(&environment, &client).await {
        Ok(deployed) => Ok((client, deployed)),
        Err(e) => Err(e),
      },
      Err(e) => Err(RefactorError::from(e)),
    };
    let (client, deployed) = match fetched {
      Ok(pair) => pair,
      Err(e) => {
        transition(&environment, RefactorState::Failed);
        error!(environment = %environment, error = %e, "could not read deployed stacks");
        report.environments.push(EnvironmentReport {
          environment,
          mappings: Vec::new(),
          ambiguous: Vec::new(),
          outcome: Outcome::Failed(e.to_string()),
        });
        continue;
      }
    };

    let (mappings, ambiguous) = match ctx.overrides.map(|o| o.resolve(&environment, &deployed, &local_env)) {
      Some(resolved) => match resolved? {
        Some(mappings) => (mappings, Vec::new()),
        None => detected(ctx, &deployed, &local_env, options),
      },
      None => detected(ctx, &deployed, &local_env, options),
    };

    let mut entry = EnvironmentReport {
      environment: environment.clone(),
      mappings: mappings.iter().map(ResourceMapping::to_typed).collect(),
      ambiguous: ambiguous.iter().map(|g| g.paths()).collect(),
      outcome: Outcome::Succeeded,
    };

    if !ambiguous.is_empty() {
      warn!(environment = %environment, groups = ambiguous.len(), "ambiguous moves, skipping environment");
      entry.outcome = Outcome::Skipped("ambiguous resource moves need an explicit mapping".to_string());
      report.environments.push(entry);
      continue;
    }
    if mappings.is_empty() {
      info!(environment = %environment, "no resources moved");
      entry.outcome = Outcome::Skipped("no resources moved".to_string());
      report.environments.push(entry);
      continue;
    }

    let definitions = generate_stack_definitions(&mappings, &deployed, &local_env)?;

    if options.dry_run {
      info!(environment = %environment, mappings = mappings.len(), "dry run, not refactoring");
      entry.outcome = Outcome::Skipped("dry run".to_string());
      report.environments.push(entry);
      continue;
    }

    plans.push((
      report.environments.len(),
      Plan {
        client,
        mappings,
        definitions,
      },
    ));
    report.environments.push(entry);
  }

  for (index, plan) in plans {
    let entry = &mut report.environments[index];
    let result = execute(
      &entry.environment,
      plan.client.as_ref(),
      &plan.mappings,
      &plan.definitions,
      &options.poll,
    )
    .await;
    if let Err(e) = result {
      transition(&entry.environment, RefactorState::Failed);
      error!(environment = %entry.environment, error = %e, "refactor failed");
      entry.outcome = Outcome::Failed(e.to_string());
    }
  }

  Ok(report)
}

fn detected(
  ctx: &RefactorContext<'_>,
  deployed: &[Stack],
  local: &[Stack],
  options: &RefactorOptions,
) -> (Vec<ResourceMapping>, Vec<crate::detect::AmbiguousMove>) {
  let detect_options = DetectOptions {
    exclude: ctx.exclude,
    stack_filter: options.stack_filter.as_deref(),
    identifiers: ctx.identifiers,
  };
  let detection = detect_moves(deployed, local, &detect_options);
  (detection.mappings, detection.ambiguous)
}
