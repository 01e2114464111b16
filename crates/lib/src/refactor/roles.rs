//! Deployment role resolution per environment.

use std::collections::BTreeSet;

use tracing::debug;

use crate::model::{Environment, Stack};

use super::RefactorError;

/// The single deployment role declared by the local stacks of `environment`.
///
/// No declared role is an error unless `allow_missing` is set, in which case
/// the provider's default credentials are used. More than one distinct role
/// is always an error.
pub fn resolve_role(environment: &Environment, local: &[Stack], allow_missing: bool) -> Result<Option<String>, RefactorError> {
  let roles: BTreeSet<&str> = local
    .iter()
    .filter(|s| s.environment.same_target(environment))
    .filter_map(|s| s.assume_role_arn.as_deref())
    .collect();

  match roles.len() {
    0 if allow_missing => {
      debug!(environment = %environment, "no deployment role declared, using default credentials");
      Ok(None)
    }
    0 => Err(RefactorError::MissingRole {
      environment: environment.to_string(),
    }),
    1 => Ok(roles.into_iter().next().map(str::to_string)),
    _ => Err(RefactorError::AmbiguousRole {
      environment: environment.to_string(),
      roles: roles.into_iter().map(str::to_string).collect(),
    }),
  }
}
