//! Deployed stacks per environment, fetched once per run.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::consts::SKIPPED_STACK_STATUSES;
use crate::model::{Environment, Stack, Template};

use super::RefactorError;
use super::client::CloudFormationClient;

/// Memoizes the deployed stacks of each environment.
///
/// Entries are never replaced once populated.
#[derive(Debug, Default)]
pub struct DeployedStacksCache {
  stacks: Mutex<HashMap<Environment, Arc<Vec<Stack>>>>,
}

impl DeployedStacksCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Deployed stacks of `environment`, fetching them through `client` on first use.
  pub async fn get_or_fetch(
    &self,
    environment: &Environment,
    client: &Arc<dyn CloudFormationClient>,
  ) -> Result<Arc<Vec<Stack>>, RefactorError> {
    let mut stacks = self.stacks.lock().await;
    if let Some(cached) = stacks.get(environment) {
      debug!(environment = %environment, "using cached deployed stacks");
      return Ok(Arc::clone(cached));
    }

    let fetched = Arc::new(fetch_deployed_stacks(environment, client).await?);
    stacks.insert(environment.clone(), Arc::clone(&fetched));
    Ok(fetched)
  }

  /// Seed the cache, e.g. from a snapshot taken earlier.
  pub async fn insert(&self, environment: Environment, deployed: Vec<Stack>) {
    self.stacks.lock().await.entry(environment).or_insert_with(|| Arc::new(deployed));
  }
}

/// List the live stacks of an environment and fetch their templates concurrently.
pub async fn fetch_deployed_stacks(
  environment: &Environment,
  client: &Arc<dyn CloudFormationClient>,
) -> Result<Vec<Stack>, RefactorError> {
  let summaries = client.list_stacks().await?;

  let mut join_set = JoinSet::new();
  for summary in summaries {
    if SKIPPED_STACK_STATUSES.contains(&summary.status.as_str()) {
      continue;
    }
    let client = Arc::clone(client);
    join_set.spawn(async move {
      let body = client.get_template(&summary.stack_name).await;
      (summary.stack_name, body)
    });
  }

  let mut stacks = Vec::with_capacity(join_set.len());
  while let Some(joined) = join_set.join_next().await {
    let (stack_name, body) = match joined {
      Ok(result) => result,
      Err(e) => {
        error!(environment = %environment, error = %e, "template fetch task panicked");
        return Err(RefactorError::Fetch {
          environment: environment.to_string(),
          message: e.to_string(),
        });
      }
    };
    let template = Template::from_json(&body?).map_err(|source| RefactorError::DeployedTemplate {
      stack: stack_name.clone(),
      source,
    })?;
    stacks.push(Stack::new(environment.clone(), stack_name, template));
  }

  stacks.sort_by(|a, b| a.stack_name.cmp(&b.stack_name));
  debug!(environment = %environment, count = stacks.len(), "fetched deployed stacks");
  Ok(stacks)
}
