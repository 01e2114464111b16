//! User-authored mappings that replace automatic move detection.
//!
//! ```json
//! { "environments": [
//!   { "account": "123456789012", "region": "us-east-1",
//!     "resources": { "Stack1.Bucket1": "Stack2.Bucket1" } }
//! ] }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{Environment, ResourceLocation, ResourceMapping, Stack, parse_location_string};

/// Errors that can occur when loading or resolving mapping overrides.
#[derive(Debug, Error)]
pub enum OverrideError {
  #[error("failed to read override file {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse override file {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid location '{location}' in override for aws://{account}/{region}: expected StackName.LogicalId")]
  MalformedLocation {
    account: String,
    region: String,
    location: String,
  },

  #[error("'{first}' and '{second}' are both mapped to '{destination}' in aws://{account}/{region}")]
  DuplicateDestination {
    account: String,
    region: String,
    destination: String,
    first: String,
    second: String,
  },

  #[error("override source '{location}' is not deployed in {environment}")]
  UnknownSource { environment: String, location: String },

  #[error("override destination '{destination}' (from '{from}') is already occupied by a deployed resource in {environment}")]
  OccupiedDestination {
    environment: String,
    destination: String,
    from: String,
  },
}

/// Overrides for one `(account, region)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvironmentOverrides {
  pub account: String,
  pub region: String,
  /// `Stack.LogicalId` of the deployed resource to `Stack.LogicalId` it moves to.
  #[serde(default)]
  pub resources: BTreeMap<String, String>,
}

impl EnvironmentOverrides {
  fn targets(&self, environment: &Environment) -> bool {
    self.account == environment.account && self.region == environment.region
  }

  fn malformed(&self, location: &str) -> OverrideError {
    OverrideError::MalformedLocation {
      account: self.account.clone(),
      region: self.region.clone(),
      location: location.to_string(),
    }
  }

  /// Shape checks that need no deployed state.
  fn validate(&self) -> Result<(), OverrideError> {
    let mut destinations: HashMap<&str, &str> = HashMap::new();
    for (source, destination) in &self.resources {
      if parse_location_string(source).is_none() {
        return Err(self.malformed(source));
      }
      if parse_location_string(destination).is_none() {
        return Err(self.malformed(destination));
      }
      if let Some(first) = destinations.insert(destination, source) {
        return Err(OverrideError::DuplicateDestination {
          account: self.account.clone(),
          region: self.region.clone(),
          destination: destination.clone(),
          first: first.to_string(),
          second: source.clone(),
        });
      }
    }
    Ok(())
  }
}

fn locate(stacks: &[Stack], environment: &Environment, stack_name: &str, logical_id: &str) -> ResourceLocation {
  match stacks.iter().find(|s| s.stack_name == stack_name) {
    Some(stack) => ResourceLocation::new(stack, logical_id),
    None => ResourceLocation::unresolved(environment, stack_name, logical_id),
  }
}

/// A parsed and shape-checked override file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MappingOverrides {
  #[serde(default)]
  pub environments: Vec<EnvironmentOverrides>,
}

impl MappingOverrides {
  /// Load and validate an override file.
  pub fn load(path: &Path) -> Result<Self, OverrideError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| OverrideError::Read {
      path: display.clone(),
      source,
    })?;
    Self::parse(&content, display)
  }

  pub fn from_json(content: &str) -> Result<Self, OverrideError> {
    Self::parse(content, "<inline>".to_string())
  }

  fn parse(content: &str, path: String) -> Result<Self, OverrideError> {
    let overrides: Self = serde_json::from_str(content).map_err(|source| OverrideError::Parse { path, source })?;
    for env in &overrides.environments {
      env.validate()?;
    }
    Ok(overrides)
  }

  /// Whether any entry targets `environment`.
  pub fn covers(&self, environment: &Environment) -> bool {
    self.environments.iter().any(|e| e.targets(environment))
  }

  /// Turn the entries for `environment` into mappings, checked against the
  /// deployed state.
  ///
  /// Returns `None` when the file has nothing for this environment.
  pub fn resolve(
    &self,
    environment: &Environment,
    deployed: &[Stack],
    local: &[Stack],
  ) -> Result<Option<Vec<ResourceMapping>>, OverrideError> {
    let entries: Vec<&EnvironmentOverrides> = self.environments.iter().filter(|e| e.targets(environment)).collect();
    if entries.is_empty() {
      return Ok(None);
    }

    let is_deployed = |stack: &str, id: &str| {
      deployed
        .iter()
        .any(|s| s.stack_name == stack && s.template.resources.contains_key(id))
    };

    let pairs: Vec<(&str, &str, &str, &str)> = entries
      .iter()
      .flat_map(|e| e.resources.iter())
      .filter_map(|(src, dst)| {
        let (s_stack, s_id) = parse_location_string(src)?;
        let (d_stack, d_id) = parse_location_string(dst)?;
        Some((s_stack, s_id, d_stack, d_id))
      })
      .collect();

    let moving_away: HashSet<(&str, &str)> = pairs.iter().map(|(s, id, _, _)| (*s, *id)).collect();
    let mut seen_destinations: HashMap<(&str, &str), String> = HashMap::new();
    let mut mappings = Vec::with_capacity(pairs.len());

    for (s_stack, s_id, d_stack, d_id) in pairs {
      let from = format!("{s_stack}.{s_id}");
      let destination = format!("{d_stack}.{d_id}");

      if !is_deployed(s_stack, s_id) {
        return Err(OverrideError::UnknownSource {
          environment: environment.to_string(),
          location: from,
        });
      }
      // Entries from separate blocks for the same environment can still collide.
      if let Some(first) = seen_destinations.insert((d_stack, d_id), from.clone()) {
        return Err(OverrideError::DuplicateDestination {
          account: environment.account.clone(),
          region: environment.region.clone(),
          destination,
          first,
          second: from,
        });
      }
      if (s_stack, s_id) == (d_stack, d_id) {
        debug!(location = %from, "override maps a resource onto itself");
        continue;
      }
      if is_deployed(d_stack, d_id) && !moving_away.contains(&(d_stack, d_id)) {
        return Err(OverrideError::OccupiedDestination {
          environment: environment.to_string(),
          destination,
          from,
        });
      }

      mappings.push(ResourceMapping::new(
        locate(deployed, environment, s_stack, s_id),
        locate(local, environment, d_stack, d_id),
      ));
    }

    mappings.sort();
    debug!(environment = %environment, count = mappings.len(), "resolved mapping overrides");
    Ok(Some(mappings))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Template;
  use serde_json::json;
  use tempfile::TempDir;

  fn env() -> Environment {
    Environment::new("123456789012", "us-east-1")
  }

  fn stack(name: &str, ids: &[&str]) -> Stack {
    let resources: serde_json::Map<String, serde_json::Value> = ids
      .iter()
      .map(|id| (id.to_string(), json!({"Type": "AWS::S3::Bucket"})))
      .collect();
    let template: Template = serde_json::from_value(json!({ "Resources": resources })).unwrap();
    Stack::new(env(), name, template)
  }

  fn overrides(resources: serde_json::Value) -> Result<MappingOverrides, OverrideError> {
    MappingOverrides::from_json(
      &json!({"environments": [{"account": "123456789012", "region": "us-east-1", "resources": resources}]}).to_string(),
    )
  }

  #[test]
  fn load_reads_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("overrides.json");
    fs::write(
      &path,
      r#"{"environments":[{"account":"1","region":"eu-west-1","resources":{"A.B":"C.D"}}]}"#,
    )
    .unwrap();

    let loaded = MappingOverrides::load(&path).unwrap();
    assert_eq!(loaded.environments.len(), 1);
    assert_eq!(loaded.environments[0].resources["A.B"], "C.D");
  }

  #[test]
  fn load_reports_path_on_parse_failure() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("overrides.json");
    fs::write(&path, "{ not json").unwrap();

    let err = MappingOverrides::load(&path).unwrap_err();
    assert!(err.to_string().contains("overrides.json"), "{err}");
  }

  #[test]
  fn rejects_malformed_location() {
    let err = overrides(json!({"Stack1.Bucket.Extra": "Stack2.Bucket"})).unwrap_err();
    assert!(matches!(err, OverrideError::MalformedLocation { ref location, .. } if location == "Stack1.Bucket.Extra"));
  }

  #[test]
  fn rejects_shared_destination() {
    let err = overrides(json!({"S.A": "T.X", "S.B": "T.X"})).unwrap_err();
    assert!(err.to_string().contains("T.X"), "{err}");
  }

  #[test]
  fn resolves_valid_entries() {
    let deployed = [stack("S", &["A", "B"])];
    let local = [stack("S", &["B"]), stack("T", &["A"])];
    let o = overrides(json!({"S.A": "T.A"})).unwrap();

    let mappings = o.resolve(&env(), &deployed, &local).unwrap().unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].source.to_string(), "S.A");
    assert_eq!(mappings[0].destination.to_string(), "T.A");
    assert!(mappings[0].crosses_stacks());
  }

  #[test]
  fn other_environments_are_untouched() {
    let o = overrides(json!({"S.A": "T.A"})).unwrap();
    let other = Environment::new("999999999999", "us-east-1");
    assert!(!o.covers(&other));
    assert!(o.resolve(&other, &[], &[]).unwrap().is_none());
  }

  #[test]
  fn rejects_unknown_source() {
    let deployed = [stack("S", &["A"])];
    let o = overrides(json!({"S.Missing": "S.B"})).unwrap();

    let err = o.resolve(&env(), &deployed, &[]).unwrap_err();
    assert!(matches!(err, OverrideError::UnknownSource { ref location, .. } if location == "S.Missing"));
  }

  #[test]
  fn rejects_occupied_destination() {
    let deployed = [stack("S", &["A", "B"])];
    let o = overrides(json!({"S.A": "S.B"})).unwrap();

    let err = o.resolve(&env(), &deployed, &[]).unwrap_err();
    assert!(err.to_string().contains("S.B"), "{err}");
  }

  #[test]
  fn swapping_resources_is_allowed() {
    let deployed = [stack("S", &["A", "B"])];
    let local = [stack("S", &["A", "B"])];
    let o = overrides(json!({"S.A": "S.B", "S.B": "S.A"})).unwrap();

    let mappings = o.resolve(&env(), &deployed, &local).unwrap().unwrap();
    assert_eq!(mappings.len(), 2);
  }
}
