//! Exclusions declared in the cloud assembly manifest.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::assembly::AssemblyManifest;
use crate::consts::{DO_NOT_REFACTOR_ENTRY, LOGICAL_ID_ENTRY, SKIP_REFACTOR_ENTRY};
use crate::model::ResourceLocation;

use super::ExcludeList;

/// Resources flagged as not-to-be-refactored in the assembly manifest.
///
/// A resource is flagged when a construct path carries both a
/// `aws:cdk:logicalId` entry and a do-not-refactor (or skip-refactor) entry
/// whose data is `true` or absent.
#[derive(Debug, Clone, Default)]
pub struct ManifestExcludeList {
  locations: HashSet<(String, String)>,
}

impl ManifestExcludeList {
  pub fn new(manifest: &AssemblyManifest) -> Self {
    let mut locations = HashSet::new();

    for artifact in manifest.stack_artifacts() {
      for entries in artifact.manifest.metadata.values() {
        let flagged = entries.iter().any(|e| {
          (e.entry_type == DO_NOT_REFACTOR_ENTRY || e.entry_type == SKIP_REFACTOR_ENTRY)
            && matches!(e.data, None | Some(Value::Bool(true)))
        });
        if !flagged {
          continue;
        }

        let logical_id = entries
          .iter()
          .find(|e| e.entry_type == LOGICAL_ID_ENTRY)
          .and_then(|e| e.data.as_ref())
          .and_then(Value::as_str);

        if let Some(id) = logical_id {
          debug!(stack = artifact.stack_name, logical_id = id, "resource excluded by manifest");
          locations.insert((artifact.stack_name.to_string(), id.to_string()));
        }
      }
    }

    Self { locations }
  }

  pub fn len(&self) -> usize {
    self.locations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.locations.is_empty()
  }
}

impl ExcludeList for ManifestExcludeList {
  fn is_excluded(&self, location: &ResourceLocation) -> bool {
    self
      .locations
      .contains(&(location.stack_name.clone(), location.logical_id.clone()))
  }
}
