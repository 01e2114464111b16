//! Exclude policies: locations that must never be proposed as a move.
//!
//! A policy is any [`ExcludeList`]. The variants cover the ways a user can
//! pin resources in place:
//!
//! - [`NeverExclude`] / [`AlwaysExclude`]: trivial policies
//! - [`InMemoryExcludeList`]: explicit `Stack.LogicalId` locations and construct paths
//! - [`ManifestExcludeList`]: resources flagged in the assembly manifest
//! - [`UnionExcludeList`]: excluded if any member excludes

mod manifest;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::model::{ResourceLocation, parse_location_string};

pub use manifest::ManifestExcludeList;

/// Errors raised while loading an exclude file.
#[derive(Debug, Error)]
pub enum ExcludeError {
  #[error("failed to read exclude file {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse exclude file {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("exclude file {path} must contain a JSON array of strings")]
  NotAnArray { path: String },

  #[error("exclude file {path}: entry {index} is not a string: {value}")]
  NonStringEntry { path: String, index: usize, value: String },

  #[error("exclude file {path}: entry {index} '{entry}' is neither 'StackName.LogicalId' nor a construct path")]
  MalformedEntry { path: String, index: usize, entry: String },
}

/// Decides whether a location is pinned in place.
pub trait ExcludeList: Send + Sync {
  fn is_excluded(&self, location: &ResourceLocation) -> bool;
}

/// Excludes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExclude;

impl ExcludeList for NeverExclude {
  fn is_excluded(&self, _location: &ResourceLocation) -> bool {
    false
  }
}

/// Excludes everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysExclude;

impl ExcludeList for AlwaysExclude {
  fn is_excluded(&self, _location: &ResourceLocation) -> bool {
    true
  }
}

/// Explicit list of locations and construct paths.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExcludeList {
  locations: HashSet<(String, String)>,
  paths: HashSet<String>,
}

/// Whether `s` looks like a construct path (`Stack/Construct/...`).
fn is_construct_path(s: &str) -> bool {
  s.contains('/') && !s.chars().any(char::is_whitespace) && s.trim_start_matches('/').split('/').all(|seg| !seg.is_empty())
}

impl InMemoryExcludeList {
  /// Build from entries, classifying each as a location or a construct path.
  ///
  /// Returns the offending entry's index and text if it is neither.
  pub fn new<I, S>(entries: I) -> Result<Self, (usize, String)>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut list = Self::default();
    for (index, entry) in entries.into_iter().enumerate() {
      let entry = entry.as_ref();
      if let Some((stack, logical_id)) = parse_location_string(entry) {
        list.locations.insert((stack.to_string(), logical_id.to_string()));
      } else if is_construct_path(entry) {
        list.paths.insert(entry.to_string());
      } else {
        return Err((index, entry.to_string()));
      }
    }
    Ok(list)
  }

  /// Load a JSON array of strings.
  pub fn load(path: &Path) -> Result<Self, ExcludeError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| ExcludeError::Read {
      path: display.clone(),
      source,
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|source| ExcludeError::Parse {
      path: display.clone(),
      source,
    })?;

    let Value::Array(items) = value else {
      return Err(ExcludeError::NotAnArray { path: display });
    };

    let mut entries = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
      match item {
        Value::String(s) => entries.push(s),
        other => {
          return Err(ExcludeError::NonStringEntry {
            path: display,
            index,
            value: other.to_string(),
          });
        }
      }
    }

    Self::new(entries).map_err(|(index, entry)| ExcludeError::MalformedEntry {
      path: display,
      index,
      entry,
    })
  }

  pub fn len(&self) -> usize {
    self.locations.len() + self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl ExcludeList for InMemoryExcludeList {
  fn is_excluded(&self, location: &ResourceLocation) -> bool {
    self
      .locations
      .contains(&(location.stack_name.clone(), location.logical_id.clone()))
      || location.construct_path().is_some_and(|p| self.paths.contains(p))
  }
}

/// Excluded if any member excludes.
#[derive(Default)]
pub struct UnionExcludeList {
  members: Vec<Box<dyn ExcludeList>>,
}

impl UnionExcludeList {
  pub fn new(members: Vec<Box<dyn ExcludeList>>) -> Self {
    Self { members }
  }

  pub fn push(&mut self, member: Box<dyn ExcludeList>) {
    self.members.push(member);
  }
}

impl ExcludeList for UnionExcludeList {
  fn is_excluded(&self, location: &ResourceLocation) -> bool {
    self.members.iter().any(|m| m.is_excluded(location))
  }
}
