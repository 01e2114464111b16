//! Move detection between a deployed and a local set of stacks.
//!
//! Both sides are digested independently and grouped by digest. Within a
//! digest group, locations present on both sides did not move; what remains
//! is either a clean one-to-one move, an addition, a deletion, or an
//! ambiguous group that needs a human decision.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::digest::{PrimaryIdentifiers, compute_resource_digests, digest_key};
use crate::exclude::{ExcludeList, NeverExclude};
use crate::model::{ResourceLocation, ResourceMapping, Stack};
use crate::util::hash::ResourceDigest;

/// Resources with identical content on both sides that cannot be paired 1:1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousMove {
  pub before: Vec<ResourceLocation>,
  pub after: Vec<ResourceLocation>,
}

/// Paths of an ambiguous group, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousPaths {
  pub before: Vec<String>,
  pub after: Vec<String>,
}

impl AmbiguousMove {
  pub fn paths(&self) -> AmbiguousPaths {
    AmbiguousPaths {
      before: self.before.iter().map(ResourceLocation::path).collect(),
      after: self.after.iter().map(ResourceLocation::path).collect(),
    }
  }

  fn touches(&self, stacks: &[String]) -> bool {
    self
      .before
      .iter()
      .chain(&self.after)
      .any(|l| stacks.contains(&l.stack_name))
  }
}

/// Result of comparing deployed and local stacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveDetection {
  /// Unambiguous moves, sorted by source location.
  pub mappings: Vec<ResourceMapping>,
  /// Groups that matched more than one candidate on either side.
  pub ambiguous: Vec<AmbiguousMove>,
}

impl MoveDetection {
  pub fn is_empty(&self) -> bool {
    self.mappings.is_empty() && self.ambiguous.is_empty()
  }
}

/// Options for [`detect_moves`].
pub struct DetectOptions<'a> {
  /// Destinations excluded here are never proposed.
  pub exclude: &'a dyn ExcludeList,
  /// Keep only moves whose source or destination stack is listed.
  pub stack_filter: Option<&'a [String]>,
  pub identifiers: &'a PrimaryIdentifiers,
}

impl<'a> DetectOptions<'a> {
  pub fn new(identifiers: &'a PrimaryIdentifiers) -> Self {
    Self {
      exclude: &NeverExclude,
      stack_filter: None,
      identifiers,
    }
  }
}

/// Group every digestible resource of `stacks` by digest.
fn locations_by_digest(stacks: &[Stack], identifiers: &PrimaryIdentifiers) -> BTreeMap<ResourceDigest, Vec<ResourceLocation>> {
  let digests = compute_resource_digests(stacks, identifiers);
  let mut grouped: BTreeMap<ResourceDigest, Vec<ResourceLocation>> = BTreeMap::new();

  for stack in stacks {
    for logical_id in stack.template.resources.keys() {
      if let Some(digest) = digests.get(&digest_key(&stack.stack_name, logical_id)) {
        grouped
          .entry(digest.clone())
          .or_default()
          .push(ResourceLocation::new(stack, logical_id.as_str()));
      }
    }
  }

  grouped
}

/// Detect resources that moved between `deployed` and `local`.
pub fn detect_moves(deployed: &[Stack], local: &[Stack], options: &DetectOptions<'_>) -> MoveDetection {
  let mut before = locations_by_digest(deployed, options.identifiers);
  let mut after = locations_by_digest(local, options.identifiers);

  let digests: BTreeSet<ResourceDigest> = before.keys().chain(after.keys()).cloned().collect();

  let mut detection = MoveDetection::default();

  for digest in digests {
    let mut b = before.remove(&digest).unwrap_or_default();
    let mut a = after.remove(&digest).unwrap_or_default();

    let b_set: HashSet<ResourceLocation> = b.iter().cloned().collect();
    let a_set: HashSet<ResourceLocation> = a.iter().cloned().collect();
    b.retain(|l| !a_set.contains(l));
    a.retain(|l| !b_set.contains(l));

    if b.is_empty() || a.is_empty() {
      // Pure additions and deletions go through a normal deployment.
      continue;
    }

    b.sort();
    a.sort();

    if b.len() == 1 && a.len() == 1 {
      let (source, destination) = (b.remove(0), a.remove(0));
      if options.exclude.is_excluded(&destination) {
        debug!(source = %source, destination = %destination, "move excluded");
        continue;
      }
      detection.mappings.push(ResourceMapping::new(source, destination));
    } else {
      detection.ambiguous.push(AmbiguousMove { before: b, after: a });
    }
  }

  drop_occupied_destinations(&mut detection.mappings, deployed);

  if let Some(stacks) = options.stack_filter {
    detection
      .mappings
      .retain(|m| stacks.contains(&m.source.stack_name) || stacks.contains(&m.destination.stack_name));
    detection.ambiguous.retain(|g| g.touches(stacks));
  }

  detection.mappings.sort();
  detection.ambiguous.sort_by(|x, y| x.before.cmp(&y.before));

  for group in &detection.ambiguous {
    let paths = group.paths();
    warn!(before = ?paths.before, after = ?paths.after, "ambiguous resource move");
  }
  debug!(
    mappings = detection.mappings.len(),
    ambiguous = detection.ambiguous.len(),
    "move detection complete"
  );

  detection
}

/// Remove moves onto a deployed location whose resource is not moving away.
///
/// Dropping one move can strand another that relied on its source leaving,
/// so this repeats until nothing changes.
fn drop_occupied_destinations(mappings: &mut Vec<ResourceMapping>, deployed: &[Stack]) {
  loop {
    let leaving: HashSet<(String, String)> = mappings
      .iter()
      .map(|m| (m.source.stack_name.clone(), m.source.logical_id.clone()))
      .collect();
    let count = mappings.len();

    mappings.retain(|m| {
      let destination = &m.destination;
      let occupied = deployed
        .iter()
        .any(|s| s.stack_name == destination.stack_name && s.template.resources.contains_key(&destination.logical_id));
      let vacated = leaving.contains(&(destination.stack_name.clone(), destination.logical_id.clone()));
      if occupied && !vacated {
        warn!(
          source = %m.source,
          destination = %destination,
          "destination is occupied by a deployed resource that stays in place"
        );
        return false;
      }
      true
    });

    if mappings.len() == count {
      break;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::exclude::InMemoryExcludeList;
  use crate::model::{Environment, Template};
  use serde_json::{Value, json};
  use tracing_test::traced_test;

  fn stack(name: &str, body: Value) -> Stack {
    Stack::new(
      Environment::new("123456789012", "us-east-1"),
      name,
      serde_json::from_value::<Template>(body).unwrap(),
    )
  }

  fn detect(deployed: &[Stack], local: &[Stack]) -> MoveDetection {
    let ids = PrimaryIdentifiers::builtin();
    detect_moves(deployed, local, &DetectOptions::new(&ids))
  }

  fn pairs(detection: &MoveDetection) -> Vec<(String, String)> {
    detection
      .mappings
      .iter()
      .map(|m| (m.source.to_string(), m.destination.to_string()))
      .collect()
  }

  const BUCKET: &str = "AWS::S3::Bucket";

  #[test]
  fn detects_simple_rename() {
    let deployed = [stack("Stack1", json!({"Resources": {"Bucket1": {"Type": BUCKET}}}))];
    let local = [stack("Stack1", json!({"Resources": {"Bucket2": {"Type": BUCKET}}}))];

    let detection = detect(&deployed, &local);
    assert_eq!(pairs(&detection), vec![("Stack1.Bucket1".to_string(), "Stack1.Bucket2".to_string())]);
    assert!(detection.ambiguous.is_empty());
  }

  #[test]
  fn detects_move_across_stacks() {
    let deployed = [
      stack("Stack1", json!({"Resources": {"Bucket": {"Type": BUCKET}, "Topic": {"Type": "AWS::SNS::Topic"}}})),
      stack("Stack2", json!({"Resources": {"Queue": {"Type": "AWS::SQS::Queue"}}})),
    ];
    let local = [
      stack("Stack1", json!({"Resources": {"Topic": {"Type": "AWS::SNS::Topic"}}})),
      stack("Stack2", json!({"Resources": {"Queue": {"Type": "AWS::SQS::Queue"}, "Bucket": {"Type": BUCKET}}})),
    ];

    assert_eq!(
      pairs(&detect(&deployed, &local)),
      vec![("Stack1.Bucket".to_string(), "Stack2.Bucket".to_string())]
    );
  }

  #[test]
  fn unchanged_resources_do_not_move() {
    let s = [stack("S", json!({"Resources": {"A": {"Type": BUCKET}, "B": {"Type": "AWS::SNS::Topic"}}}))];
    assert!(detect(&s, &s).is_empty());
  }

  #[test]
  fn reports_ambiguity_without_mapping() {
    let deployed = [stack("S", json!({"Resources": {"A": {"Type": BUCKET}, "B": {"Type": BUCKET}}}))];
    let local = [stack("S", json!({"Resources": {"C": {"Type": BUCKET}}}))];

    let detection = detect(&deployed, &local);
    assert!(detection.mappings.is_empty());
    assert_eq!(detection.ambiguous.len(), 1);
    let paths = detection.ambiguous[0].paths();
    assert_eq!(paths.before, vec!["S.A", "S.B"]);
    assert_eq!(paths.after, vec!["S.C"]);
  }

  #[test]
  fn remaining_pair_after_unmoved_removal_is_a_move() {
    // A stays put, B was renamed to C: the group shrinks to a clean 1:1.
    let deployed = [stack("S", json!({"Resources": {"A": {"Type": BUCKET}, "B": {"Type": BUCKET}}}))];
    let local = [stack("S", json!({"Resources": {"A": {"Type": BUCKET}, "C": {"Type": BUCKET}}}))];

    assert_eq!(pairs(&detect(&deployed, &local)), vec![("S.B".to_string(), "S.C".to_string())]);
  }

  #[test]
  #[traced_test]
  fn move_onto_occupied_location_is_dropped() {
    // C stays deployed with different content, so B cannot take its place.
    let deployed = [stack(
      "S",
      json!({"Resources": {
        "B": {"Type": "AWS::SQS::Queue", "Properties": {"DelaySeconds": 1}},
        "C": {"Type": "AWS::SQS::Queue", "Properties": {"DelaySeconds": 2}}
      }}),
    )];
    let local = [stack(
      "S",
      json!({"Resources": {"C": {"Type": "AWS::SQS::Queue", "Properties": {"DelaySeconds": 1}}}}),
    )];

    let detection = detect(&deployed, &local);
    assert!(detection.mappings.is_empty());
    assert!(logs_contain("destination is occupied"));
    assert!(logs_contain("S.B"));
    assert!(logs_contain("S.C"));
  }

  #[test]
  fn swap_of_logical_ids_is_kept() {
    let deployed = [stack("S", json!({"Resources": {"A": {"Type": BUCKET}, "B": {"Type": "AWS::SNS::Topic"}}}))];
    let local = [stack("S", json!({"Resources": {"A": {"Type": "AWS::SNS::Topic"}, "B": {"Type": BUCKET}}}))];

    assert_eq!(
      pairs(&detect(&deployed, &local)),
      vec![
        ("S.A".to_string(), "S.B".to_string()),
        ("S.B".to_string(), "S.A".to_string())
      ]
    );
  }

  #[test]
  fn additions_and_deletions_are_not_moves() {
    let deployed = [stack("S", json!({"Resources": {"Old": {"Type": "AWS::SNS::Topic"}}}))];
    let local = [stack("S", json!({"Resources": {"New": {"Type": BUCKET}}}))];
    assert!(detect(&deployed, &local).is_empty());
  }

  #[test]
  fn excluded_destination_is_never_proposed() {
    let deployed = [stack("S", json!({"Resources": {"Bucket1": {"Type": BUCKET}}}))];
    let local = [stack("S", json!({"Resources": {"Bucket2": {"Type": BUCKET}}}))];
    let ids = PrimaryIdentifiers::builtin();
    let exclude = InMemoryExcludeList::new(["S.Bucket2"]).unwrap();
    let options = DetectOptions {
      exclude: &exclude,
      ..DetectOptions::new(&ids)
    };

    assert!(detect_moves(&deployed, &local, &options).mappings.is_empty());
  }

  #[test]
  fn stack_filter_keeps_moves_touching_listed_stacks() {
    let deployed = [
      stack("A", json!({"Resources": {"B1": {"Type": BUCKET}}})),
      stack("X", json!({"Resources": {"T1": {"Type": "AWS::SNS::Topic"}}})),
    ];
    let local = [
      stack("B", json!({"Resources": {"B1": {"Type": BUCKET}}})),
      stack("X", json!({"Resources": {"T2": {"Type": "AWS::SNS::Topic"}}})),
    ];
    let ids = PrimaryIdentifiers::builtin();
    let filter = vec!["B".to_string()];
    let options = DetectOptions {
      stack_filter: Some(&filter),
      ..DetectOptions::new(&ids)
    };

    let detection = detect_moves(&deployed, &local, &options);
    assert_eq!(pairs(&detection), vec![("A.B1".to_string(), "B.B1".to_string())]);
  }

  #[test]
  fn renaming_dependency_and_dependent_together_maps_both() {
    let deployed = [stack(
      "S",
      json!({"Resources": {
        "Q1": {"Type": "AWS::SQS::Queue"},
        "P1": {"Type": "AWS::SQS::QueuePolicy", "Properties": {"Queues": [{"Ref": "Q1"}]}}
      }}),
    )];
    let local = [stack(
      "S",
      json!({"Resources": {
        "Q2": {"Type": "AWS::SQS::Queue"},
        "P2": {"Type": "AWS::SQS::QueuePolicy", "Properties": {"Queues": [{"Ref": "Q2"}]}}
      }}),
    )];

    assert_eq!(
      pairs(&detect(&deployed, &local)),
      vec![
        ("S.P1".to_string(), "S.P2".to_string()),
        ("S.Q1".to_string(), "S.Q2".to_string())
      ]
    );
  }
}
