//! Detect and rewrite, driven from files the way the CLI drives them.

use serde_json::{Value, json};
use stackmove_lib::assembly::AssemblyManifest;
use stackmove_lib::detect::{DetectOptions, detect_moves};
use stackmove_lib::digest::PrimaryIdentifiers;
use stackmove_lib::exclude::{InMemoryExcludeList, ManifestExcludeList, UnionExcludeList};
use stackmove_lib::model::{Environment, StackSet};
use stackmove_lib::overrides::MappingOverrides;
use stackmove_lib::rewrite::generate_stack_definitions;

use super::common::{TestEnv, stack_set};

fn deployed_doc() -> Value {
  stack_set(&[
    (
      "Storage",
      json!({"Resources": {
        "Bucket": {"Type": "AWS::S3::Bucket", "Metadata": {"aws:cdk:path": "Storage/Bucket/Resource"}},
        "Table": {"Type": "AWS::DynamoDB::Table", "Properties": {"TableName": "orders"}}
      }}),
    ),
    (
      "Service",
      json!({"Resources": {
        "Handler": {"Type": "AWS::Lambda::Function", "Properties": {
          "Environment": {"Variables": {"BUCKET": {"Fn::ImportValue": "Storage:BucketName"}}}
        }}
      }}),
    ),
  ])
}

fn local_doc() -> Value {
  stack_set(&[
    (
      "Storage",
      json!({"Resources": {
        "Table": {"Type": "AWS::DynamoDB::Table", "Properties": {"TableName": "orders"}}
      }}),
    ),
    (
      "Service",
      json!({"Resources": {
        "Handler": {"Type": "AWS::Lambda::Function", "Properties": {
          "Environment": {"Variables": {"BUCKET": {"Ref": "AssetBucket"}}}
        }},
        "AssetBucket": {"Type": "AWS::S3::Bucket", "Metadata": {"aws:cdk:path": "Service/AssetBucket/Resource"}}
      }}),
    ),
  ])
}

fn with_export(mut doc: Value) -> Value {
  doc["stacks"][0]["template"]["Outputs"] = json!({
    "BucketName": {"Value": {"Ref": "Bucket"}, "Export": {"Name": "Storage:BucketName"}}
  });
  doc
}

#[test]
fn moved_bucket_is_detected_and_rewritten() {
  let env = TestEnv::new();
  let deployed = StackSet::load(&env.write_json("deployed.json", &with_export(deployed_doc()))).unwrap();
  let local = StackSet::load(&env.write_json("local.json", &local_doc())).unwrap();
  let identifiers = PrimaryIdentifiers::builtin();

  let detection = detect_moves(&deployed.stacks, &local.stacks, &DetectOptions::new(&identifiers));
  assert!(detection.ambiguous.is_empty());
  let moves: Vec<String> = detection
    .mappings
    .iter()
    .map(|m| format!("{} -> {}", m.source, m.destination))
    .collect();
  assert_eq!(moves, vec!["Storage.Bucket -> Service.AssetBucket"]);

  let definitions = generate_stack_definitions(&detection.mappings, &deployed.stacks, &local.stacks).unwrap();
  let names: Vec<&str> = definitions.iter().map(|d| d.stack_name.as_str()).collect();
  assert_eq!(names, vec!["Service", "Storage"]);

  let service: Value = serde_json::from_str(&definitions[0].template_body).unwrap();
  assert_eq!(
    service["Resources"]["AssetBucket"]["Metadata"]["aws:cdk:path"],
    json!("Storage/Bucket/Resource")
  );
  assert_eq!(
    service["Resources"]["Handler"]["Properties"]["Environment"]["Variables"]["BUCKET"],
    json!({"Ref": "AssetBucket"})
  );

  let storage: Value = serde_json::from_str(&definitions[1].template_body).unwrap();
  assert!(storage["Resources"].get("Bucket").is_none());
  assert!(storage.get("Outputs").is_none());
}

#[test]
fn manifest_and_file_exclusions_combine() {
  let env = TestEnv::new();
  let deployed = StackSet::load(&env.write_json("deployed.json", &with_export(deployed_doc()))).unwrap();
  let local = StackSet::load(&env.write_json("local.json", &local_doc())).unwrap();
  let identifiers = PrimaryIdentifiers::builtin();

  let manifest_path = env.write_json(
    "manifest.json",
    &json!({
      "version": "36.0.0",
      "artifacts": {
        "Service": {
          "type": "aws:cloudformation:stack",
          "environment": "aws://123456789012/us-east-1",
          "metadata": {
            "/Service/AssetBucket/Resource": [
              {"type": "aws:cdk:logicalId", "data": "AssetBucket"},
              {"type": "aws:cdk:do-not-refactor", "data": true}
            ]
          }
        }
      }
    }),
  );
  let manifest = AssemblyManifest::load(&manifest_path).unwrap();

  let mut exclude = UnionExcludeList::default();
  exclude.push(Box::new(ManifestExcludeList::new(&manifest)));
  exclude.push(Box::new(InMemoryExcludeList::new(["Storage.Unrelated"]).unwrap()));

  let options = DetectOptions {
    exclude: &exclude,
    ..DetectOptions::new(&identifiers)
  };
  let detection = detect_moves(&deployed.stacks, &local.stacks, &options);
  assert!(detection.mappings.is_empty());
}

#[test]
fn overrides_from_file_resolve_against_deployed() {
  let env = TestEnv::new();
  let deployed = StackSet::load(&env.write_json("deployed.json", &deployed_doc())).unwrap();
  let local = StackSet::load(&env.write_json("local.json", &local_doc())).unwrap();
  let overrides = MappingOverrides::load(&env.write_json(
    "overrides.json",
    &json!({"environments": [{
      "account": "123456789012",
      "region": "us-east-1",
      "resources": {"Storage.Bucket": "Service.AssetBucket"}
    }]}),
  ))
  .unwrap();

  let environment = Environment::new("123456789012", "us-east-1");
  let mappings = overrides
    .resolve(&environment, &deployed.stacks, &local.stacks)
    .unwrap()
    .unwrap();
  assert_eq!(mappings.len(), 1);
  assert_eq!(mappings[0].to_typed().source_path, "Storage/Bucket/Resource");
  assert_eq!(mappings[0].to_typed().destination_path, "Service/AssetBucket/Resource");
  assert_eq!(mappings[0].to_typed().resource_type, "AWS::S3::Bucket");
}

#[test]
fn primary_identifier_file_changes_identity() {
  let env = TestEnv::new();
  let deployed = StackSet::load(&env.write_json(
    "deployed.json",
    &stack_set(&[(
      "App",
      json!({"Resources": {"Q1": {"Type": "AWS::SQS::Queue", "Properties": {"QueueName": "jobs", "VisibilityTimeout": 30}}}}),
    )]),
  ))
  .unwrap();
  let local = StackSet::load(&env.write_json(
    "local.json",
    &stack_set(&[(
      "App",
      json!({"Resources": {"Q2": {"Type": "AWS::SQS::Queue", "Properties": {"QueueName": "jobs", "VisibilityTimeout": 60}}}}),
    )]),
  ))
  .unwrap();

  let builtin = PrimaryIdentifiers::builtin();
  assert!(detect_moves(&deployed.stacks, &local.stacks, &DetectOptions::new(&builtin)).is_empty());

  let mut identifiers = PrimaryIdentifiers::builtin();
  identifiers
    .extend_from_file(&env.write_json("ids.json", &json!({"AWS::SQS::Queue": ["QueueName"]})))
    .unwrap();
  let detection = detect_moves(&deployed.stacks, &local.stacks, &DetectOptions::new(&identifiers));
  assert_eq!(detection.mappings.len(), 1);
}
