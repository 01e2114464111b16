//! Well-known names shared across the engine.

/// Metadata key holding the construct path of a resource.
pub const CDK_PATH_METADATA_KEY: &str = "aws:cdk:path";

/// Resource type of the toolkit-managed bookkeeping resource.
pub const CDK_METADATA_RESOURCE_TYPE: &str = "AWS::CDK::Metadata";

/// Assembly artifact type for CloudFormation stacks.
pub const STACK_ARTIFACT_TYPE: &str = "aws:cloudformation:stack";

/// Assembly metadata entry carrying a resource's logical ID.
pub const LOGICAL_ID_ENTRY: &str = "aws:cdk:logicalId";

/// Assembly metadata entries marking a resource as excluded from refactoring.
pub const DO_NOT_REFACTOR_ENTRY: &str = "aws:cdk:do-not-refactor";
pub const SKIP_REFACTOR_ENTRY: &str = "aws:cdk:skip-refactor";

/// Resource type reported for locations that do not resolve to a resource.
pub const UNKNOWN_RESOURCE_TYPE: &str = "Unknown";

/// Oldest bootstrap stack version that supports stack refactor operations.
pub const MIN_REFACTOR_BOOTSTRAP_VERSION: u32 = 28;

/// Number of hex characters of a path hash appended to generated output IDs.
pub const EXPORT_HASH_LEN: usize = 8;

/// Placeholder standing in for the digest of a resource on a dependency cycle.
pub const CYCLE_MARKER: &str = "$cycle$";

/// SSM parameter holding the bootstrap stack version of an environment.
pub const BOOTSTRAP_VERSION_PARAMETER: &str = "/cdk-bootstrap/hnb659fds/version";

/// Stack statuses that do not describe a live stack.
pub const SKIPPED_STACK_STATUSES: &[&str] = &["DELETE_COMPLETE", "REVIEW_IN_PROGRESS"];
