mod detect;
mod generate;

pub use detect::cmd_detect;
pub use generate::cmd_generate;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use stackmove_lib::assembly::AssemblyManifest;
use stackmove_lib::detect::{DetectOptions, MoveDetection, detect_moves};
use stackmove_lib::digest::PrimaryIdentifiers;
use stackmove_lib::exclude::{InMemoryExcludeList, ManifestExcludeList, UnionExcludeList};
use stackmove_lib::model::{Environment, Stack, StackSet};
use stackmove_lib::overrides::MappingOverrides;

/// Inputs shared by the offline commands.
#[derive(Debug, Args)]
pub struct InputArgs {
  /// Stack-set file with the stacks as currently deployed
  #[arg(long)]
  pub deployed: PathBuf,

  /// Stack-set file with the freshly synthesized stacks
  #[arg(long)]
  pub local: PathBuf,

  /// JSON array of locations or construct paths that must stay in place
  #[arg(long)]
  pub exclude_file: Option<PathBuf>,

  /// Cloud assembly manifest whose flagged resources stay in place
  #[arg(long)]
  pub manifest: Option<PathBuf>,

  /// Explicit mappings to use instead of detection
  #[arg(long)]
  pub override_file: Option<PathBuf>,

  /// Only consider moves touching these stacks (comma-separated)
  #[arg(long, value_delimiter = ',')]
  pub stacks: Vec<String>,

  /// JSON file of extra primary identifiers by resource type
  #[arg(long)]
  pub primary_identifiers: Option<PathBuf>,
}

/// Everything loaded from disk for one invocation.
pub struct Inputs {
  deployed: Vec<Stack>,
  local: Vec<Stack>,
  exclude: UnionExcludeList,
  overrides: Option<MappingOverrides>,
  identifiers: PrimaryIdentifiers,
  stacks: Option<Vec<String>>,
}

/// Detection result for one environment, with the stacks it was computed from.
pub struct EnvironmentPlan {
  pub environment: Environment,
  pub deployed: Vec<Stack>,
  pub local: Vec<Stack>,
  pub detection: MoveDetection,
}

impl Inputs {
  pub fn load(args: &InputArgs) -> Result<Self> {
    let deployed = StackSet::load(&args.deployed)
      .with_context(|| format!("Failed to load deployed stacks: {}", args.deployed.display()))?
      .stacks;
    let local = StackSet::load(&args.local)
      .with_context(|| format!("Failed to load local stacks: {}", args.local.display()))?
      .stacks;

    let mut exclude = UnionExcludeList::new(Vec::new());
    if let Some(path) = &args.exclude_file {
      let list = InMemoryExcludeList::load(path).context("Failed to load exclude file")?;
      debug!(entries = list.len(), "loaded exclude file");
      exclude.push(Box::new(list));
    }
    if let Some(path) = &args.manifest {
      let manifest = AssemblyManifest::load(path).context("Failed to load assembly manifest")?;
      exclude.push(Box::new(ManifestExcludeList::new(&manifest)));
    }

    let overrides = args
      .override_file
      .as_deref()
      .map(MappingOverrides::load)
      .transpose()
      .context("Failed to load override file")?;

    let mut identifiers = PrimaryIdentifiers::builtin();
    if let Some(path) = &args.primary_identifiers {
      identifiers
        .extend_from_file(path)
        .context("Failed to load primary identifiers")?;
    }

    let stacks = (!args.stacks.is_empty()).then(|| args.stacks.clone());

    Ok(Self {
      deployed,
      local,
      exclude,
      overrides,
      identifiers,
      stacks,
    })
  }

  /// Compute the moves of every environment the local stacks target.
  pub fn plan(&self) -> Result<Vec<EnvironmentPlan>> {
    let mut environments: BTreeMap<(&str, &str), &Environment> = BTreeMap::new();
    for stack in &self.local {
      environments
        .entry((stack.environment.account.as_str(), stack.environment.region.as_str()))
        .or_insert(&stack.environment);
    }

    let mut plans = Vec::with_capacity(environments.len());
    for environment in environments.into_values() {
      let deployed = in_environment(&self.deployed, environment);
      let local = in_environment(&self.local, environment);

      let overridden = match &self.overrides {
        Some(overrides) => overrides
          .resolve(environment, &deployed, &local)
          .with_context(|| format!("Invalid overrides for {}", environment))?,
        None => None,
      };

      let detection = match overridden {
        Some(mappings) => MoveDetection {
          mappings,
          ambiguous: Vec::new(),
        },
        None => {
          let options = DetectOptions {
            exclude: &self.exclude,
            stack_filter: self.stacks.as_deref(),
            identifiers: &self.identifiers,
          };
          detect_moves(&deployed, &local, &options)
        }
      };

      plans.push(EnvironmentPlan {
        environment: environment.clone(),
        deployed,
        local,
        detection,
      });
    }

    Ok(plans)
  }
}

fn in_environment(stacks: &[Stack], environment: &Environment) -> Vec<Stack> {
  stacks
    .iter()
    .filter(|s| s.environment.same_target(environment))
    .cloned()
    .collect()
}
