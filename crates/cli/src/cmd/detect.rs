//! Implementation of the `stackmove detect` command.
//!
//! Compares deployed and local stack sets and lists the resources that
//! moved, per environment.

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use stackmove_lib::detect::AmbiguousPaths;
use stackmove_lib::model::{Environment, TypedMapping};

use super::{InputArgs, Inputs};
use crate::output::{counted, print_info, print_json, print_success, print_warning, symbols};

#[derive(Serialize)]
struct DetectOutput {
  environment: Environment,
  mappings: Vec<TypedMapping>,
  ambiguous: Vec<AmbiguousPaths>,
}

pub fn cmd_detect(args: &InputArgs, json: bool) -> Result<()> {
  let inputs = Inputs::load(args)?;
  let plans = inputs.plan()?;

  if json {
    let output: Vec<DetectOutput> = plans
      .iter()
      .map(|plan| DetectOutput {
        environment: plan.environment.clone(),
        mappings: plan.detection.mappings.iter().map(|m| m.to_typed()).collect(),
        ambiguous: plan.detection.ambiguous.iter().map(|a| a.paths()).collect(),
      })
      .collect();
    return print_json(&output);
  }

  if plans.is_empty() {
    print_info("No local stacks to compare");
    return Ok(());
  }

  for plan in &plans {
    let detection = &plan.detection;
    if detection.is_empty() {
      print_success(&format!("{}: nothing to refactor", plan.environment));
      continue;
    }

    print_info(&format!(
      "{}: {}",
      plan.environment,
      counted(detection.mappings.len(), "move")
    ));
    for mapping in &detection.mappings {
      let typed = mapping.to_typed();
      println!(
        "  {} {} {} {}",
        symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()),
        typed.source_path,
        symbols::ARROW,
        typed.destination_path
      );
      println!(
        "      {}",
        typed.resource_type.if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
    }

    for group in &detection.ambiguous {
      let paths = group.paths();
      print_warning(&format!(
        "Ambiguous resources in {}: [{}] {} [{}]",
        plan.environment,
        paths.before.join(", "),
        symbols::ARROW,
        paths.after.join(", ")
      ));
    }
  }

  Ok(())
}
