//! Implementation of the `stackmove generate` command.
//!
//! Detects moves like `detect`, then prints the templates that would be
//! submitted for each affected stack.

use anyhow::{Context, Result};
use serde::Serialize;

use stackmove_lib::model::Environment;
use stackmove_lib::rewrite::{StackDefinition, generate_stack_definitions};

use super::{InputArgs, Inputs};
use crate::output::{counted, print_info, print_json, print_stat, print_warning};

#[derive(Serialize)]
struct GenerateOutput {
  environment: Environment,
  stacks: Vec<StackDefinition>,
}

pub fn cmd_generate(args: &InputArgs, json: bool) -> Result<()> {
  let inputs = Inputs::load(args)?;
  let plans = inputs.plan()?;

  let mut output = Vec::with_capacity(plans.len());
  for plan in &plans {
    let detection = &plan.detection;
    if !detection.ambiguous.is_empty() {
      print_warning(&format!(
        "Skipping {}: {} need an override file",
        plan.environment,
        counted(detection.ambiguous.len(), "ambiguous group")
      ));
      continue;
    }
    if detection.mappings.is_empty() {
      continue;
    }

    let stacks = generate_stack_definitions(&detection.mappings, &plan.deployed, &plan.local)
      .with_context(|| format!("Failed to generate templates for {}", plan.environment))?;
    output.push(GenerateOutput {
      environment: plan.environment.clone(),
      stacks,
    });
  }

  if json {
    return print_json(&output);
  }

  if output.is_empty() {
    print_info("Nothing to refactor");
    return Ok(());
  }

  for entry in &output {
    print_info(&entry.environment.to_string());
    for stack in &entry.stacks {
      println!();
      print_stat("Stack", &stack.stack_name);
      let body: serde_json::Value =
        serde_json::from_str(&stack.template_body).context("Generated template is not valid JSON")?;
      let pretty = serde_json::to_string_pretty(&body).context("Failed to format template")?;
      println!("{}", pretty);
    }
  }

  Ok(())
}
