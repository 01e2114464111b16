mod cmd;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{InputArgs, cmd_detect, cmd_generate};
use output::print_error;

/// stackmove - move CloudFormation resources between stacks without replacing them
#[derive(Parser)]
#[command(name = "stackmove")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List resources that moved between the deployed and local stacks
  Detect {
    #[command(flatten)]
    inputs: InputArgs,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
  },

  /// Print the stack templates a refactor would submit
  Generate {
    #[command(flatten)]
    inputs: InputArgs,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match &cli.command {
    Commands::Detect { inputs, json } => cmd_detect(inputs, *json),
    Commands::Generate { inputs, json } => cmd_generate(inputs, *json),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}
