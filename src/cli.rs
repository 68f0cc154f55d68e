use clap::{Parser, Subcommand};
use meshprov::plan::loader::parse_var;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "meshprov")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(arg_required_else_help = true)]
#[command(about = "Apply declarative configuration plans to a mesh-networking device")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply a plan to the device, rolling back on failure
    Run {
        /// YAML or JSON plan file
        plan: PathBuf,
        /// Override a plan variable (NAME=VALUE), may be repeated
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Load and validate a plan without touching the device
    Check {
        plan: PathBuf,
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Authenticate against the device and exit
    Login,
    /// Unwind compensations left behind by an interrupted run
    Recover,
}
