//! Command line interface built on clap.
//!
//! Subcommands: `describe` prints a kind's transition table, `demo` drives a
//! built-in adapter through its lifecycle while rendering the watch stream,
//! and `version` prints the API version.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Lifecycle runtime for remotely controlled plugins.
#[derive(Debug, Parser)]
#[command(name = "plugin-lifecycle", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file; defaults to `plugin.toml` in the working directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Plugin kinds known to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Model,
    Agent,
    Orchestrator,
    Evaluation,
    Transform,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Prints the transition table of a plugin kind.
    Describe {
        #[arg(long, value_enum)]
        kind: KindArg,
    },

    /// Runs a built-in adapter through its lifecycle.
    Demo {
        #[arg(long, value_enum, default_value_t = KindArg::Model)]
        kind: KindArg,

        /// Print raw watch lines instead of the spinner view.
        #[arg(long, default_value_t = false)]
        raw: bool,
    },

    /// Prints the API version.
    Version,
}
