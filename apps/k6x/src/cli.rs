//! Command line interface definition

use clap::{Parser, Subcommand};
use k6x_types::{Engine, Module, Platform};
use std::path::PathBuf;

/// k6x - Build k6 with extensions
#[derive(Parser)]
#[command(name = "k6x")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build k6 with extensions")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output logs as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging, including the build container's output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build a k6 binary with the given extensions
    Build {
        /// Module to include, as name@tag (repeatable, order is kept)
        #[arg(long = "with", value_name = "MODULE")]
        modules: Vec<Module>,

        /// Target platform as os/arch (default: this host)
        #[arg(long, value_name = "OS/ARCH")]
        platform: Option<Platform>,

        /// Comma separated list of builders to try, in order
        #[arg(long, value_enum, value_delimiter = ',', value_name = "LIST")]
        builder: Vec<Engine>,

        /// Where to write the binary
        #[arg(short, long, value_name = "PATH", default_value = "k6")]
        output: PathBuf,

        /// Forward the build container's output to the log
        #[arg(short, long)]
        verbose: bool,
    },

    /// Start the builder service
    Service {
        /// Listen address (default: 127.0.0.1:8787)
        #[arg(long, value_name = "ADDRESS")]
        addr: Option<String>,

        /// Extension registry filter passed to the resolver (default: [*])
        #[arg(long, value_name = "EXPR")]
        filter: Option<String>,

        /// Comma separated list of builders to try, in order
        #[arg(long, value_enum, value_delimiter = ',', value_name = "LIST")]
        builder: Vec<Engine>,
    },
}
