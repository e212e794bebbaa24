//! Offline tooling for the ownerkit proxy
//!
//! Resolves dispatch codes, encodes request parcels, decodes reply dumps and
//! checks configuration files without a device attached.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod args;
mod commands;

use commands::{config, opcodes, wire};

#[derive(Parser)]
#[command(name = "ownerkit")]
#[command(about = "ownerkit - device-owner privileged operation tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List every operation with its resolved dispatch code
    Opcodes(opcodes::OpcodesArgs),

    /// Encode a request parcel as hex
    Encode(wire::EncodeArgs),

    /// Decode a hex reply parcel
    Decode(wire::DecodeArgs),

    /// Render an `adb shell service call` line for a device policy operation
    ServiceCall(wire::EncodeArgs),

    /// Load, layer and validate a configuration file
    CheckConfig {
        /// Configuration file to check (defaults to --config)
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let settings = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Opcodes(args) => opcodes::run(&args, &settings)?,
        Commands::Encode(args) => println!("{}", wire::encode(&args, &settings)?),
        Commands::Decode(args) => println!("{}", wire::decode(&args, &settings)?),
        Commands::ServiceCall(args) => println!("{}", wire::service_call(&args, &settings)?),
        Commands::CheckConfig { path } => {
            let path = path.or(cli.config).ok_or_else(|| {
                anyhow::anyhow!("no configuration file given; pass a path or --config")
            })?;
            print!("{}", config::check(&path)?);
        }
    }

    Ok(())
}
