//! # packset inspector
//!
//! Command-line tool for inspecting packset dataset directories.
//!
//! ```bash
//! # Summarize a dataset's configuration
//! packset info data/ run7
//!
//! # Load every section and verify alignment
//! packset check data/ run7
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use packset::persist::DatasetPersistence;

/// packset - packet-derived dataset storage inspector
#[derive(Parser)]
#[command(name = "packset")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a dataset's configuration
    Info {
        /// Dataset directory
        #[arg(value_name = "DIR")]
        directory: PathBuf,

        /// Dataset name
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Load every section and verify row alignment
    Check {
        /// Dataset directory
        #[arg(value_name = "DIR")]
        directory: PathBuf,

        /// Dataset name
        #[arg(value_name = "NAME")]
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Info { directory, name } => {
            let persistence = DatasetPersistence::new(&directory);
            let attrs = persistence
                .load_attributes(&name)
                .with_context(|| format!("reading configuration of '{name}'"))?;

            println!("dataset:      {name}");
            println!("version:      {}", attrs.version);
            println!("items:        {}", attrs.num_items);
            let ps = attrs.data.packet_shape;
            println!(
                "packet shape: {} x {} x {}",
                ps.frames, ps.rows, ps.cols
            );
            println!("data backend: {}", attrs.data.backend.name);
            for (key, spec) in &attrs.data.types {
                println!("  {key}: {} {:?}", spec.dtype, spec.shape);
            }
            for (key, spec) in &attrs.targets.types {
                println!("targets {key}: {} {:?}", spec.dtype, spec.shape);
            }
            println!("metadata fields: {}", attrs.metadata.fields.join(", "));
        }

        Commands::Check { directory, name } => {
            let persistence = DatasetPersistence::new(&directory);
            let dataset = persistence
                .load_dataset(&name)
                .with_context(|| format!("loading dataset '{name}'"))?;
            info!("all sections of '{name}' loaded");
            println!(
                "ok: {} items across {} data collections",
                dataset.num_items(),
                dataset.data_map().len()
            );
        }
    }

    Ok(())
}
