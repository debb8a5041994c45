// src/cli/mod.rs — CLI definition (clap derive)

pub mod predict;
pub mod serve;
pub mod sweep;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ephemera",
    about = "Ephemeral dataset and image sessions with guarded compute jobs",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API (default when no subcommand is given)
    Serve {
        /// Bind address, overrides [api].host
        #[arg(long)]
        host: Option<String>,
        /// Port, overrides [api].port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Quantise an image for every k in 2..=N and write the results as JPEGs
    Sweep {
        /// Image file (png, jpeg, bmp, gif)
        image: String,
        /// Upper bound for k
        #[arg(short, long)]
        n: i64,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: String,
    },
    /// Train on a table and classify one row of answers
    Predict {
        /// CSV/TSV or .xlsx file
        dataset: String,
        /// Comma-separated feature values, e.g. 1,0,1,1
        #[arg(short, long)]
        input: String,
        /// classifier (label = last column) or expert (label = answer column)
        #[arg(short, long, default_value = "classifier")]
        kind: String,
    },
}
