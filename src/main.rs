// src/main.rs — ephemera entry point

use clap::Parser;

use ephemera::cli::{Cli, Commands};
use ephemera::infra::config::Config;
use ephemera::infra::logger;

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG / EPHEMERA_LOG)
    logger::init_logging("info");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    match cli.command {
        None => ephemera::cli::serve::run_serve(config, None, None).await,
        Some(Commands::Serve { host, port }) => {
            ephemera::cli::serve::run_serve(config, host, port).await
        }
        Some(Commands::Sweep { image, n, out }) => {
            ephemera::cli::sweep::run_sweep(&config, &image, n, &out).await
        }
        Some(Commands::Predict {
            dataset,
            input,
            kind,
        }) => ephemera::cli::predict::run_predict(&config, &dataset, &input, &kind).await,
    }
}
