use std::path::PathBuf;

use clap::Parser;
use opal_client::{ClientBuilder, init_tracing, shutdown_tracing};

#[derive(Parser)]
#[command(name = "opal-client")]
struct Args {
    /// Path to a TOML config file. Overridden by `OPAL_CLIENT__*` env vars.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args = Args::parse();
    let config = match opal_config::load(args.config.as_deref(), "OPAL_CLIENT") {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config: {err}");
            std::process::exit(1);
        }
    };

    let client = match ClientBuilder::new(config).build() {
        Ok(client) => client,
        Err(err) => {
            eprintln!("client build error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = client.run().await {
        eprintln!("client error: {err}");
    }
    shutdown_tracing();
}
