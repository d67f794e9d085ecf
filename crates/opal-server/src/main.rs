use std::path::PathBuf;

use clap::Parser;
use opal_server::{ServerBuilder, init_tracing, shutdown_tracing};

#[derive(Parser)]
#[command(name = "opal-server")]
struct Args {
    /// Path to a TOML config file. Overridden by `OPAL_SERVER__*` env vars.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args = Args::parse();
    let config = match opal_config::load(args.config.as_deref(), "OPAL_SERVER") {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config: {err}");
            std::process::exit(1);
        }
    };

    let server = match ServerBuilder::new(config).build().await {
        Ok(server) => server,
        Err(err) => {
            eprintln!("server build error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("server error: {err}");
    }
    shutdown_tracing();
}
