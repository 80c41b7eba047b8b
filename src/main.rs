//! Unfurl CLI: expand templated resource configurations.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "unfurl",
    version,
    about = "Configuration expansion engine: templates in, flat resources and layout out"
)]
struct Cli {
    #[command(subcommand)]
    command: unfurl::cli::Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = unfurl::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
