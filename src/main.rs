use clap::Parser;

use talkdub::cli::{Cli, run};
use talkdub_utils::logging::init_tracing;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("failed to initialize logging: {e}");
    }

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
