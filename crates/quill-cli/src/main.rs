use clap::Parser;
use quill_cli::{execute_cli, init_tracing, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute_cli(cli).await
}
