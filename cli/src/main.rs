mod exec;
mod proto;
mod status;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// samay - fan one query out to several AI chat services and collect
/// their replies.
#[derive(Debug, Parser)]
#[clap(author, version)]
struct MultitoolCli {
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Run one query against the scripted demo services and print the
    /// per-service replies.
    #[clap(visible_alias = "e")]
    Exec(exec::ExecCli),

    /// Speak the Submission/Event protocol over stdin/stdout.
    #[clap(visible_alias = "p")]
    Proto(proto::ProtoCli),

    /// Query orchestrator status through the bridge contract and render
    /// per-phase counts.
    #[clap(visible_alias = "s")]
    Status(status::StatusCli),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = MultitoolCli::parse();
    match cli.subcommand {
        Subcommand::Exec(exec_cli) => exec::run_main(exec_cli).await,
        Subcommand::Proto(proto_cli) => proto::run_main(proto_cli).await,
        Subcommand::Status(status_cli) => status::run_main(status_cli).await,
    }
}
