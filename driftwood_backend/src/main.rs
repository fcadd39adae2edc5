use anyhow::Result;
use clap::{Parser, Subcommand};
use driftwood_backend::config::DriftwoodConfig;
use driftwood_backend::node::DriftwoodNode;
use driftwood_backend::telemetry;
use driftwood_backend::utils;

#[derive(Parser)]
#[command(author, version, about = "Driftwood ActivityPub inbox backend")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Accept deliveries over HTTP and process them in the background
    Serve,
    /// Process every pending ledger entry once and exit
    Sweep,
    /// Fetch and cache a remote actor by its identifier
    Resolve {
        /// Actor URI, e.g. https://mastodon.example/users/alice
        uri: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::print_banner();
    telemetry::init_tracing();

    let args = Args::parse();
    let config = DriftwoodConfig::from_env()?;
    let node = DriftwoodNode::start(config).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => node.run_http_server().await,
        Command::Sweep => {
            let report = node.sweep_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            tracing::info!(remaining = node.pending_count()?, "sweep complete");
            Ok(())
        }
        Command::Resolve { uri } => {
            let actor = node.resolve_actor(&uri).await?;
            println!("uri:        {}", actor.uri);
            println!("handle:     {}@{}", actor.username, actor.domain);
            println!("fetched_at: {}", actor.fetched_at);
            Ok(())
        }
    }
}
