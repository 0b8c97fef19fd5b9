use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use client::network::CompetitionClient;
use client::roster;
use log::info;

/// Competition client: streams one country's roster to the server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Country id this client represents
    country_id: i32,

    /// Pause between record batches, in seconds
    delta_x: u64,

    /// Whitespace-separated `<id> <score>` competitors file
    competitors_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    info!(
        "starting client for country {} with delta_x={}s",
        args.country_id, args.delta_x
    );

    let roster = roster::load_roster(&args.competitors_file)?;
    let addr = format!("localhost:{}", shared::DEFAULT_PORT);

    let client = CompetitionClient::connect(
        &addr,
        args.country_id,
        Duration::from_secs(args.delta_x),
        roster,
    )
    .await?;
    client.run().await?;

    Ok(())
}
