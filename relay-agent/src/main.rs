//! Relay Agent Binary Entry Point

use clap::Parser;
use relay_agent::{run_relay, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Err(e) = run_relay(args).await {
        tracing::error!("Relay failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}
