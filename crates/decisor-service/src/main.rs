use anyhow::Result;
use clap::Parser;
use decisor_service::{build_app, spawn_canary_refresh, state_from_env};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to
    #[arg(long, env = "DECISOR_ADDR", default_value = "0.0.0.0:8087")]
    addr: String,
    /// How often to re-read canary flags from the environment, in seconds
    #[arg(long, default_value_t = 5)]
    canary_refresh_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("decisor_service=info,decisor_engine=info,decisor=info,tower_http=info")
    });
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();
    let state = state_from_env()?;
    spawn_canary_refresh(
        state.canary_handle(),
        Duration::from_secs(args.canary_refresh_secs.max(1)),
    );

    info!(addr = %args.addr, "starting decision service");
    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, build_app(state)).await?;

    Ok(())
}
