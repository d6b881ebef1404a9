/// ORCHARD Router Service
///
/// Holds the mesh registry and forwards published messages to every
/// subscriber of their channel. Nodes and the manager reach it over TCP.
use anyhow::Context;
use clap::Parser;
use orchard_core::communication::DEFAULT_PORT;
use orchard_router::{serve, RouterState};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "orchard_router")]
#[command(about = "ORCHARD registry and message router service", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "orchard_router=debug,info"
    } else {
        "orchard_router=info"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    serve(listener, Arc::new(RouterState::new())).await?;
    Ok(())
}
