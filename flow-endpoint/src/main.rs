//! Flow exchange endpoint for local development.
//!
//! Serves `POST /_flow/endpoint` with the built-in server components, so a
//! bridge (or any Flow client) can run against it without a full backend.
//!
//! Usage:
//!   flow-endpoint --port 8000
//!   flow-endpoint --guard 401 --login-route /login

use std::sync::Arc;
use anyhow::{bail, Context, Result};
use clap::Parser;
use flow_bridge::DEFAULT_ENDPOINT;
use flow_endpoint::{build_router, ComponentRegistry, EndpointState, Guard};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "flow-endpoint")]
#[command(about = "Reference Flow exchange endpoint")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Deny every exchange with this status (401 or 403)
    #[arg(long)]
    guard: Option<u16>,

    /// Login route sent along with denials
    #[arg(long)]
    login_route: Option<String>,

    /// Unauthorized route sent along with denials
    #[arg(long)]
    unauthorized_route: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn guard_from(args: &Args) -> Result<Option<Guard>> {
    let Some(status) = args.guard else {
        return Ok(None);
    };
    let mut guard = match status {
        401 => Guard::unauthenticated(),
        403 => Guard::forbidden(),
        other => bail!("--guard must be 401 or 403, got {other}"),
    };
    if let Some(route) = &args.login_route {
        guard = guard.with_login_route(route.as_str());
    }
    if let Some(route) = &args.unauthorized_route {
        guard = guard.with_unauthorized_route(route.as_str());
    }
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let mut endpoint = EndpointState::new(ComponentRegistry::with_builtins());
    if let Some(guard) = guard_from(&args)? {
        info!("Denying every exchange with status {}", guard.status());
        endpoint = endpoint.with_guard(guard);
    }
    info!("Serving {:?}", endpoint.registry());

    let address = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    println!("\n========================================");
    println!("  Flow Endpoint Running");
    println!("========================================");
    println!("  Exchange:  http://{}{}", address, DEFAULT_ENDPOINT);
    println!("========================================\n");

    axum::serve(listener, build_router(Arc::new(endpoint)))
        .await
        .context("HTTP server failed")?;
    Ok(())
}
