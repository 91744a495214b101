//! remoteobj host - serve a JSON value to other processes.
//!
//! Wraps the value in a [`Proxy`], exposes it on a loopback bridge and
//! listens in the background until interrupted. Clients connect with
//! `RemoteProxy::connect` using the port printed on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use remoteobj::{Proxy, SerializationPolicy, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "remoteobj-host")]
#[command(about = "Host a JSON value behind a remoteobj proxy")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to (must be a loopback address)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Initial state as a JSON document (defaults to an empty list)
    #[arg(long, conflicts_with = "state_file")]
    state: Option<String>,

    /// Read the initial state from a JSON file
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Cancel requests still queued at shutdown instead of answering them
    #[arg(long)]
    no_fulfill_final: bool,

    /// Fail the listener when a result cannot be serialized
    #[arg(long)]
    strict: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn load_state(args: &Args) -> Result<Value> {
    let text = match (&args.state, &args.state_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read state file {}", path.display()))?,
        (None, None) => return Ok(Value::List(vec![])),
    };
    let json: serde_json::Value =
        serde_json::from_str(&text).context("initial state is not valid JSON")?;
    Ok(Value::from(json))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the port and final state lines.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let state = load_state(&args)?;
    let policy = if args.strict {
        SerializationPolicy::Strict
    } else {
        SerializationPolicy::Lenient
    };
    let proxy = Proxy::builder(state)
        .fulfill_final(!args.no_fulfill_final)
        .serialization(policy)
        .build();

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.host, args.port))?;
    let bound = proxy.serve(addr)?;
    proxy.listen_(true)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("failed to install signal handler")?;

    // Clients read this line to find the bridge
    println!("PROXY_PORT={}", bound.port());
    info!("Serving proxy on {}", bound);

    shutdown_rx
        .recv()
        .context("signal handler went away")?;
    info!("Shutdown signal received, stopping");

    let stopped = proxy.stop_listen_();
    if let Err(e) = &stopped {
        warn!("listener failed: {}", e);
    }
    proxy.stop_serving()?;

    let final_state = proxy.with_object(|value| value.to_json())??;
    println!("FINAL_STATE={}", final_state);

    stopped?;
    Ok(())
}
