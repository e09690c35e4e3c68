//! Tessera Server Binary
//!
//! Starts the TCP (and local socket) server for Tessera.

use std::sync::Arc;

use clap::Parser;
use tessera::config::DEFAULT_PORT;
use tessera::{Config, Engine, Server};
use tracing_subscriber::{fmt, EnvFilter};

/// Tessera Server
#[derive(Parser, Debug)]
#[command(name = "tessera-server")]
#[command(about = "Network data-structure server with ordered subscriptions")]
#[command(version)]
struct Args {
    /// Listen host
    #[arg(short, long, default_value = "0.0.0.0")]
    listen: String,

    /// Listen port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Local socket path prefix (the port is appended)
    #[arg(long, default_value = "/var/run/tessera_")]
    local_socket_prefix: String,

    /// Do not listen on a local socket
    #[arg(long)]
    no_local_socket: bool,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Container type alias, as alias=real_type (repeatable)
    #[arg(long = "alias", value_parser = parse_pair)]
    aliases: Vec<(String, String)>,

    /// User stored in __meta__/users, as name=password (repeatable)
    #[arg(long = "user", value_parser = parse_pair)]
    users: Vec<(String, String)>,
}

fn parse_pair(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .ok_or_else(|| format!("expected name=value, got {}", value))
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tessera=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("Tessera Server v{}", tessera::VERSION);

    let mut builder = Config::builder()
        .listen_addr(format!("{}:{}", args.listen, args.port))
        .local_socket_prefix((!args.no_local_socket).then_some(args.local_socket_prefix))
        .max_connections(args.max_connections);
    for (alias, real_type) in args.aliases {
        builder = builder.alias(alias, real_type);
    }
    for (name, password) in args.users {
        builder = builder.user(name, password);
    }
    let config = builder.build();

    let engine = match Engine::open(config) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    let server = match Server::bind(engine) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
