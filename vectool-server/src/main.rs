use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio::signal;
use vectool_core::config::Config;
use vectool_core::context::DbContext;
use vectool_core::tool::build_registry;

mod http;
mod mcp;
mod stdio;

use mcp::McpServer;

#[derive(Parser)]
#[command(name = "vectool-server")]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = "vectool.toml")]
    config: PathBuf,

    /// Serve JSON-RPC over HTTP (POST /mcp) instead of stdio
    #[arg(long)]
    http: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    let addr = config.bind_address();

    let ctx = DbContext::from_config(config).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    let registry = build_registry(Arc::new(ctx));
    let tool_count = registry.len();
    let server = Arc::new(McpServer::new(registry));

    if cli.http {
        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
            eprintln!("Error: failed to bind to {addr}: {e}");
            std::process::exit(1);
        });

        println!("vectool server started");
        println!("  address:  http://{addr}/mcp");
        println!("  tools:    {tool_count}");

        axum::serve(listener, http::router(server))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: server error: {e}");
                std::process::exit(1);
            });
    } else {
        // stdout carries the protocol; everything else goes to stderr.
        log::info!("serving {tool_count} tools over stdio");
        let reader = BufReader::new(tokio::io::stdin());
        tokio::select! {
            result = stdio::serve(&server, reader, tokio::io::stdout()) => {
                if let Err(e) = result {
                    eprintln!("Error: stdio transport failed: {e}");
                    std::process::exit(1);
                }
            }
            _ = shutdown_signal() => {}
        }
    }

    log::info!("vectool server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        log::error!("failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("shutdown signal received");
}
