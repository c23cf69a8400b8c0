//! Sketchwire relay server.
//!
//! Accepts replication clients over WebSocket, records every committed
//! operation and fans it out to all other clients.

use std::process::ExitCode;

use clap::Parser;
use sketchwire_collab::{RelayServer, ServerConfig};

/// Relay server command line arguments.
#[derive(Parser, Debug)]
#[command(name = "sketchwire-server")]
#[command(about = "Relay server for collaborative Sketchwire canvases", version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, value_name = "ADDR", default_value = "127.0.0.1:9090")]
    bind: String,

    /// Warn each time the operation history grows by this many entries
    #[arg(long, value_name = "N", default_value_t = 10_000)]
    history_warn: usize,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind.clone(),
            history_warn_threshold: self.history_warn,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let server = RelayServer::new(args.server_config());
    log::info!("Starting relay server on {}", server.bind_addr());
    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Relay server on {} stopped: {e}", server.bind_addr());
            ExitCode::FAILURE
        }
    }
}
