//! Sketchwire: headless collaborative drawing client.
//!
//! Joins a relay server with a fresh canvas, replays the shared drawing,
//! then reads drawing commands from stdin. Completed operations are sent to
//! every other participant; theirs appear in `history` and `save` output.

mod state;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use sketchwire_collab::{ClientConfig, ReplicationClient};
use sketchwire_core::{Canvas, Toolbox};
use tokio::io::{AsyncBufReadExt, BufReader};

use state::{Command, Outcome, Session};

/// Client command line arguments.
#[derive(Parser, Debug)]
#[command(name = "sketchwire")]
#[command(about = "Draw on a canvas shared through a Sketchwire relay server", version)]
struct Args {
    /// Relay server URL
    #[arg(short, long, value_name = "URL", default_value = "ws://127.0.0.1:9090")]
    server: String,

    /// JSON file naming additional operation kinds
    #[arg(short, long, value_name = "PATH")]
    tools: Option<PathBuf>,

    /// Seconds to wait for the server while joining
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    join_timeout: u64,

    /// Width of images written by `save`
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Height of images written by `save`
    #[arg(long, default_value_t = 600)]
    height: u32,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_url: self.server.clone(),
            join_timeout: Duration::from_secs(self.join_timeout),
        }
    }

    fn toolbox(&self) -> Toolbox {
        let Some(path) = &self.tools else {
            return Toolbox::default();
        };
        match Toolbox::load(path) {
            Ok(toolbox) => toolbox,
            Err(e) => {
                log::error!("{e}; continuing with the default toolbox");
                Toolbox::default()
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let toolbox = args.toolbox();

    let canvas = Canvas::new();
    let client = match ReplicationClient::join(canvas.clone(), &args.client_config()).await {
        Ok(client) => client,
        Err(e) => {
            log::error!("Unable to join: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!(
        "Joined {} as {} ({} operations on canvas). Type `help` for commands.",
        args.server,
        client.client_id(),
        canvas.len()
    );

    let mut session = Session::new(canvas, toolbox, args.width, args.height);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match session.execute(command) {
            Ok(Outcome::Continue(Some(reply))) => println!("{reply}"),
            Ok(Outcome::Continue(None)) => {}
            Ok(Outcome::Quit) => break,
            Err(e) => println!("{e}"),
        }
    }

    log::info!("Leaving with {} operations on canvas", session.canvas().len());
    if let Err(e) = client.leave().await {
        log::warn!("Leaving the relay server failed: {e}");
    }
    ExitCode::SUCCESS
}
