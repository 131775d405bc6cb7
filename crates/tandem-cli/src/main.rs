//! Tandem console client.
//!
//! # Usage
//!
//! ```bash
//! # Offline demo against an in-process service with an echo partner
//! tandem
//!
//! # Real service, identity kept across runs
//! tandem --server match.example.org:4433 --identity ~/.tandem-id \
//!        --ice stun:stun.example.org:3478
//! ```

use std::path::PathBuf;

use clap::Parser;
use tandem_cli::{console, demo::Demo};
use tandem_client::{ClientConfig, Runtime, SystemEnv, transport::QuicDialer, webrtc::WebRtcConnector};
use tandem_core::{
    ClientIdentity, FileIdentityStore, IdentityError, MemoryIdentityStore, SyntheticMediaSource,
    identity::load_or_create,
};
use tandem_harness::MockConnector;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Anonymous one-to-one video chat client
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Console client for Tandem matchmaking")]
#[command(version)]
struct Args {
    /// Matchmaking service address (`host:port`)
    ///
    /// If not provided, runs in demo mode with an in-process service.
    #[arg(short, long)]
    server: Option<String>,

    /// File holding the client identity, created on first run
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// ICE server URL, repeatable (`stun:` or `turn:`)
    #[arg(long = "ice")]
    ice_servers: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn identity(path: Option<&PathBuf>, env: &SystemEnv) -> Result<ClientIdentity, IdentityError> {
    match path {
        Some(path) => load_or_create(&FileIdentityStore::new(path), env),
        None => load_or_create(&MemoryIdentityStore::new(), env),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ClientConfig::default().with_ice_servers(args.ice_servers);
    let env = SystemEnv::new();
    let identity = identity(args.identity.as_ref(), &env)?;
    let media = SyntheticMediaSource::new();

    tracing::info!(%identity, "Tandem client starting");

    match args.server {
        Some(addr) => {
            tracing::info!("Connecting to {addr}");
            let connector = WebRtcConnector::new(config.ice_servers.clone())?;
            let (runtime, handle) =
                Runtime::connect(&config, env, identity, QuicDialer::new(addr), connector, media);
            console::run(runtime, handle).await?;
        },
        None => {
            let demo = Demo::start(&config);
            let (runtime, handle) =
                Runtime::connect(&config, env, identity, demo.dialer(), MockConnector::new(), media);
            let result = console::run(runtime, handle).await;
            demo.stop();
            result?;
        },
    }

    Ok(())
}
