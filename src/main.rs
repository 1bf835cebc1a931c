use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roboservo_canopen_runtime::config::{DEFAULT_BITRATE_KBPS, DEFAULT_PORT, SessionConfig};
use roboservo_canopen_runtime::runtime::{self, BoxError};
use roboservo_canopen_runtime::transport::{Bitrate, SlcanTransport};

#[derive(Parser, Debug)]
#[command(name = "roboservo-runtime", about = "CANopen drive runtime for Roboservo servos")]
struct Args {
    /// Serial port of the SLCAN adapter
    #[arg(long, default_value = DEFAULT_PORT)]
    port: String,

    /// CAN bitrate in kbit/s
    #[arg(long, default_value_t = DEFAULT_BITRATE_KBPS)]
    bitrate: u32,

    /// JSON session config; defaults apply to missing fields
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = start(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn start(args: Args) -> Result<(), BoxError> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading session config from {}", path.display());
            SessionConfig::from_json_file(path)?
        }
        None => SessionConfig::default(),
    };
    let bitrate = Bitrate::from_kbps(args.bitrate)
        .ok_or_else(|| format!("unsupported bitrate {} kbit/s", args.bitrate))?;

    let transport = SlcanTransport::new(&args.port);
    runtime::run(transport, config, bitrate).await
}
