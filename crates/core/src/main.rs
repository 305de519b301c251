mod bridge;
mod cli;
mod config;
mod crypto;
mod demux;
mod error;
mod gateway;
mod mediastream;
mod nal;
mod packetizer;
mod rtp;
mod session;
mod transport;

use std::path::Path;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::parse_args()?;
    let mut config = config::load_config(Path::new(&args.config_path))?;
    if args.force_chacha {
        config.transport.force_chacha = true;
    }
    if let Err(issues) = config.validate() {
        for issue in &issues {
            warn!("{issue}");
        }
        if issues.iter().any(|i| i.starts_with("ERROR:")) {
            anyhow::bail!("invalid configuration, see ERROR lines above");
        }
    }

    info!(
        channel_id = %args.channel_id,
        guild_id = ?args.guild_id,
        endpoint = %args.endpoint,
        "starting golive-core"
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, cancelling session");
            signal_cancel.cancel();
        }
    });

    session::play(args, config, cancel)
        .await
        .context("golive-core session ended with an error")
}
