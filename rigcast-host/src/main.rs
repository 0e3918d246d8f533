//! rigcast host streamer entry point.
//!
//! ```text
//! rigcast-host                        Stream using rigcast-host.toml
//! rigcast-host --config <path>        Load a custom config TOML
//! rigcast-host --gen-config           Write default config to stdout
//! rigcast-host --relay-url <url> --session-id <id> --token <t>
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rigcast_core::SessionRunner;
use rigcast_host::config::HostConfig;
use rigcast_host::encoder::ZstdEncoderFactory;
use rigcast_host::source::TestPatternSource;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rigcast-host", about = "rigcast host streamer: sends the session desktop to the relay")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rigcast-host.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the relay base URL.
    #[arg(long)]
    relay_url: Option<String>,

    /// Override the session id.
    #[arg(long)]
    session_id: Option<String>,

    /// Override the relay token.
    #[arg(long)]
    token: Option<String>,

    /// Stop after this many seconds (0 = until Ctrl-C).
    #[arg(long)]
    duration_secs: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = HostConfig::load(&cli.config);
    if let Some(url) = cli.relay_url {
        config.relay.url = url;
    }
    if let Some(session_id) = cli.session_id {
        config.session.session_id = session_id;
    }
    if let Some(token) = cli.token {
        config.session.token = token;
    }
    if let Some(secs) = cli.duration_secs {
        config.video.duration_secs = secs;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().compact().with_env_filter(filter).init();
    }

    let session = config.to_session_config()?;
    info!("rigcast-host v{}", env!("CARGO_PKG_VERSION"));
    info!("relay: {}", session.relay_url);
    info!("session: {} stream: {}", session.session_id, session.stream_id);
    info!("video: {}x{} @ {} fps", session.width, session.height, session.fps);

    let source = TestPatternSource::new(session.width, session.height);
    let runner = SessionRunner::new(session, source, ZstdEncoderFactory::new());
    let stop = runner.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, stopping after the current frame");
        stop.cancel();
    });

    match runner.run().await {
        Ok(summary) => {
            info!(
                frames = summary.counters.frames_input,
                messages = summary.counters.messages_sent,
                bitrate_kbps = summary.current_bitrate_kbps,
                "session finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "session aborted");
            Err(e.into())
        }
    }
}
