mod server;

use anyhow::Result;
use clap::Parser;

use streamforge_core::{logging, Config};

/// Streamforge playback engine
#[derive(Parser, Debug)]
#[command(name = "streamforge", about = "Media playback and transcoding engine")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "STREAMFORGE_CONFIG")]
    config: Option<String>,

    /// Override the HTTP bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the HTTP bind port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("config error: {error}");
        }
        anyhow::bail!("invalid configuration ({} problems)", errors.len());
    }

    logging::init_logging(&config.logging)?;
    tracing::info!(
        address = %config.http_address(),
        data_dir = %config.transcoding.data_dir.display(),
        "starting streamforge"
    );

    server::run(config).await
}
