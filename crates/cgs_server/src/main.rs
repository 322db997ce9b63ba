//! Entry point for the `cgs-server` binary.

use tracing::info;

use cgs_server::{cli::CliArgs, config::AppConfig, logging, runtime::ServerRuntime};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    config.apply_overrides(&args);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    logging::setup_logging(&config.logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config_path.display(),
        "starting common game server"
    );

    let runtime = ServerRuntime::new(config, Some(&args.config_path))?;
    runtime.run().await
}
