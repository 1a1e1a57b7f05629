//! Orion capture driver

use std::path::PathBuf;

use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use orion::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orion=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .init();

    info!("Orion Launching...");

    // Optional config file as the only argument, env overrides on top
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    info!("Saving to {:?}", config.output_directory());

    orion::runner::run(config).await
}
