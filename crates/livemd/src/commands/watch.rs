//! Live preview command.

use anyhow::Result;
use livemd_server::{LiveConfig, LiveLoop};

/// Run the live preview until interrupted.
pub async fn run(config: LiveConfig) -> Result<()> {
    tracing::info!(
        "Previewing {} as {}",
        config.source.display(),
        config.output.display()
    );

    let running = LiveLoop::new(config)?.start().await?;

    tokio::select! {
        result = running.wait() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Stopping");
        }
    }

    Ok(())
}
