//! One-shot render command.

use anyhow::{Context, Result};
use livemd_server::LiveConfig;

/// Run the render command.
pub fn run(config: LiveConfig) -> Result<()> {
    let renderer = config.renderer().context("Invalid document template")?;

    let rendered = renderer.render()?;

    tracing::info!(
        "Rendered {} -> {} ({} bytes)",
        renderer.source().display(),
        rendered.output.display(),
        rendered.bytes
    );

    Ok(())
}
