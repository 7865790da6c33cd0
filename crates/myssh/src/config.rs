use anyhow::{Context, Result};
use myssh_core::ClientConfig;
use std::path::Path;
use tokio::fs;

/// Load the client configuration, falling back to defaults when the file is absent.
pub async fn load_config(path: &Path) -> Result<ClientConfig> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(ClientConfig::default());
    }

    let contents = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    let config = ClientConfig::from_toml(&contents)
        .with_context(|| format!("Invalid configuration file {}", path.display()))?;

    Ok(config)
}

pub async fn save_config(path: &Path, config: &ClientConfig) -> Result<()> {
    // Create parent directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let contents = toml::to_string_pretty(config).context("Failed to serialize configuration")?;

    fs::write(path, contents)
        .await
        .context("Failed to write configuration file")?;

    Ok(())
}
