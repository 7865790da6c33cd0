use anyhow::{Result, bail};
use myssh_core::ClientConfig;
use std::path::Path;

use crate::ConfigCommands;

pub async fn handle(path: &Path, config: &ClientConfig, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            if tokio::fs::try_exists(path).await.unwrap_or(false) && !force {
                bail!(
                    "Configuration file {} already exists (use --force to overwrite)",
                    path.display()
                );
            }

            crate::config::save_config(path, &ClientConfig::default()).await?;
            println!("Configuration written to {}", path.display());
        }

        ConfigCommands::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
    }

    Ok(())
}
