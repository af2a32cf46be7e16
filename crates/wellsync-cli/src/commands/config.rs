//! Configuration commands.

use std::path::Path;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the current configuration to stdout.
pub fn dump(config: &ClientConfig, config_path: &Path) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", config_path.display());
    println!("{}", toml_str);
    Ok(())
}

/// Validate the configuration, resolving every secret reference.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    config.validate().map_err(ClientError::Config)?;

    #[cfg(feature = "google")]
    if let Some(ref google) = config.google {
        google
            .to_provider_config()
            .map_err(|e| ClientError::Config(format!("invalid Google settings: {}", e)))?;
        println!("Google OAuth client is valid.");
    }

    #[cfg(feature = "webdav")]
    if let Some(ref webdav) = config.webdav {
        let provider = webdav
            .to_provider_config()
            .map_err(|e| ClientError::Config(format!("invalid WebDAV settings: {}", e)))?;
        println!("WebDAV folder: {}", provider.url);
    }

    println!("Configuration is valid.");
    Ok(())
}

/// Show where configuration and data live.
pub fn path(config: &ClientConfig, config_path: &Path) -> ClientResult<()> {
    println!("config:  {}", config_path.display());
    println!("journal: {}", config.journal_path().display());
    println!("state:   {}", config.cloud_config().state_path.display());
    if let Some(ref local) = config.sync.local_file {
        println!("backup:  {}", local.display());
    }
    Ok(())
}
