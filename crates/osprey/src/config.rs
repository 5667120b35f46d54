use anyhow::{Context, Result};
use osprey_core::ServerConfig;
use std::path::Path;
use tokio::fs;

pub async fn load_config(path: &Path) -> Result<ServerConfig> {
    let contents = fs::read_to_string(path)
        .await
        .context("Failed to read configuration file")?;

    let config: ServerConfig =
        toml::from_str(&contents).context("Failed to parse configuration file")?;

    Ok(config)
}

pub async fn save_config(path: &Path, config: &ServerConfig) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = ServerConfig::default();
        config.bind_address = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        config.port = 9099;
        config.handshake_timeout_secs = 25;

        save_config(&path, &config).await.unwrap();
        let loaded = load_config(&path).await.unwrap();

        assert_eq!(loaded.bind_address, config.bind_address);
        assert_eq!(loaded.port, config.port);
        assert_eq!(loaded.handshake_timeout_secs, config.handshake_timeout_secs);
    }

    #[tokio::test]
    async fn test_save_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc").join("osprey").join("config.toml");

        save_config(&path, &ServerConfig::default()).await.unwrap();
        assert!(path.exists());

        let loaded = load_config(&path).await.unwrap();
        assert_eq!(loaded.port, ServerConfig::default().port);
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(load_config(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = \"not a number\"").await.unwrap();

        assert!(load_config(&path).await.is_err());
    }
}
