use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface the relay listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket handshake must complete within this window (seconds)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl ServerConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.port == 0 {
            return Err(crate::OspreyError::InvalidConfig(
                "port must be non-zero".to_string(),
            ));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(crate::OspreyError::InvalidConfig(
                "handshake_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    8182
}

fn default_handshake_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8182);
        assert_eq!(config.handshake_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_zero_port() {
        let mut config = ServerConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }
}
