//! Configuration loading for the media transport core. Mirrors the
//! teacher's `server::config::load_config`: TOML file in, defaults if
//! absent, `anyhow::Context` on read/parse failure.

use std::path::Path;

use anyhow::{Context, Result};

pub use golive_protocol::config::{CoreConfig, GatewayConfig, TransportConfig};

pub fn load_config(path: &Path) -> Result<CoreConfig> {
    if !path.exists() {
        tracing::warn!("config file not found at {}, using defaults", path.display());
        return Ok(CoreConfig {
            transport: TransportConfig::default(),
            gateway: GatewayConfig::default(),
        });
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: CoreConfig = toml::from_str(&contents).with_context(|| "failed to parse config TOML")?;

    tracing::info!("loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/golive.toml")).unwrap();
        assert_eq!(config.transport.mtu, TransportConfig::default().mtu);
    }

    #[test]
    fn parses_partial_toml_with_defaults_for_the_rest() {
        let dir = std::env::temp_dir().join(format!("golive-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("golive.toml");
        std::fs::write(&path, "[transport]\nmtu = 1000\nforce_chacha = true\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.transport.mtu, 1000);
        assert!(config.transport.force_chacha);
        assert_eq!(config.transport.sr_interval_ms, TransportConfig::default().sr_interval_ms);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn validate_rejects_inverted_backoff_bounds() {
        let mut config = CoreConfig {
            transport: TransportConfig::default(),
            gateway: GatewayConfig::default(),
        };
        config.gateway.reconnect_backoff_min_ms = 5000;
        config.gateway.reconnect_backoff_max_ms = 1000;
        assert!(config.validate().is_err());
    }
}
