use serde::{Deserialize, Serialize};

/// Top-level configuration for the media transport core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// RTP payload MTU in bytes.
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// RTCP Sender Report cadence, in milliseconds of media time.
    #[serde(default = "default_sr_interval_ms")]
    pub sr_interval_ms: i64,
    /// object-mode high-water-mark before a media sink reports "would block".
    #[serde(default = "default_sink_high_water_mark")]
    pub sink_high_water_mark: usize,
    /// Force `aead_xchacha20_poly1305_rtpsize` even when the remote offers GCM.
    #[serde(default)]
    pub force_chacha: bool,
    /// IP-discovery response timeout, in seconds.
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Initial reconnect backoff, in milliseconds.
    #[serde(default = "default_reconnect_backoff_min_ms")]
    pub reconnect_backoff_min_ms: u64,
    /// Maximum reconnect backoff, in milliseconds.
    #[serde(default = "default_reconnect_backoff_max_ms")]
    pub reconnect_backoff_max_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: default_mtu(),
            sr_interval_ms: default_sr_interval_ms(),
            sink_high_water_mark: default_sink_high_water_mark(),
            force_chacha: false,
            discovery_timeout_secs: default_discovery_timeout_secs(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_min_ms: default_reconnect_backoff_min_ms(),
            reconnect_backoff_max_ms: default_reconnect_backoff_max_ms(),
        }
    }
}

impl CoreConfig {
    /// Validate the configuration, returning a list of issues found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal) or "WARNING:" (advisory).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.transport.mtu == 0 || self.transport.mtu > 65507 {
            issues.push(format!(
                "ERROR: transport.mtu must be between 1 and 65507, got {}.",
                self.transport.mtu
            ));
        }
        if self.transport.mtu < 200 {
            issues.push(format!(
                "WARNING: transport.mtu is {} — unusually small for RTP video payloads.",
                self.transport.mtu
            ));
        }
        if self.transport.sr_interval_ms <= 0 {
            issues.push(format!(
                "ERROR: transport.sr_interval_ms must be positive, got {}.",
                self.transport.sr_interval_ms
            ));
        }
        if self.transport.sink_high_water_mark == 0 {
            issues.push("ERROR: transport.sink_high_water_mark must be >= 1.".to_string());
        }
        if self.transport.discovery_timeout_secs == 0 {
            issues.push("ERROR: transport.discovery_timeout_secs must be >= 1.".to_string());
        }
        if self.gateway.reconnect_backoff_min_ms > self.gateway.reconnect_backoff_max_ms {
            issues.push(
                "ERROR: gateway.reconnect_backoff_min_ms must not exceed reconnect_backoff_max_ms."
                    .to_string(),
            );
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn default_mtu() -> usize {
    1200
}
fn default_sr_interval_ms() -> i64 {
    1000
}
fn default_sink_high_water_mark() -> usize {
    128
}
fn default_discovery_timeout_secs() -> u64 {
    10
}
fn default_reconnect_backoff_min_ms() -> u64 {
    500
}
fn default_reconnect_backoff_max_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_from_empty_string() {
        let config: CoreConfig =
            toml::from_str("").expect("empty string should deserialize to default config");
        assert_eq!(config.transport.mtu, 1200);
        assert_eq!(config.transport.sr_interval_ms, 1000);
        assert_eq!(config.transport.sink_high_water_mark, 128);
        assert!(!config.transport.force_chacha);
        assert_eq!(config.transport.discovery_timeout_secs, 10);
        assert_eq!(config.gateway.reconnect_backoff_min_ms, 500);
        assert_eq!(config.gateway.reconnect_backoff_max_ms, 30_000);
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let toml_str = r#"
[transport]
mtu = 1400
force_chacha = true
"#;
        let config: CoreConfig = toml::from_str(toml_str).expect("partial config should parse");
        assert_eq!(config.transport.mtu, 1400);
        assert!(config.transport.force_chacha);
        assert_eq!(config.transport.sr_interval_ms, 1000);
        assert_eq!(config.gateway.reconnect_backoff_min_ms, 500);
    }

    #[test]
    fn validate_default_config_passes() {
        let config: CoreConfig = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_mtu_zero_is_error() {
        let mut config = CoreConfig::default_for_test();
        config.transport.mtu = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("ERROR:") && i.contains("mtu")));
    }

    #[test]
    fn validate_backoff_min_over_max_is_error() {
        let mut config = CoreConfig::default_for_test();
        config.gateway.reconnect_backoff_min_ms = 1000;
        config.gateway.reconnect_backoff_max_ms = 500;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("reconnect_backoff")));
    }

    impl CoreConfig {
        fn default_for_test() -> Self {
            toml::from_str("").unwrap()
        }
    }
}
