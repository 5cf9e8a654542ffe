//! Gateway settings

use crate::core::status::DeviceFamily;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address for the device TCP port
    pub listen: String,
    /// Protocol candidates in probe order. Teltonika and FM1200 share a
    /// handshake; list the one your fleet speaks first.
    pub protocols: Vec<DeviceFamily>,
    /// Dispatch queue capacity per connection
    pub queue_capacity: usize,
    /// Reject devices missing from the allow-list
    pub verify_devices: bool,
    /// JSONL output directory
    pub data_dir: Option<PathBuf>,
    /// Allow-list file, one `imei,family` per line
    pub allowlist_path: Option<PathBuf>,
    /// GT06 family knobs
    pub gt06: Gt06Config,
    /// Logging settings
    pub log: LogConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5027".to_string(),
            protocols: vec![
                DeviceFamily::Teltonika,
                DeviceFamily::Gt06,
                DeviceFamily::IntelliTrac,
                DeviceFamily::Aquila,
            ],
            queue_capacity: 256,
            verify_devices: false,
            data_dir: None,
            allowlist_path: None,
            gt06: Gt06Config::default(),
            log: LogConfig::default(),
        }
    }
}

/// GT06 family configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Gt06Config {
    /// Reject frames whose CRC does not verify. Some clone firmwares ship
    /// broken CRCs; turn this off to accept them anyway.
    pub strict_crc: bool,
}

impl Default for Gt06Config {
    fn default() -> Self {
        Self { strict_crc: true }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter level when RUST_LOG is unset
    pub level: String,
    /// Directory for daily log files; stderr only when unset
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

impl GatewayConfig {
    /// Load the config from `path`, or from the platform config directory,
    /// falling back to defaults when no file exists.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => match super::config_dir() {
                Some(dir) => dir.join("config.toml"),
                None => return Ok(Self::default()),
            },
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else if path.is_some() {
            Err(format!("config file {} not found", config_path.display()).into())
        } else {
            Ok(Self::default())
        }
    }

    /// Save the config to `path`
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject contradictory settings early
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.protocols.is_empty() {
            return Err("at least one protocol candidate is required".into());
        }
        if self.verify_devices && self.allowlist_path.is_none() {
            return Err("verify_devices requires allowlist_path".into());
        }
        Ok(())
    }

    /// Output directory, defaulting to the platform data dir
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(super::data_dir)
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.listen, "0.0.0.0:5027");
        assert!(config.gt06.strict_crc);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            listen = "127.0.0.1:7001"
            protocols = ["gt06", "aquila"]

            [gt06]
            strict_crc = false
            "#,
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:7001");
        assert_eq!(
            config.protocols,
            vec![DeviceFamily::Gt06, DeviceFamily::Aquila]
        );
        assert!(!config.gt06.strict_crc);
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn test_verification_without_allowlist_rejected() {
        let config = GatewayConfig {
            verify_devices: true,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
