//! Configuration loading

use anyhow::{Context, Result};
use holoframe_core::{LayoutCatalog, QuiltLayout};
use holoframe_driver::{TransportOptions, DEFAULT_ADDRESS, DEFAULT_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    /// Extra quilt layouts appended to the built-in catalog
    #[serde(default, rename = "layout")]
    pub layouts: Vec<LayoutConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Driver endpoint (`ipc://<path>` or `tcp://<host>:<port>`)
    #[serde(default = "default_address")]
    pub address: String,
    /// Receive timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Add an emulated device for every hardware type
    #[serde(default = "default_true")]
    pub emulate: bool,
    /// Hardware type tags never emulated
    #[serde(default)]
    pub exclude_emulated: Vec<String>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            emulate: true,
            exclude_emulated: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default)]
    pub description: String,
    pub quilt_width: u32,
    pub quilt_height: u32,
    pub columns: u32,
    pub rows: u32,
}

impl Config {
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            address: self.driver.address.clone(),
            timeout: Duration::from_millis(self.driver.timeout_ms),
        }
    }

    /// Built-in layouts followed by the configured ones
    pub fn layout_catalog(&self) -> Result<LayoutCatalog> {
        let mut catalog = LayoutCatalog::builtin();
        for layout in &self.layouts {
            let quilt = QuiltLayout::from_quilt(
                layout.description.clone(),
                layout.quilt_width,
                layout.quilt_height,
                layout.columns,
                layout.rows,
            )
            .with_context(|| format!("Invalid layout '{}'", layout.description))?;
            let id = catalog.append(quilt);
            info!(layout = %id, description = %layout.description, "Registered configured layout");
        }
        Ok(catalog)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("holoframe.toml")).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.driver.address, "ipc:///tmp/holoplay-driver.ipc");
        assert_eq!(config.transport_options().timeout, Duration::from_millis(5000));
        assert!(config.devices.emulate);
        assert_eq!(config.layout_catalog().unwrap().len(), 4);
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("holoframe.toml");
        std::fs::write(
            &path,
            r#"
[driver]
address = "tcp://127.0.0.1:11222"

[devices]
emulate = false
exclude_emulated = ["standard"]

[[layout]]
description = "Go, 66 Views"
quilt_width = 4092
quilt_height = 4092
columns = 11
rows = 6
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.driver.address, "tcp://127.0.0.1:11222");
        assert_eq!(config.driver.timeout_ms, 5000);
        assert!(!config.devices.emulate);
        assert_eq!(config.devices.exclude_emulated, vec!["standard".to_string()]);

        let catalog = config.layout_catalog().unwrap();
        assert_eq!(catalog.len(), 5);
        let (_, layout) = catalog.match_dimensions(4092, 4092).unwrap();
        assert_eq!((layout.columns, layout.rows), (11, 6));
        assert_eq!((layout.view_width, layout.view_height), (372, 682));
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let config = Config {
            layouts: vec![LayoutConfig {
                description: "broken".to_string(),
                quilt_width: 100,
                quilt_height: 100,
                columns: 0,
                rows: 4,
            }],
            ..Config::default()
        };
        assert!(config.layout_catalog().is_err());
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("holoframe.toml");
        std::fs::write(&path, "[driver\naddress = 1").unwrap();
        assert!(load_config(&path).is_err());
    }
}
