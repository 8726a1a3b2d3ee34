use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::registry::DriverRegistry;

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Directory driver artifacts named by relative descriptors live in.
    #[serde(alias = "driverDir")]
    pub driver_dir: PathBuf,
    /// Bytes the host may pin for buffers the driver cannot pin itself.
    #[serde(alias = "lockBudgetBytes")]
    pub lock_budget_bytes: usize,
    /// `system.ini`-style file to read descriptors from. Takes precedence
    /// over `registry` when set.
    #[serde(alias = "systemIni")]
    pub system_ini: Option<PathBuf>,
    pub registry: DriverRegistry,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            driver_dir: PathBuf::from("."),
            lock_budget_bytes: 64 * 1024 * 1024,
            system_ini: None,
            registry: DriverRegistry::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file, then the `system.ini` it points to,
    /// if any. A relative `system_ini` resolves against the config file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        if let Some(ini) = &config.system_ini {
            let ini = match path.parent() {
                Some(dir) if ini.is_relative() => dir.join(ini),
                _ => ini.clone(),
            };
            config.registry = DriverRegistry::from_ini_str(&std::fs::read_to_string(ini)?)?;
        }
        Ok(config)
    }

    /// Resolves the driver artifact a descriptor names, under `driver_dir`.
    pub fn artifact_path(&self, descriptor: &str) -> PathBuf {
        artifact_path(&self.driver_dir, descriptor)
    }
}

/// The driver file behind `descriptor`: its first whitespace-separated
/// word, joined onto `driver_dir`.
pub fn artifact_path(driver_dir: &Path, descriptor: &str) -> PathBuf {
    let file = descriptor.split_whitespace().next().unwrap_or_default();
    driver_dir.join(file)
}
