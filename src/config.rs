//! Configuration management for the earbuds service.
//!
//! This module handles loading and saving configuration from disk,
//! including timeouts, discovery defaults and pinned devices.

use std::{
   collections::BTreeMap,
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use bluer::Address;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
   error::{EarError, Result},
   nothing::command::Category,
};

/// Main configuration structure for the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
   #[serde(default)]
   pub known_devices: Vec<KnownDevice>,

   /// RFCOMM channel used when SDP lookup fails.
   #[serde(default = "default_channel")]
   pub default_channel: u8,

   /// Name fragment used by auto-connect when the caller gives none.
   #[serde(default)]
   pub default_name_filter: Option<String>,

   #[serde(default = "default_command_timeout")]
   pub command_timeout_ms: u64,

   #[serde(default = "default_handshake_timeout")]
   pub handshake_timeout_ms: u64,

   #[serde(default = "default_connect_timeout")]
   pub connect_timeout_ms: u64,

   #[serde(default = "default_discovery_timeout")]
   pub discovery_timeout_ms: u64,

   /// Per-category overrides of `command_timeout_ms`, keyed by category name.
   #[serde(default)]
   pub category_timeouts_ms: BTreeMap<String, u64>,
}

/// A device pinned to a model, for units whose serial the catalog can't place.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KnownDevice {
   pub address: String,
   pub name: String,
   #[serde(default)]
   pub model_id: Option<String>,
}

const fn default_channel() -> u8 {
   1
}

const fn default_command_timeout() -> u64 {
   2000
}

const fn default_handshake_timeout() -> u64 {
   5000
}

const fn default_connect_timeout() -> u64 {
   10_000
}

const fn default_discovery_timeout() -> u64 {
   8000
}

impl Default for Config {
   fn default() -> Self {
      Self {
         known_devices: vec![],
         default_channel: default_channel(),
         default_name_filter: None,
         command_timeout_ms: default_command_timeout(),
         handshake_timeout_ms: default_handshake_timeout(),
         connect_timeout_ms: default_connect_timeout(),
         discovery_timeout_ms: default_discovery_timeout(),
         category_timeouts_ms: BTreeMap::new(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         let config: Self = toml::from_str(&contents)?;
         for key in config.category_timeouts_ms.keys() {
            if key.parse::<Category>().is_err() {
               warn!("Ignoring timeout for unknown category '{key}'");
            }
         }
         Ok(config)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      if let Ok(home) = env::var("NOTHINGD_HOME") {
         return Ok(PathBuf::from(home).join("config.toml"));
      }

      let config_dir = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(dir) = dirs::config_dir() {
         dir
      } else {
         return Err(EarError::ConfigDirNotFound);
      };

      Ok(config_dir.join("nothingd").join("config.toml"))
   }

   /// Response deadline for a command of `category`.
   pub fn command_timeout(&self, category: Category) -> Duration {
      let ms = self
         .category_timeouts_ms
         .iter()
         .find(|(key, _)| key.parse::<Category>().is_ok_and(|c| c == category))
         .map_or(self.command_timeout_ms, |(_, ms)| *ms);
      Duration::from_millis(ms)
   }

   pub const fn handshake_timeout(&self) -> Duration {
      Duration::from_millis(self.handshake_timeout_ms)
   }

   pub const fn connect_timeout(&self) -> Duration {
      Duration::from_millis(self.connect_timeout_ms)
   }

   pub const fn discovery_timeout(&self) -> Duration {
      Duration::from_millis(self.discovery_timeout_ms)
   }

   /// Checks if the given address is pinned and returns its entry.
   pub fn known_device(&self, address: Address) -> Option<&KnownDevice> {
      self
         .known_devices
         .iter()
         .find(|d| d.address.parse::<Address>().is_ok_and(|a| a == address))
   }
}
