//! Configuration for the command server, the trawler and the local backend.

use std::{
   fs,
   path::{Path, PathBuf},
   sync::OnceLock,
   time::Duration,
};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
   channel::MAX_NAME_LEN,
   error::{ConfigError, Result},
   schedule,
};

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Administrative name of the command channel.
pub const DEFAULT_SOCKET_NAME: &str = "/org/kernel/trawler/dredger";

/// Longest path the trawler will construct (`PATH_MAX`).
pub const DEFAULT_MAX_PATH_LEN: usize = 4096;

/// Application configuration loaded from config file and environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub socket_name:      String,
   pub root:             PathBuf,
   pub check_interval:   String,
   pub backend_dir:      PathBuf,
   pub record_files:     bool,
   pub max_path_len:     usize,
   pub reply_timeout_ms: u64,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         socket_name:      DEFAULT_SOCKET_NAME.to_string(),
         root:             PathBuf::from("/"),
         check_interval:   "1D".to_string(),
         backend_dir:      base_dir().join("backend"),
         record_files:     false,
         max_path_len:     DEFAULT_MAX_PATH_LEN,
         reply_timeout_ms: 5000,
      }
   }
}

impl Config {
   pub fn load() -> Self {
      let config_path = ensure_global_config();

      Figment::from(Serialized::defaults(Self::default()))
         .merge(Toml::file(config_path))
         .merge(Env::prefixed("DREDGER_").lowercase(true))
         .extract()
         .inspect_err(|e| tracing::warn!("failed to parse config: {e}"))
         .unwrap_or_default()
   }

   fn create_default_config(path: &Path) {
      if let Some(parent) = path.parent() {
         let _ = fs::create_dir_all(parent);
      }
      if let Ok(toml) = toml::to_string_pretty(&Self::default()) {
         let _ = fs::write(path, toml);
      }
   }

   pub fn reply_timeout(&self) -> Duration {
      Duration::from_millis(self.reply_timeout_ms.max(1))
   }

   /// Rejects values the daemon cannot run with.
   pub fn validate(&self) -> Result<()> {
      if self.socket_name.is_empty() || self.socket_name.len() > MAX_NAME_LEN {
         return Err(
            ConfigError::InvalidValue {
               key:    "socket_name",
               reason: format!("length must be 1..={MAX_NAME_LEN} bytes"),
            }
            .into(),
         );
      }
      if self.max_path_len == 0 {
         return Err(
            ConfigError::InvalidValue { key: "max_path_len", reason: "must be non-zero".into() }
               .into(),
         );
      }
      if !self.backend_dir.is_absolute() {
         return Err(
            ConfigError::InvalidValue {
               key:    "backend_dir",
               reason: format!("{} is not absolute", self.backend_dir.display()),
            }
            .into(),
         );
      }
      schedule::recheck_interval(&self.check_interval)?;
      Ok(())
   }
}

/// Returns the global configuration instance
pub fn get() -> &'static Config {
   CONFIG.get_or_init(Config::load)
}

/// Returns the base directory for dredger data and configuration
pub fn base_dir() -> &'static PathBuf {
   static ONCE: OnceLock<PathBuf> = OnceLock::new();
   ONCE.get_or_init(|| resolve_base_dir(".dredger"))
}

pub fn config_file_path() -> PathBuf {
   base_dir().join("config.toml")
}

fn ensure_global_config() -> PathBuf {
   let config_path = config_file_path();
   if !config_path.exists() {
      Config::create_default_config(&config_path);
   }
   config_path
}

fn resolve_base_dir(dir_name: &str) -> PathBuf {
   BaseDirs::new()
      .map(|d| d.home_dir().join(dir_name))
      .or_else(|| {
         std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(dir_name))
      })
      .unwrap_or_else(|| PathBuf::from("/var/lib").join(dir_name.trim_start_matches('.')))
}
