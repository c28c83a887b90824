use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL that relative seeds and origin-form requests resolve against
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notification: NotificationConfig,
  #[serde(default)]
  pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation label; bump it to roll out a new cache
  pub version: String,
  /// URLs stored at install time, in order
  pub seed: Vec<String>,
  /// Page served when a navigation cannot be answered
  pub default_document: String,
  /// Database location (defaults to $XDG_DATA_HOME/harbor/cache.db)
  pub path: Option<PathBuf>,
  /// Activate right after install instead of waiting for SKIP_WAITING
  pub skip_waiting: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "pauhu-ai-v2.0.0".to_string(),
      seed: vec![
        "/".to_string(),
        "/app.html".to_string(),
        "/install.html".to_string(),
        "/index.html".to_string(),
        "/pricing.html".to_string(),
        "/assets/pauhu.ai_brand_mark_logo_nega.png".to_string(),
        "/manifest.json".to_string(),
        "https://fonts.googleapis.com/css2?family=Inter:wght@400;500;600;700&display=swap".to_string(),
        "https://unpkg.com/alpinejs@3.x.x/dist/cdn.min.js".to_string(),
      ],
      default_document: "/index.html".to_string(),
      path: None,
      skip_waiting: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Path prefix reserved for API calls
  pub prefix: String,
  /// Requests to this host are API calls regardless of path
  pub host: String,
  /// Deadline for the network race, in milliseconds
  pub timeout_ms: u64,
  pub offline_message: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      prefix: "/v1/".to_string(),
      host: "api.pauhu.ai".to_string(),
      timeout_ms: 5000,
      offline_message: "No internet connection. Models load on demand when connected.".to_string(),
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub tag: String,
  pub endpoint: String,
  pub success_message: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "pauhu-sync".to_string(),
      endpoint: "http://localhost:8000/api/v2/sync".to_string(),
      success_message: "Connected to local Pauhu AI".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub icon: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push carries no text
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub dashboard_url: String,
  pub root_url: String,
  pub actions: Vec<ActionConfig>,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    let icon = "/assets/pauhu.ai_brand_mark_nega.png".to_string();
    Self {
      title: "Pauhu AI".to_string(),
      default_body: "Pauhu AI notification".to_string(),
      icon: icon.clone(),
      badge: icon.clone(),
      vibrate: vec![100, 50, 100],
      dashboard_url: "/dashboard.html".to_string(),
      root_url: "/".to_string(),
      actions: vec![
        ActionConfig {
          id: "open-dashboard".to_string(),
          title: "Open Dashboard".to_string(),
          icon: Some(icon.clone()),
        },
        ActionConfig {
          id: "close".to_string(),
          title: "Close".to_string(),
          icon: Some(icon),
        },
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub listen: SocketAddr,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./harbor.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/harbor/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/harbor/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("harbor.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("harbor").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.origin.cannot_be_a_base() {
      return Err(eyre!("origin must be a base URL, got {}", self.origin));
    }
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    if self.api.timeout_ms == 0 {
      return Err(eyre!("api.timeout_ms must be greater than zero"));
    }
    Ok(())
  }

  /// Resolve a possibly relative URL against the origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL {}: {}", url, e))
  }

  /// Seed list resolved against the origin.
  pub fn seed_urls(&self) -> Result<Vec<Url>> {
    self.cache.seed.iter().map(|s| self.resolve(s)).collect()
  }
}

/// Directory for the cache database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("harbor"))
}
