use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::geo::Position;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Geonotes";
const APP_NAME: &str = "geonotes";

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_MIN_SEARCH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_NEARBY_RADIUS_M: f64 = 1000.0;
pub const DEFAULT_FILTER_RADIUS_M: f64 = 100.0;

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths);
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths);
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("GEONOTES_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("GEONOTES_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let database_path = data_root.join("notes.db");
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self {
            config_dir,
            config_file,
            data_dir: data_root,
            database_path,
            state_dir,
        })
    }

    /// Lay everything out under a single root directory.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            config_file: root.join("config/config.toml"),
            data_dir: root.join("data"),
            database_path: root.join("data/notes.db"),
            state_dir: root.join("state"),
        }
    }

    pub fn location_snapshot(&self) -> PathBuf {
        self.state_dir.join("location.json")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.state_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageOptions,
    pub search: SearchOptions,
    pub location: LocationOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) {
        self.storage.resolve(paths);
        self.location.sanitize();
        if self.search.min_interval_ms == 0 {
            tracing::warn!("search.min_interval_ms of 0 disables throttling");
        }
        if self.search.endpoint.trim().is_empty() {
            tracing::warn!("empty search endpoint in config, using default");
            self.search.endpoint = DEFAULT_SEARCH_ENDPOINT.to_string();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub endpoint: String,
    /// Sent as `User-Agent`; the public Nominatim service rejects anonymous clients.
    pub user_agent: String,
    pub accept_language: String,
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            user_agent: format!("geonotes/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en".to_string(),
            min_interval_ms: DEFAULT_MIN_SEARCH_INTERVAL_MS,
            timeout_secs: 10,
        }
    }
}

impl SearchOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationOptions {
    /// Fix reported by the device geolocator when no `--at` flag is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_longitude: Option<f64>,
    pub nearby_radius_m: f64,
    pub default_radius_m: f64,
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self {
            device_latitude: None,
            device_longitude: None,
            nearby_radius_m: DEFAULT_NEARBY_RADIUS_M,
            default_radius_m: DEFAULT_FILTER_RADIUS_M,
        }
    }
}

impl LocationOptions {
    pub fn device_position(&self) -> Option<Position> {
        match (self.device_latitude, self.device_longitude) {
            (Some(lat), Some(lon)) => Some(Position::new(lat, lon)),
            _ => None,
        }
    }

    fn sanitize(&mut self) {
        let configured = self.device_latitude.is_some() || self.device_longitude.is_some();
        if configured && !self.device_position().is_some_and(|pos| pos.is_valid()) {
            tracing::warn!(
                lat = ?self.device_latitude,
                lon = ?self.device_longitude,
                "ignoring invalid device coordinates in config"
            );
            self.device_latitude = None;
            self.device_longitude = None;
        }
        if !(self.nearby_radius_m.is_finite() && self.nearby_radius_m > 0.0) {
            tracing::warn!(radius = self.nearby_radius_m, "invalid nearby radius, using default");
            self.nearby_radius_m = DEFAULT_NEARBY_RADIUS_M;
        }
        if !(self.default_radius_m.is_finite() && self.default_radius_m > 0.0) {
            tracing::warn!(radius = self.default_radius_m, "invalid filter radius, using default");
            self.default_radius_m = DEFAULT_FILTER_RADIUS_M;
        }
    }
}
