use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use time::UtcOffset;

use crate::clock::{Clock, SystemClock};
use crate::store::StoreOptions;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "TempNotes";
const APP_NAME: &str = "tempnotes";

pub const CONFIG_ENV: &str = "TEMPNOTES_CONFIG";
pub const DATA_ENV: &str = "TEMPNOTES_DATA";

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
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
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
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);
        Self::resolve(override_config, override_data)
    }

    pub fn discover_with(config: Option<PathBuf>, data: Option<PathBuf>) -> Result<Self> {
        let override_config = config.or_else(|| env::var(CONFIG_ENV).ok().map(PathBuf::from));
        let override_data = data.or_else(|| env::var(DATA_ENV).ok().map(PathBuf::from));
        Self::resolve(override_config, override_data)
    }

    fn resolve(override_config: Option<PathBuf>, override_data: Option<PathBuf>) -> Result<Self> {
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
        let database_path = data_root.join("tempnotes.db");
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
    pub auto_save: AutoSaveConfig,
    pub sweep: SweepConfig,
    pub storage: StorageOptions,
    pub clock: ClockConfig,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage.resolve(paths);
        if self.sweep.interval_secs == 0 {
            tracing::warn!("sweep interval of 0s in config, using 1s");
            self.sweep.interval_secs = 1;
        }
        self.clock
            .utc_offset()
            .context("validating clock.utc_offset_minutes")?;
        Ok(())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            write_settle: Duration::from_millis(self.auto_save.write_settle_ms),
        }
    }

    pub fn build_clock(&self) -> Result<Arc<dyn Clock>> {
        let clock = match self.clock.utc_offset()? {
            Some(offset) => SystemClock::new(offset),
            None => SystemClock::local(),
        };
        Ok(Arc::new(clock))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    /// Idle time after the last keystroke before note text or title is applied.
    pub text_debounce_ms: u64,
    /// Idle time after the last lifecycle change before it is applied.
    pub lifecycle_debounce_ms: u64,
    /// Quiet period before the note collection is written to disk.
    pub write_settle_ms: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            text_debounce_ms: 2_000,
            lifecycle_debounce_ms: 1_500,
            write_settle_ms: 300,
        }
    }
}

impl AutoSaveConfig {
    pub fn text_debounce(&self) -> Duration {
        Duration::from_millis(self.text_debounce_ms)
    }

    pub fn lifecycle_debounce(&self) -> Duration {
        Duration::from_millis(self.lifecycle_debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    /// Sweep once right after the store is loaded.
    pub on_start: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            on_start: true,
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

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Fixed offset that defines calendar days. Unset means the host's local
    /// offset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

impl ClockConfig {
    pub fn utc_offset(&self) -> Result<Option<UtcOffset>> {
        let Some(minutes) = self.utc_offset_minutes else {
            return Ok(None);
        };
        if minutes.abs() >= 24 * 60 {
            bail!("utc offset of {minutes} minutes is out of range");
        }
        let offset = UtcOffset::from_whole_seconds(minutes * 60)
            .with_context(|| format!("utc offset of {minutes} minutes"))?;
        Ok(Some(offset))
    }
}
