//! Layered settings: built-in defaults, then an optional TOML file, then
//! `PHOTOSPEC__SECTION__KEY` environment variables.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use photospec_core::application::{EncoderConfig, LocatorConfig, UploadLimits};
use photospec_infra_system::DEFAULT_ENV_ALLOWLIST;

pub const DEFAULT_CONFIG_PATH: &str = "~/.photospec/photospec.toml";
const DEFAULT_DATABASE_URL: &str = "sqlite://~/.photospec/photospec.db";
const DEFAULT_ARTIFACT_DIR: &str = "~/.photospec/artifacts";
const ENV_PREFIX: &str = "PHOTOSPEC";

/// Keys parsed as space-separated lists when given through the environment
const LIST_KEYS: [&str; 5] = [
    "vision.background_command",
    "vision.face_command",
    "vision.cascade_command",
    "vision.person_command",
    "vision.env_allowlist",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub artifact_dir: String,
    pub workers: usize,
    pub job_retention_hours: u64,
    pub sweep_interval_minutes: u64,
    pub upload: UploadLimits,
    pub locator: LocatorConfig,
    pub encoder: EncoderConfig,
    pub vision: VisionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            artifact_dir: DEFAULT_ARTIFACT_DIR.to_string(),
            workers: 2,
            job_retention_hours: 24,
            sweep_interval_minutes: 30,
            upload: UploadLimits::default(),
            locator: LocatorConfig::default(),
            encoder: EncoderConfig::default(),
            vision: VisionSettings::default(),
        }
    }
}

/// External vision backends. An empty command leaves the stage unconfigured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    pub background_command: Vec<String>,
    pub face_command: Vec<String>,
    pub cascade_command: Vec<String>,
    pub person_command: Vec<String>,
    /// SeetaFace model used for the cascade stage when built with `seetaface`
    pub seetaface_model: Option<String>,
    pub timeout_secs: u64,
    pub env_allowlist: Vec<String>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            background_command: Vec::new(),
            face_command: Vec::new(),
            cascade_command: Vec::new(),
            person_command: Vec::new(),
            seetaface_model: None,
            timeout_secs: 60,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Load settings. An explicitly given file must exist; the default one may not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => (expand_path(DEFAULT_CONFIG_PATH), false),
        };
        Self::build(Some((path, required)), env_source())
    }

    fn build(file: Option<(PathBuf, bool)>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&Settings::default()).context("Invalid defaults")?);
        if let Some((path, required)) = file {
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }
        let settings: Settings = builder
            .add_source(env)
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.job_retention_hours == 0 {
            bail!("job_retention_hours must be at least 1");
        }
        if self.sweep_interval_minutes == 0 {
            bail!("sweep_interval_minutes must be at least 1");
        }
        if self.encoder.start_quality == 0 || self.encoder.start_quality > 100 {
            bail!(
                "encoder.start_quality must be in 1..=100, got {}",
                self.encoder.start_quality
            );
        }
        if self.encoder.quality_step == 0 {
            bail!("encoder.quality_step must be at least 1");
        }
        if self.vision.timeout_secs == 0 {
            bail!("vision.timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Database URL with `~` expanded
    pub fn database_url(&self) -> String {
        match self.database_url.strip_prefix("sqlite://") {
            Some(path) => format!("sqlite://{}", shellexpand::tilde(path)),
            None => self.database_url.clone(),
        }
    }

    /// On-disk database file, if any
    pub fn database_file(&self) -> Option<PathBuf> {
        let url = self.database_url();
        let path = url.strip_prefix("sqlite://")?;
        let path = path.split('?').next().unwrap_or(path);
        if path.is_empty() || path.contains(":memory:") {
            return None;
        }
        Some(PathBuf::from(path))
    }

    pub fn artifact_dir(&self) -> PathBuf {
        expand_path(&self.artifact_dir)
    }

    pub fn retention_ms(&self) -> i64 {
        (self.job_retention_hours * 3_600_000) as i64
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes * 60)
    }
}

fn env_source() -> Environment {
    let mut env = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(" ");
    for key in LIST_KEYS {
        env = env.with_list_parse_key(key);
    }
    env
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
