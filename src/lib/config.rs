use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use radarpim_core::{Pim, PimConfig};

use crate::source::TestPatternConfig;

pub const DEFAULT_RIB_SIZE: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot find a configuration directory for this platform")]
    NoProjectDirs,

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn get_project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("org", "radarpim", "radarpim").ok_or(ConfigError::NoProjectDirs)
}

fn default_rib_size() -> usize {
    DEFAULT_RIB_SIZE
}

/// One input channel: its buffer, its source and the PIMs it feeds
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_rib_size")]
    pub rib_size: usize,
    #[serde(default)]
    pub source: TestPatternConfig,
    #[serde(default)]
    pub pims: Vec<PimConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rib_size: DEFAULT_RIB_SIZE,
            source: TestPatternConfig::default(),
            pims: vec![PimConfig::new(512, 2048).with_name("main")],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Persistence {
    pub config: Config,
    path: PathBuf,
}

impl Persistence {
    /// Load `settings.json` from the platform configuration directory
    pub fn new() -> Result<Self, ConfigError> {
        let dir = get_project_dirs()?.config_dir().to_owned();
        fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self::with_path(dir.join("settings.json")))
    }

    /// Load from `path`; a missing or unreadable file gives the defaults
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let mut this = Persistence {
            config: Config::default(),
            path: path.into(),
        };
        this.load();
        debug!("persistence loaded: {:?}", this.path);
        this
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&mut self) {
        let file = match File::open(&self.path) {
            Err(e) => {
                warn!("no config '{}' yet; starting fresh: {}", self.path.display(), e);
                return;
            }
            Ok(f) => f,
        };

        match serde_json::from_reader(BufReader::new(file)) {
            Ok(config) => {
                self.config = config;
                info!("Loaded config from '{}'", self.path.display());
            }
            Err(e) => {
                warn!("Config '{}' corrupted; starting fresh: {}", self.path.display(), e);
            }
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        let file = File::create(&self.path).map_err(io)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.config).map_err(|source| ConfigError::Json {
            path: self.path.clone(),
            source,
        })?;
        writeln!(writer).map_err(io)?;
        writer.flush().map_err(io)?;
        info!("Written config file '{}'", self.path.display());
        Ok(())
    }

    /// Record the current settings of `pim` under its name. Saves only when
    /// something changed; returns whether it did.
    pub fn store(&mut self, pim: &Pim) -> Result<bool, ConfigError> {
        let current = PimConfig {
            name: pim.name().to_string(),
            range_dim: pim.range_dim() as u32,
            max_azimuth_dim: pim.max_azimuth_dim() as u32,
            max_bytes_per_sample: pim.max_bytes_per_sample() as u32,
            settings: pim.settings(),
        };
        match self.config.pims.iter_mut().find(|p| p.name == current.name) {
            Some(existing) if *existing == current => return Ok(false),
            Some(existing) => *existing = current,
            None => self.config.pims.push(current),
        }
        self.save()?;
        Ok(true)
    }
}
