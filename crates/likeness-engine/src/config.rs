use likeness_core::{CompareOptions, GridSize, InvalidParameter, MatchThreshold, ResizeFilter};
use likeness_store::{FsReferenceStore, StoreError, DEFAULT_REFERENCE_KEY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "LIKENESS_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error(transparent)]
    Parameter(#[from] InvalidParameter),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Engine configuration: TOML file first, `LIKENESS_*` environment variables on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the enrolled reference.
    pub store_dir: PathBuf,
    /// File name of the reference inside `store_dir`.
    pub reference_key: String,
    /// Edge length of the normalized grid.
    pub grid_size: u32,
    /// Scores strictly below this are a match.
    pub match_threshold: f64,
    pub resize_filter: ResizeFilter,
    /// Pending requests the engine thread will queue before callers wait.
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            reference_key: DEFAULT_REFERENCE_KEY.to_string(),
            grid_size: likeness_core::DEFAULT_GRID_SIZE,
            match_threshold: likeness_core::DEFAULT_MATCH_THRESHOLD,
            resize_filter: ResizeFilter::default(),
            queue_depth: 4,
        }
    }
}

impl Config {
    /// Load from `path`, or from `$LIKENESS_CONFIG`, or start from defaults;
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env_path = lookup(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.or(env_path.as_deref()) {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("LIKENESS_STORE_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("LIKENESS_REFERENCE_KEY") {
            self.reference_key = key;
        }
        if let Some(v) = parse_var(&lookup, "LIKENESS_GRID_SIZE")? {
            self.grid_size = v;
        }
        if let Some(v) = parse_var(&lookup, "LIKENESS_MATCH_THRESHOLD")? {
            self.match_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "LIKENESS_RESIZE_FILTER")? {
            self.resize_filter = v;
        }
        if let Some(v) = parse_var(&lookup, "LIKENESS_QUEUE_DEPTH")? {
            self.queue_depth = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compare_options()?;
        if self.queue_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_depth",
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn compare_options(&self) -> Result<CompareOptions, ConfigError> {
        Ok(CompareOptions {
            size: GridSize::new(self.grid_size)?,
            filter: self.resize_filter,
            threshold: MatchThreshold::new(self.match_threshold)?,
        })
    }

    pub fn open_store(&self) -> Result<FsReferenceStore, ConfigError> {
        Ok(FsReferenceStore::with_key(&self.store_dir, &self.reference_key)?)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn default_store_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("likeness")
}
