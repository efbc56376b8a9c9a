use rollcall_core::{MatchConfig, TieBreak};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration.
///
/// Resolved as defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite identity database.
    pub db_path: PathBuf,
    /// Wall-clock budget for one recognition, queueing included. 0 disables it.
    pub match_timeout_ms: u64,
    /// Requests that may wait for the engine thread before callers block.
    pub queue_depth: usize,
    /// Base URL of the face encoder service. Without one, images are read
    /// as precomputed JSON sidecars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder_url: Option<String>,
    /// Per-request timeout for the encoder service.
    pub encoder_timeout_ms: u64,
    pub matching: MatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("identities.db"),
            match_timeout_ms: 2_000,
            queue_depth: 16,
            encoder_url: None,
            encoder_timeout_ms: 30_000,
            matching: MatchConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment, reading the TOML
    /// file named by `file` or `ROLLCALL_CONFIG` first if there is one.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let env_file = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let file = file.map(Path::to_path_buf).or(env_file);
        Self::resolve(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve<F>(file: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env);
        config
            .matching
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if config.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth must be at least 1".into()));
        }
        if config.encoder_timeout_ms == 0 {
            return Err(ConfigError::Invalid("encoder_timeout_ms must be at least 1".into()));
        }
        if let Some(url) = &config.encoder_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "encoder_url must be an http(s) URL, got {url:?}"
                )));
            }
        }
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

    /// Render as TOML, for `rollcall config`.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = env("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        override_parsed(&env, "ROLLCALL_MATCH_TIMEOUT_MS", &mut self.match_timeout_ms);
        override_parsed(&env, "ROLLCALL_QUEUE_DEPTH", &mut self.queue_depth);
        if let Some(url) = env("ROLLCALL_ENCODER_URL") {
            let url = url.trim();
            // An empty value switches back to precomputed sidecars.
            self.encoder_url = (!url.is_empty()).then(|| url.to_string());
        }
        override_parsed(&env, "ROLLCALL_ENCODER_TIMEOUT_MS", &mut self.encoder_timeout_ms);
        override_parsed(
            &env,
            "ROLLCALL_COSINE_THRESHOLD",
            &mut self.matching.cosine_threshold,
        );
        override_parsed(
            &env,
            "ROLLCALL_EUCLIDEAN_THRESHOLD",
            &mut self.matching.euclidean_threshold,
        );
        override_parsed(&env, "ROLLCALL_SHORTLIST_SIZE", &mut self.matching.shortlist_size);
        override_parsed(
            &env,
            "ROLLCALL_PARALLEL_MIN_GALLERY",
            &mut self.matching.parallel_min_gallery,
        );
        if let Some(raw) = env("ROLLCALL_TIE_BREAK") {
            match raw.as_str() {
                "gallery_order" => self.matching.tie_break = TieBreak::GalleryOrder,
                "identity_id" => self.matching.tie_break = TieBreak::IdentityId,
                other => tracing::warn!(value = other, "ignoring unknown ROLLCALL_TIE_BREAK"),
            }
        }
    }
}

fn override_parsed<F, T>(env: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = env(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
