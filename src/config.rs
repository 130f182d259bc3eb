//! Configuration for serpmine.
//!
//! A config file (TOML, YAML or JSON, chosen by extension) is applied on
//! top of built-in defaults, then a few environment variables override
//! the storage locations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http_client::{RetryPolicy, USER_AGENT};

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILENAME: &str = "serpmine.toml";

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "serpmine.db";

/// Default WARC subdirectory name.
const WARC_SUBDIR: &str = "warcs";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// SQLite document store.
    pub database_path: PathBuf,
    /// Directory holding the rolling WARC containers.
    pub warc_dir: PathBuf,
    /// Size cap of one WARC container in bytes.
    pub warc_max_file_size: u64,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Entities fetched per scheduler chunk.
    pub chunk_size: usize,
    /// Idle time after which an open scan expires.
    pub scan_keep_alive_secs: u64,
    /// In-store retries of a write that lost an optimistic-concurrency race.
    pub bulk_retry_on_conflict: u32,
    /// How long a compiled parser chain is reused before reloading.
    pub parser_cache_ttl_secs: u64,
    /// CDX pages fetched concurrently per source.
    pub page_concurrency: usize,
    /// Seed of the random ranking component. `None` draws one per run.
    pub random_seed: Option<u64>,
    /// Weight of the random ranking component.
    pub random_weight: f64,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            database_path: data_dir.join(DEFAULT_DATABASE_FILENAME),
            warc_dir: data_dir.join(WARC_SUBDIR),
            data_dir,
            warc_max_file_size: crate::warc_store::DEFAULT_MAX_FILE_SIZE,
            user_agent: USER_AGENT.to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            chunk_size: 100,
            scan_keep_alive_secs: 300,
            bulk_retry_on_conflict: 3,
            parser_cache_ttl_secs: 300,
            page_concurrency: 2,
            random_seed: None,
            random_weight: 1.0,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join(DEFAULT_DATABASE_FILENAME),
            warc_dir: data_dir.join(WARC_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn scan_keep_alive(&self) -> Duration {
        Duration::from_secs(self.scan_keep_alive_secs)
    }

    pub fn parser_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.parser_cache_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    /// The configured seed, or a fresh one for this run.
    pub fn effective_random_seed(&self) -> u64 {
        self.random_seed.unwrap_or_else(|| fastrand::u64(..))
    }

    /// Ensure the data and WARC directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.warc_dir)?;
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Apply `SERPMINE_*` overrides read through `lookup`.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let get = |name: &str| lookup(name).filter(|s| !s.is_empty());

        if let Some(dir) = get("SERPMINE_DATA_DIR") {
            tracing::debug!("Using SERPMINE_DATA_DIR from environment: {}", dir);
            let data_dir = resolve_path(&dir, &cwd);
            if self.database_path == self.data_dir.join(DEFAULT_DATABASE_FILENAME) {
                self.database_path = data_dir.join(DEFAULT_DATABASE_FILENAME);
            }
            if self.warc_dir == self.data_dir.join(WARC_SUBDIR) {
                self.warc_dir = data_dir.join(WARC_SUBDIR);
            }
            self.data_dir = data_dir;
        }
        if let Some(database) = get("SERPMINE_DATABASE") {
            tracing::debug!("Using SERPMINE_DATABASE from environment: {}", database);
            self.database_path = resolve_path(&database, &self.data_dir);
        }
        if let Some(warc_dir) = get("SERPMINE_WARC_DIR") {
            tracing::debug!("Using SERPMINE_WARC_DIR from environment: {}", warc_dir);
            self.warc_dir = resolve_path(&warc_dir, &cwd);
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database file, relative to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warc_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warc_max_file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_max_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_keep_alive_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_retry_on_conflict: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser_cache_ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_weight: Option<f64>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a specific file path.
    /// The format follows the file extension; anything unknown is read as JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory relative paths in this config are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths (typically config file dir or CWD).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = resolve_path(data_dir, base_dir);
            settings.database_path = settings.data_dir.join(DEFAULT_DATABASE_FILENAME);
            settings.warc_dir = settings.data_dir.join(WARC_SUBDIR);
        }
        if let Some(ref database) = self.database {
            settings.database_path = resolve_path(database, &settings.data_dir);
        }
        if let Some(ref warc_dir) = self.warc_dir {
            settings.warc_dir = resolve_path(warc_dir, base_dir);
        }
        if let Some(size) = self.warc_max_file_size {
            settings.warc_max_file_size = size;
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout_secs {
            settings.request_timeout_secs = timeout;
        }
        if let Some(retries) = self.max_retries {
            settings.max_retries = retries;
        }
        if let Some(base) = self.backoff_base_ms {
            settings.backoff_base_ms = base;
        }
        if let Some(max) = self.backoff_max_ms {
            settings.backoff_max_ms = max;
        }
        if let Some(size) = self.chunk_size {
            settings.chunk_size = size.max(1);
        }
        if let Some(secs) = self.scan_keep_alive_secs {
            settings.scan_keep_alive_secs = secs;
        }
        if let Some(retries) = self.bulk_retry_on_conflict {
            settings.bulk_retry_on_conflict = retries;
        }
        if let Some(secs) = self.parser_cache_ttl_secs {
            settings.parser_cache_ttl_secs = secs;
        }
        if let Some(n) = self.page_concurrency {
            settings.page_concurrency = n.max(1);
        }
        if let Some(seed) = self.random_seed {
            settings.random_seed = Some(seed);
        }
        if let Some(weight) = self.random_weight {
            settings.random_weight = weight;
        }
    }
}

/// Resolve a path that may be relative.
/// - Absolute paths are returned as-is
/// - Paths starting with ~ are expanded
/// - Relative paths are joined onto `base_dir`
pub fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(path_str);
    let path = Path::new(expanded.as_ref());

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
}

/// Find the config file: `--config`, then `$SERPMINE_CONFIG`, then
/// `./serpmine.toml`.
fn discover_config_path(options: &LoadOptions) -> Option<PathBuf> {
    if let Some(ref path) = options.config_path {
        return Some(path.clone());
    }
    if let Some(path) = std::env::var("SERPMINE_CONFIG")
        .ok()
        .filter(|s| !s.is_empty())
    {
        return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILENAME);
    local.exists().then_some(local)
}

/// Load settings with explicit options.
/// An explicitly named config file that cannot be read is an error; with
/// no config file at all the defaults apply.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<(Settings, Config), String> {
    let config = match discover_config_path(&options) {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            Config::load_from_path(&path).await?
        }
        None => Config::default(),
    };

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = if options.use_cwd {
        cwd
    } else {
        config.base_dir().unwrap_or(cwd)
    };

    let mut settings = Settings::with_data_dir(base_dir.join("data"));
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env_overrides(|name| std::env::var(name).ok());

    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn loads_toml_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("serpmine.toml");
        std::fs::write(
            &path,
            "data_dir = \"store\"\nchunk_size = 50\nrandom_seed = 7\nrandom_weight = 0.5\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.chunk_size, Some(50));
        assert_eq!(config.base_dir().as_deref(), Some(dir.path()));

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, dir.path());
        assert_eq!(settings.data_dir, dir.path().join("store"));
        assert_eq!(settings.database_path, dir.path().join("store").join(DEFAULT_DATABASE_FILENAME));
        assert_eq!(settings.warc_dir, dir.path().join("store").join("warcs"));
        assert_eq!(settings.chunk_size, 50);
        assert_eq!(settings.effective_random_seed(), 7);
        assert_eq!(settings.random_weight, 0.5);
    }

    #[tokio::test]
    async fn loads_yaml_and_json() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("c.yaml");
        std::fs::write(&yaml, "page_concurrency: 4\nmax_retries: 1\n").unwrap();
        let config = Config::load_from_path(&yaml).await.unwrap();
        assert_eq!(config.page_concurrency, Some(4));

        let json = dir.path().join("c.json");
        std::fs::write(&json, r#"{"warc_max_file_size": 1024}"#).unwrap();
        let config = Config::load_from_path(&json).await.unwrap();
        assert_eq!(config.warc_max_file_size, Some(1024));
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "chunk_size = [").unwrap();
        assert!(Config::load_from_path(&path).await.is_err());
    }

    #[test]
    fn env_overrides_storage_locations() {
        let mut settings = Settings::with_data_dir(PathBuf::from("/srv/a"));
        let env: HashMap<&str, &str> = [
            ("SERPMINE_DATA_DIR", "/srv/b"),
            ("SERPMINE_WARC_DIR", "/mnt/warcs"),
        ]
        .into_iter()
        .collect();
        settings.apply_env_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.data_dir, PathBuf::from("/srv/b"));
        assert_eq!(settings.database_path, PathBuf::from("/srv/b").join(DEFAULT_DATABASE_FILENAME));
        assert_eq!(settings.warc_dir, PathBuf::from("/mnt/warcs"));
    }

    #[test]
    fn random_seed_is_fixed_only_when_configured() {
        let mut settings = Settings::with_data_dir(PathBuf::from("/srv/a"));
        settings.random_seed = Some(42);
        assert_eq!(settings.effective_random_seed(), 42);
        assert_eq!(settings.effective_random_seed(), 42);

        settings.random_seed = None;
        let seeds: std::collections::HashSet<u64> =
            (0..8).map(|_| settings.effective_random_seed()).collect();
        assert!(seeds.len() > 1);
    }

    #[test]
    fn database_override_is_relative_to_data_dir() {
        let mut settings = Settings::with_data_dir(PathBuf::from("/srv/a"));
        settings.apply_env_overrides(|name| (name == "SERPMINE_DATABASE").then(|| "other.db".to_string()));
        assert_eq!(settings.database_path, PathBuf::from("/srv/a/other.db"));
    }

    #[test]
    fn retry_policy_from_settings() {
        let settings = Settings {
            max_retries: 5,
            backoff_base_ms: 10,
            backoff_max_ms: 100,
            ..Default::default()
        };
        let policy = settings.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff_max, Duration::from_millis(100));
    }
}
