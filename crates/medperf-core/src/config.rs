//! Process configuration assembled once from the environment.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use medperf_store::{
    http_client, CacheLayout, ResourceCache, SourceRegistry, TokenSource, DEFAULT_CHUNK_SIZE,
    DEFAULT_HTTP_TIMEOUT,
};

use crate::error::TestError;

pub const DEFAULT_SERVER_URL: &str = "https://api.medperf.org";
const DEFAULT_RUNNER: &str = "mlcube";
const DEFAULT_PLATFORM: &str = "docker";
const SYNAPSE_PREFIX: &str = "synapse";

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    /// Value of `key`, treating blank values as unset.
    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Storage tree below the configured root.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn cubes(&self) -> PathBuf {
        self.root.join("cubes")
    }

    #[must_use]
    pub fn data(&self) -> PathBuf {
        self.root.join("data")
    }

    #[must_use]
    pub fn tests(&self) -> PathBuf {
        self.root.join("tests")
    }

    #[must_use]
    pub fn benchmarks(&self) -> PathBuf {
        self.root.join("benchmarks")
    }

    #[must_use]
    pub fn locks(&self) -> PathBuf {
        self.root.join("locks")
    }

    #[must_use]
    pub fn cube_dir(&self, id: &str) -> PathBuf {
        self.cubes().join(id)
    }

    #[must_use]
    pub fn benchmark_dir(&self, id: u64) -> PathBuf {
        self.benchmarks().join(id.to_string())
    }

    #[must_use]
    pub fn dataset_dir(&self, uid: &str) -> PathBuf {
        self.data().join(uid)
    }

    #[must_use]
    pub fn report_dir(&self, uid: &str) -> PathBuf {
        self.tests().join(uid)
    }

    #[must_use]
    pub fn cube_lock(&self, id: &str) -> PathBuf {
        self.locks().join("cubes").join(format!("{id}.lock"))
    }

    /// Shared image, demo and scratch roots used by the resource cache.
    #[must_use]
    pub fn cache_layout(&self) -> CacheLayout {
        CacheLayout::under(&self.root)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub chunk_size: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub runner: String,
    pub platform: String,
}

/// A credentialed source registered after the anonymous ones.
#[derive(Debug, Clone)]
pub struct NamedSourceConfig {
    pub prefix: String,
    pub base_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    storage: StorageConfig,
    network: NetworkConfig,
    server: ServerConfig,
    sandbox: SandboxConfig,
    sources: Vec<NamedSourceConfig>,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error when a numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let root = snapshot
            .var("MEDPERF_STORAGE")
            .map_or_else(default_storage_root, PathBuf::from);
        let chunk_size = parse_positive(snapshot, "MEDPERF_CHUNK_SIZE")?
            .map_or(DEFAULT_CHUNK_SIZE, |value| {
                usize::try_from(value).unwrap_or(usize::MAX)
            });
        let timeout = parse_positive(snapshot, "MEDPERF_HTTP_TIMEOUT")?
            .map_or(DEFAULT_HTTP_TIMEOUT, Duration::from_secs);
        let sources = snapshot
            .var("MEDPERF_SYNAPSE_URL")
            .map(|base_url| NamedSourceConfig {
                prefix: SYNAPSE_PREFIX.to_string(),
                base_url: base_url.to_string(),
                token: snapshot.var("MEDPERF_SYNAPSE_TOKEN").map(ToOwned::to_owned),
            })
            .into_iter()
            .collect();

        Ok(Self {
            storage: StorageConfig::new(root),
            network: NetworkConfig {
                chunk_size,
                timeout,
            },
            server: ServerConfig {
                url: snapshot
                    .var("MEDPERF_SERVER")
                    .unwrap_or(DEFAULT_SERVER_URL)
                    .trim_end_matches('/')
                    .to_string(),
                token: snapshot.var("MEDPERF_TOKEN").map(ToOwned::to_owned),
            },
            sandbox: SandboxConfig {
                runner: snapshot
                    .var("MEDPERF_MLCUBE")
                    .unwrap_or(DEFAULT_RUNNER)
                    .to_string(),
                platform: snapshot
                    .var("MEDPERF_PLATFORM")
                    .unwrap_or(DEFAULT_PLATFORM)
                    .to_string(),
            },
            sources,
        })
    }

    /// Default configuration rooted at `root`, ignoring the environment.
    #[must_use]
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::new(root),
            network: NetworkConfig {
                chunk_size: DEFAULT_CHUNK_SIZE,
                timeout: DEFAULT_HTTP_TIMEOUT,
            },
            server: ServerConfig {
                url: DEFAULT_SERVER_URL.to_string(),
                token: None,
            },
            sandbox: SandboxConfig {
                runner: DEFAULT_RUNNER.to_string(),
                platform: DEFAULT_PLATFORM.to_string(),
            },
            sources: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage = StorageConfig::new(root);
        self
    }

    #[must_use]
    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    #[must_use]
    pub fn network(&self) -> NetworkConfig {
        self.network
    }

    #[must_use]
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    #[must_use]
    pub fn sandbox(&self) -> &SandboxConfig {
        &self.sandbox
    }

    #[must_use]
    pub fn named_sources(&self) -> &[NamedSourceConfig] {
        &self.sources
    }

    /// Ordered registry: `public`, `file`, then configured named sources.
    ///
    /// # Errors
    /// Returns an error when the http client cannot be built.
    pub fn source_registry(&self) -> Result<SourceRegistry> {
        let client = http_client(self.network.timeout)?;
        let registry = self.sources.iter().fold(
            SourceRegistry::standard(client.clone(), self.network.chunk_size),
            |registry, source| {
                registry.with_source(Box::new(TokenSource::new(
                    source.prefix.clone(),
                    source.base_url.clone(),
                    source.token.clone(),
                    client.clone(),
                    self.network.chunk_size,
                )))
            },
        );
        Ok(registry)
    }

    /// Resource cache over this storage root with the configured sources.
    ///
    /// # Errors
    /// Returns an error when the http client cannot be built.
    pub fn resource_cache(&self) -> Result<ResourceCache> {
        Ok(ResourceCache::new(
            self.storage.cache_layout(),
            self.source_registry()?,
        ))
    }
}

fn default_storage_root() -> PathBuf {
    dirs_next::home_dir().map_or_else(
        || env::temp_dir().join("medperf"),
        |home| home.join(".medperf"),
    )
}

fn parse_positive(snapshot: &EnvSnapshot, key: &str) -> Result<Option<u64>> {
    let Some(raw) = snapshot.var(key) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(TestError::invalid_argument(format!(
            "{key} must be a positive integer (got '{raw}')"
        ))
        .into()),
    }
}
