use crate::{KthuluError, Result};
use config as cfg;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "kthulu.toml";
pub const ENV_PREFIX: &str = "KTHULU";

/// Settings recognised by the project analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub circular_detection: bool,
    pub semantic_analysis: bool,
    /// Files larger than this many bytes are skipped with a warning.
    pub max_file_size: u64,
    /// Matched against base names (glob) and as plain path substrings.
    pub ignore_patterns: Vec<String>,
    /// Source extension without the dot.
    pub extension: String,
    /// Import prefix of the analysed project; read from `go.mod` when unset.
    pub module_path: Option<String>,
    /// Parser worker threads; 0 means one per core.
    pub workers: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_secs: 300,
            cache_max_entries: 10_000,
            circular_detection: true,
            semantic_analysis: true,
            max_file_size: 1024 * 1024,
            ignore_patterns: default_ignore_patterns(),
            extension: "go".to_string(),
            module_path: None,
            workers: 0,
        }
    }
}

impl AnalyzerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_workers_default()
        } else {
            self.workers
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_enabled && self.cache_ttl_secs == 0 {
            return Err(KthuluError::InvalidInput(
                "analyzer.cache_ttl_secs must be > 0 when the cache is enabled".into(),
            ));
        }
        if self.cache_enabled && self.cache_max_entries == 0 {
            return Err(KthuluError::InvalidInput(
                "analyzer.cache_max_entries must be > 0 when the cache is enabled".into(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(KthuluError::InvalidInput(
                "analyzer.max_file_size must be > 0".into(),
            ));
        }
        if self.extension.trim().trim_start_matches('.').is_empty() {
            return Err(KthuluError::InvalidInput(
                "analyzer.extension cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

fn num_workers_default() -> usize {
    num_cpus::get().max(1)
}

pub fn default_ignore_patterns() -> Vec<String> {
    ["vendor", ".git", "testdata", "fixtures", "*_test.go", "node_modules"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Settings of the authorization core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub audit_enabled: bool,
    pub strict_mode: bool,
    pub default_deny: bool,
    pub hierarchical_roles: bool,
    pub contextual_security: bool,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_secs: 300,
            cache_max_entries: 10_000,
            audit_enabled: true,
            strict_mode: false,
            default_deny: true,
            hierarchical_roles: true,
            contextual_security: true,
        }
    }
}

impl AuthzConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_enabled && (self.cache_ttl_secs == 0 || self.cache_max_entries == 0) {
            return Err(KthuluError::InvalidInput(
                "authz cache needs a positive ttl and capacity".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KthuluConfig {
    pub analyzer: AnalyzerConfig,
    pub authz: AuthzConfig,
}

impl KthuluConfig {
    /// Layers, lowest first: defaults, `kthulu.toml` in `project_root`, the
    /// explicit file, then `KTHULU__*` environment variables.
    pub fn load(explicit: Option<&Path>, project_root: Option<&Path>) -> Result<Self> {
        let mut builder = cfg::Config::builder();

        if let Some(root) = project_root {
            let candidate = root.join(CONFIG_FILE_NAME);
            debug!("Looking for project config at {:?}", candidate);
            builder = builder.add_source(cfg::File::from(candidate).required(false));
        }
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(KthuluError::NotFound(format!(
                    "config file {}",
                    path.display()
                )));
            }
            builder = builder.add_source(cfg::File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(
            cfg::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("analyzer.ignore_patterns"),
        );

        let settings: KthuluConfig = builder
            .build()
            .map_err(|e| KthuluError::InvalidInput(format!("building configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| {
                KthuluError::InvalidInput(format!("deserializing configuration: {}", e))
            })?;

        settings.validate()?;
        info!(
            cache = settings.analyzer.cache_enabled,
            extension = %settings.analyzer.extension,
            "Configuration loaded"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.analyzer.validate()?;
        self.authz.validate()
    }
}
