use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::crawler::job::JobType;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HarvesterConfig {
    pub site: SiteSettings,
    pub crawl: CrawlSettings,
    pub queue: QueueSettings,
    pub sink: SinkSettings,
    pub credentials: CredentialSettings,
}

/// Target site settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SiteSettings {
    /// Base URL of the mobile HTML site, no trailing slash required.
    pub host: String,
    /// Badge image filenames whose bearers are skipped during follower
    /// discovery (institutional accounts). Matched against the tail of the
    /// image URL, so bare filenames work.
    pub excluded_badges: Vec<String>,
}

/// Crawl loop settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CrawlSettings {
    /// Job types this process consumes; each gets its own workers.
    pub enabled: Vec<JobType>,
    pub workers_per_type: usize,
    /// Hard upper bound on listing pages expanded per entity.
    pub page_ceiling: u32,
    /// Pause after a failed job before pulling the next one, in seconds.
    pub error_cooldown_secs: u64,
    pub fetch_timeout_secs: u64,
    pub dedup_false_positive_rate: f64,
    pub dedup_capacity: usize,
}

/// Job queue settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueSettings {
    pub redis_url: String,
    /// Key prefix for the per-type job lists.
    pub namespace: String,
}

/// Record sink settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SinkSettings {
    pub redis_url: String,
    /// List key the normalized records are published onto.
    pub topic: String,
}

/// Cookie pool settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CredentialSettings {
    pub redis_url: String,
    /// Set key holding JSON cookie jars, one member per session.
    pub key: String,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            site: SiteSettings {
                host: "https://site.example".to_string(),
                excluded_badges: vec!["verify.gif".to_string(), "enterprise.gif".to_string()],
            },
            crawl: CrawlSettings {
                enabled: JobType::ALL.to_vec(),
                workers_per_type: 2,
                page_ceiling: 500,
                error_cooldown_secs: 300,
                fetch_timeout_secs: 60,
                dedup_false_positive_rate: 0.001,
                dedup_capacity: 100_000,
            },
            queue: QueueSettings {
                redis_url: "redis://localhost:6379".to_string(),
                namespace: "harvester".to_string(),
            },
            sink: SinkSettings {
                redis_url: "redis://localhost:6379".to_string(),
                topic: "harvester:records".to_string(),
            },
            credentials: CredentialSettings {
                redis_url: "redis://localhost:6379".to_string(),
                key: "harvester:cookies".to_string(),
            },
        }
    }
}

impl HarvesterConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "graph-harvester") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        }
    }

    /// Load from an explicit file when given, otherwise the default
    /// location (created with defaults on first run).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_path = Self::config_dir().join("default.yaml");
        self.save_to_file(&config_path)
    }

    /// Save the configuration to a file
    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }
}
