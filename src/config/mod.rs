use crate::quality::{FailurePolicy, ThresholdConfig, ThresholdProfile};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings for the `spillcheck` binary, read from `config.toml`.
///
/// ```toml
/// server = "~/e906/productions"
/// failure_policy = "partial"
/// workers = 4
///
/// [roadsets.67]
/// target_pos = { lo = 1, hi = 7 }
/// # ... every quantity window
/// bad_spill_ranges = [{ first = 1500000, last = 1500200 }]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding `<schema>.db` dataset files.
    pub server: String,
    pub log_level: String,
    pub failure_policy: FailurePolicy,
    /// Maximum rules evaluated concurrently.
    pub workers: usize,
    pub default_roadset: String,
    /// Extra or replacement roadset profiles, merged over the built-ins.
    pub roadsets: BTreeMap<String, ThresholdProfile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            log_level: "info".into(),
            failure_policy: FailurePolicy::FailFast,
            workers: 1,
            default_roadset: crate::quality::thresholds::DEFAULT_ROADSET.into(),
            roadsets: BTreeMap::new(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("gov", "fnal", "spillcheck")
}

fn default_server() -> String {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| "~/.spillcheck".into())
}

impl AppConfig {
    /// `<config dir>/config.toml`, if a home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from the default location. A missing file at the
    /// default location yields the defaults; an explicitly given path must
    /// exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config: {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        Ok(config)
    }

    /// Built-in roadset profiles with this config's overrides applied.
    pub fn threshold_config(&self) -> Result<ThresholdConfig> {
        let config = ThresholdConfig::builtin()
            .with_overrides(self.roadsets.clone())
            .and_then(|c| c.with_default_roadset(&self.default_roadset))
            .context("building roadset profiles")?;
        Ok(config)
    }
}
