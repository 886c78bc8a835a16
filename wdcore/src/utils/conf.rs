use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    magic::{
        DEFAULT_LOOP_ITERATION_CAP, DEFAULT_MAX_EXPR_DEPTH, DEFAULT_RELATION_DEPTH,
        DEFAULT_RULE_BUDGET, DEFAULT_SUBSTITUTION_DEPTH, ENV_ANALYSIS_CONFIG_PATH,
    },
    utils::error::{CoreError, CoreResult},
};

/// Tunables of the analysis. Every field has a default, so a configuration
/// file only needs to mention what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rule applications allowed per obligation.
    pub rule_budget: u32,
    /// Rounds of equality substitution.
    pub substitution_depth: u32,
    /// Longest chain of relational facts combined by the prover.
    pub relation_depth: u32,
    /// Revisits of a loop header before the loop is reported as diverging.
    pub loop_iteration_cap: u32,
    pub max_expr_depth: usize,
    /// Analyse independent functions on worker threads.
    pub parallel: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rule_budget: DEFAULT_RULE_BUDGET,
            substitution_depth: DEFAULT_SUBSTITUTION_DEPTH,
            relation_depth: DEFAULT_RELATION_DEPTH,
            loop_iteration_cap: DEFAULT_LOOP_ITERATION_CAP,
            max_expr_depth: DEFAULT_MAX_EXPR_DEPTH,
            parallel: true,
        }
    }
}

impl AnalysisConfig {
    /// Get the default path to the analysis configuration file.
    pub fn default_path() -> PathBuf {
        // Check if the environment variable is set
        if let Ok(config_path) = std::env::var(ENV_ANALYSIS_CONFIG_PATH) {
            return config_path.into();
        }

        let mut path = PathBuf::new();

        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = std::env::var("APPDATA") {
                path.push(appdata);
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
                path.push(xdg_config_home);
            } else if let Ok(home) = std::env::var("HOME") {
                path.push(home);
                path.push(".config");
            }
        }

        path.push("warden");
        path.push("analysis.toml");
        path
    }

    /// Loads the configuration at [`Self::default_path`], falling back to
    /// the defaults when no file exists there.
    pub fn load() -> CoreResult<Self> {
        let path = Self::default_path();
        if !path.exists() {
            log::debug!(
                "No analysis configuration at `{}`, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_toml(&path)
    }

    pub fn from_toml_str(toml_str: &str, file: &str) -> CoreResult<Self> {
        toml::from_str(toml_str).map_err(|e| CoreError::ConfigParseError {
            source: e,
            file: file.to_string(),
        })
    }

    /// Load the configuration from a TOML file.
    pub fn load_from_toml(path: &Path) -> CoreResult<Self> {
        let toml_str = std::fs::read_to_string(path)?;
        Self::from_toml_str(&toml_str, &path.display().to_string())
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_toml(&self, path: &Path) -> CoreResult<()> {
        let toml_str = toml::to_string(self).map_err(|e| {
            CoreError::Unknown(format!(
                "Failed during serialization of TOML to path `{}`: {}",
                path.display(),
                e
            ))
        })?;

        // Attempt to create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, toml_str).map_err(CoreError::IoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = AnalysisConfig::from_toml_str("rule_budget = 10\nparallel = false\n", "inline")
            .unwrap();
        assert_eq!(config.rule_budget, 10);
        assert!(!config.parallel);
        assert_eq!(config.loop_iteration_cap, DEFAULT_LOOP_ITERATION_CAP);
    }

    #[test]
    fn malformed_file_is_reported() {
        let err = AnalysisConfig::from_toml_str("rule_budget = \"many\"", "broken.toml").unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("warden-conf-{}", std::process::id()));
        let path = dir.join("nested").join("analysis.toml");
        let config = AnalysisConfig {
            relation_depth: 2,
            ..Default::default()
        };
        config.save_to_toml(&path).unwrap();
        assert_eq!(AnalysisConfig::load_from_toml(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
