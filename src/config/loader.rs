//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/guanxin/config.toml)
//! 3. Project config (./guanxin.toml)
//! 4. Environment variables (GUANXIN_* prefix, `__` between sections)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{GuanxinError, Result};

const ENV_PREFIX: &str = "GUANXIN_";
const PROJECT_CONFIG_FILE: &str = "guanxin.toml";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        Self::load_with(Self::global_config_path(), &Self::project_config_path())
    }

    /// Same chain as [`ConfigLoader::load`] with explicit file locations
    pub fn load_with(global_path: Option<PathBuf>, project_path: &Path) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = global_path
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(project_path));
        }

        // GUANXIN_GENAI__MODEL -> genai.model
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| GuanxinError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/guanxin/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| directories::BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf()))
            .map(|p| p.join("guanxin"))
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(PROJECT_CONFIG_FILE)
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());
    }

    /// Render the effective configuration
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| GuanxinError::Config(e.to_string()))
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write a default project config file, returns its path
    pub fn init_project(path: &Path, force: bool) -> Result<PathBuf> {
        if path.exists() && !force {
            info!("Project config exists: {}", path.display());
            return Ok(path.to_path_buf());
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, Self::default_project_config())?;
        info!("Created project config: {}", path.display());
        Ok(path.to_path_buf())
    }

    fn default_project_config() -> String {
        r#"# guanxin configuration
# Environment variables override this file, e.g. GUANXIN_GENAI__MODEL.
# The API key is read from GEMINI_API_KEY when genai.api_key is unset.

version = "1.0"

[server]
bind_addr = "0.0.0.0:3000"
max_body_bytes = 10485760
cors_permissive = true

[upload]
session_ttl_secs = 3600
sweep_interval_secs = 600

[genai]
provider = "gemini"
model = "gemini-2.5-flash"
timeout_secs = 60
generation_timeout_secs = 300

[journal]
database_path = "guanxin.db"

[auth]
user_header = "x-user-id"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_without_files() {
        let temp_dir = TempDir::new().unwrap();
        let config =
            ConfigLoader::load_with(None, &temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.genai.provider, "gemini");
    }

    #[test]
    fn test_project_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("guanxin.toml");
        fs::write(
            &path,
            "[genai]\nmodel = \"gemini-2.5-pro\"\n\n[journal]\nmissing_window_days = 7\n",
        )
        .unwrap();

        let config = ConfigLoader::load_with(None, &path).unwrap();
        assert_eq!(config.genai.model, "gemini-2.5-pro");
        assert_eq!(config.journal.missing_window_days, 7);
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("guanxin.toml");
        fs::write(&path, "[genai]\ntemperature = 9.0\n").unwrap();

        assert!(matches!(
            ConfigLoader::load_with(None, &path),
            Err(GuanxinError::Config(_))
        ));
    }

    #[test]
    fn test_init_project_writes_loadable_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("guanxin.toml");

        ConfigLoader::init_project(&path, false).unwrap();
        assert!(path.exists());

        let config = ConfigLoader::load_with(None, &path).unwrap();
        assert_eq!(config.auth.user_header, "x-user-id");
    }

    #[test]
    fn test_env_override() {
        let temp_dir = TempDir::new().unwrap();
        // SAFETY: This test runs in isolation
        unsafe {
            std::env::set_var("GUANXIN_UPLOAD__SESSION_TTL_SECS", "120");
        }
        let config = ConfigLoader::load_with(None, &temp_dir.path().join("none.toml")).unwrap();
        assert_eq!(config.upload.session_ttl_secs, 120);
        unsafe {
            std::env::remove_var("GUANXIN_UPLOAD__SESSION_TTL_SECS");
        }
    }

    #[test]
    fn test_render_hides_api_key() {
        let mut config = Config::default();
        config.genai.api_key = Some("top-secret".to_string());
        let rendered = ConfigLoader::render(&config, false).unwrap();
        assert!(rendered.contains("gemini-2.5-flash"));
        assert!(!rendered.contains("top-secret"));
    }
}
