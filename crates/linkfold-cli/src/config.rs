//! CLI configuration file.
//!
//! Defaults are read from `~/.config/linkfold/config.toml` (overridable with
//! `--config` or the `LINKFOLD_CONFIG` environment variable), then a couple
//! of environment overrides are applied.  Command-line flags always win over
//! everything loaded here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub defaults: DefaultsConfig,
    pub walk: WalkConfig,
}

/// Default option values applied beneath the command-line flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub min_file_size: Option<u64>,
    pub max_file_size: Option<u64>,
    pub search_thresh: Option<i64>,
    pub use_newest_link: Option<bool>,
    pub ignore_time: Option<bool>,
    pub same_name: Option<bool>,
}

/// Walk filter patterns merged with those given on the command line.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub dir_excludes: Vec<String>,
}

/// Resolution order: explicit flag, `LINKFOLD_CONFIG`, then the per-user
/// config directory.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var("LINKFOLD_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("linkfold/config.toml"))
}

pub fn load(explicit: Option<&Path>) -> Result<FileConfig> {
    let mut config = match config_path(explicit) {
        Some(path) if path.exists() => {
            debug!(path = %path.display(), "loading config file");
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
        }
        _ => FileConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

impl FileConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("LINKFOLD_MIN_SIZE") {
            if let Ok(n) = size.parse() {
                self.defaults.min_file_size = Some(n);
            }
        }
        if let Ok(size) = std::env::var("LINKFOLD_MAX_SIZE") {
            if let Ok(n) = size.parse() {
                self.defaults.max_file_size = Some(n);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env-mutating tests share one lock so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn empty_toml_gives_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.defaults.min_file_size.is_none());
        assert!(config.walk.excludes.is_empty());
    }

    #[test]
    fn partial_toml_fills_only_named_fields() {
        let config: FileConfig = toml::from_str(
            r#"
[defaults]
min_file_size = 4096
search_thresh = -1

[walk]
excludes = ["\\.bak$"]
dir_excludes = ["^\\.git$"]
"#,
        )
        .unwrap();
        assert_eq!(config.defaults.min_file_size, Some(4096));
        assert_eq!(config.defaults.search_thresh, Some(-1));
        assert!(config.defaults.max_file_size.is_none());
        assert_eq!(config.walk.excludes, vec![r"\.bak$"]);
        assert_eq!(config.walk.dir_excludes, vec![r"^\.git$"]);
    }

    #[test]
    fn unknown_sections_are_tolerated() {
        let config: Result<FileConfig, _> = toml::from_str(
            r#"
[defaults]
min_file_size = 1

[future_section]
whatever = true
"#,
        );
        assert!(config.is_ok());
    }

    #[test]
    fn env_overrides_sizes() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("LINKFOLD_MIN_SIZE", "2048");
        std::env::set_var("LINKFOLD_MAX_SIZE", "1000000");
        let mut config = FileConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("LINKFOLD_MIN_SIZE");
        std::env::remove_var("LINKFOLD_MAX_SIZE");
        assert_eq!(config.defaults.min_file_size, Some(2048));
        assert_eq!(config.defaults.max_file_size, Some(1_000_000));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("LINKFOLD_MIN_SIZE", "not-a-number");
        let mut config = FileConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("LINKFOLD_MIN_SIZE");
        assert!(config.defaults.min_file_size.is_none());
    }

    #[test]
    fn explicit_path_wins() {
        let path = Path::new("/tmp/custom.toml");
        assert_eq!(config_path(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[defaults]\nuse_newest_link = false\n").unwrap();
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.defaults.use_newest_link, Some(false));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = load(Some(Path::new("/definitely/not/there.toml"))).unwrap();
        assert!(config.defaults.min_file_size.is_none());
    }
}
