//! Discovery and generation of FerroSync settings files
//!
//! Settings are layered: built-in defaults, then one file, then
//! `FERROSYNC__SECTION__KEY` environment overrides. Without an explicit file
//! the first of `ferrosync.{yaml,toml,json}` found in the working directory,
//! then in the user's `ferrosync` config directory, is used.

use crate::{Config, ConfigBuilder, ConfigError, ConfigResult};
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "FERROSYNC";

const FILE_NAMES: [&str; 3] = ["ferrosync.yaml", "ferrosync.toml", "ferrosync.json"];

/// Entry points used by the binary to obtain its settings
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load settings from the first discovered file, if any
    pub fn load_default() -> ConfigResult<Config> {
        Self::layered(Self::config_exists().as_deref())
    }

    /// Load settings from `path`, which must exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::File {
                path: path.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Self::layered(Some(path))
    }

    /// First settings file that would be picked up, if any
    pub fn config_exists() -> Option<PathBuf> {
        search_path().into_iter().find(|path| path.is_file())
    }

    /// Write the default settings to `path`, in the format its extension names
    pub fn generate_default_config<P: AsRef<Path>>(path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let text = render(&Config::default(), path)?;
        std::fs::write(path, text).map_err(|source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        })
    }

    fn layered(file: Option<&Path>) -> ConfigResult<Config> {
        let mut builder = ConfigBuilder::new().add_defaults();
        if let Some(file) = file {
            builder = builder.add_source_file(file);
        }
        builder.add_env_prefix(ENV_PREFIX).build()
    }
}

fn render(config: &Config, path: &Path) -> ConfigResult<String> {
    let rendered = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::to_string_pretty(config).map_err(|e| ("TOML", e.to_string())),
        Some("json") => serde_json::to_string_pretty(config).map_err(|e| ("JSON", e.to_string())),
        _ => serde_yaml::to_string(config).map_err(|e| ("YAML", e.to_string())),
    };
    rendered.map_err(|(format, message)| ConfigError::Render { format, message })
}

fn search_path() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::new()];
    if let Some(dir) = user_config_dir() {
        dirs.push(dir.join("ferrosync"));
    }

    dirs.iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .collect()
}

fn user_config_dir() -> Option<PathBuf> {
    let var = |name: &str| std::env::var_os(name).filter(|value| !value.is_empty());
    var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| var("HOME").map(|home| PathBuf::from(home).join(".config")))
        .or_else(|| var("APPDATA").map(PathBuf::from))
}
