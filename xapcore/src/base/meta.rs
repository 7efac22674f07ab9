use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    codec::InlinePolicy,
    magic::ENV_CODEC_CONFIG_PATH,
    utils::error::{XapError, XapResult},
};

fn default_max_inline_depth() -> usize {
    8
}

/// Codec runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// How nested structs are compiled.
    #[serde(default)]
    pub inline_policy: InlinePolicy,

    /// Nesting level past which nested structs are deferred even with
    /// [`InlinePolicy::Inline`].
    #[serde(default = "default_max_inline_depth")]
    pub max_inline_depth: usize,

    /// Compiled codec table installed when the runtime starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aot_artifact: Option<PathBuf>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            inline_policy: InlinePolicy::default(),
            max_inline_depth: default_max_inline_depth(),
            aot_artifact: None,
        }
    }
}

impl CodecConfig {
    /// Get the default path to the codec configuration file.
    pub fn default_path() -> PathBuf {
        // Check if the environment variable is set
        if let Ok(config_path) = std::env::var(ENV_CODEC_CONFIG_PATH) {
            return config_path.into();
        }

        // Fallback to default paths based on OS
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

        path.push("xap");
        path.push("codec.toml");
        path
    }

    /// Load a configuration from a TOML file.
    pub fn load_from_toml(path: &Path) -> XapResult<Self> {
        let toml_str = std::fs::read_to_string(path)?;

        toml::from_str(&toml_str).map_err(|e| XapError::ManifestParseError {
            source: e,
            file: path.display().to_string(),
        })
    }

    /// Save the configuration to a TOML file, creating parent directories as needed.
    pub fn save_to_toml(&self, path: &Path) -> XapResult<()> {
        let toml_str = toml::to_string(self).map_err(|e| {
            XapError::Unknown(format!(
                "Failed during serialization of TOML to path `{}`: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, toml_str)?;
        Ok(())
    }
}
