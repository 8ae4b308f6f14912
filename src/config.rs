use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::preprocess::{ADJUSTMENT_RANGE, AutoEnhance, Preprocessing};
use crate::{ClusterSettings, ResponseFormat, extract::MAX_COLORS};

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "palette";
/// `PALETTE__SERVER__PORT=8080` overrides `server.port`.
pub const ENV_PREFIX: &str = "PALETTE";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    /// `clustering.n_colors` is used when a request omits `n_colors`.
    pub clustering: ClusterSettings,
    pub preprocess: PreprocessSettings,
    pub response: ResponseSettings,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Apply `enhance` when a request carries no explicit adjustments.
    pub auto_enhance: bool,
    pub enhance: AutoEnhance,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            auto_enhance: true,
            enhance: AutoEnhance::default(),
        }
    }
}

impl PreprocessSettings {
    /// Mode used for requests without brightness/contrast/grayscale fields.
    pub fn default_mode(&self) -> Preprocessing {
        if self.auto_enhance {
            Preprocessing::Auto(self.enhance)
        } else {
            Preprocessing::None
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResponseSettings {
    pub default_format: ResponseFormat,
}

impl Settings {
    /// Defaults, then the config file, then `PALETTE__*` environment
    /// variables. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings: Self = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let clustering = &self.clustering;
        if !(1..=MAX_COLORS).contains(&clustering.n_colors) {
            return Err(invalid(format!(
                "clustering.n_colors must be between 1 and {MAX_COLORS}, got {}",
                clustering.n_colors
            )));
        }
        if clustering.max_iter == 0 || clustering.runs == 0 {
            return Err(invalid("clustering.max_iter and clustering.runs must be positive".into()));
        }
        if !clustering.converge.is_finite() || clustering.converge < 0.0 {
            return Err(invalid("clustering.converge must be a non-negative number".into()));
        }
        let enhance = &self.preprocess.enhance;
        if !ADJUSTMENT_RANGE.contains(&enhance.contrast) {
            return Err(invalid(format!(
                "preprocess.enhance.contrast must be within [-100, 100], got {}",
                enhance.contrast
            )));
        }
        if !enhance.blur_sigma.is_finite() || !enhance.saturation_factor.is_finite() || enhance.saturation_factor < 0.0 {
            return Err(invalid("preprocess.enhance values must be finite and non-negative".into()));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(invalid("server.max_upload_bytes must be positive".into()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Message(message)
}
