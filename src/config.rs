//! Service configuration read from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::model::ModelSettings;
use crate::plant::Plant;

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
    pub log_level: String,
    pub default_plant: Plant,
    /// Startup checkpoint override; defaults to the default plant's checkpoint.
    pub model_path: Option<PathBuf>,
    pub potato_model_path: PathBuf,
    pub tomato_model_path: PathBuf,
    pub potato_model_url: Option<String>,
    pub tomato_model_url: Option<String>,
    /// Sources for the checkpoints' JSON metadata files.
    pub potato_model_meta_url: Option<String>,
    pub tomato_model_meta_url: Option<String>,
    pub github_token: Option<String>,
    pub base_model_path: Option<PathBuf>,
    pub invert_tomato_labels: bool,
    pub fallback_seed: u64,
}

fn parse<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn parse_bool(key: &str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off" | "") => Ok(false),
        Some(_) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.unwrap_or_default(),
        }),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let body_limit_mb: usize = parse("BODY_LIMIT_MB", get("BODY_LIMIT_MB"), 16)?;
        let body_limit_bytes = body_limit_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "BODY_LIMIT_MB".to_string(),
                value: body_limit_mb.to_string(),
            })?;
        let default_plant = match get("DEFAULT_PLANT") {
            Some(raw) => raw.parse()?,
            None => Plant::Potato,
        };

        Ok(Settings {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse("PORT", get("PORT"), 8000)?,
            body_limit_bytes,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            default_plant,
            model_path: get("MODEL_PATH").map(PathBuf::from),
            potato_model_path: get("POTATO_MODEL_PATH")
                .unwrap_or_else(|| "models/potato_model_best.pb".into())
                .into(),
            tomato_model_path: get("TOMATO_MODEL_PATH")
                .unwrap_or_else(|| "models/tomato_model_best.pb".into())
                .into(),
            potato_model_url: get("POTATO_MODEL_URL"),
            tomato_model_url: get("TOMATO_MODEL_URL"),
            potato_model_meta_url: get("POTATO_MODEL_META_URL"),
            tomato_model_meta_url: get("TOMATO_MODEL_META_URL"),
            github_token: get("GITHUB_TOKEN"),
            base_model_path: get("BASE_MODEL_PATH").map(PathBuf::from),
            invert_tomato_labels: parse_bool("TOMATO_INVERT_LABELS", get("TOMATO_INVERT_LABELS"))?,
            fallback_seed: parse("FALLBACK_SEED", get("FALLBACK_SEED"), 42)?,
        })
    }

    pub fn checkpoint_for(&self, plant: Plant) -> PathBuf {
        match plant {
            Plant::Potato => self.potato_model_path.clone(),
            Plant::Tomato => self.tomato_model_path.clone(),
        }
    }

    pub fn download_url_for(&self, plant: Plant) -> Option<&str> {
        match plant {
            Plant::Potato => self.potato_model_url.as_deref(),
            Plant::Tomato => self.tomato_model_url.as_deref(),
        }
    }

    pub fn meta_url_for(&self, plant: Plant) -> Option<&str> {
        match plant {
            Plant::Potato => self.potato_model_meta_url.as_deref(),
            Plant::Tomato => self.tomato_model_meta_url.as_deref(),
        }
    }

    pub fn startup_checkpoint(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| self.checkpoint_for(self.default_plant))
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            base_model_path: self.base_model_path.clone(),
            invert_tomato_labels: self.invert_tomato_labels,
            fallback_seed: self.fallback_seed,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.bind_address(), "0.0.0.0:8000");
        assert_eq!(settings.body_limit_bytes, 16 * 1024 * 1024);
        assert_eq!(settings.default_plant, Plant::Potato);
        assert!(!settings.invert_tomato_labels);
        assert_eq!(settings.fallback_seed, 42);
        assert_eq!(
            settings.startup_checkpoint(),
            PathBuf::from("models/potato_model_best.pb")
        );
        assert_eq!(settings.download_url_for(Plant::Tomato), None);
        assert_eq!(settings.meta_url_for(Plant::Potato), None);
    }

    #[test]
    fn overrides() {
        let settings = settings(&[
            ("PORT", "5020"),
            ("DEFAULT_PLANT", "Tomato"),
            ("TOMATO_MODEL_PATH", "/srv/tomato.pb"),
            ("TOMATO_INVERT_LABELS", "true"),
            ("TOMATO_MODEL_URL", "https://example.com/tomato.pb"),
            ("TOMATO_MODEL_META_URL", "https://example.com/tomato.json"),
            ("BASE_MODEL_PATH", ""),
        ])
        .unwrap();

        assert_eq!(settings.port, 5020);
        assert_eq!(settings.default_plant, Plant::Tomato);
        assert_eq!(settings.startup_checkpoint(), PathBuf::from("/srv/tomato.pb"));
        assert!(settings.model_settings().invert_tomato_labels);
        assert_eq!(
            settings.download_url_for(Plant::Tomato),
            Some("https://example.com/tomato.pb")
        );
        assert_eq!(
            settings.meta_url_for(Plant::Tomato),
            Some("https://example.com/tomato.json")
        );
        assert_eq!(settings.base_model_path, None);
    }

    #[test]
    fn model_path_overrides_startup_checkpoint() {
        let settings = settings(&[("MODEL_PATH", "custom.pb")]).unwrap();
        assert_eq!(settings.startup_checkpoint(), PathBuf::from("custom.pb"));
        assert_eq!(
            settings.checkpoint_for(Plant::Potato),
            PathBuf::from("models/potato_model_best.pb")
        );
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            settings(&[("PORT", "eighty")]),
            Err(ConfigError::InvalidValue { key, .. }) if key == "PORT"
        ));
        assert!(matches!(
            settings(&[("TOMATO_INVERT_LABELS", "maybe")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            settings(&[("DEFAULT_PLANT", "corn")]),
            Err(ConfigError::UnsupportedPlant(_))
        ));
    }

    #[test]
    fn rejects_body_limit_that_overflows() {
        let huge = (usize::MAX / 1024).to_string();
        assert!(matches!(
            settings(&[("BODY_LIMIT_MB", huge.as_str())]),
            Err(ConfigError::InvalidValue { key, .. }) if key == "BODY_LIMIT_MB"
        ));
        assert_eq!(
            settings(&[("BODY_LIMIT_MB", "1")]).unwrap().body_limit_bytes,
            1024 * 1024
        );
    }
}
