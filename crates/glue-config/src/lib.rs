//! TOML configuration for the glue engine and its preview driver.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults the preview editor ships with (800px preview, one second debounce).
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerPreference {
    #[default]
    Low,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GlueConfig {
    #[serde(default)]
    pub gpu: GpuSection,
    #[serde(default)]
    pub preview: PreviewSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GpuSection {
    #[serde(default)]
    pub power: PowerPreference,
    /// Accept a software adapter when no hardware adapter is present.
    #[serde(default)]
    pub fallback_adapter: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PreviewSection {
    /// Longest edge of the preview canvas in pixels.
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[serde(
        default = "default_debounce",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub debounce: Duration,
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            debounce: default_debounce(),
        }
    }
}

fn default_max_size() -> u32 {
    800
}

fn default_debounce() -> Duration {
    Duration::from_secs(1)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl GlueConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: GlueConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preview.max_size == 0 {
            return Err(ConfigError::Invalid(
                "preview.max_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[gpu]
power = "high"
fallback_adapter = true

[preview]
max_size = 1024
debounce = "250ms"
"#;

    #[test]
    fn parses_sample_config() {
        let config = GlueConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.gpu.power, PowerPreference::High);
        assert!(config.gpu.fallback_adapter);
        assert_eq!(config.preview.max_size, 1024);
        assert_eq!(config.preview.debounce, Duration::from_millis(250));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = GlueConfig::from_toml_str("").expect("parse config");
        assert_eq!(config, GlueConfig::default());
        assert_eq!(config.preview.max_size, 800);
        assert_eq!(config.preview.debounce, Duration::from_secs(1));
    }

    #[test]
    fn numeric_debounce_is_seconds() {
        let config =
            GlueConfig::from_toml_str("[preview]\ndebounce = 2\n").expect("parse config");
        assert_eq!(config.preview.debounce, Duration::from_secs(2));
    }

    #[test]
    fn rejects_zero_preview_size() {
        let err = GlueConfig::from_toml_str("[preview]\nmax_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_power_mode() {
        let err = GlueConfig::from_toml_str("[gpu]\npower = \"turbo\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
