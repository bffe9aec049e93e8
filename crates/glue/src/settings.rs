//! Filter settings: user-declared, typed inputs that surface as uniforms.
//!
//! A setting declares a key (the GLSL identifier), a kind, and optional
//! bounds. The preprocessor synthesizes one uniform per setting and the
//! preview coerces loosely-typed editor values into [`UniformValue`]s here,
//! at assignment time, so nothing untyped reaches the binder.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::UniformValue;

/// Identifiers the prelude already owns; settings may not shadow them.
pub const RESERVED_KEYS: [&str; 9] = [
    "iResolution",
    "iTexture",
    "glue",
    "main",
    "position",
    "texture",
    "texture2D",
    "textureLod",
    "sampler2D",
];

/// Prefixes of generated names (`glue_texture`, `gl_FragColor`, ...).
pub const RESERVED_PREFIXES: [&str; 2] = ["glue_", "gl_"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingError {
    #[error("unknown setting '{0}'")]
    Unknown(String),
    #[error("setting '{key}' expects a {expected} value, got {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: String,
    },
    #[error("setting '{key}' has no select option with value {value}")]
    NoSuchOption { key: String, value: i64 },
    #[error("setting '{key}': invalid color '{raw}'")]
    InvalidColor { key: String, raw: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    Offset,
    Color,
    Integer,
    Float,
    Boolean,
    Select,
    /// Float in radians.
    Angle,
}

impl SettingKind {
    fn name(self) -> &'static str {
        match self {
            SettingKind::Offset => "offset",
            SettingKind::Color => "color",
            SettingKind::Integer => "integer",
            SettingKind::Float => "float",
            SettingKind::Boolean => "boolean",
            SettingKind::Select => "select",
            SettingKind::Angle => "angle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: SettingKind,
    #[serde(default)]
    pub default_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    /// Only meaningful for color settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_values: Option<Vec<SelectOption>>,
}

impl Setting {
    /// Creates a setting with the editor's starting bounds and default for
    /// `kind`.
    pub fn new(key: &str, kind: SettingKind) -> Self {
        let mut setting = Self {
            id: key.to_string(),
            key: sanitize_key(key),
            name: key.to_string(),
            description: None,
            kind,
            default_value: Value::Null,
            min_value: None,
            max_value: None,
            step: None,
            alpha: None,
            select_values: None,
        };
        match kind {
            SettingKind::Integer => {
                setting.min_value = Some(0.0);
                setting.max_value = Some(10.0);
                setting.step = Some(1.0);
                setting.default_value = Value::from(1);
            }
            SettingKind::Float => {
                setting.min_value = Some(0.0);
                setting.max_value = Some(1.0);
                setting.step = Some(0.01);
                setting.default_value = Value::from(0.5);
            }
            SettingKind::Color => {
                setting.default_value = Value::from("#000000FF");
                setting.alpha = Some(false);
            }
            SettingKind::Boolean => setting.default_value = Value::from(false),
            SettingKind::Offset => setting.default_value = serde_json::json!([0.0, 0.0]),
            SettingKind::Select => setting.select_values = Some(Vec::new()),
            SettingKind::Angle => setting.default_value = Value::from(0.0),
        }
        setting
    }

    pub fn has_alpha(&self) -> bool {
        self.kind == SettingKind::Color && self.alpha.unwrap_or(false)
    }

    /// Type of the synthesized uniform declaration.
    pub fn glsl_type(&self) -> &'static str {
        match self.kind {
            SettingKind::Boolean => "bool",
            SettingKind::Float | SettingKind::Angle => "float",
            SettingKind::Integer | SettingKind::Select => "int",
            SettingKind::Offset => "vec2",
            SettingKind::Color if self.has_alpha() => "vec4",
            SettingKind::Color => "vec3",
        }
    }

    /// Whether the setting can be declared as a uniform at all.
    pub fn is_declarable(&self) -> bool {
        is_identifier(&self.key)
            && !RESERVED_KEYS.contains(&self.key.as_str())
            && !RESERVED_PREFIXES
                .iter()
                .any(|prefix| self.key.starts_with(prefix))
    }

    /// Value used before the user touches the setting.
    pub fn default_uniform(&self) -> UniformValue {
        self.coerce(&self.default_value)
            .unwrap_or_else(|_| self.zero_value())
    }

    fn zero_value(&self) -> UniformValue {
        match self.kind {
            SettingKind::Boolean => UniformValue::Boolean(false),
            SettingKind::Float | SettingKind::Angle => UniformValue::Float(0.0),
            SettingKind::Integer => UniformValue::Integer(0),
            SettingKind::Offset => UniformValue::Offset { x: 0.0, y: 0.0 },
            SettingKind::Color => UniformValue::Color {
                r: 0.0,
                g: 0.0,
                b: 0.0,
                a: 1.0,
            },
            SettingKind::Select => UniformValue::Select(
                self.options()
                    .first()
                    .and_then(|option| i32::try_from(option.value).ok())
                    .unwrap_or(0),
            ),
        }
    }

    fn options(&self) -> &[SelectOption] {
        self.select_values.as_deref().unwrap_or(&[])
    }

    /// Converts an editor value into the typed value for this setting,
    /// clamping numbers into `[min_value, max_value]`.
    pub fn coerce(&self, raw: &Value) -> Result<UniformValue, SettingError> {
        match self.kind {
            SettingKind::Boolean => match raw {
                Value::Bool(flag) => Ok(UniformValue::Boolean(*flag)),
                Value::Number(number) => Ok(UniformValue::Boolean(
                    number.as_f64().unwrap_or(0.0) != 0.0,
                )),
                other => Err(self.mismatch(other)),
            },
            SettingKind::Float | SettingKind::Angle => {
                let value = self.number(raw)?;
                Ok(UniformValue::Float(self.clamp(value) as f32))
            }
            SettingKind::Integer => {
                let value = self.number(raw)?.round();
                Ok(UniformValue::Integer(self.clamp(value) as i32))
            }
            SettingKind::Offset => {
                let (x, y) = match raw {
                    Value::Array(items) if items.len() == 2 => {
                        (self.number(&items[0])?, self.number(&items[1])?)
                    }
                    Value::Object(map) => match (map.get("x"), map.get("y")) {
                        (Some(x), Some(y)) => (self.number(x)?, self.number(y)?),
                        _ => return Err(self.mismatch(raw)),
                    },
                    other => return Err(self.mismatch(other)),
                };
                Ok(UniformValue::Offset {
                    x: x as f32,
                    y: y as f32,
                })
            }
            SettingKind::Color => {
                let [r, g, b, a] = match raw {
                    Value::String(text) => {
                        parse_hex_color(text).ok_or_else(|| SettingError::InvalidColor {
                            key: self.key.clone(),
                            raw: text.clone(),
                        })?
                    }
                    Value::Array(items) if items.len() == 3 || items.len() == 4 => {
                        let mut rgba = [1.0f32; 4];
                        for (slot, item) in rgba.iter_mut().zip(items) {
                            *slot = self.number(item)?.clamp(0.0, 1.0) as f32;
                        }
                        rgba
                    }
                    other => return Err(self.mismatch(other)),
                };
                Ok(UniformValue::Color { r, g, b, a })
            }
            SettingKind::Select => {
                let number = self.number(raw)?.round();
                let value = i32::try_from(number as i64).map_err(|_| self.mismatch(raw))?;
                let options = self.options();
                if !options.is_empty()
                    && options.iter().all(|option| option.value != i64::from(value))
                {
                    return Err(SettingError::NoSuchOption {
                        key: self.key.clone(),
                        value: i64::from(value),
                    });
                }
                Ok(UniformValue::Select(value))
            }
        }
    }

    fn number(&self, raw: &Value) -> Result<f64, SettingError> {
        raw.as_f64().ok_or_else(|| self.mismatch(raw))
    }

    fn clamp(&self, value: f64) -> f64 {
        let lower = self.min_value.unwrap_or(f64::NEG_INFINITY);
        let upper = self.max_value.unwrap_or(f64::INFINITY);
        if lower <= upper {
            value.clamp(lower, upper)
        } else {
            value
        }
    }

    fn mismatch(&self, found: &Value) -> SettingError {
        SettingError::TypeMismatch {
            key: self.key.clone(),
            expected: self.kind.name(),
            found: found.to_string(),
        }
    }
}

/// Strips leading digits and any character outside `[A-Za-z0-9_]`, the
/// same cleanup the settings editor applies while typing a uniform name.
pub fn sanitize_key(raw: &str) -> String {
    raw.trim_start_matches(|ch: char| ch.is_ascii_digit())
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .collect::<String>()
        .trim_start_matches(|ch: char| ch.is_ascii_digit())
        .to_string()
}

pub(crate) fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        _ => false,
    }
}

/// Parses `#RRGGBB` or `#RRGGBBAA` (leading `#` optional) into normalized
/// RGBA; alpha defaults to opaque.
pub fn parse_hex_color(raw: &str) -> Option<[f32; 4]> {
    let hex = raw.trim().trim_start_matches('#');
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return None;
    }
    let mut rgba = [1.0f32; 4];
    for (index, slot) in rgba.iter_mut().enumerate().take(hex.len() / 2) {
        let byte = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16).ok()?;
        *slot = byte as f32 / 255.0;
    }
    Some(rgba)
}
