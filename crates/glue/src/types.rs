use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use wgpu::naga::ShaderStage;

/// Pixel format shared by uploaded textures, ping-pong targets, and the
/// composite surface. Values are stored as-is (no sRGB conversion), matching
/// what shader authors see in a WebGL canvas.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Fragment shader used when a filter does not supply one: samples the input
/// texture at the current pixel.
pub const DEFAULT_FRAGMENT_SHADER: &str = "void main()
{
  vec2 p = gl_FragCoord.xy / iResolution.xy;
  gl_FragColor = texture2D(iTexture, p);
}";

/// Vertex shader used when a filter does not supply one.
pub const DEFAULT_VERTEX_SHADER: &str = "void main() {
  gl_Position = vec4(position, 1.0);
}";

/// The two programmable stages of a compositing program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub(crate) fn naga(self) -> ShaderStage {
        match self {
            Stage::Vertex => ShaderStage::Vertex,
            Stage::Fragment => ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Vertex => f.write_str("vertex"),
            Stage::Fragment => f.write_str("fragment"),
        }
    }
}

/// A typed uniform value. Each variant corresponds to one setting kind and
/// one GLSL declaration type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Boolean(bool),
    Float(f32),
    Integer(i32),
    Offset { x: f32, y: f32 },
    /// Components in `0.0..=1.0`. Whether alpha reaches the GPU depends on
    /// the declaration (`vec3` or `vec4`).
    Color { r: f32, g: f32, b: f32, a: f32 },
    /// Numeric value of the chosen select option.
    Select(i32),
}

impl UniformValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            UniformValue::Boolean(_) => "boolean",
            UniformValue::Float(_) => "float",
            UniformValue::Integer(_) => "integer",
            UniformValue::Offset { .. } => "offset",
            UniformValue::Color { .. } => "color",
            UniformValue::Select(_) => "select",
        }
    }
}

/// Current value per uniform name, applied once per composite.
pub type UniformValues = BTreeMap<String, UniformValue>;

/// Observable state of the compositing pipeline.
///
/// `Rendering` and `Presented` only exist while a draw is in flight; callers
/// observe `Idle` before the first `set_size` and `Sized` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Idle,
    Sized,
    Rendering,
    Presented,
}
