//! Glue: a shader compositing engine.
//!
//! User-authored WebGL-style shaders are rewritten into GLSL 450, compiled
//! through `naga`, and linked into `wgpu` pipelines that run as full-screen
//! passes over an input texture. The flow for one composite:
//!
//! ```text
//!   register_texture("input") ──▶ draw_texture ──▶ ping-pong slot A
//!                                                     │
//!   register_program("filter") ─────▶ draw ◀──────────┘
//!                                       │
//!                                       ▼
//!                                  ping-pong slot B ──▶ finalize ──▶ CompositeSurface
//! ```
//!
//! - [`preprocess`] owns the text transform and the line map back to the
//!   source the user wrote.
//! - [`compile`] runs the front end and validator for both stages and
//!   reports [`CompileError`] diagnostics without needing a GPU.
//! - [`uniforms`] packs typed values into the reflected uniform block.
//! - [`Glue`] owns every GPU object by name and sequences the passes.
//! - [`Preview`] drives a `Glue` from an editor: one image, one filter,
//!   coalesced and debounced redraws.

pub mod compile;
mod error;
mod gpu;
pub mod preprocess;
mod preview;
pub mod settings;
mod types;
pub mod uniforms;

pub use compile::{check_program, CheckedProgram, ProgramDescriptor};
pub use error::{CompileError, GlueError, ResourceKind, StageDiagnostics};
pub use gpu::{CompositeSurface, Glue, GlueProgram};
pub use preprocess::{
    process, process_with_settings, process_with_varyings, LineMap, Processed, Varyings,
};
pub use preview::{fit_within, Preview, FILTER_PROGRAM, INPUT_TEXTURE};
pub use settings::{Setting, SettingError, SettingKind};
pub use types::{
    PipelinePhase, Stage, UniformValue, UniformValues, DEFAULT_FRAGMENT_SHADER,
    DEFAULT_VERTEX_SHADER, TARGET_FORMAT,
};
pub use uniforms::{UniformBinder, UniformLayout};

pub use glue_config::GlueConfig;
