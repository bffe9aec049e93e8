//! GPU side of the engine, built on `wgpu`.
//!
//! - `context` acquires the adapter/device (headless or host-provided) and
//!   turns wgpu validation failures into values via error scopes.
//! - `textures` uploads decoded bitmaps and allocates render targets, all in
//!   [`TARGET_FORMAT`](crate::types::TARGET_FORMAT).
//! - `targets` is the two-slot ping-pong arena.
//! - `program` links checked shader modules into render pipelines and owns
//!   each program's uniform buffer.
//! - `state` is the resource context: name registries, sizing, pass
//!   sequencing, and readback of the composite surface.

mod context;
mod program;
mod state;
mod targets;
mod textures;

pub use program::GlueProgram;
pub use state::{CompositeSurface, Glue};
