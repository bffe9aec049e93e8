//! Single-filter preview: one input image, one user program, one surface.
//!
//! Renders never run inline. Edits request a render and the host's refresh
//! callback drives [`Preview::on_frame`], which composites at most once per
//! call.
use std::time::Instant;

use glue_config::GlueConfig;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use scheduler::RedrawScheduler;
use serde_json::Value;
use tracing::{debug, trace};

use crate::compile::ProgramDescriptor;
use crate::error::GlueError;
use crate::gpu::Glue;
use crate::settings::{Setting, SettingError};
use crate::types::UniformValues;

/// Texture name the preview image is registered under.
pub const INPUT_TEXTURE: &str = "input";
/// Program name the user filter is registered under.
pub const FILTER_PROGRAM: &str = "filter";

pub struct Preview {
    glue: Glue,
    scheduler: RedrawScheduler,
    max_size: u32,
    settings: Vec<Setting>,
    values: UniformValues,
    has_image: bool,
}

impl Preview {
    pub fn new(glue: Glue, config: &GlueConfig) -> Self {
        Self {
            glue,
            scheduler: RedrawScheduler::new(config.preview.debounce),
            max_size: config.preview.max_size,
            settings: Vec::new(),
            values: UniformValues::new(),
            has_image: false,
        }
    }

    pub fn glue(&self) -> &Glue {
        &self.glue
    }

    pub fn glue_mut(&mut self) -> &mut Glue {
        &mut self.glue
    }

    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    pub fn values(&self) -> &UniformValues {
        &self.values
    }

    /// Sizes the canvas to `image` (scaled down to fit the preview limit)
    /// and replaces the input texture.
    pub fn set_image(&mut self, image: &RgbaImage) -> Result<(), GlueError> {
        let (width, height) = image.dimensions();
        let (fit_width, fit_height) = fit_within(width, height, self.max_size);
        self.glue.set_size(fit_width, fit_height)?;
        // Renderable again only once the replacement is registered.
        self.has_image = false;
        self.glue.deregister_texture(INPUT_TEXTURE)?;
        if (fit_width, fit_height) == (width, height) {
            self.glue.register_texture(INPUT_TEXTURE, image)?;
        } else {
            debug!(width, height, fit_width, fit_height, "scaling preview image");
            let scaled = imageops::resize(image, fit_width, fit_height, FilterType::Triangle);
            self.glue.register_texture(INPUT_TEXTURE, &scaled)?;
        }
        self.has_image = true;
        self.request_render();
        Ok(())
    }

    /// Compiles a new filter. On failure the previous filter keeps
    /// rendering and the error carries the diagnostics.
    pub fn update_filter(
        &mut self,
        fragment: &str,
        vertex: Option<&str>,
        settings: Vec<Setting>,
    ) -> Result<(), GlueError> {
        let mut descriptor = ProgramDescriptor::new(fragment).with_settings(settings.clone());
        if let Some(vertex) = vertex {
            descriptor = descriptor.with_vertex(vertex);
        }
        self.glue.replace_program(FILTER_PROGRAM, &descriptor)?;

        let previous = std::mem::take(&mut self.values);
        for setting in &settings {
            let default = setting.default_uniform();
            let value = match previous.get(&setting.key) {
                Some(kept) if kept.kind_name() == default.kind_name() => *kept,
                _ => default,
            };
            self.values.insert(setting.key.clone(), value);
        }
        self.settings = settings;
        self.request_render();
        Ok(())
    }

    /// Coerces an editor value for the setting `key` and stores it.
    pub fn set_value(&mut self, key: &str, raw: &Value) -> Result<(), GlueError> {
        let setting = self
            .settings
            .iter()
            .find(|setting| setting.key == key)
            .ok_or_else(|| SettingError::Unknown(key.to_string()))?;
        let value = setting.coerce(raw)?;
        self.values.insert(key.to_string(), value);
        self.request_render();
        Ok(())
    }

    pub fn request_render(&mut self) {
        self.scheduler.request();
    }

    pub fn request_render_debounced(&mut self, now: Instant) {
        self.scheduler.request_debounced(now);
    }

    pub fn cancel_render(&mut self) {
        self.scheduler.cancel();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Refresh callback. Returns true when a composite ran.
    pub fn on_frame(&mut self, now: Instant) -> Result<bool, GlueError> {
        if !self.scheduler.poll(now) {
            return Ok(false);
        }
        self.render()
    }

    /// Composites immediately. Returns false when there is no image yet.
    pub fn render(&mut self) -> Result<bool, GlueError> {
        if !self.has_image {
            trace!("render requested before an image was set");
            return Ok(false);
        }
        let passes: &[&str] = if self.glue.has_program(FILTER_PROGRAM) {
            &[FILTER_PROGRAM]
        } else {
            &[]
        };
        self.glue.composite(INPUT_TEXTURE, passes, &self.values)?;
        Ok(true)
    }

    pub fn read_pixels(&self) -> Result<RgbaImage, GlueError> {
        self.glue.read_pixels()
    }
}

/// Largest size with the same aspect ratio whose longer side is at most
/// `max_size`. Sizes already within the limit are returned unchanged.
pub fn fit_within(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_size || max_size == 0 {
        return (width, height);
    }
    let scale = f64::from(max_size) / f64::from(longest);
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_images_keep_their_size() {
        assert_eq!(fit_within(640, 480, 800), (640, 480));
        assert_eq!(fit_within(800, 800, 800), (800, 800));
    }

    #[test]
    fn large_images_scale_to_the_longer_side() {
        assert_eq!(fit_within(1600, 1200, 800), (800, 600));
        assert_eq!(fit_within(1000, 4000, 800), (200, 800));
    }

    #[test]
    fn thin_images_never_collapse() {
        assert_eq!(fit_within(10_000, 1, 800), (800, 1));
    }
}
