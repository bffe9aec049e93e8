use std::collections::HashMap;

use glue_config::GlueConfig;
use image::imageops::flip_vertical_in_place;
use image::RgbaImage;
use tracing::{debug, trace, warn};
use wgpu::util::DeviceExt;

use crate::compile::ProgramDescriptor;
use crate::error::{GlueError, ResourceKind};
use crate::types::{PipelinePhase, UniformValues};

use super::context::GpuContext;
use super::program::{GlueProgram, SharedLayouts, QUAD};
use super::targets::PingPong;
use super::textures::{self, GlueTexture};

const CONTEXT_NAME: &str = "glue";

/// The texture final passes draw into. Hosts sharing the device can sample
/// or copy it directly; [`Glue::read_pixels`] reads it back on the CPU.
pub struct CompositeSurface {
    target: GlueTexture,
}

impl CompositeSurface {
    pub fn width(&self) -> u32 {
        self.target.size().0
    }

    pub fn height(&self) -> u32 {
        self.target.size().1
    }

    pub fn size(&self) -> (u32, u32) {
        self.target.size()
    }

    pub fn texture(&self) -> &wgpu::Texture {
        self.target.texture()
    }

    pub fn view(&self) -> &wgpu::TextureView {
        self.target.view()
    }
}

/// Where a pass samples from.
enum PassInput<'a> {
    /// The latest ping-pong output, or the transparent placeholder.
    Previous,
    Texture(&'a str),
}

/// Resource context: owns every GPU object, keyed by name, and sequences
/// compositing passes through a ping-pong pair of targets.
pub struct Glue {
    ctx: GpuContext,
    layouts: SharedLayouts,
    sampler: wgpu::Sampler,
    quad: wgpu::Buffer,
    placeholder: GlueTexture,
    passthrough: GlueProgram,
    programs: HashMap<String, GlueProgram>,
    textures: HashMap<String, GlueTexture>,
    targets: Option<PingPong>,
    surface: Option<CompositeSurface>,
    size: Option<(u32, u32)>,
    phase: PipelinePhase,
    disposed: bool,
}

impl Glue {
    /// Creates a context on a headless device chosen per `config`.
    pub fn new(config: &GlueConfig) -> Result<Self, GlueError> {
        Self::with_context(GpuContext::headless(config)?)
    }

    /// Creates a context on a device the host already owns.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Result<Self, GlueError> {
        Self::with_context(GpuContext::from_parts(device, queue))
    }

    fn with_context(ctx: GpuContext) -> Result<Self, GlueError> {
        let layouts = SharedLayouts::new(&ctx.device);
        let sampler = textures::create_sampler(&ctx.device);
        let quad = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("glue quad"),
                contents: bytemuck::cast_slice(&QUAD),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let placeholder = GlueTexture::placeholder(&ctx)?;
        let passthrough =
            GlueProgram::compile(&ctx, &layouts, "passthrough", &ProgramDescriptor::default())?;

        Ok(Self {
            ctx,
            layouts,
            sampler,
            quad,
            placeholder,
            passthrough,
            programs: HashMap::new(),
            textures: HashMap::new(),
            targets: None,
            surface: None,
            size: None,
            phase: PipelinePhase::Idle,
            disposed: false,
        })
    }

    fn ensure_live(&self) -> Result<(), GlueError> {
        if self.disposed {
            return Err(GlueError::disposed(ResourceKind::Context, CONTEXT_NAME));
        }
        Ok(())
    }

    fn require_size(&self, operation: &'static str) -> Result<(u32, u32), GlueError> {
        self.size.ok_or(GlueError::Unsized(operation))
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Sizes the ping-pong targets and the composite surface, and pushes the
    /// new size to every program. Contents of all targets are undefined
    /// afterwards.
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<(), GlueError> {
        self.ensure_live()?;
        textures::check_dimensions(&self.ctx, width, height)?;

        match self.targets.as_mut() {
            Some(targets) => targets.resize(&self.ctx, width, height)?,
            None => self.targets = Some(PingPong::new(&self.ctx, width, height)?),
        }
        let target = GlueTexture::render_target(&self.ctx, "composite surface", width, height)?;
        if let Some(previous) = self.surface.replace(CompositeSurface { target }) {
            previous.target.destroy();
        }

        self.passthrough.set_size(width, height)?;
        for (name, program) in &mut self.programs {
            if program.is_disposed() {
                trace!(program = %name, "skipping disposed program on resize");
                continue;
            }
            program.set_size(width, height)?;
        }

        self.size = Some((width, height));
        self.phase = PipelinePhase::Sized;
        debug!(width, height, "canvas sized");
        Ok(())
    }

    /// Uploads `image` under `name`. The name must be free.
    pub fn register_texture(&mut self, name: &str, image: &RgbaImage) -> Result<(), GlueError> {
        self.ensure_live()?;
        self.require_size("register_texture")?;
        if self.textures.contains_key(name) {
            return Err(GlueError::NameCollision {
                kind: ResourceKind::Texture,
                name: name.to_string(),
            });
        }
        let texture = GlueTexture::from_image(&self.ctx, name, image)?;
        self.textures.insert(name.to_string(), texture);
        Ok(())
    }

    /// Releases the texture and its name. Absent names are ignored.
    pub fn deregister_texture(&mut self, name: &str) -> Result<(), GlueError> {
        self.ensure_live()?;
        if let Some(texture) = self.textures.remove(name) {
            texture.destroy();
            debug!(texture = name, "deregistered texture");
        }
        Ok(())
    }

    pub fn has_texture(&self, name: &str) -> bool {
        self.textures.contains_key(name)
    }

    /// Compiles and registers a program. `vertex` falls back to the
    /// pass-through vertex stage.
    pub fn register_program(
        &mut self,
        name: &str,
        fragment: &str,
        vertex: Option<&str>,
    ) -> Result<(), GlueError> {
        let mut descriptor = ProgramDescriptor::new(fragment);
        if let Some(vertex) = vertex {
            descriptor = descriptor.with_vertex(vertex);
        }
        self.register_program_with(name, &descriptor)
    }

    /// Registers a program from a full descriptor. Nothing is registered when
    /// compilation or linking fails.
    pub fn register_program_with(
        &mut self,
        name: &str,
        descriptor: &ProgramDescriptor,
    ) -> Result<(), GlueError> {
        self.ensure_live()?;
        if self.programs.contains_key(name) {
            return Err(GlueError::NameCollision {
                kind: ResourceKind::Program,
                name: name.to_string(),
            });
        }
        let program = self.build_program(name, descriptor)?;
        self.programs.insert(name.to_string(), program);
        Ok(())
    }

    /// Compiles `descriptor` and swaps it in under `name`. On failure the
    /// program already registered under `name`, if any, stays in place.
    pub fn replace_program(
        &mut self,
        name: &str,
        descriptor: &ProgramDescriptor,
    ) -> Result<(), GlueError> {
        self.ensure_live()?;
        let program = self.build_program(name, descriptor)?;
        if let Some(mut previous) = self.programs.insert(name.to_string(), program) {
            if !previous.is_disposed() {
                previous.dispose()?;
            }
        }
        Ok(())
    }

    fn build_program(
        &self,
        name: &str,
        descriptor: &ProgramDescriptor,
    ) -> Result<GlueProgram, GlueError> {
        let mut program = GlueProgram::compile(&self.ctx, &self.layouts, name, descriptor)
            .inspect_err(|err| debug!(program = name, error = %err, "program rejected"))?;
        if let Some((width, height)) = self.size {
            program.set_size(width, height)?;
        }
        Ok(program)
    }

    /// Disposes and forgets the program. Absent names are ignored.
    pub fn deregister_program(&mut self, name: &str) -> Result<(), GlueError> {
        self.ensure_live()?;
        if let Some(mut program) = self.programs.remove(name) {
            if !program.is_disposed() {
                program.dispose()?;
            }
        }
        Ok(())
    }

    pub fn has_program(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    pub fn program(&self, name: &str) -> Result<&GlueProgram, GlueError> {
        self.ensure_live()?;
        self.programs
            .get(name)
            .ok_or_else(|| GlueError::missing(ResourceKind::Program, name))
    }

    pub fn program_mut(&mut self, name: &str) -> Result<&mut GlueProgram, GlueError> {
        self.ensure_live()?;
        self.programs
            .get_mut(name)
            .ok_or_else(|| GlueError::missing(ResourceKind::Program, name))
    }

    /// Draws the named program, or the pass-through program for `None`,
    /// reading the latest pass output. A final pass writes the composite
    /// surface instead of a ping-pong target.
    pub fn draw(
        &mut self,
        name: Option<&str>,
        values: &UniformValues,
        is_final_pass: bool,
    ) -> Result<(), GlueError> {
        self.run_pass(name, PassInput::Previous, values, is_final_pass)
    }

    /// Draws the named texture through the pass-through program.
    pub fn draw_texture(&mut self, name: &str, is_final_pass: bool) -> Result<(), GlueError> {
        self.run_pass(None, PassInput::Texture(name), &UniformValues::new(), is_final_pass)
    }

    /// Copies the latest pass output onto the composite surface.
    pub fn finalize(&mut self) -> Result<(), GlueError> {
        self.draw(None, &UniformValues::new(), true)
    }

    /// Draws `input`, runs each program in `passes` in order, then
    /// finalizes.
    pub fn composite(
        &mut self,
        input: &str,
        passes: &[&str],
        values: &UniformValues,
    ) -> Result<(), GlueError> {
        self.draw_texture(input, false)?;
        for pass in passes {
            self.draw(Some(pass), values, false)?;
        }
        self.finalize()
    }

    fn run_pass(
        &mut self,
        program_name: Option<&str>,
        input: PassInput<'_>,
        values: &UniformValues,
        is_final_pass: bool,
    ) -> Result<(), GlueError> {
        self.ensure_live()?;
        self.require_size("draw")?;

        let Self {
            ctx,
            layouts,
            sampler,
            quad,
            placeholder,
            passthrough,
            programs,
            textures,
            targets,
            surface,
            phase,
            ..
        } = self;
        let (Some(targets), Some(surface)) = (targets.as_mut(), surface.as_ref()) else {
            return Err(GlueError::Unsized("draw"));
        };

        let program = match program_name {
            Some(name) => programs
                .get_mut(name)
                .ok_or_else(|| GlueError::missing(ResourceKind::Program, name))?,
            None => passthrough,
        };
        let source = match input {
            PassInput::Previous => targets.read_view().unwrap_or(placeholder.view()),
            PassInput::Texture(name) => textures
                .get(name)
                .ok_or_else(|| GlueError::missing(ResourceKind::Texture, name))?
                .view(),
        };
        let write = targets.write_slot();
        let destination = if is_final_pass {
            surface.view()
        } else {
            debug_assert_ne!(targets.active(), Some(write));
            targets.view(write)
        };

        *phase = PipelinePhase::Rendering;
        trace!(
            program = program.name(),
            read = ?targets.active(),
            write = ?(!is_final_pass).then_some(write),
            is_final_pass,
            "rendering pass"
        );

        let texture_bind_group = layouts.texture_bind_group(&ctx.device, source, sampler);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glue pass encoder"),
            });
        let applied = {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("glue pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: destination,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            program.apply(&ctx.queue, &mut pass, values, &texture_bind_group, quad)
        };
        if let Err(err) = applied {
            *phase = PipelinePhase::Sized;
            return Err(err);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));

        if is_final_pass {
            *phase = PipelinePhase::Presented;
            trace!("presented");
        } else {
            targets.advance(write);
        }
        *phase = PipelinePhase::Sized;
        Ok(())
    }

    pub fn surface(&self) -> Result<&CompositeSurface, GlueError> {
        self.ensure_live()?;
        self.surface.as_ref().ok_or(GlueError::Unsized("surface"))
    }

    /// Reads the composite surface back, top row first.
    pub fn read_pixels(&self) -> Result<RgbaImage, GlueError> {
        self.ensure_live()?;
        let surface = self.surface.as_ref().ok_or(GlueError::Unsized("read_pixels"))?;
        let (width, height) = surface.size();
        let unpadded_bytes_per_row = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let device = &self.ctx.device;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glue readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("glue readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: surface.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| readback_error(err.to_string()))?;
        rx.recv()
            .map_err(|err| readback_error(err.to_string()))?
            .map_err(|err| readback_error(err.to_string()))?;

        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped
                .chunks(padded_bytes_per_row as usize)
                .take(height as usize)
            {
                pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
            }
        }
        buffer.unmap();

        let mut image = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| readback_error("pixel buffer size mismatch".to_string()))?;
        // Row 0 in GPU memory is the bottom of the GL canvas.
        flip_vertical_in_place(&mut image);
        Ok(image)
    }

    /// Releases every resource the context owns. Later calls fail with
    /// `Disposed`.
    pub fn dispose(&mut self) -> Result<(), GlueError> {
        self.ensure_live()?;
        for (name, mut program) in self.programs.drain() {
            if !program.is_disposed() {
                if let Err(err) = program.dispose() {
                    warn!(program = %name, error = %err, "failed to dispose program");
                }
            }
        }
        for (_, texture) in self.textures.drain() {
            texture.destroy();
        }
        if let Some(targets) = self.targets.take() {
            targets.destroy();
        }
        if let Some(surface) = self.surface.take() {
            surface.target.destroy();
        }
        self.passthrough.dispose()?;
        self.placeholder.destroy();
        self.size = None;
        self.phase = PipelinePhase::Idle;
        self.disposed = true;
        debug!("glue context disposed");
        Ok(())
    }
}

fn readback_error(message: String) -> GlueError {
    GlueError::ResourceCreation {
        what: "readback buffer".to_string(),
        message,
    }
}
