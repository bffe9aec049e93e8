use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, trace};

use crate::compile::{check_program, CheckedProgram, ProgramDescriptor};
use crate::error::{CompileError, GlueError, ResourceKind, StageDiagnostics};
use crate::types::{Stage, UniformValue, UniformValues, TARGET_FORMAT};
use crate::uniforms::{UniformBinder, UniformLayout};

use super::context::GpuContext;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct QuadVertex {
    position: [f32; 3],
}

/// Two triangles covering clip space.
pub(crate) const QUAD: [QuadVertex; 6] = [
    QuadVertex { position: [-1.0, -1.0, 0.0] },
    QuadVertex { position: [1.0, -1.0, 0.0] },
    QuadVertex { position: [-1.0, 1.0, 0.0] },
    QuadVertex { position: [-1.0, 1.0, 0.0] },
    QuadVertex { position: [1.0, -1.0, 0.0] },
    QuadVertex { position: [1.0, 1.0, 0.0] },
];

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

/// Bind group layouts every program is built against: the uniform block at
/// set 0 and the input texture/sampler pair at set 1.
pub(crate) struct SharedLayouts {
    pub uniform: wgpu::BindGroupLayout,
    pub texture: wgpu::BindGroupLayout,
}

impl SharedLayouts {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let uniform = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("glue uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("glue texture layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        Self { uniform, texture }
    }

    pub(crate) fn texture_bind_group(
        &self,
        device: &wgpu::Device,
        view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("glue texture bind group"),
            layout: &self.texture,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }
}

struct ProgramResources {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
}

/// A linked vertex+fragment pair with its own uniform state.
pub struct GlueProgram {
    name: String,
    resources: Option<ProgramResources>,
    binder: UniformBinder,
    size: (u32, u32),
}

impl GlueProgram {
    pub(crate) fn compile(
        ctx: &GpuContext,
        layouts: &SharedLayouts,
        name: &str,
        descriptor: &ProgramDescriptor,
    ) -> Result<Self, GlueError> {
        let CheckedProgram {
            vertex,
            fragment,
            layout,
        } = check_program(descriptor)?;

        let vertex_module = create_module(ctx, name, Stage::Vertex, vertex)?;
        let fragment_module = create_module(ctx, name, Stage::Fragment, fragment)?;

        let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(name),
            bind_group_layouts: &[&layouts.uniform, &layouts.texture],
            push_constant_ranges: &[],
        });
        let pipeline = ctx
            .with_validation_scope(|device| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(name),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &vertex_module,
                        entry_point: Some("main"),
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &QUAD_ATTRIBUTES,
                        }],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        unclipped_depth: false,
                        conservative: false,
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment_module,
                        entry_point: Some("main"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: TARGET_FORMAT,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    multiview: None,
                    cache: None,
                })
            })
            .map_err(|message| GlueError::Link {
                name: name.to_string(),
                message,
            })?;

        let uniform_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glue uniforms"),
            size: u64::from(layout.size()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("glue uniform bind group"),
            layout: &layouts.uniform,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        debug!(program = name, uniforms = layout.len(), "linked program");
        Ok(Self {
            name: name.to_string(),
            resources: Some(ProgramResources {
                pipeline,
                uniform_buffer,
                uniform_bind_group,
            }),
            binder: UniformBinder::new(layout),
            size: (0, 0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_disposed(&self) -> bool {
        self.resources.is_none()
    }

    fn ensure_live(&self) -> Result<&ProgramResources, GlueError> {
        self.resources
            .as_ref()
            .ok_or_else(|| GlueError::disposed(ResourceKind::Program, &self.name))
    }

    /// Cached viewport size; also feeds `iResolution`.
    pub fn size(&self) -> Result<(u32, u32), GlueError> {
        self.ensure_live()?;
        Ok(self.size)
    }

    pub fn set_size(&mut self, width: u32, height: u32) -> Result<(), GlueError> {
        self.ensure_live()?;
        self.size = (width, height);
        self.binder.set_resolution(width, height);
        Ok(())
    }

    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> Result<(), GlueError> {
        self.ensure_live()?;
        self.binder.set(name, value);
        Ok(())
    }

    pub fn set_uniforms(&mut self, values: &UniformValues) -> Result<(), GlueError> {
        self.ensure_live()?;
        for (name, value) in values {
            self.binder.set(name, *value);
        }
        Ok(())
    }

    pub fn uniforms(&self) -> Result<&UniformBinder, GlueError> {
        self.ensure_live()?;
        Ok(&self.binder)
    }

    pub fn layout(&self) -> Result<&UniformLayout, GlueError> {
        self.ensure_live()?;
        Ok(self.binder.layout())
    }

    /// Releases the pipeline and its uniform buffer. A second call fails.
    pub fn dispose(&mut self) -> Result<(), GlueError> {
        let resources = self
            .resources
            .take()
            .ok_or_else(|| GlueError::disposed(ResourceKind::Program, &self.name))?;
        resources.uniform_buffer.destroy();
        debug!(program = %self.name, "disposed program");
        Ok(())
    }

    /// Uploads `values` and records one full-viewport quad into `pass`.
    pub(crate) fn apply(
        &mut self,
        queue: &wgpu::Queue,
        pass: &mut wgpu::RenderPass<'_>,
        values: &UniformValues,
        texture_bind_group: &wgpu::BindGroup,
        quad: &wgpu::Buffer,
    ) -> Result<(), GlueError> {
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| GlueError::disposed(ResourceKind::Program, &self.name))?;
        for (name, value) in values {
            self.binder.set(name, *value);
        }
        self.binder.apply(queue, &resources.uniform_buffer);
        trace!(program = %self.name, "apply");

        pass.set_pipeline(&resources.pipeline);
        pass.set_bind_group(0, &resources.uniform_bind_group, &[]);
        pass.set_bind_group(1, texture_bind_group, &[]);
        pass.set_vertex_buffer(0, quad.slice(..));
        pass.draw(0..QUAD.len() as u32, 0..1);
        Ok(())
    }
}

impl std::fmt::Debug for GlueProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlueProgram")
            .field("name", &self.name)
            .field("disposed", &self.is_disposed())
            .field("size", &self.size)
            .finish()
    }
}

fn create_module(
    ctx: &GpuContext,
    name: &str,
    stage: Stage,
    module: wgpu::naga::Module,
) -> Result<wgpu::ShaderModule, GlueError> {
    ctx.with_validation_scope(|device| {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
        })
    })
    .map_err(|message| {
        CompileError::new(vec![StageDiagnostics {
            stage,
            line: 0,
            messages: vec![message],
        }])
        .into()
    })
}
