use image::imageops::flip_vertical_in_place;
use image::RgbaImage;
use tracing::debug;
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::error::GlueError;
use crate::types::TARGET_FORMAT;

use super::context::GpuContext;

/// A GPU texture plus its default view.
pub(crate) struct GlueTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl GlueTexture {
    /// Uploads a decoded bitmap. Rows are flipped so row 0 of the image ends
    /// up at the bottom, where GLSL texture coordinates start.
    pub(crate) fn from_image(
        ctx: &GpuContext,
        label: &str,
        image: &RgbaImage,
    ) -> Result<Self, GlueError> {
        let (width, height) = image.dimensions();
        check_dimensions(ctx, width, height)?;

        let mut flipped = image.clone();
        flip_vertical_in_place(&mut flipped);

        let texture = ctx
            .with_validation_scope(|device| {
                device.create_texture_with_data(
                    &ctx.queue,
                    &descriptor(
                        label,
                        width,
                        height,
                        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    ),
                    TextureDataOrder::LayerMajor,
                    flipped.as_raw(),
                )
            })
            .map_err(|message| GlueError::ResourceCreation {
                what: format!("texture '{label}'"),
                message,
            })?;
        debug!(texture = label, width, height, "uploaded texture");
        Ok(Self::wrap(texture, width, height))
    }

    /// Empty texture that can be drawn into and sampled from.
    pub(crate) fn render_target(
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, GlueError> {
        check_dimensions(ctx, width, height)?;
        let texture = ctx
            .with_validation_scope(|device| {
                device.create_texture(&descriptor(
                    label,
                    width,
                    height,
                    wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                ))
            })
            .map_err(|message| GlueError::ResourceCreation {
                what: format!("render target '{label}'"),
                message,
            })?;
        Ok(Self::wrap(texture, width, height))
    }

    /// 1x1 transparent texture sampled when a pass has no input yet.
    pub(crate) fn placeholder(ctx: &GpuContext) -> Result<Self, GlueError> {
        let image = RgbaImage::new(1, 1);
        Self::from_image(ctx, "placeholder", &image)
    }

    fn wrap(texture: wgpu::Texture, width: u32, height: u32) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }

    pub(crate) fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub(crate) fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub(crate) fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Releases GPU storage now rather than when the last handle drops.
    pub(crate) fn destroy(&self) {
        self.texture.destroy();
    }
}

/// Clamp-to-edge, linear, no mipmaps: shared by every pass.
pub(crate) fn create_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("glue sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn descriptor(
    label: &str,
    width: u32,
    height: u32,
    usage: wgpu::TextureUsages,
) -> wgpu::TextureDescriptor<'_> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage,
        view_formats: &[],
    }
}

pub(crate) fn check_dimensions(ctx: &GpuContext, width: u32, height: u32) -> Result<(), GlueError> {
    let max = ctx.max_texture_dimension();
    if width == 0 || height == 0 || width > max || height > max {
        return Err(GlueError::InvalidSize { width, height });
    }
    Ok(())
}
