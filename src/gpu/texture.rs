use std::path::Path;

use glam::UVec2;
use wgpu::util::DeviceExt;

use crate::error::HostError;
use crate::host::TextureFormat;
use crate::texture_policy::{Filter, TexturePolicy, Wrap};

use super::GpuContext;

/// A device texture with its default view and sampler.
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub format: TextureFormat,
    pub size: UVec2,
}

impl GpuTexture {
    /// Allocates a texture that can be rendered to and sampled from.
    pub fn render_target(gpu: &GpuContext, label: &str, format: TextureFormat, size: UVec2) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: render_format(format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = create_sampler(gpu, label, TexturePolicy::default());
        Self {
            texture,
            view,
            sampler,
            format,
            size,
        }
    }

    /// Reallocates at `size`, keeping label and format. Contents are lost.
    pub fn resized(&self, gpu: &GpuContext, label: &str, size: UVec2) -> Self {
        Self::render_target(gpu, label, self.format, size)
    }

    /// Decodes an image file and uploads it with the policy's format and sampler.
    pub fn load(gpu: &GpuContext, path: &Path, policy: TexturePolicy) -> Result<Self, HostError> {
        let label = path.display().to_string();
        let img = image::open(path).map_err(|err| HostError::TextureLoad {
            path: label.clone(),
            reason: err.to_string(),
        })?;
        let size = UVec2::new(img.width(), img.height());

        // 16-bit sources keep their precision as f32 lanes.
        let (format, data) = match policy.format {
            TextureFormat::Rgb16 => (
                wgpu::TextureFormat::Rgba32Float,
                bytemuck::cast_slice(img.to_rgba32f().as_raw()).to_vec(),
            ),
            TextureFormat::Rgba8Srgb => (wgpu::TextureFormat::Rgba8UnormSrgb, img.to_rgba8().into_raw()),
            _ => (wgpu::TextureFormat::Rgba8Unorm, img.to_rgba8().into_raw()),
        };

        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(&label),
                size: extent(size),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &data,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = create_sampler(gpu, &label, policy);
        Ok(Self {
            texture,
            view,
            sampler,
            format: policy.format,
            size,
        })
    }
}

fn extent(size: UVec2) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.x.max(1),
        height: size.y.max(1),
        depth_or_array_layers: 1,
    }
}

pub(crate) fn render_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba16Float | TextureFormat::Rgb16 => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

pub(crate) fn sampler_descriptor(label: &str, policy: TexturePolicy) -> wgpu::SamplerDescriptor<'_> {
    let address_mode = match policy.wrap {
        Wrap::Repeat => wgpu::AddressMode::Repeat,
        Wrap::Clamp => wgpu::AddressMode::ClampToEdge,
    };
    let filter = match policy.filter {
        Filter::Linear => wgpu::FilterMode::Linear,
        Filter::Nearest => wgpu::FilterMode::Nearest,
    };
    wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    }
}

fn create_sampler(gpu: &GpuContext, label: &str, policy: TexturePolicy) -> wgpu::Sampler {
    let label = format!("{label} Sampler");
    gpu.device.create_sampler(&sampler_descriptor(&label, policy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_maps_to_sampler_state() {
        let policy = TexturePolicy::from_path("tex/lut_nearest_clamp.png");
        let desc = sampler_descriptor("lut", policy);
        assert_eq!(desc.mag_filter, wgpu::FilterMode::Nearest);
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::ClampToEdge);

        let desc = sampler_descriptor("noise", TexturePolicy::default());
        assert_eq!(desc.min_filter, wgpu::FilterMode::Linear);
        assert_eq!(desc.address_mode_v, wgpu::AddressMode::Repeat);
    }

    #[test]
    fn formats_map_to_device_formats() {
        assert_eq!(render_format(TextureFormat::Depth32Float), wgpu::TextureFormat::Depth32Float);
        assert_eq!(render_format(TextureFormat::Rgb16), wgpu::TextureFormat::Rgba16Float);
        assert!(render_format(TextureFormat::Rgba8Srgb).is_srgb());
    }
}
