//! Device acquisition for [`WgpuHost`](super::WgpuHost).
//!
//! A [`GpuContext`] is created either from a winit window, in which case it
//! also owns a configured presentation surface, or without one for off-screen
//! use. Both paths request the same device; only the adapter selection differs.

use std::sync::Arc;

use glam::UVec2;
use winit::window::Window;

use crate::error::HostError;

/// The wgpu device, queue and (optionally) the window surface.
pub struct GpuContext {
    /// Presentation surface; `None` for off-screen contexts.
    pub surface: Option<wgpu::Surface<'static>>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Current surface configuration. Off-screen contexts keep one too so
    /// window-sized targets have a size and colour format to follow.
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Creates a context that presents to `window`.
    ///
    /// Picks an sRGB surface format when one is offered and uses Fifo presentation.
    pub fn new(window: Arc<Window>) -> Result<Self, HostError> {
        let size = window.inner_size();
        let instance = instance();

        let surface = instance
            .create_surface(window)
            .map_err(|err| HostError::Device(err.to_string()))?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|err| HostError::Device(err.to_string()))?;
        let (device, queue) = request_device(&adapter)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let Some(&first_format) = surface_caps.formats.first() else {
            return Err(HostError::Device(
                "surface reports no supported formats".to_string(),
            ));
        };
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(first_format);
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!(
            "GPU context ready: {} ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            surface_format,
            config.width,
            config.height
        );

        Ok(Self {
            surface: Some(surface),
            device,
            queue,
            config,
        })
    }

    /// Creates a context without a window, sized as if it had one of `size`.
    pub fn headless(size: UVec2) -> Result<Self, HostError> {
        let instance = instance();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| HostError::Device(err.to_string()))?;
        let (device, queue) = request_device(&adapter)?;
        log::info!(
            "Off-screen GPU context ready: {} ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self {
            surface: None,
            device,
            queue,
            config: wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                width: size.x.max(1),
                height: size.y.max(1),
                present_mode: wgpu::PresentMode::Fifo,
                alpha_mode: wgpu::CompositeAlphaMode::Auto,
                view_formats: vec![],
                desired_maximum_frame_latency: 2,
            },
        })
    }

    /// Resizes the surface. Zero sizes (a minimized window) are ignored.
    pub fn resize(&mut self, size: UVec2) {
        if size.x == 0 || size.y == 0 {
            return;
        }
        self.config.width = size.x;
        self.config.height = size.y;
        if let Some(surface) = &self.surface {
            surface.configure(&self.device, &self.config);
        }
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.config.width, self.config.height)
    }
}

fn instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    })
}

fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), HostError> {
    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("Penumbra Device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        memory_hints: Default::default(),
        trace: Default::default(),
        experimental_features: Default::default(),
    }))
    .map_err(|err| HostError::Device(err.to_string()))
}
