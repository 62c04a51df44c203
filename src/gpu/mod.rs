//! The wgpu-backed host.
//!
//! [`WgpuHost`] implements [`RenderHost`](crate::RenderHost) on a real device:
//! render targets become device textures that are reallocated on resize,
//! programs are compiled from GLSL through wgpu's GLSL frontend, loaded
//! textures are decoded with `image`, and numeric shader inputs are mirrored
//! into uniform buffers.

mod context;
mod host;
mod texture;

pub use context::GpuContext;
pub use host::{GpuProgram, WgpuHost};
pub use texture::GpuTexture;
