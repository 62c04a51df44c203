//! # Penumbra
//!
//! **A deferred rendering pipeline manager.**
//!
//! Penumbra owns the *shape* of a deferred renderer and leaves drawing to a host
//! engine: a G-buffer pass, a light-accumulation pass driven by light-volume
//! proxies, a reduced-size forward pass for transparent geometry, and an
//! ordered, hot-reloadable chain of full-screen filter stages that ends on
//! screen.
//!
//! ## Quick Start
//!
//! ```no_run
//! use penumbra::*;
//!
//! fn main() -> Result<()> {
//!     let host = HeadlessHost::new(UVec2::new(1280, 720));
//!     let config = RendererConfig::new("assets");
//!     let mut renderer = DeferredRenderer::new(host, config, &Preset::Medium.filter_stages())?;
//!
//!     renderer.add_directional_light(
//!         "sun",
//!         DirectionalLight { color: Vec3::ONE, direction: Vec3::NEG_Z, shadow_size: 1024 },
//!     )?;
//!     let lamp = renderer.add_point_light(SphereLightDesc::new(Vec3::ONE, Vec3::ZERO, 10.0))?;
//!
//!     renderer.set_input("bloom_blur", "blur", 6.0)?;
//!     renderer.resize(UVec2::new(1920, 1080))?;
//!     renderer.check_hot_reload();
//!
//!     lamp.remove(renderer.host_mut());
//!     Ok(())
//! }
//! ```
//!
//! ## Pieces
//!
//! - [`RenderHost`] is the boundary to the engine. [`HeadlessHost`] keeps
//!   everything in memory; [`WgpuHost`] backs targets and programs with wgpu.
//! - [`ShaderLibrary`] loads templated GLSL pairs, injects `#define`s and
//!   caches compiled programs.
//! - [`FilterGraph`] validates and builds the filter chain and applies
//!   incremental edits (inputs, defines, reloads) in place.
//! - [`GeometryStage`], [`ForwardStage`] and the light types set up the fixed
//!   passes; [`DeferredRenderer`] ties them together.
//! - [`GraphicsConfig`] and [`Preset`] persist and name quality settings.

mod config;
mod error;
mod filter_graph;
mod forward_stage;
mod geometry_stage;
mod gpu;
mod headless;
mod host;
mod lights;
mod presets;
mod renderer;
mod resize;
mod shader_library;
mod texture_policy;
mod value;

#[cfg(test)]
mod test_support;

pub use config::{DEFAULT_SHADOW_SIZE, GraphicsConfig};
pub use error::{ConfigError, HostError, PipelineError, Result, ShaderError};
pub use filter_graph::{
    FILTER_TARGET_SORT, FINAL_LIGHT_STAGE, FilterGraph, FilterStage, StageDescriptor,
    StageSources,
};
pub use forward_stage::{FORWARD_TEXTURE_INPUT, ForwardStage};
pub use geometry_stage::{
    GBuffer, GeometryStage, LIGHT_BUFFER_SORT, MODEL_BUFFER_SORT, RootShaders, WINDOW_SORT,
};
pub use gpu::{GpuContext, GpuProgram, GpuTexture, WgpuHost};
pub use headless::{
    CameraState, HeadlessHost, ProjectorState, SceneNode, TargetState, TextureState,
};
pub use host::{
    Bitplane, CameraDesc, CameraMask, Lens, NodeId, ProgramSource, ProjectorKind, ProjectorLens,
    RenderAttribs, RenderHost, ShaderId, TargetId, TargetSize, TargetSpec, TextureFormat,
    TextureId, Transform,
};
pub use lights::{
    ConeLight, ConeLightDesc, DirectionalLight, LightVolumes, MAX_CONE_FOV, SceneLight,
    ShadowBias, SphereLight, SphereLightDesc,
};
pub use presets::Preset;
pub use renderer::{DeferredRenderer, RendererConfig};
pub use resize::{WindowResizeResponder, proportional_size, scaled_size};
pub use shader_library::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_FRAGMENT_TEMPLATE, DEFAULT_VERSION_LINE,
    DEFAULT_VERTEX_TEMPLATE, ProgramKey, ShaderLibrary, inject_defines,
};
pub use texture_policy::{Filter, TexturePolicy, Wrap};
pub use value::{DefineValue, Defines, Inputs, ShaderValue};

// Re-export glam math types for convenience
pub use glam::{UVec2, Vec2, Vec3, Vec4};
