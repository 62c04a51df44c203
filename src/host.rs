//! The host boundary: every scene-graph, window and GPU service the pipeline
//! calls into.
//!
//! The pipeline never owns a scene graph, a window or a shader compiler. It
//! drives them through [`RenderHost`], a fixed interface that a concrete engine
//! implements once. Two implementations ship with the crate:
//!
//! - [`HeadlessHost`](crate::HeadlessHost) keeps all state in memory and is
//!   used for dry runs and tests.
//! - [`WgpuHost`](crate::WgpuHost) allocates real `wgpu` textures and shader
//!   modules for every target, texture and program.
//!
//! Handles are plain copyable ids. They stay valid until the corresponding
//! `release_*`/`remove_*` call; passing a stale handle is a host error or a
//! no-op, never undefined behaviour.

use glam::{UVec2, Vec3, Vec4};

use crate::error::HostError;
use crate::texture_policy::TexturePolicy;
use crate::value::ShaderValue;

/// Type-safe handle to a scene-graph node (plain node, camera, quad, light).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Type-safe handle to an off-screen render target or the main window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Type-safe handle to a texture owned by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Type-safe handle to a compiled shader program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u64);

/// A 32-bit camera visibility mask.
///
/// A camera draws a node unless the node (or one of its ancestors) was hidden
/// from a mask that shares a bit with the camera's own mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct CameraMask(pub u32);

impl CameraMask {
    /// Every bit set; the default mask of a new camera.
    pub const ALL: CameraMask = CameraMask(u32::MAX);

    /// A mask with only bit `index` set.
    pub const fn bit(index: u32) -> Self {
        Self(1 << index)
    }

    /// Returns this mask with bit `index` set as well.
    pub const fn with_bit(self, index: u32) -> Self {
        Self(self.0 | (1 << index))
    }

    pub const fn intersects(self, other: CameraMask) -> bool {
        self.0 & other.0 != 0
    }
}

/// The bit planes a render target can render into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bitplane {
    Color,
    Depth,
    AuxRgba0,
}

/// Storage format of a render texture or a loaded texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgba8Srgb,
    Rgba16Float,
    Rgb16,
    Depth32Float,
}

/// How a render target is sized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSize {
    /// Always the size of the host window.
    TrackWindow,
    /// A fixed pixel size, changed only through `resize_target`.
    Fixed(UVec2),
}

/// Everything the host needs to allocate an off-screen render target.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetSpec {
    pub name: String,
    pub size: TargetSize,
    /// Render order; lower first, ties broken by creation order.
    pub sort: i32,
    pub rgba_bits: [u8; 4],
    pub depth_bits: u8,
    pub aux_rgba: u8,
    pub srgb: bool,
    /// Render-to-texture accumulates across cameras instead of copying per camera.
    pub cumulative: bool,
}

impl TargetSpec {
    /// The G-buffer/lit-buffer layout: 8-bit RGBA, 16-bit depth, tracks the window.
    pub fn tracking(name: &str, aux_rgba: u8) -> Self {
        Self {
            name: name.to_string(),
            size: TargetSize::TrackWindow,
            sort: -2,
            rgba_bits: [8, 8, 8, 8],
            depth_bits: 16,
            aux_rgba,
            srgb: false,
            cumulative: true,
        }
    }

    /// A colour-only, fixed-size, resizeable target.
    pub fn color_only(name: &str, size: UVec2, sort: i32) -> Self {
        Self {
            name: name.to_string(),
            size: TargetSize::Fixed(size),
            sort,
            rgba_bits: [8, 8, 8, 8],
            depth_bits: 0,
            aux_rgba: 0,
            srgb: false,
            cumulative: false,
        }
    }
}

/// Position, heading-pitch-roll (degrees) and scale of a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub pos: Vec3,
    pub hpr: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            hpr: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

/// Fixed-function state for a node and its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderAttribs {
    pub depth_test_less: bool,
    pub depth_write: bool,
    pub cull_counter_clockwise: bool,
    pub additive_blend: bool,
}

impl RenderAttribs {
    /// State for light-volume proxies: additive, depth-tested, never written to depth.
    pub const LIGHT_VOLUME: RenderAttribs = RenderAttribs {
        depth_test_less: true,
        depth_write: false,
        cull_counter_clockwise: true,
        additive_blend: true,
    };
}

/// The lens a new camera looks through.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Lens {
    /// Share the main camera's perspective lens.
    Main,
    /// An orthographic lens with the given film size in pixels.
    Orthographic { film: UVec2 },
}

/// Everything the host needs to create a camera bound to a render target.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraDesc {
    pub name: String,
    pub target: TargetId,
    pub lens: Lens,
    /// Scene root this camera renders; `None` renders its own parent's subtree.
    pub scene: Option<NodeId>,
    pub parent: Option<NodeId>,
    pub mask: CameraMask,
    /// Sort of this camera's display region within its target.
    pub display_sort: i32,
}

/// A shadow-capable light that projects from a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProjectorKind {
    /// Six-face omnidirectional projector.
    Point,
    /// Single-frustum projector with a spot exponent.
    Spot { exponent: f32 },
}

/// Near/far planes and optional field of view (degrees) of a projector lens.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectorLens {
    pub near: f32,
    pub far: f32,
    pub fov: Option<f32>,
}

/// A vertex/fragment program ready for the host compiler.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgramSource {
    /// Human readable label, `vertex|fragment` paths.
    pub label: String,
    pub vertex: String,
    pub fragment: String,
}

/// The services the pipeline consumes from its host engine.
///
/// All calls happen on the render/update thread between frames; a host is
/// never used from more than one thread at a time.
pub trait RenderHost {
    // ------------------------------------------------------------------
    // Window and well-known nodes
    // ------------------------------------------------------------------

    /// Current size of the main window in pixels.
    fn window_size(&self) -> UVec2;

    /// The main window as a render target (for sort and clear control).
    fn window_target(&self) -> TargetId;

    /// The 3D scene root every camera renders.
    fn render_root(&self) -> NodeId;

    /// The screen-space root the final image is composited on.
    fn overlay_root(&self) -> NodeId;

    /// The application's main 3D camera.
    fn main_camera(&self) -> NodeId;

    /// The camera that renders [`overlay_root`](Self::overlay_root).
    fn overlay_camera(&self) -> NodeId;

    // ------------------------------------------------------------------
    // Off-screen targets
    // ------------------------------------------------------------------

    fn create_target(&mut self, spec: &TargetSpec) -> Result<TargetId, HostError>;

    /// Attaches a new texture to one bit plane of a target.
    fn add_render_texture(
        &mut self,
        target: TargetId,
        plane: Bitplane,
        format: TextureFormat,
    ) -> Result<TextureId, HostError>;

    /// Sets (or with `None`, disables) clearing of one bit plane. Depth uses `x`.
    fn set_clear(&mut self, target: TargetId, plane: Bitplane, value: Option<Vec4>);

    /// Disables every implicit clear of a target.
    fn disable_clears(&mut self, target: TargetId);

    fn set_sort(&mut self, target: TargetId, sort: i32);

    fn target_size(&self, target: TargetId) -> Option<UVec2>;

    fn resize_target(&mut self, target: TargetId, size: UVec2) -> Result<(), HostError>;

    /// Clears the target's render textures and frees its frame buffer.
    fn release_target(&mut self, target: TargetId);

    /// A full-screen card textured with the target's colour output.
    ///
    /// Repeated calls return the same node.
    fn texture_card(&mut self, target: TargetId) -> Result<NodeId, HostError>;

    // ------------------------------------------------------------------
    // Scene graph
    // ------------------------------------------------------------------

    fn create_node(&mut self, name: &str, parent: Option<NodeId>) -> NodeId;

    /// A quad spanning `(0, 0)..frame` facing an orthographic camera.
    fn create_quad(&mut self, name: &str, parent: NodeId, frame: UVec2) -> NodeId;

    fn reparent(&mut self, node: NodeId, parent: NodeId);

    /// Unlinks a node from its parent; the node stays alive.
    fn detach(&mut self, node: NodeId);

    /// Destroys a node and its whole subtree.
    fn remove_node(&mut self, node: NodeId);

    fn hide(&mut self, node: NodeId, mask: CameraMask);

    fn set_transform(&mut self, node: NodeId, transform: Transform);

    fn transform(&self, node: NodeId) -> Option<Transform>;

    /// Orients the node so its forward axis points at `target` (scene space).
    fn look_at(&mut self, node: NodeId, target: Vec3);

    fn set_render_attribs(&mut self, node: NodeId, attribs: RenderAttribs);

    // ------------------------------------------------------------------
    // Cameras
    // ------------------------------------------------------------------

    fn create_camera(&mut self, desc: &CameraDesc) -> Result<NodeId, HostError>;

    fn set_camera_active(&mut self, camera: NodeId, active: bool);

    fn disable_camera_clears(&mut self, camera: NodeId);

    fn set_near_far(&mut self, camera: NodeId, near: f32, far: f32);

    // ------------------------------------------------------------------
    // Shaders
    // ------------------------------------------------------------------

    fn compile_shader(&mut self, program: &ProgramSource) -> Result<ShaderId, HostError>;

    fn set_shader(&mut self, node: NodeId, shader: ShaderId);

    /// Binds a resolved input. Texture paths never reach the host.
    fn set_shader_input(&mut self, node: NodeId, name: &str, value: ShaderValue);

    fn shader_input(&self, node: NodeId, name: &str) -> Option<ShaderValue>;

    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    fn load_texture(&mut self, path: &str, policy: TexturePolicy) -> Result<TextureId, HostError>;

    fn load_model(&mut self, path: &str) -> Result<NodeId, HostError>;

    // ------------------------------------------------------------------
    // Shadow projectors
    // ------------------------------------------------------------------

    fn create_projector(&mut self, kind: ProjectorKind, parent: NodeId) -> NodeId;

    /// Enables shadow casting with a square buffer, or with `None` disables it
    /// and releases the shadow buffer.
    fn set_shadow_caster(&mut self, light: NodeId, size: Option<u32>);

    fn set_projector_lens(&mut self, light: NodeId, lens: ProjectorLens);

    fn set_projector_mask(&mut self, light: NodeId, mask: CameraMask);

    fn set_light_color(&mut self, light: NodeId, color: Vec4);
}
