//! The G-buffer and lit buffer.
//!
//! Two window-sized targets are rendered before anything else:
//!
//! - the **model buffer**: depth, albedo (colour) and normals (aux 0), drawn
//!   by a camera that only sees the scene bit
//! - the **light buffer**: additive light-volume passes reading the model
//!   buffer's textures, drawn by a camera that only sees the light bit
//!
//! Each buffer clears exactly the planes it owns. All other implicit clears
//! (cameras, window) are disabled so the filter chain composes on top.

use std::path::PathBuf;

use glam::{UVec2, Vec2, Vec4};

use crate::error::Result;
use crate::host::{
    Bitplane, CameraDesc, CameraMask, Lens, NodeId, RenderHost, ShaderId, TargetId, TargetSpec,
    TextureFormat, TextureId,
};
use crate::renderer::RendererConfig;
use crate::shader_library::ShaderLibrary;
use crate::value::{Defines, Inputs, ShaderValue};

/// Target sort of the model buffer.
pub const MODEL_BUFFER_SORT: i32 = 1;
/// Target sort of the light buffer.
pub const LIGHT_BUFFER_SORT: i32 = 2;
/// Target sort of the main window.
pub const WINDOW_SORT: i32 = 3;

/// The textures the G-buffer pass produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GBuffer {
    pub depth: TextureId,
    pub albedo: TextureId,
    pub normal: TextureId,
    /// Accumulated light, the light buffer's colour plane.
    pub lit: TextureId,
}

/// Compiled programs for the light and geometry roots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootShaders {
    pub light: ShaderId,
    pub geometry: ShaderId,
}

/// The model and light buffers with their cameras and scene roots.
#[derive(Debug)]
pub struct GeometryStage {
    model_buffer: TargetId,
    light_buffer: TargetId,
    textures: GBuffer,
    model_camera: NodeId,
    light_camera: NodeId,
    light_root: NodeId,
    geometry_root: NodeId,
    light_shader: ShaderId,
    geometry_shader: ShaderId,
}

/// Handles created so far, released if setup fails part way.
#[derive(Default)]
struct Partial {
    targets: Vec<TargetId>,
    nodes: Vec<NodeId>,
}

impl Partial {
    fn release<H: RenderHost + ?Sized>(self, host: &mut H) {
        for node in self.nodes {
            host.remove_node(node);
        }
        for target in self.targets {
            host.release_target(target);
        }
    }
}

impl GeometryStage {
    /// Creates both buffers, their cameras, and the light and geometry roots.
    ///
    /// The host's main camera is deactivated; the model and light cameras are
    /// parented to it and follow its pose. `window` is the size the light
    /// volumes are told to cover.
    pub fn new<H: RenderHost + ?Sized>(
        host: &mut H,
        shaders: &mut ShaderLibrary,
        config: &RendererConfig,
        window: UVec2,
    ) -> Result<Self> {
        let mut partial = Partial::default();
        match Self::setup(host, shaders, config, window, &mut partial) {
            Ok(stage) => Ok(stage),
            Err(err) => {
                log::debug!("G-buffer setup failed, releasing partial state: {err}");
                partial.release(host);
                Err(err)
            }
        }
    }

    fn setup<H: RenderHost + ?Sized>(
        host: &mut H,
        shaders: &mut ShaderLibrary,
        config: &RendererConfig,
        window: UVec2,
        partial: &mut Partial,
    ) -> Result<Self> {
        // both programs first, so a bad shader allocates nothing
        let RootShaders {
            light: light_shader,
            geometry: geometry_shader,
        } = Self::compile_shading(host, shaders, &config.shading)?;

        let model_buffer = host.create_target(&TargetSpec::tracking("model buffer", 1))?;
        partial.targets.push(model_buffer);
        let light_buffer = host.create_target(&TargetSpec::tracking("light buffer", 0))?;
        partial.targets.push(light_buffer);

        let textures = GBuffer {
            depth: host.add_render_texture(model_buffer, Bitplane::Depth, TextureFormat::Depth32Float)?,
            albedo: host.add_render_texture(model_buffer, Bitplane::Color, TextureFormat::Rgba8)?,
            normal: host.add_render_texture(model_buffer, Bitplane::AuxRgba0, TextureFormat::Rgba16Float)?,
            lit: host.add_render_texture(light_buffer, Bitplane::Color, TextureFormat::Rgba8)?,
        };

        let main_camera = host.main_camera();
        let render = host.render_root();
        let (near, far) = config.near_far;
        host.set_near_far(main_camera, near, far);

        let model_camera = host.create_camera(&CameraDesc {
            name: "model camera".to_string(),
            target: model_buffer,
            lens: Lens::Main,
            scene: Some(render),
            parent: Some(main_camera),
            mask: CameraMask::bit(config.scene_mask_bit),
            display_sort: 0,
        })?;
        partial.nodes.push(model_camera);
        let light_camera = host.create_camera(&CameraDesc {
            name: "light camera".to_string(),
            target: light_buffer,
            lens: Lens::Main,
            scene: Some(render),
            parent: Some(main_camera),
            mask: CameraMask::bit(config.light_mask_bit),
            display_sort: 1,
        })?;
        partial.nodes.push(light_camera);
        host.set_camera_active(main_camera, false);

        let window_target = host.window_target();
        host.set_sort(model_buffer, MODEL_BUFFER_SORT);
        host.set_sort(light_buffer, LIGHT_BUFFER_SORT);
        host.set_sort(window_target, WINDOW_SORT);

        for camera in [model_camera, light_camera, main_camera, host.overlay_camera()] {
            host.disable_camera_clears(camera);
        }
        host.disable_clears(window_target);
        host.disable_clears(model_buffer);
        host.set_clear(model_buffer, Bitplane::Color, Some(Vec4::ZERO));
        host.set_clear(model_buffer, Bitplane::Depth, Some(Vec4::ONE));
        host.set_clear(model_buffer, Bitplane::AuxRgba0, Some(Vec4::ZERO));
        host.set_clear(light_buffer, Bitplane::Color, Some(Vec4::ZERO));

        let light_root = host.create_node("light_root", Some(render));
        partial.nodes.push(light_root);
        host.set_shader(light_root, light_shader);
        host.hide(light_root, CameraMask::bit(config.scene_mask_bit));

        let geometry_root = host.create_node("geometry_root", Some(render));
        partial.nodes.push(geometry_root);
        host.set_shader(geometry_root, geometry_shader);
        host.hide(geometry_root, CameraMask::bit(config.light_mask_bit));

        let stage = Self {
            model_buffer,
            light_buffer,
            textures,
            model_camera,
            light_camera,
            light_root,
            geometry_root,
            light_shader,
            geometry_shader,
        };
        for (name, value) in stage.light_root_inputs(host, window) {
            host.set_shader_input(light_root, &name, value);
        }
        log::debug!(
            "G-buffer ready: model buffer {:?}, light buffer {:?}",
            model_buffer,
            light_buffer
        );
        Ok(stage)
    }

    fn light_root_inputs<H: RenderHost + ?Sized>(&self, host: &H, window: UVec2) -> Inputs {
        let mut inputs = Inputs::new();
        inputs.insert("albedo_tex".into(), ShaderValue::Texture(self.textures.albedo));
        inputs.insert("depth_tex".into(), ShaderValue::Texture(self.textures.depth));
        inputs.insert("normal_tex".into(), ShaderValue::Texture(self.textures.normal));
        inputs.insert("win_size".into(), win_size(window));
        inputs.insert("camera".into(), ShaderValue::Node(host.main_camera()));
        inputs.insert("render".into(), ShaderValue::Node(host.render_root()));
        inputs
    }

    /// The inputs every filter stage receives from the G-buffer.
    pub fn common_inputs<H: RenderHost + ?Sized>(&self, host: &H) -> Inputs {
        let mut inputs = Inputs::new();
        inputs.insert("render".into(), ShaderValue::Node(host.render_root()));
        inputs.insert("camera".into(), ShaderValue::Node(host.main_camera()));
        inputs.insert("depth_tex".into(), ShaderValue::Texture(self.textures.depth));
        inputs.insert("normal_tex".into(), ShaderValue::Texture(self.textures.normal));
        inputs.insert("albedo_tex".into(), ShaderValue::Texture(self.textures.albedo));
        inputs.insert("lit_tex".into(), ShaderValue::Texture(self.textures.lit));
        inputs
    }

    pub fn textures(&self) -> GBuffer {
        self.textures
    }

    pub fn model_buffer(&self) -> TargetId {
        self.model_buffer
    }

    pub fn light_buffer(&self) -> TargetId {
        self.light_buffer
    }

    pub fn model_camera(&self) -> NodeId {
        self.model_camera
    }

    pub fn light_camera(&self) -> NodeId {
        self.light_camera
    }

    /// Parent of every light volume.
    pub fn light_root(&self) -> NodeId {
        self.light_root
    }

    /// Parent of every deferred-shaded model.
    pub fn geometry_root(&self) -> NodeId {
        self.geometry_root
    }

    pub fn light_shader(&self) -> ShaderId {
        self.light_shader
    }

    pub fn geometry_shader(&self) -> ShaderId {
        self.geometry_shader
    }

    /// Recompiles the root programs with new shading defines.
    ///
    /// Both programs compile before either is bound.
    pub fn set_shading<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        shading: &Defines,
    ) -> Result<()> {
        let programs = Self::compile_shading(host, shaders, shading)?;
        self.bind_shading(host, programs);
        Ok(())
    }

    /// Compiles the light and geometry root programs without binding them.
    pub fn compile_shading<H: RenderHost + ?Sized>(
        host: &mut H,
        shaders: &mut ShaderLibrary,
        shading: &Defines,
    ) -> Result<RootShaders> {
        Ok(RootShaders {
            light: shaders.load(host, "light", shading)?,
            geometry: shaders.load(host, "geometry", shading)?,
        })
    }

    pub fn bind_shading<H: RenderHost + ?Sized>(&mut self, host: &mut H, programs: RootShaders) {
        host.set_shader(self.light_root, programs.light);
        host.set_shader(self.geometry_root, programs.geometry);
        self.light_shader = programs.light;
        self.geometry_shader = programs.geometry;
    }

    /// Reloads the root programs if one of their sources changed.
    ///
    /// A program that fails to compile keeps the previous one.
    pub fn reload_sources<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        changed: &[PathBuf],
        shading: &Defines,
    ) {
        for (name, root) in [("light", self.light_root), ("geometry", self.geometry_root)] {
            if !shaders.uses_any(name, changed) {
                continue;
            }
            match shaders.load(host, name, shading) {
                Ok(shader) => {
                    host.set_shader(root, shader);
                    if name == "light" {
                        self.light_shader = shader;
                    } else {
                        self.geometry_shader = shader;
                    }
                    log::info!("Reloaded {name} root program");
                }
                Err(err) => log::warn!("Keeping previous {name} root program: {err}"),
            }
        }
    }

    /// Resizes both buffers to the window and refreshes `win_size`.
    pub fn resize<H: RenderHost + ?Sized>(&self, host: &mut H, window: UVec2) -> Result<()> {
        host.resize_target(self.model_buffer, window)?;
        host.resize_target(self.light_buffer, window)?;
        host.set_shader_input(self.light_root, "win_size", win_size(window));
        Ok(())
    }
}

pub(crate) fn win_size(window: UVec2) -> ShaderValue {
    ShaderValue::Vec2(Vec2::new(window.x as f32, window.y as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ShaderDir, host};

    fn stage() -> (ShaderDir, crate::HeadlessHost, ShaderLibrary, GeometryStage) {
        let dir = ShaderDir::with_pipeline(&[]);
        let mut host = host();
        let mut shaders = dir.library();
        let config = RendererConfig::new(dir.root());
        let window = host.window_size();
        let stage = GeometryStage::new(&mut host, &mut shaders, &config, window).unwrap();
        (dir, host, shaders, stage)
    }

    #[test]
    fn buffers_are_sorted_before_the_window() {
        let (_dir, host, _shaders, stage) = stage();
        assert_eq!(host.target(stage.model_buffer()).unwrap().sort, 1);
        assert_eq!(host.target(stage.light_buffer()).unwrap().sort, 2);
        assert_eq!(host.target(host.window_target()).unwrap().sort, 3);
        assert_eq!(host.target_size(stage.model_buffer()), Some(UVec2::new(800, 600)));
    }

    #[test]
    fn cameras_are_partitioned_by_mask() {
        let (_dir, host, _shaders, stage) = stage();
        let model = host.camera(stage.model_camera()).unwrap();
        let light = host.camera(stage.light_camera()).unwrap();
        assert_eq!(model.mask, CameraMask::bit(1));
        assert_eq!(light.mask, CameraMask::bit(2));
        assert_eq!(light.display_sort, 1);
        assert!(!host.camera(host.main_camera()).unwrap().active);
        assert_eq!(host.camera(host.main_camera()).unwrap().near_far, Some((3.0, 70.0)));

        let light_root = host.scene_node(stage.light_root()).unwrap();
        let geometry_root = host.scene_node(stage.geometry_root()).unwrap();
        assert!(light_root.hidden.intersects(model.mask));
        assert!(!light_root.hidden.intersects(light.mask));
        assert!(geometry_root.hidden.intersects(light.mask));
    }

    #[test]
    fn only_owned_planes_are_cleared() {
        let (_dir, host, _shaders, stage) = stage();
        let model = host.target(stage.model_buffer()).unwrap();
        assert_eq!(model.clears.get(&Bitplane::Color), Some(&Vec4::ZERO));
        assert_eq!(model.clears.get(&Bitplane::Depth), Some(&Vec4::ONE));
        assert_eq!(model.clears.get(&Bitplane::AuxRgba0), Some(&Vec4::ZERO));
        let light = host.target(stage.light_buffer()).unwrap();
        assert_eq!(light.clears.len(), 1);
        assert!(host.target(host.window_target()).unwrap().clears.is_empty());
        assert!(host.camera(stage.model_camera()).unwrap().clears_disabled);
    }

    #[test]
    fn light_root_samples_the_g_buffer() {
        let (_dir, mut host, _shaders, stage) = stage();
        let textures = stage.textures();
        let root = stage.light_root();
        assert_eq!(host.shader_input(root, "albedo_tex"), Some(ShaderValue::Texture(textures.albedo)));
        assert_eq!(host.shader_input(root, "normal_tex"), Some(ShaderValue::Texture(textures.normal)));
        assert_eq!(host.shader_input(root, "win_size"), Some(ShaderValue::Vec2(Vec2::new(800.0, 600.0))));

        host.set_window_size(UVec2::new(1024, 768));
        stage.resize(&mut host, UVec2::new(1024, 768)).unwrap();
        assert_eq!(host.shader_input(root, "win_size"), Some(ShaderValue::Vec2(Vec2::new(1024.0, 768.0))));
        assert_eq!(host.target_size(stage.light_buffer()), Some(UVec2::new(1024, 768)));
    }

    #[test]
    fn a_missing_root_shader_allocates_nothing() {
        let dir = ShaderDir::with_pipeline(&[]);
        dir.remove("geometry");
        let mut host = host();
        let nodes = host.node_count();
        let mut shaders = dir.library();
        let config = RendererConfig::new(dir.root());
        let window = host.window_size();
        assert!(GeometryStage::new(&mut host, &mut shaders, &config, window).is_err());
        assert_eq!(host.node_count(), nodes);
        assert_eq!(host.offscreen_targets().count(), 0);
    }

    #[test]
    fn shading_defines_recompile_both_roots() {
        let (_dir, mut host, mut shaders, mut stage) = stage();
        let before = stage.light_shader();
        let mut shading = Defines::new();
        shading.insert("DISABLE_POM".into(), 1.into());
        stage.set_shading(&mut host, &mut shaders, &shading).unwrap();
        assert_ne!(stage.light_shader(), before);
        let program = host.program(stage.geometry_shader()).unwrap();
        assert!(program.fragment.contains("#define DISABLE_POM 1"));
    }
}
