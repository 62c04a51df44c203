//! A reduced-resolution side buffer for forward-shaded content.
//!
//! Anything parented to [`ForwardStage::root`] is drawn by its own camera
//! into a buffer of `window * ratio` pixels, depth-tested against the
//! G-buffer's depth in the `forward` shader. Filters sample the result as
//! `forward_tex`.

use std::path::PathBuf;

use glam::{UVec2, Vec4};

use crate::error::Result;
use crate::geometry_stage::win_size;
use crate::host::{
    Bitplane, CameraDesc, CameraMask, Lens, NodeId, RenderHost, ShaderId, TargetId, TargetSpec,
    TextureFormat, TextureId,
};
use crate::renderer::RendererConfig;
use crate::resize::scaled_size;
use crate::shader_library::ShaderLibrary;
use crate::value::{Defines, ShaderValue};

/// Common input name of the forward buffer's colour output.
pub const FORWARD_TEXTURE_INPUT: &str = "forward_tex";

const FORWARD_TARGET_SORT: i32 = 2;

#[derive(Debug)]
pub struct ForwardStage {
    root: NodeId,
    target: TargetId,
    texture: TextureId,
    camera: NodeId,
    shader: ShaderId,
    ratio: f32,
}

impl ForwardStage {
    /// Creates the buffer at `window * config.forward_ratio`.
    pub fn new<H: RenderHost + ?Sized>(
        host: &mut H,
        shaders: &mut ShaderLibrary,
        config: &RendererConfig,
        depth_tex: TextureId,
        window: UVec2,
    ) -> Result<Self> {
        let shader = Self::compile_shading(host, shaders, &config.shading)?;
        let ratio = config.forward_ratio;
        let size = scaled_size(window, ratio);

        let target = host.create_target(&TargetSpec::color_only("forward_stage", size, FORWARD_TARGET_SORT))?;
        let texture = match host.add_render_texture(target, Bitplane::Color, TextureFormat::Rgba8) {
            Ok(texture) => texture,
            Err(err) => {
                host.release_target(target);
                return Err(err.into());
            }
        };
        host.set_clear(target, Bitplane::Color, Some(Vec4::ZERO));

        let root = host.create_node("forwardRoot", None);
        let camera = match host.create_camera(&CameraDesc {
            name: "forward camera".to_string(),
            target,
            lens: Lens::Main,
            scene: Some(root),
            parent: Some(root),
            mask: CameraMask::bit(config.scene_mask_bit).with_bit(config.light_mask_bit),
            display_sort: 0,
        }) {
            Ok(camera) => camera,
            Err(err) => {
                host.remove_node(root);
                host.release_target(target);
                return Err(err.into());
            }
        };

        host.set_shader(root, shader);
        host.set_shader_input(root, "depth_tex", ShaderValue::Texture(depth_tex));
        host.set_shader_input(root, "win_size", win_size(window));
        host.hide(root, CameraMask::bit(config.scene_mask_bit));

        log::debug!("Forward buffer {}x{} (ratio {ratio})", size.x, size.y);
        Ok(Self {
            root,
            target,
            texture,
            camera,
            shader,
            ratio,
        })
    }

    /// Parent of every forward-shaded node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    /// The colour output published as [`FORWARD_TEXTURE_INPUT`].
    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn camera(&self) -> NodeId {
        self.camera
    }

    pub fn shader(&self) -> ShaderId {
        self.shader
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Copies the main camera's pose onto the forward camera.
    pub fn update<H: RenderHost + ?Sized>(&self, host: &mut H) {
        if let Some(pose) = host.transform(host.main_camera()) {
            host.set_transform(self.camera, pose);
        }
    }

    /// Resizes the buffer to `window * ratio` and refreshes `win_size`.
    pub fn resize<H: RenderHost + ?Sized>(&self, host: &mut H, window: UVec2) -> Result<()> {
        host.resize_target(self.target, scaled_size(window, self.ratio))?;
        host.set_shader_input(self.root, "win_size", win_size(window));
        Ok(())
    }

    pub fn set_shading<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        shading: &Defines,
    ) -> Result<()> {
        let shader = Self::compile_shading(host, shaders, shading)?;
        self.bind_shading(host, shader);
        Ok(())
    }

    /// Compiles the forward root program without binding it.
    pub fn compile_shading<H: RenderHost + ?Sized>(
        host: &mut H,
        shaders: &mut ShaderLibrary,
        shading: &Defines,
    ) -> Result<ShaderId> {
        shaders.load(host, "forward", shading)
    }

    pub fn bind_shading<H: RenderHost + ?Sized>(&mut self, host: &mut H, shader: ShaderId) {
        host.set_shader(self.root, shader);
        self.shader = shader;
    }

    pub fn reload_sources<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        changed: &[PathBuf],
        shading: &Defines,
    ) {
        if !shaders.uses_any("forward", changed) {
            return;
        }
        match self.set_shading(host, shaders, shading) {
            Ok(()) => log::info!("Reloaded forward root program"),
            Err(err) => log::warn!("Keeping previous forward root program: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{TextureId, Transform};
    use crate::test_support::{ShaderDir, host};
    use glam::{Vec2, Vec3};

    fn forward(ratio: f32) -> (ShaderDir, crate::HeadlessHost, ForwardStage) {
        let dir = ShaderDir::with_pipeline(&[]);
        let mut host = host();
        let mut shaders = dir.library();
        let config = RendererConfig::new(dir.root()).with_forward_ratio(ratio);
        let window = host.window_size();
        let stage = ForwardStage::new(&mut host, &mut shaders, &config, TextureId(99), window).unwrap();
        (dir, host, stage)
    }

    #[test]
    fn buffer_is_a_fraction_of_the_window() {
        let (_dir, mut host, stage) = forward(0.5);
        assert_eq!(host.target_size(stage.target()), Some(UVec2::new(400, 300)));

        stage.resize(&mut host, UVec2::new(1000, 700)).unwrap();
        assert_eq!(host.target_size(stage.target()), Some(UVec2::new(500, 350)));
        assert_eq!(
            host.shader_input(stage.root(), "win_size"),
            Some(ShaderValue::Vec2(Vec2::new(1000.0, 700.0)))
        );
    }

    #[test]
    fn buffer_follows_the_given_window() {
        let dir = ShaderDir::with_pipeline(&[]);
        let mut host = host();
        let mut shaders = dir.library();
        let config = RendererConfig::new(dir.root());
        let window = UVec2::new(1000, 700);
        let stage = ForwardStage::new(&mut host, &mut shaders, &config, TextureId(99), window).unwrap();
        assert_eq!(host.target_size(stage.target()), Some(UVec2::new(500, 350)));
        assert_eq!(
            host.shader_input(stage.root(), "win_size"),
            Some(ShaderValue::Vec2(Vec2::new(1000.0, 700.0)))
        );
    }

    #[test]
    fn ratio_is_configurable() {
        let (_dir, host, stage) = forward(0.25);
        assert_eq!(host.target_size(stage.target()), Some(UVec2::new(200, 150)));
    }

    #[test]
    fn camera_mask_and_root_state() {
        let (_dir, host, stage) = forward(0.5);
        let camera = host.camera(stage.camera()).unwrap();
        assert_eq!(camera.mask, CameraMask::bit(1).with_bit(2));
        assert_eq!(camera.lens, Lens::Main);
        assert_eq!(camera.scene, Some(stage.root()));
        assert_eq!(
            host.shader_input(stage.root(), "depth_tex"),
            Some(ShaderValue::Texture(TextureId(99)))
        );
        assert_eq!(host.scene_node(stage.root()).unwrap().hidden, CameraMask::bit(1));
    }

    #[test]
    fn update_mirrors_the_main_camera() {
        let (_dir, mut host, stage) = forward(0.5);
        let pose = Transform {
            pos: Vec3::new(1.0, -4.0, 2.0),
            hpr: Vec3::new(30.0, -10.0, 0.0),
            ..Transform::default()
        };
        let main = host.main_camera();
        host.set_transform(main, pose);
        stage.update(&mut host);
        assert_eq!(host.transform(stage.camera()), Some(pose));
    }
}
