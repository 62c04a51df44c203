//! A materialised filter stage and the host resources it owns.

use glam::{UVec2, Vec3};

use crate::error::Result;
use crate::filter_graph::StageDescriptor;
use crate::host::{
    Bitplane, CameraDesc, CameraMask, Lens, NodeId, RenderHost, ShaderId, TargetId, TargetSpec,
    TextureFormat, TextureId, Transform,
};

/// A live stage of a [`FilterGraph`](crate::FilterGraph).
///
/// Off-screen stages own a target, a private root (with the camera and quad
/// under it) and an output texture. The terminal stage only borrows the lit
/// buffer's card as its quad.
#[derive(Clone, Debug)]
pub struct FilterStage {
    pub(crate) descriptor: StageDescriptor,
    pub(crate) quad: Option<NodeId>,
    pub(crate) target: Option<TargetId>,
    pub(crate) output: Option<TextureId>,
    pub(crate) root: Option<NodeId>,
    pub(crate) camera: Option<NodeId>,
    pub(crate) shader: Option<ShaderId>,
}

impl FilterStage {
    pub(crate) fn new(descriptor: StageDescriptor) -> Self {
        Self {
            descriptor,
            quad: None,
            target: None,
            output: None,
            root: None,
            camera: None,
            shader: None,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.display_name()
    }

    /// The stage's current descriptor, including runtime define/input changes.
    pub fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    pub fn is_terminal(&self) -> bool {
        self.descriptor.terminal
    }

    pub fn quad(&self) -> Option<NodeId> {
        self.quad
    }

    /// The stage's own render target; `None` for the terminal stage.
    pub fn target(&self) -> Option<TargetId> {
        self.target
    }

    /// The texture later stages sample; `None` for the terminal stage.
    pub fn output(&self) -> Option<TextureId> {
        self.output
    }

    pub fn camera(&self) -> Option<NodeId> {
        self.camera
    }

    /// The program currently bound on the quad.
    pub fn shader(&self) -> Option<ShaderId> {
        self.shader
    }

    /// Allocates the target, camera and quad of an off-screen stage.
    ///
    /// Handles are recorded as they are created so a failure part way through
    /// can be undone with [`teardown`](Self::teardown).
    pub(crate) fn materialize<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        size: UVec2,
        sort: i32,
    ) -> Result<()> {
        let name = self.name().to_string();
        let target = host.create_target(&TargetSpec::color_only(
            &format!("filter_stage_{name}"),
            size,
            sort,
        ))?;
        self.target = Some(target);
        self.output = Some(host.add_render_texture(target, Bitplane::Color, TextureFormat::Rgba8)?);
        host.set_clear(target, Bitplane::Color, self.descriptor.clear_color);

        let root = host.create_node("filterBufferRoot", None);
        self.root = Some(root);

        let camera = host.create_camera(&CameraDesc {
            name: format!("filter_cam_{name}"),
            target,
            lens: Lens::Orthographic { film: size },
            scene: Some(root),
            parent: Some(root),
            mask: CameraMask::ALL,
            display_sort: 0,
        })?;
        host.set_transform(
            camera,
            Transform {
                pos: Vec3::new(size.x as f32 * 0.5, size.y as f32 * 0.5, 100.0),
                hpr: Vec3::new(0.0, -90.0, 0.0),
                ..Transform::default()
            },
        );
        self.camera = Some(camera);

        let quad = host.create_quad(&format!("filter_quad_{name}"), root, size);
        host.look_at(quad, Vec3::NEG_Z);
        self.quad = Some(quad);
        Ok(())
    }

    /// Uses the lit buffer's card as this (terminal) stage's quad.
    pub(crate) fn attach_card<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        lit_target: TargetId,
    ) -> Result<()> {
        let card = host.texture_card(lit_target)?;
        let overlay = host.overlay_root();
        host.reparent(card, overlay);
        self.quad = Some(card);
        Ok(())
    }

    /// Releases everything this stage owns.
    ///
    /// The terminal card is only detached; it belongs to the lit buffer.
    pub(crate) fn teardown<H: RenderHost + ?Sized>(&mut self, host: &mut H) {
        if let Some(target) = self.target.take() {
            host.release_target(target);
        }
        if let Some(root) = self.root.take() {
            // camera and quad live under the root
            host.remove_node(root);
        } else if let Some(card) = self.quad {
            host.detach(card);
        }
        self.quad = None;
        self.camera = None;
        self.output = None;
        self.shader = None;
    }
}
