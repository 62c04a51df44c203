use std::collections::HashMap;
use std::path::PathBuf;

use glam::{UVec2, Vec3, Vec4};

use crate::error::HostError;
use crate::headless::HeadlessHost;
use crate::host::{
    Bitplane, CameraDesc, CameraMask, NodeId, ProgramSource, ProjectorKind, ProjectorLens,
    RenderAttribs, RenderHost, ShaderId, TargetId, TargetSize, TargetSpec, TextureFormat, TextureId,
    Transform,
};
use crate::texture_policy::TexturePolicy;
use crate::value::ShaderValue;

use super::{GpuContext, GpuTexture};

/// A compiled vertex/fragment pair.
#[derive(Debug)]
pub struct GpuProgram {
    pub label: String,
    pub vertex: wgpu::ShaderModule,
    pub fragment: wgpu::ShaderModule,
}

/// Uniform storage for one numeric shader input of one node.
#[derive(Debug)]
struct UniformSlot {
    buffer: wgpu::Buffer,
    lanes: usize,
}

/// A [`RenderHost`] that backs targets, textures and programs with wgpu
/// resources.
///
/// Scene-graph bookkeeping (nodes, cameras, masks, projectors) is shared with
/// [`HeadlessHost`]; this host mirrors every target texture, loaded texture,
/// program and numeric input on the device. It allocates and updates
/// resources but does not record frames.
pub struct WgpuHost {
    gpu: GpuContext,
    scene: HeadlessHost,
    asset_root: PathBuf,
    textures: HashMap<TextureId, GpuTexture>,
    programs: HashMap<ShaderId, GpuProgram>,
    uniforms: HashMap<(NodeId, String), UniformSlot>,
    shadow_maps: HashMap<NodeId, GpuTexture>,
}

impl WgpuHost {
    /// Wraps a device context; texture and model paths resolve against `asset_root`.
    pub fn new(gpu: GpuContext, asset_root: impl Into<PathBuf>) -> Self {
        let asset_root = asset_root.into();
        let scene = HeadlessHost::new(gpu.size()).with_asset_root(asset_root.clone());
        Self {
            gpu,
            scene,
            asset_root,
            textures: HashMap::new(),
            programs: HashMap::new(),
            uniforms: HashMap::new(),
            shadow_maps: HashMap::new(),
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// The scene-graph state shared with the headless host.
    pub fn scene(&self) -> &HeadlessHost {
        &self.scene
    }

    pub fn texture(&self, texture: TextureId) -> Option<&GpuTexture> {
        self.textures.get(&texture)
    }

    pub fn program(&self, shader: ShaderId) -> Option<&GpuProgram> {
        self.programs.get(&shader)
    }

    /// The depth texture of a shadow-casting projector.
    pub fn shadow_map(&self, light: NodeId) -> Option<&GpuTexture> {
        self.shadow_maps.get(&light)
    }

    /// The uniform buffer holding a node's numeric input, if one was bound.
    pub fn uniform_buffer(&self, node: NodeId, name: &str) -> Option<&wgpu::Buffer> {
        self.uniforms
            .get(&(node, name.to_string()))
            .map(|slot| &slot.buffer)
    }

    /// Follows a window resize: reconfigures the surface and reallocates every
    /// window-tracking target.
    pub fn resize_window(&mut self, size: UVec2) {
        if size.x == 0 || size.y == 0 {
            return;
        }
        self.gpu.resize(size);
        self.scene.set_window_size(size);
        let tracking: Vec<TargetId> = self
            .scene
            .offscreen_targets()
            .filter(|(_, state)| state.spec.size == TargetSize::TrackWindow)
            .map(|(id, _)| id)
            .collect();
        for target in tracking {
            self.reallocate(target);
        }
    }

    /// Recreates every texture of `target` at the target's current size.
    fn reallocate(&mut self, target: TargetId) {
        let Some(state) = self.scene.target(target) else {
            return;
        };
        let size = state.size;
        let name = state.spec.name.clone();
        let planes = state.textures.clone();
        for (plane, texture) in planes {
            if let Some(old) = self.textures.get(&texture) {
                let label = texture_label(&name, plane);
                let fresh = old.resized(&self.gpu, &label, size);
                self.textures.insert(texture, fresh);
            }
        }
        log::debug!("Reallocated target '{}' at {}x{}", name, size.x, size.y);
    }

    fn compile_stage(
        &self,
        label: &str,
        source: &str,
        stage: wgpu::naga::ShaderStage,
    ) -> Result<wgpu::ShaderModule, HostError> {
        let compile_error = |details: String| HostError::ShaderCompile {
            label: label.to_string(),
            details,
        };

        self.gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        // The GLSL frontend can panic on malformed input instead of reporting.
        let module = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.gpu
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Glsl {
                        shader: source.into(),
                        stage,
                        defines: Default::default(),
                    },
                })
        }));
        let scope = pollster::block_on(self.gpu.device.pop_error_scope());

        let module = module.map_err(|_| compile_error("shader frontend panicked".to_string()))?;
        match scope {
            Some(err) => Err(compile_error(err.to_string())),
            None => Ok(module),
        }
    }

    fn upload_uniform(&mut self, node: NodeId, name: &str, lanes: &[f32]) {
        let key = (node, name.to_string());
        let reuse = self
            .uniforms
            .get(&key)
            .is_some_and(|slot| slot.lanes == lanes.len());
        if !reuse {
            // std140 rounds every uniform block up to a vec4
            let size = (lanes.len().max(1).div_ceil(4) * 16) as u64;
            let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(name),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.uniforms.insert(
                key.clone(),
                UniformSlot {
                    buffer,
                    lanes: lanes.len(),
                },
            );
        }
        if let Some(slot) = self.uniforms.get(&key) {
            self.gpu
                .queue
                .write_buffer(&slot.buffer, 0, bytemuck::cast_slice(lanes));
        }
    }

    /// Drops device state of nodes that no longer exist.
    fn prune_dead_nodes(&mut self) {
        let scene = &self.scene;
        self.uniforms.retain(|(node, _), _| scene.is_alive(*node));
        self.shadow_maps.retain(|node, _| scene.is_alive(*node));
    }
}

fn texture_label(target: &str, plane: Bitplane) -> String {
    format!("{target} {plane:?}")
}

impl RenderHost for WgpuHost {
    fn window_size(&self) -> UVec2 {
        self.scene.window_size()
    }

    fn window_target(&self) -> TargetId {
        self.scene.window_target()
    }

    fn render_root(&self) -> NodeId {
        self.scene.render_root()
    }

    fn overlay_root(&self) -> NodeId {
        self.scene.overlay_root()
    }

    fn main_camera(&self) -> NodeId {
        self.scene.main_camera()
    }

    fn overlay_camera(&self) -> NodeId {
        self.scene.overlay_camera()
    }

    fn create_target(&mut self, spec: &TargetSpec) -> Result<TargetId, HostError> {
        self.scene.create_target(spec)
    }

    fn add_render_texture(
        &mut self,
        target: TargetId,
        plane: Bitplane,
        format: TextureFormat,
    ) -> Result<TextureId, HostError> {
        let texture = self.scene.add_render_texture(target, plane, format)?;
        let state = self
            .scene
            .target(target)
            .ok_or(HostError::UnknownTarget(target))?;
        let label = texture_label(&state.spec.name, plane);
        let size = state.size;
        self.textures
            .insert(texture, GpuTexture::render_target(&self.gpu, &label, format, size));
        Ok(texture)
    }

    fn set_clear(&mut self, target: TargetId, plane: Bitplane, value: Option<Vec4>) {
        self.scene.set_clear(target, plane, value);
    }

    fn disable_clears(&mut self, target: TargetId) {
        self.scene.disable_clears(target);
    }

    fn set_sort(&mut self, target: TargetId, sort: i32) {
        self.scene.set_sort(target, sort);
    }

    fn target_size(&self, target: TargetId) -> Option<UVec2> {
        self.scene.target_size(target)
    }

    fn resize_target(&mut self, target: TargetId, size: UVec2) -> Result<(), HostError> {
        if self.scene.target_size(target) == Some(size) {
            return Ok(());
        }
        self.scene.resize_target(target, size)?;
        self.reallocate(target);
        Ok(())
    }

    fn release_target(&mut self, target: TargetId) {
        if let Some(state) = self.scene.target(target) {
            for (_, texture) in &state.textures {
                self.textures.remove(texture);
            }
        }
        self.scene.release_target(target);
    }

    fn texture_card(&mut self, target: TargetId) -> Result<NodeId, HostError> {
        self.scene.texture_card(target)
    }

    fn create_node(&mut self, name: &str, parent: Option<NodeId>) -> NodeId {
        self.scene.create_node(name, parent)
    }

    fn create_quad(&mut self, name: &str, parent: NodeId, frame: UVec2) -> NodeId {
        self.scene.create_quad(name, parent, frame)
    }

    fn reparent(&mut self, node: NodeId, parent: NodeId) {
        self.scene.reparent(node, parent);
    }

    fn detach(&mut self, node: NodeId) {
        self.scene.detach(node);
    }

    fn remove_node(&mut self, node: NodeId) {
        self.scene.remove_node(node);
        self.prune_dead_nodes();
    }

    fn hide(&mut self, node: NodeId, mask: CameraMask) {
        self.scene.hide(node, mask);
    }

    fn set_transform(&mut self, node: NodeId, transform: Transform) {
        self.scene.set_transform(node, transform);
    }

    fn transform(&self, node: NodeId) -> Option<Transform> {
        self.scene.transform(node)
    }

    fn look_at(&mut self, node: NodeId, target: Vec3) {
        self.scene.look_at(node, target);
    }

    fn set_render_attribs(&mut self, node: NodeId, attribs: RenderAttribs) {
        self.scene.set_render_attribs(node, attribs);
    }

    fn create_camera(&mut self, desc: &CameraDesc) -> Result<NodeId, HostError> {
        self.scene.create_camera(desc)
    }

    fn set_camera_active(&mut self, camera: NodeId, active: bool) {
        self.scene.set_camera_active(camera, active);
    }

    fn disable_camera_clears(&mut self, camera: NodeId) {
        self.scene.disable_camera_clears(camera);
    }

    fn set_near_far(&mut self, camera: NodeId, near: f32, far: f32) {
        self.scene.set_near_far(camera, near, far);
    }

    fn compile_shader(&mut self, program: &ProgramSource) -> Result<ShaderId, HostError> {
        let vertex = self.compile_stage(
            &format!("{} (vertex)", program.label),
            &program.vertex,
            wgpu::naga::ShaderStage::Vertex,
        )?;
        let fragment = self.compile_stage(
            &format!("{} (fragment)", program.label),
            &program.fragment,
            wgpu::naga::ShaderStage::Fragment,
        )?;
        let id = self.scene.compile_shader(program)?;
        self.programs.insert(
            id,
            GpuProgram {
                label: program.label.clone(),
                vertex,
                fragment,
            },
        );
        log::debug!("Compiled program '{}' as {:?}", program.label, id);
        Ok(id)
    }

    fn set_shader(&mut self, node: NodeId, shader: ShaderId) {
        self.scene.set_shader(node, shader);
    }

    fn set_shader_input(&mut self, node: NodeId, name: &str, value: ShaderValue) {
        if let Some(lanes) = value.lanes() {
            self.upload_uniform(node, name, &lanes);
        }
        self.scene.set_shader_input(node, name, value);
    }

    fn shader_input(&self, node: NodeId, name: &str) -> Option<ShaderValue> {
        self.scene.shader_input(node, name)
    }

    fn load_texture(&mut self, path: &str, policy: TexturePolicy) -> Result<TextureId, HostError> {
        let id = self.scene.load_texture(path, policy)?;
        if !self.textures.contains_key(&id) {
            let texture = GpuTexture::load(&self.gpu, &self.asset_root.join(path), policy)?;
            self.textures.insert(id, texture);
        }
        Ok(id)
    }

    fn load_model(&mut self, path: &str) -> Result<NodeId, HostError> {
        self.scene.load_model(path)
    }

    fn create_projector(&mut self, kind: ProjectorKind, parent: NodeId) -> NodeId {
        self.scene.create_projector(kind, parent)
    }

    fn set_shadow_caster(&mut self, light: NodeId, size: Option<u32>) {
        let label = format!("shadow {light:?}");
        match size {
            Some(size) => {
                let texture = GpuTexture::render_target(
                    &self.gpu,
                    &label,
                    TextureFormat::Depth32Float,
                    UVec2::splat(size),
                );
                self.shadow_maps.insert(light, texture);
            }
            None => {
                self.shadow_maps.remove(&light);
            }
        }
        self.scene.set_shadow_caster(light, size);
    }

    fn set_projector_lens(&mut self, light: NodeId, lens: ProjectorLens) {
        self.scene.set_projector_lens(light, lens);
    }

    fn set_projector_mask(&mut self, light: NodeId, mask: CameraMask) {
        self.scene.set_projector_mask(light, mask);
    }

    fn set_light_color(&mut self, light: NodeId, color: Vec4) {
        self.scene.set_light_color(light, color);
    }
}
