//! An in-memory [`RenderHost`] backed by a `hecs` world.
//!
//! Every scene-graph node is an entity carrying a [`SceneNode`] component.
//! Cameras, quads, texture cards, models and shadow projectors are the same
//! entities with one extra component each, so a single query answers
//! "what is under this root" regardless of node kind.
//!
//! Render targets, textures and shader programs live in plain registries next
//! to the world. Nothing is ever drawn; the host only keeps the state a real
//! engine would hold, which makes it the test double for the whole pipeline
//! and the backend of the `penumbra` CLI's dry runs.
//!
//! Two knobs make resource failures reproducible:
//!
//! - [`HeadlessHost::with_asset_root`] resolves texture and model paths
//!   against a directory and fails for files that do not exist.
//! - [`HeadlessHost::reject_shaders_matching`] makes the compiler fail for
//!   every program whose label contains a pattern.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use glam::{UVec2, Vec2, Vec3, Vec4};
use hecs::{Entity, World};
use indexmap::IndexMap;

use crate::error::HostError;
use crate::host::{
    Bitplane, CameraDesc, CameraMask, Lens, NodeId, ProgramSource, ProjectorKind, ProjectorLens,
    RenderAttribs, RenderHost, ShaderId, TargetId, TargetSize, TargetSpec, TextureFormat,
    TextureId, Transform,
};
use crate::texture_policy::TexturePolicy;
use crate::value::{Inputs, ShaderValue};

/// Extensions tried when a model path has none.
const MODEL_EXTENSIONS: &[&str] = &["obj", "stl", "gltf", "glb", "egg", "bam"];

/// The component every scene-graph entity carries.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub parent: Option<NodeId>,
    /// Camera bits this node (and its subtree) is hidden from.
    pub hidden: CameraMask,
    pub transform: Transform,
    pub attribs: Option<RenderAttribs>,
    pub shader: Option<ShaderId>,
    pub inputs: Inputs,
}

impl SceneNode {
    fn new(name: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            hidden: CameraMask::default(),
            transform: Transform::default(),
            attribs: None,
            shader: None,
            inputs: Inputs::new(),
        }
    }
}

/// Camera component.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraState {
    pub target: TargetId,
    pub lens: Lens,
    pub scene: Option<NodeId>,
    pub mask: CameraMask,
    pub display_sort: i32,
    pub active: bool,
    pub clears_disabled: bool,
    pub near_far: Option<(f32, f32)>,
}

/// Shadow projector component.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectorState {
    pub kind: ProjectorKind,
    /// Square shadow buffer size while shadow casting is enabled.
    pub shadow_size: Option<u32>,
    pub lens: Option<ProjectorLens>,
    pub mask: CameraMask,
    pub color: Vec4,
}

#[derive(Clone, Copy, Debug)]
struct QuadFrame(UVec2);

#[derive(Clone, Copy, Debug)]
struct CardOf(TargetId);

#[derive(Clone, Debug)]
struct ModelSource(String);

/// A live render target.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetState {
    pub spec: TargetSpec,
    pub size: UVec2,
    pub sort: i32,
    pub textures: Vec<(Bitplane, TextureId)>,
    /// Planes that are cleared before rendering, with their clear values.
    pub clears: HashMap<Bitplane, Vec4>,
    pub clears_disabled: bool,
    card: Option<NodeId>,
}

impl TargetState {
    pub fn texture(&self, plane: Bitplane) -> Option<TextureId> {
        self.textures
            .iter()
            .find(|(p, _)| *p == plane)
            .map(|(_, id)| *id)
    }
}

/// A texture owned by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureState {
    /// Source path for loaded textures, `None` for render textures.
    pub path: Option<String>,
    pub policy: Option<TexturePolicy>,
    pub format: TextureFormat,
    pub size: UVec2,
}

/// In-memory host used for dry runs and tests.
pub struct HeadlessHost {
    world: World,
    window_size: UVec2,
    window_target: TargetId,
    render_root: NodeId,
    overlay_root: NodeId,
    main_camera: NodeId,
    overlay_camera: NodeId,
    /// Creation order is preserved for sort tie-breaks.
    targets: IndexMap<TargetId, TargetState>,
    next_target: u64,
    textures: HashMap<TextureId, TextureState>,
    loaded: HashMap<(String, TexturePolicy), TextureId>,
    next_texture: u64,
    programs: Vec<ProgramSource>,
    rejected: Vec<String>,
    asset_root: Option<PathBuf>,
}

fn node_id(entity: Entity) -> NodeId {
    NodeId(entity.to_bits().get())
}

fn spawn_node(world: &mut World, name: &str, parent: Option<NodeId>) -> NodeId {
    node_id(world.spawn((SceneNode::new(name, parent),)))
}

impl HeadlessHost {
    /// Creates a host with a window of `window_size` pixels, a `render` and a
    /// `render2d` root and the two cameras that draw them.
    pub fn new(window_size: UVec2) -> Self {
        let mut world = World::new();
        let render_root = spawn_node(&mut world, "render", None);
        let overlay_root = spawn_node(&mut world, "render2d", None);

        let window_target = TargetId(0);
        let mut targets = IndexMap::new();
        targets.insert(
            window_target,
            TargetState {
                spec: TargetSpec {
                    name: "window".to_string(),
                    size: TargetSize::TrackWindow,
                    sort: 0,
                    rgba_bits: [8, 8, 8, 8],
                    depth_bits: 24,
                    aux_rgba: 0,
                    srgb: false,
                    cumulative: false,
                },
                size: window_size,
                sort: 0,
                textures: Vec::new(),
                clears: HashMap::from([(Bitplane::Color, Vec4::ZERO), (Bitplane::Depth, Vec4::ONE)]),
                clears_disabled: false,
                card: None,
            },
        );

        let mut host = Self {
            world,
            window_size,
            window_target,
            render_root,
            overlay_root,
            main_camera: render_root,
            overlay_camera: overlay_root,
            targets,
            next_target: 1,
            textures: HashMap::new(),
            loaded: HashMap::new(),
            next_texture: 1,
            programs: Vec::new(),
            rejected: Vec::new(),
            asset_root: None,
        };
        host.main_camera = host.spawn_camera(&CameraDesc {
            name: "cam".to_string(),
            target: window_target,
            lens: Lens::Main,
            scene: Some(render_root),
            parent: Some(render_root),
            mask: CameraMask::ALL,
            display_sort: 0,
        });
        host.overlay_camera = host.spawn_camera(&CameraDesc {
            name: "cam2d".to_string(),
            target: window_target,
            lens: Lens::Orthographic { film: window_size },
            scene: Some(overlay_root),
            parent: Some(overlay_root),
            mask: CameraMask::ALL,
            display_sort: 10,
        });
        host
    }

    /// Resolves texture and model paths against `root`; missing files fail.
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    /// Makes every later compile of a program whose label contains `pattern` fail.
    pub fn reject_shaders_matching(&mut self, pattern: &str) {
        self.rejected.push(pattern.to_string());
    }

    pub fn accept_all_shaders(&mut self) {
        self.rejected.clear();
    }

    /// Changes the window size. Window-tracking targets follow immediately.
    pub fn set_window_size(&mut self, size: UVec2) {
        self.window_size = size;
        let tracking: Vec<TargetId> = self
            .targets
            .iter()
            .filter(|(_, state)| state.spec.size == TargetSize::TrackWindow)
            .map(|(id, _)| *id)
            .collect();
        for target in tracking {
            self.set_target_size(target, size);
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Number of programs compiled so far.
    pub fn compile_count(&self) -> usize {
        self.programs.len()
    }

    pub fn program(&self, shader: ShaderId) -> Option<&ProgramSource> {
        self.programs.get(shader.0 as usize)
    }

    pub fn target(&self, target: TargetId) -> Option<&TargetState> {
        self.targets.get(&target)
    }

    /// Live off-screen targets (the window excluded), in creation order.
    pub fn offscreen_targets(&self) -> impl Iterator<Item = (TargetId, &TargetState)> {
        self.targets
            .iter()
            .filter(|(id, _)| **id != self.window_target)
            .map(|(id, state)| (*id, state))
    }

    /// The off-screen target with the given name, if it is live.
    pub fn target_named(&self, name: &str) -> Option<TargetId> {
        self.offscreen_targets()
            .find(|(_, state)| state.spec.name == name)
            .map(|(id, _)| id)
    }

    pub fn texture(&self, texture: TextureId) -> Option<&TextureState> {
        self.textures.get(&texture)
    }

    pub fn is_alive(&self, node: NodeId) -> bool {
        self.entity(node).is_some()
    }

    pub fn scene_node(&self, node: NodeId) -> Option<SceneNode> {
        self.component::<SceneNode>(node)
    }

    pub fn camera(&self, node: NodeId) -> Option<CameraState> {
        self.component::<CameraState>(node)
    }

    pub fn projector(&self, node: NodeId) -> Option<ProjectorState> {
        self.component::<ProjectorState>(node)
    }

    pub fn quad_frame(&self, node: NodeId) -> Option<UVec2> {
        self.component::<QuadFrame>(node).map(|frame| frame.0)
    }

    /// The target a texture card displays.
    pub fn card_target(&self, node: NodeId) -> Option<TargetId> {
        self.component::<CardOf>(node).map(|card| card.0)
    }

    pub fn model_path(&self, node: NodeId) -> Option<String> {
        self.component::<ModelSource>(node).map(|model| model.0)
    }

    /// Direct children of `node`, oldest first.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let mut children: Vec<NodeId> = self
            .world
            .query::<&SceneNode>()
            .iter()
            .filter(|(_, scene_node)| scene_node.parent == Some(node))
            .map(|(entity, _)| node_id(entity))
            .collect();
        children.sort();
        children
    }

    /// All live nodes called `name`, oldest first.
    pub fn nodes_named(&self, name: &str) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .world
            .query::<&SceneNode>()
            .iter()
            .filter(|(_, scene_node)| scene_node.name == name)
            .map(|(entity, _)| node_id(entity))
            .collect();
        nodes.sort();
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.world.len() as usize
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn entity(&self, node: NodeId) -> Option<Entity> {
        Entity::from_bits(node.0).filter(|entity| self.world.contains(*entity))
    }

    fn component<T: hecs::Component + Clone>(&self, node: NodeId) -> Option<T> {
        let entity = self.entity(node)?;
        self.world.get::<&T>(entity).ok().map(|c| (*c).clone())
    }

    fn update<T: hecs::Component>(&mut self, node: NodeId, f: impl FnOnce(&mut T)) {
        let Some(entity) = self.entity(node) else {
            log::debug!("Ignoring update of unknown node {node:?}");
            return;
        };
        match self.world.get::<&mut T>(entity) {
            Ok(mut component) => f(&mut component),
            Err(_) => log::debug!(
                "Node {node:?} has no {} component",
                std::any::type_name::<T>()
            ),
        }
    }

    fn spawn_camera(&mut self, desc: &CameraDesc) -> NodeId {
        let entity = self.world.spawn((
            SceneNode::new(&desc.name, desc.parent),
            CameraState {
                target: desc.target,
                lens: desc.lens,
                scene: desc.scene,
                mask: desc.mask,
                display_sort: desc.display_sort,
                active: true,
                clears_disabled: false,
                near_far: None,
            },
        ));
        node_id(entity)
    }

    fn alloc_texture(&mut self, state: TextureState) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, state);
        id
    }

    fn set_target_size(&mut self, target: TargetId, size: UVec2) {
        let Some(state) = self.targets.get_mut(&target) else {
            return;
        };
        state.size = size;
        for (_, texture) in &state.textures {
            if let Some(texture) = self.textures.get_mut(texture) {
                texture.size = size;
            }
        }
    }

    fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut doomed = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            doomed.push(node);
            stack.extend(self.children(node));
        }
        doomed
    }

    fn resolve_asset(&self, path: &str, extensions: &[&str]) -> Result<(), String> {
        let Some(root) = &self.asset_root else {
            return Ok(());
        };
        let full = root.join(path);
        if full.is_file() {
            return Ok(());
        }
        let found = extensions
            .iter()
            .any(|ext| full.with_extension(ext).is_file());
        if found {
            Ok(())
        } else {
            Err(format!("no such file under {}", root.display()))
        }
    }

    fn texture_size(&self, path: &str) -> Result<UVec2, HostError> {
        let Some(root) = &self.asset_root else {
            return Ok(UVec2::ONE);
        };
        let full: PathBuf = Path::new(root).join(path);
        let (width, height) =
            image::image_dimensions(&full).map_err(|err| HostError::TextureLoad {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
        Ok(UVec2::new(width, height))
    }
}

impl RenderHost for HeadlessHost {
    fn window_size(&self) -> UVec2 {
        self.window_size
    }

    fn window_target(&self) -> TargetId {
        self.window_target
    }

    fn render_root(&self) -> NodeId {
        self.render_root
    }

    fn overlay_root(&self) -> NodeId {
        self.overlay_root
    }

    fn main_camera(&self) -> NodeId {
        self.main_camera
    }

    fn overlay_camera(&self) -> NodeId {
        self.overlay_camera
    }

    fn create_target(&mut self, spec: &TargetSpec) -> Result<TargetId, HostError> {
        let size = match spec.size {
            TargetSize::TrackWindow => self.window_size,
            TargetSize::Fixed(size) => size,
        };
        if size.x == 0 || size.y == 0 {
            return Err(HostError::TargetCreation {
                name: spec.name.clone(),
                reason: format!("zero-sized target {}x{}", size.x, size.y),
            });
        }
        let id = TargetId(self.next_target);
        self.next_target += 1;
        self.targets.insert(
            id,
            TargetState {
                spec: spec.clone(),
                size,
                sort: spec.sort,
                textures: Vec::new(),
                clears: HashMap::new(),
                clears_disabled: false,
                card: None,
            },
        );
        log::debug!("Created target '{}' ({}x{}) as {:?}", spec.name, size.x, size.y, id);
        Ok(id)
    }

    fn add_render_texture(
        &mut self,
        target: TargetId,
        plane: Bitplane,
        format: TextureFormat,
    ) -> Result<TextureId, HostError> {
        let size = self
            .targets
            .get(&target)
            .ok_or(HostError::UnknownTarget(target))?
            .size;
        let texture = self.alloc_texture(TextureState {
            path: None,
            policy: None,
            format,
            size,
        });
        if let Some(state) = self.targets.get_mut(&target) {
            state.textures.push((plane, texture));
        }
        Ok(texture)
    }

    fn set_clear(&mut self, target: TargetId, plane: Bitplane, value: Option<Vec4>) {
        if let Some(state) = self.targets.get_mut(&target) {
            match value {
                Some(value) => {
                    state.clears.insert(plane, value);
                }
                None => {
                    state.clears.remove(&plane);
                }
            }
        }
    }

    fn disable_clears(&mut self, target: TargetId) {
        if let Some(state) = self.targets.get_mut(&target) {
            state.clears.clear();
            state.clears_disabled = true;
        }
    }

    fn set_sort(&mut self, target: TargetId, sort: i32) {
        if let Some(state) = self.targets.get_mut(&target) {
            state.sort = sort;
        }
    }

    fn target_size(&self, target: TargetId) -> Option<UVec2> {
        self.targets.get(&target).map(|state| state.size)
    }

    fn resize_target(&mut self, target: TargetId, size: UVec2) -> Result<(), HostError> {
        if !self.targets.contains_key(&target) {
            return Err(HostError::UnknownTarget(target));
        }
        self.set_target_size(target, size);
        Ok(())
    }

    fn release_target(&mut self, target: TargetId) {
        if target == self.window_target {
            return;
        }
        if let Some(state) = self.targets.shift_remove(&target) {
            for (_, texture) in &state.textures {
                self.textures.remove(texture);
            }
            log::debug!("Released target '{}'", state.spec.name);
        }
    }

    fn texture_card(&mut self, target: TargetId) -> Result<NodeId, HostError> {
        let state = self
            .targets
            .get(&target)
            .ok_or(HostError::UnknownTarget(target))?;
        if let Some(card) = state.card.filter(|card| self.is_alive(*card)) {
            return Ok(card);
        }
        let name = format!("{}-card", state.spec.name);
        let color = state.texture(Bitplane::Color);

        let mut scene_node = SceneNode::new(&name, None);
        if let Some(color) = color {
            scene_node.inputs.insert("tex".into(), ShaderValue::Texture(color));
        }
        let card = node_id(self.world.spawn((scene_node, CardOf(target))));
        if let Some(state) = self.targets.get_mut(&target) {
            state.card = Some(card);
        }
        Ok(card)
    }

    fn create_node(&mut self, name: &str, parent: Option<NodeId>) -> NodeId {
        spawn_node(&mut self.world, name, parent)
    }

    fn create_quad(&mut self, name: &str, parent: NodeId, frame: UVec2) -> NodeId {
        node_id(
            self.world
                .spawn((SceneNode::new(name, Some(parent)), QuadFrame(frame))),
        )
    }

    fn reparent(&mut self, node: NodeId, parent: NodeId) {
        self.update::<SceneNode>(node, |n| n.parent = Some(parent));
    }

    fn detach(&mut self, node: NodeId) {
        self.update::<SceneNode>(node, |n| n.parent = None);
    }

    fn remove_node(&mut self, node: NodeId) {
        if !self.is_alive(node) {
            return;
        }
        for doomed in self.subtree(node) {
            if let Some(target) = self.card_target(doomed) {
                if let Some(state) = self.targets.get_mut(&target) {
                    state.card = None;
                }
            }
            if let Some(entity) = self.entity(doomed) {
                let _ = self.world.despawn(entity);
            }
        }
    }

    fn hide(&mut self, node: NodeId, mask: CameraMask) {
        self.update::<SceneNode>(node, |n| n.hidden = CameraMask(n.hidden.0 | mask.0));
    }

    fn set_transform(&mut self, node: NodeId, transform: Transform) {
        self.update::<SceneNode>(node, |n| n.transform = transform);
    }

    fn transform(&self, node: NodeId) -> Option<Transform> {
        self.scene_node(node).map(|n| n.transform)
    }

    fn look_at(&mut self, node: NodeId, target: Vec3) {
        self.update::<SceneNode>(node, |n| {
            let delta = target - n.transform.pos;
            if delta.length_squared() <= f32::EPSILON {
                return;
            }
            // +Y forward, +Z up
            let heading = (-delta.x).atan2(delta.y).to_degrees();
            let pitch = delta
                .z
                .atan2(Vec2::new(delta.x, delta.y).length())
                .to_degrees();
            n.transform.hpr = Vec3::new(heading, pitch, 0.0);
        });
    }

    fn set_render_attribs(&mut self, node: NodeId, attribs: RenderAttribs) {
        self.update::<SceneNode>(node, |n| n.attribs = Some(attribs));
    }

    fn create_camera(&mut self, desc: &CameraDesc) -> Result<NodeId, HostError> {
        if !self.targets.contains_key(&desc.target) {
            return Err(HostError::UnknownTarget(desc.target));
        }
        Ok(self.spawn_camera(desc))
    }

    fn set_camera_active(&mut self, camera: NodeId, active: bool) {
        self.update::<CameraState>(camera, |c| c.active = active);
    }

    fn disable_camera_clears(&mut self, camera: NodeId) {
        self.update::<CameraState>(camera, |c| c.clears_disabled = true);
    }

    fn set_near_far(&mut self, camera: NodeId, near: f32, far: f32) {
        self.update::<CameraState>(camera, |c| c.near_far = Some((near, far)));
    }

    fn compile_shader(&mut self, program: &ProgramSource) -> Result<ShaderId, HostError> {
        if let Some(pattern) = self
            .rejected
            .iter()
            .find(|pattern| program.label.contains(pattern.as_str()))
        {
            return Err(HostError::ShaderCompile {
                label: program.label.clone(),
                details: format!("rejected by pattern '{pattern}'"),
            });
        }
        let id = ShaderId(self.programs.len() as u64);
        self.programs.push(program.clone());
        Ok(id)
    }

    fn set_shader(&mut self, node: NodeId, shader: ShaderId) {
        self.update::<SceneNode>(node, |n| n.shader = Some(shader));
    }

    fn set_shader_input(&mut self, node: NodeId, name: &str, value: ShaderValue) {
        self.update::<SceneNode>(node, |n| {
            n.inputs.insert(name.to_string(), value);
        });
    }

    fn shader_input(&self, node: NodeId, name: &str) -> Option<ShaderValue> {
        let entity = self.entity(node)?;
        let scene_node = self.world.get::<&SceneNode>(entity).ok()?;
        scene_node.inputs.get(name).cloned()
    }

    fn load_texture(&mut self, path: &str, policy: TexturePolicy) -> Result<TextureId, HostError> {
        let key = (path.to_string(), policy);
        if let Some(id) = self.loaded.get(&key) {
            return Ok(*id);
        }
        let size = self.texture_size(path)?;
        let id = self.alloc_texture(TextureState {
            path: Some(path.to_string()),
            policy: Some(policy),
            format: policy.format,
            size,
        });
        self.loaded.insert(key, id);
        Ok(id)
    }

    fn load_model(&mut self, path: &str) -> Result<NodeId, HostError> {
        self.resolve_asset(path, MODEL_EXTENSIONS)
            .map_err(|reason| HostError::ModelLoad {
                path: path.to_string(),
                reason,
            })?;
        let entity = self
            .world
            .spawn((SceneNode::new(path, None), ModelSource(path.to_string())));
        Ok(node_id(entity))
    }

    fn create_projector(&mut self, kind: ProjectorKind, parent: NodeId) -> NodeId {
        let name = match kind {
            ProjectorKind::Point => "PointLight",
            ProjectorKind::Spot { .. } => "Spotlight",
        };
        let entity = self.world.spawn((
            SceneNode::new(name, Some(parent)),
            ProjectorState {
                kind,
                shadow_size: None,
                lens: None,
                mask: CameraMask::ALL,
                color: Vec4::ONE,
            },
        ));
        node_id(entity)
    }

    fn set_shadow_caster(&mut self, light: NodeId, size: Option<u32>) {
        self.update::<ProjectorState>(light, |p| p.shadow_size = size);
    }

    fn set_projector_lens(&mut self, light: NodeId, lens: ProjectorLens) {
        self.update::<ProjectorState>(light, |p| p.lens = Some(lens));
    }

    fn set_projector_mask(&mut self, light: NodeId, mask: CameraMask) {
        self.update::<ProjectorState>(light, |p| p.mask = mask);
    }

    fn set_light_color(&mut self, light: NodeId, color: Vec4) {
        self.update::<ProjectorState>(light, |p| p.color = color);
    }
}
