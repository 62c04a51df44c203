//! The deferred renderer: one context object owning every pipeline part.
//!
//! ```text
//!  scene ──► model buffer (depth, albedo, normal)
//!                 │
//!  light volumes ─┴─► light buffer (lit) ──┐
//!                                          ├─► filter stages ─► terminal on screen
//!  forward root ──► forward buffer ────────┘
//! ```
//!
//! Nothing here is global: the renderer owns its host, its shader library and
//! the stages, and every mutation goes through `&mut self`.

use std::path::PathBuf;

use glam::{UVec2, Vec3};
use winit::event::WindowEvent;

use crate::config::{DEFAULT_SHADOW_SIZE, GraphicsConfig};
use crate::error::Result;
use crate::filter_graph::{FINAL_LIGHT_STAGE, FilterGraph, StageDescriptor, StageSources};
use crate::forward_stage::{FORWARD_TEXTURE_INPUT, ForwardStage};
use crate::geometry_stage::GeometryStage;
use crate::host::{CameraMask, NodeId, RenderHost};
use crate::lights::{
    ConeLight, ConeLightDesc, DirectionalLight, LightVolumes, SceneLight, SphereLight,
    SphereLightDesc,
};
use crate::resize::WindowResizeResponder;
use crate::shader_library::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_FRAGMENT_TEMPLATE, DEFAULT_VERSION_LINE,
    DEFAULT_VERTEX_TEMPLATE, ShaderLibrary,
};
use crate::value::{DefineValue, Defines, ShaderValue};

/// Everything a [`DeferredRenderer`] is set up with.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// Directory the shader and model paths are relative to.
    pub shader_root: PathBuf,
    pub vertex_template: String,
    pub fragment_template: String,
    /// Line `#define`s are injected after.
    pub version_line: String,
    pub shader_cache_capacity: usize,
    /// Camera bit of the model (G-buffer) pass.
    pub scene_mask_bit: u32,
    /// Camera bit of the light-volume pass.
    pub light_mask_bit: u32,
    /// Camera bit of shadow-map cameras.
    pub shadow_mask_bit: u32,
    /// Forward buffer size relative to the window.
    pub forward_ratio: f32,
    /// Near and far plane of the main lens.
    pub near_far: (f32, f32),
    /// Defines for the geometry, light and forward programs.
    pub shading: Defines,
    pub shadow_size: u32,
    pub sphere_model: String,
    pub cone_model: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shader_root: PathBuf::from("."),
            vertex_template: DEFAULT_VERTEX_TEMPLATE.to_string(),
            fragment_template: DEFAULT_FRAGMENT_TEMPLATE.to_string(),
            version_line: DEFAULT_VERSION_LINE.to_string(),
            shader_cache_capacity: DEFAULT_CACHE_CAPACITY,
            scene_mask_bit: 1,
            light_mask_bit: 2,
            shadow_mask_bit: 13,
            forward_ratio: 0.5,
            near_far: (3.0, 70.0),
            shading: Defines::new(),
            shadow_size: DEFAULT_SHADOW_SIZE,
            sphere_model: "models/sphere".to_string(),
            cone_model: "models/cone".to_string(),
        }
    }
}

impl RendererConfig {
    pub fn new(shader_root: impl Into<PathBuf>) -> Self {
        Self {
            shader_root: shader_root.into(),
            ..Self::default()
        }
    }

    pub fn with_templates(mut self, vertex: &str, fragment: &str) -> Self {
        self.vertex_template = vertex.to_string();
        self.fragment_template = fragment.to_string();
        self
    }

    pub fn with_version_line(mut self, version_line: &str) -> Self {
        self.version_line = version_line.to_string();
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.shader_cache_capacity = capacity;
        self
    }

    pub fn with_masks(mut self, scene: u32, light: u32, shadow: u32) -> Self {
        self.scene_mask_bit = scene;
        self.light_mask_bit = light;
        self.shadow_mask_bit = shadow;
        self
    }

    pub fn with_forward_ratio(mut self, ratio: f32) -> Self {
        self.forward_ratio = ratio;
        self
    }

    pub fn with_near_far(mut self, near: f32, far: f32) -> Self {
        self.near_far = (near, far);
        self
    }

    pub fn with_shading(mut self, shading: Defines) -> Self {
        self.shading = shading;
        self
    }

    pub fn with_shadow_size(mut self, size: u32) -> Self {
        self.shadow_size = size;
        self
    }

    pub fn with_volume_models(mut self, sphere: &str, cone: &str) -> Self {
        self.sphere_model = sphere.to_string();
        self.cone_model = cone.to_string();
        self
    }

    /// Takes shading defines and shadow size from a persisted config.
    pub fn with_graphics(mut self, graphics: &GraphicsConfig) -> Self {
        self.shading = graphics.shading.clone();
        self.shadow_size = graphics.shadow_size;
        self
    }

    pub fn shader_library(&self) -> ShaderLibrary {
        ShaderLibrary::new(self.shader_root.clone())
            .with_templates(&self.vertex_template, &self.fragment_template)
            .with_version_line(&self.version_line)
            .with_cache_capacity(self.shader_cache_capacity)
    }
}

/// G-buffer, forward buffer, filter chain and directional lights over a
/// [`RenderHost`].
pub struct DeferredRenderer<H: RenderHost> {
    host: H,
    shaders: ShaderLibrary,
    config: RendererConfig,
    geometry: GeometryStage,
    forward: ForwardStage,
    filters: FilterGraph,
    scene_light: SceneLight,
    responder: WindowResizeResponder,
}

impl<H: RenderHost> DeferredRenderer<H> {
    /// Builds the whole pipeline on `host`.
    ///
    /// The filter list is validated before the host is touched.
    pub fn new(mut host: H, config: RendererConfig, stages: &[StageDescriptor]) -> Result<Self> {
        FilterGraph::validate(stages)?;
        let mut shaders = config.shader_library();
        let window = host.window_size();

        let geometry = GeometryStage::new(&mut host, &mut shaders, &config, window)?;
        let forward = ForwardStage::new(
            &mut host,
            &mut shaders,
            &config,
            geometry.textures().depth,
            window,
        )?;

        let mut common_inputs = geometry.common_inputs(&host);
        common_inputs.insert(
            FORWARD_TEXTURE_INPUT.to_string(),
            ShaderValue::Texture(forward.texture()),
        );
        let sources = StageSources {
            common_inputs,
            lit_target: geometry.light_buffer(),
        };
        let filters = FilterGraph::build(&mut host, &mut shaders, stages, sources, window)?;
        let responder = WindowResizeResponder::new(window);
        log::info!(
            "Deferred renderer ready: {} filter stages, {} shading defines",
            filters.len(),
            config.shading.len()
        );

        Ok(Self {
            host,
            shaders,
            config,
            geometry,
            forward,
            filters,
            scene_light: SceneLight::new(),
            responder,
        })
    }

    /// Builds from a persisted config; its shading and shadow size override
    /// those in `config`.
    pub fn from_graphics(host: H, config: RendererConfig, graphics: &GraphicsConfig) -> Result<Self> {
        Self::new(host, config.with_graphics(graphics), &graphics.stages)
    }

    /// The current state as a persistable config.
    pub fn graphics_config(&self) -> GraphicsConfig {
        GraphicsConfig {
            stages: self.filters.descriptors(),
            shading: self.config.shading.clone(),
            shadow_size: self.config.shadow_size,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    pub fn filters(&self) -> &FilterGraph {
        &self.filters
    }

    pub fn geometry(&self) -> &GeometryStage {
        &self.geometry
    }

    pub fn forward(&self) -> &ForwardStage {
        &self.forward
    }

    pub fn scene_light(&self) -> &SceneLight {
        &self.scene_light
    }

    /// Parent for models drawn through the G-buffer.
    pub fn deferred_root(&self) -> NodeId {
        self.geometry.geometry_root()
    }

    /// Parent for models drawn into the forward buffer.
    pub fn forward_root(&self) -> NodeId {
        self.forward.root()
    }

    pub fn window_size(&self) -> UVec2 {
        self.responder.last_window_size()
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    /// Replaces the filter chain, and the shading defines when `shading`
    /// differs from the current set.
    ///
    /// Directional lights carry over to the new `final_light` stage.
    pub fn reset_filters(&mut self, stages: &[StageDescriptor], shading: Option<&Defines>) -> Result<()> {
        FilterGraph::validate(stages)?;
        if let Some(shading) = shading.filter(|s| **s != self.config.shading) {
            // every root program compiles before any is bound
            let roots = GeometryStage::compile_shading(&mut self.host, &mut self.shaders, shading)?;
            let forward = ForwardStage::compile_shading(&mut self.host, &mut self.shaders, shading)?;
            self.geometry.bind_shading(&mut self.host, roots);
            self.forward.bind_shading(&mut self.host, forward);
            self.config.shading = shading.clone();
            log::info!("Shading defines changed to {:?}", shading.keys().collect::<Vec<_>>());
        }
        self.filters.rebuild(&mut self.host, &mut self.shaders, stages)?;
        if !self.scene_light.is_empty() && self.filters.stage(FINAL_LIGHT_STAGE).is_some() {
            self.scene_light
                .apply(&mut self.host, &mut self.shaders, &mut self.filters)?;
        }
        Ok(())
    }

    pub fn reload_stage(&mut self, name: &str) -> Result<()> {
        self.filters.reload_stage(&mut self.host, &mut self.shaders, name)
    }

    pub fn get_define(&self, stage: &str, key: &str) -> Result<Option<DefineValue>> {
        self.filters.get_define(stage, key)
    }

    pub fn set_define(&mut self, stage: &str, key: &str, value: Option<DefineValue>) -> Result<()> {
        self.filters
            .set_define(&mut self.host, &mut self.shaders, stage, key, value)
    }

    pub fn get_input(&self, stage: &str, key: &str) -> Result<Option<ShaderValue>> {
        self.filters.get_input(&self.host, stage, key)
    }

    pub fn set_input(&mut self, stage: &str, key: &str, value: impl Into<ShaderValue>) -> Result<()> {
        self.filters.set_input(&mut self.host, stage, key, value)
    }

    pub fn set_input_with<F>(
        &mut self,
        stage: &str,
        key: &str,
        value: impl Into<ShaderValue>,
        combine: F,
    ) -> Result<()>
    where
        F: FnOnce(&ShaderValue, ShaderValue) -> Option<ShaderValue>,
    {
        self.filters
            .set_input_with(&mut self.host, stage, key, value, combine)
    }

    // ------------------------------------------------------------------
    // Per frame
    // ------------------------------------------------------------------

    /// Mirrors the main camera onto the forward camera. Call once per frame.
    pub fn update(&mut self) {
        self.forward.update(&mut self.host);
    }

    /// Resizes every target for a new window size.
    ///
    /// Returns `false` when nothing changed.
    pub fn resize(&mut self, size: UVec2) -> Result<bool> {
        self.responder.apply(
            &mut self.host,
            size,
            &self.geometry,
            &self.forward,
            &mut self.filters,
        )
    }

    /// Reacts to `Resized`; every other event is ignored.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> Result<bool> {
        match self.responder.observe_event(event) {
            Some(size) => self.resize(size),
            None => Ok(false),
        }
    }

    /// Recompiles everything built from a shader source edited on disk.
    ///
    /// Returns the names of the filter stages that reloaded; root programs
    /// are reloaded too but not listed.
    pub fn check_hot_reload(&mut self) -> Vec<String> {
        let changed = self.shaders.check_modified();
        if changed.is_empty() {
            return Vec::new();
        }
        let shading = self.config.shading.clone();
        self.geometry
            .reload_sources(&mut self.host, &mut self.shaders, &changed, &shading);
        self.forward
            .reload_sources(&mut self.host, &mut self.shaders, &changed, &shading);
        self.filters
            .reload_sources(&mut self.host, &mut self.shaders, &changed)
    }

    // ------------------------------------------------------------------
    // Lights
    // ------------------------------------------------------------------

    fn light_volumes(&self) -> LightVolumes {
        LightVolumes {
            root: self.geometry.light_root(),
            scene_root: self.host.render_root(),
            shading: self.config.shading.clone(),
            shadow_mask: CameraMask::bit(self.config.shadow_mask_bit),
            sphere_model: self.config.sphere_model.clone(),
            cone_model: self.config.cone_model.clone(),
        }
    }

    /// Adds a point light. Give it back with [`SphereLight::remove`].
    pub fn add_point_light(&mut self, desc: SphereLightDesc) -> Result<SphereLight> {
        let volumes = self.light_volumes();
        SphereLight::new(&mut self.host, &mut self.shaders, &volumes, desc)
    }

    /// Adds a spot light. Give it back with [`ConeLight::remove`].
    pub fn add_cone_light(&mut self, desc: ConeLightDesc) -> Result<ConeLight> {
        let volumes = self.light_volumes();
        ConeLight::new(&mut self.host, &mut self.shaders, &volumes, desc)
    }

    pub fn add_directional_light(&mut self, name: &str, light: DirectionalLight) -> Result<()> {
        self.scene_light.add_light(
            &mut self.host,
            &mut self.shaders,
            &mut self.filters,
            name,
            light,
        )
    }

    pub fn remove_directional_light(&mut self, name: &str) -> Result<bool> {
        self.scene_light
            .remove_light(&mut self.host, &mut self.shaders, &mut self.filters, name)
    }

    pub fn set_directional_color(&mut self, name: &str, color: Vec3) -> Result<bool> {
        self.scene_light
            .set_color(&mut self.host, &mut self.filters, name, color)
    }

    pub fn set_directional_direction(&mut self, name: &str, direction: Vec3) -> Result<bool> {
        self.scene_light
            .set_direction(&mut self.host, &mut self.filters, name, direction)
    }
}
