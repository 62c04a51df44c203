//! The filter graph: validation, construction and runtime mutation.

use std::collections::HashSet;
use std::path::PathBuf;

use glam::UVec2;
use indexmap::IndexMap;

use crate::error::{PipelineError, Result};
use crate::filter_graph::{FilterStage, StageDescriptor};
use crate::host::{RenderHost, ShaderId, TargetId};
use crate::resize::{proportional_size, scaled_size};
use crate::shader_library::ShaderLibrary;
use crate::texture_policy::TexturePolicy;
use crate::value::{DefineValue, Inputs, ShaderValue};

/// Name of the stage directional lights are folded into.
pub const FINAL_LIGHT_STAGE: &str = "final_light";

/// Sort key of every filter target. Equal to the lit buffer's, so creation
/// order puts the filters after it and before the window.
pub const FILTER_TARGET_SORT: i32 = 2;

const NUM_LIGHTS: &str = "NUM_LIGHTS";

/// What a graph is built against.
#[derive(Clone, Debug)]
pub struct StageSources {
    /// Inputs bound on every stage: scene root, camera, G-buffer textures,
    /// lit and forward textures.
    pub common_inputs: Inputs,
    /// The lit buffer, whose texture card becomes the terminal stage's quad.
    pub lit_target: TargetId,
}

/// Directional light state carried across a rebuild.
#[derive(Debug, Default)]
struct LightState {
    num_lights: Option<DefineValue>,
    color: Option<ShaderValue>,
    direction: Option<ShaderValue>,
}

/// An ordered, live set of filter stages keyed by display name.
#[derive(Debug)]
pub struct FilterGraph {
    stages: IndexMap<String, FilterStage>,
    sources: StageSources,
    /// `sources.common_inputs` plus every published stage output.
    common_inputs: Inputs,
    /// Window size the current target sizes were computed against.
    window_size: UVec2,
}

/// Loads texture paths; every other value is bound as is.
pub(crate) fn resolve_value<H: RenderHost + ?Sized>(
    host: &mut H,
    value: &ShaderValue,
) -> Result<ShaderValue> {
    match value.texture_path() {
        Some(path) => {
            let texture = host.load_texture(path, TexturePolicy::from_path(path))?;
            Ok(ShaderValue::Texture(texture))
        }
        None => Ok(value.clone()),
    }
}

impl FilterGraph {
    /// Checks a descriptor list without touching any host.
    ///
    /// Names must be unique, translations may only name earlier stages and
    /// exactly one stage, the last, must be terminal.
    pub fn validate(descriptors: &[StageDescriptor]) -> Result<()> {
        if descriptors.is_empty() {
            return Err(PipelineError::EmptyGraph);
        }

        let mut seen = HashSet::new();
        for descriptor in descriptors {
            let name = descriptor.display_name();
            for source in descriptor.translate.keys() {
                if !seen.contains(source.as_str()) {
                    return Err(PipelineError::InvalidTranslation {
                        stage: name.to_string(),
                        source_stage: source.clone(),
                    });
                }
            }
            if !seen.insert(name) {
                return Err(PipelineError::DuplicateStage(name.to_string()));
            }
        }

        let mut terminals = descriptors.iter().filter(|d| d.terminal);
        match (terminals.next(), terminals.next()) {
            (None, _) => return Err(PipelineError::MissingTerminal),
            (Some(first), Some(second)) => {
                return Err(PipelineError::MultipleTerminals(
                    first.display_name().to_string(),
                    second.display_name().to_string(),
                ));
            }
            (Some(_), None) => {}
        }
        if let Some(last) = descriptors.last() {
            if !last.terminal {
                let terminal = descriptors
                    .iter()
                    .find(|d| d.terminal)
                    .map(|d| d.display_name().to_string())
                    .unwrap_or_default();
                return Err(PipelineError::TerminalNotLast(terminal));
            }
        }
        Ok(())
    }

    /// Materialises `descriptors` for a window of `window` pixels.
    ///
    /// On a resource failure every stage created so far is torn down before
    /// the error is returned.
    pub fn build<H: RenderHost + ?Sized>(
        host: &mut H,
        shaders: &mut ShaderLibrary,
        descriptors: &[StageDescriptor],
        sources: StageSources,
        window: UVec2,
    ) -> Result<Self> {
        Self::validate(descriptors)?;

        let mut graph = Self {
            stages: IndexMap::new(),
            common_inputs: sources.common_inputs.clone(),
            sources,
            window_size: window,
        };
        if let Err(err) = graph.materialize(host, shaders, descriptors) {
            log::debug!("Filter graph build failed, releasing {} stages", graph.stages.len());
            graph.teardown(host);
            return Err(err);
        }

        log::debug!("Built filter graph ({} stages):", graph.stages.len());
        for stage in graph.stages.values() {
            let placement = match stage.target.and_then(|t| host.target_size(t)) {
                Some(size) => format!("{}x{}", size.x, size.y),
                None => "on screen".to_string(),
            };
            log::debug!("  {} [{}] {}", stage.name(), stage.descriptor.shader, placement);
        }
        Ok(graph)
    }

    fn materialize<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        descriptors: &[StageDescriptor],
    ) -> Result<()> {
        for descriptor in descriptors {
            let mut stage = FilterStage::new(descriptor.clone());
            let result = if descriptor.terminal {
                if descriptor.size_factor != 1.0 {
                    log::warn!(
                        "Ignoring size factor {} of terminal stage '{}'; it always matches the window",
                        descriptor.size_factor,
                        descriptor.display_name()
                    );
                }
                stage.attach_card(host, self.sources.lit_target)
            } else {
                let size = scaled_size(self.window_size, descriptor.size_factor);
                stage.materialize(host, size, FILTER_TARGET_SORT)
            };
            // recorded before checking so a teardown sees partial stages too
            self.stages.insert(descriptor.display_name().to_string(), stage);
            result?;
        }

        for stage in self.stages.values() {
            if let Some(output) = stage.output {
                self.common_inputs
                    .insert(stage.name().to_string(), ShaderValue::Texture(output));
            }
        }

        let names: Vec<String> = self.stages.keys().cloned().collect();
        for name in names {
            self.reload_stage(host, shaders, &name)?;
        }
        Ok(())
    }

    /// Releases every stage. The terminal card is detached, not destroyed.
    pub fn teardown<H: RenderHost + ?Sized>(&mut self, host: &mut H) {
        for stage in self.stages.values_mut() {
            stage.teardown(host);
        }
        self.stages.clear();
        self.common_inputs = self.sources.common_inputs.clone();
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn stage(&self, name: &str) -> Option<&FilterStage> {
        self.stages.get(name)
    }

    /// Stages in list order.
    pub fn stages(&self) -> impl Iterator<Item = &FilterStage> {
        self.stages.values()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn terminal(&self) -> Option<&FilterStage> {
        self.stages.values().find(|stage| stage.is_terminal())
    }

    /// Current descriptors, reflecting every runtime define and input change.
    pub fn descriptors(&self) -> Vec<StageDescriptor> {
        self.stages
            .values()
            .map(|stage| stage.descriptor.clone())
            .collect()
    }

    /// The inputs bound on every stage, stage outputs included.
    pub fn common_inputs(&self) -> &Inputs {
        &self.common_inputs
    }

    pub fn window_size(&self) -> UVec2 {
        self.window_size
    }

    pub fn lit_target(&self) -> TargetId {
        self.sources.lit_target
    }

    fn live(&self, name: &str) -> Result<&FilterStage> {
        self.stages
            .get(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------

    /// Compiles (or fetches) the stage's program and resolves every binding,
    /// without binding anything yet.
    fn resolve<H: RenderHost + ?Sized>(
        &self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        stage: &FilterStage,
    ) -> Result<(ShaderId, Vec<(String, ShaderValue)>)> {
        let descriptor = &stage.descriptor;
        let shader = shaders.load(host, &descriptor.shader, &descriptor.defines)?;

        let mut bindings = Vec::with_capacity(
            descriptor.inputs.len() + self.common_inputs.len() + descriptor.translate.len(),
        );
        for (name, value) in descriptor.inputs.iter().chain(&self.common_inputs) {
            bindings.push((name.clone(), resolve_value(host, value)?));
        }
        for (source, input) in &descriptor.translate {
            let output = self
                .stages
                .get(source)
                .and_then(|source_stage| source_stage.output)
                .ok_or_else(|| PipelineError::InvalidTranslation {
                    stage: stage.name().to_string(),
                    source_stage: source.clone(),
                })?;
            bindings.push((input.clone(), ShaderValue::Texture(output)));
        }
        Ok((shader, bindings))
    }

    /// Recompiles (or re-fetches) the stage's program and re-applies declared
    /// inputs, common inputs and translations.
    ///
    /// Nothing is bound unless the program and every texture resolved.
    pub fn reload_stage<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        name: &str,
    ) -> Result<()> {
        let stage = self.live(name)?;
        let quad = stage
            .quad
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        let (shader, bindings) = self.resolve(host, shaders, stage)?;

        host.set_shader(quad, shader);
        for (input, value) in bindings {
            host.set_shader_input(quad, &input, value);
        }
        if let Some(stage) = self.stages.get_mut(name) {
            stage.shader = Some(shader);
        }
        Ok(())
    }

    pub fn get_define(&self, name: &str, key: &str) -> Result<Option<DefineValue>> {
        Ok(self.live(name)?.descriptor.defines.get(key).copied())
    }

    /// Inserts, overwrites or (with `None`) removes a define and reloads the
    /// stage. A failed reload restores the previous define set.
    pub fn set_define<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        name: &str,
        key: &str,
        value: Option<DefineValue>,
    ) -> Result<()> {
        let stage = self
            .stages
            .get_mut(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        let previous = stage.descriptor.defines.clone();
        match value {
            Some(value) => {
                stage.descriptor.defines.insert(key.to_string(), value);
            }
            None => {
                stage.descriptor.defines.shift_remove(key);
            }
        }

        if let Err(err) = self.reload_stage(host, shaders, name) {
            log::warn!("Define {key} not applied to stage '{name}': {err}");
            if let Some(stage) = self.stages.get_mut(name) {
                stage.descriptor.defines = previous;
            }
            return Err(err);
        }
        Ok(())
    }

    /// The value currently bound on the stage's quad.
    pub fn get_input<H: RenderHost + ?Sized>(
        &self,
        host: &H,
        name: &str,
        key: &str,
    ) -> Result<Option<ShaderValue>> {
        let stage = self.live(name)?;
        Ok(stage.quad.and_then(|quad| host.shader_input(quad, key)))
    }

    /// Binds one input without a reload and records it in the descriptor.
    ///
    /// Texture paths are loaded with the policy their file name implies.
    /// Common inputs are not re-derived.
    pub fn set_input<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        name: &str,
        key: &str,
        value: impl Into<ShaderValue>,
    ) -> Result<()> {
        let value = value.into();
        let stage = self.live(name)?;
        let quad = stage
            .quad
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        let resolved = resolve_value(host, &value).inspect_err(|err| {
            log::warn!("Input '{key}' of stage '{name}' not applied: {err}");
        })?;

        host.set_shader_input(quad, key, resolved);
        if let Some(stage) = self.stages.get_mut(name) {
            stage.descriptor.inputs.insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Binds `combine(current, value)` where `current` is the declared value.
    ///
    /// ```ignore
    /// graph.set_input_with(&mut host, "fog", "dof_far", 5.0, |old, delta| old.offset_by(&delta))?;
    /// ```
    pub fn set_input_with<H, F>(
        &mut self,
        host: &mut H,
        name: &str,
        key: &str,
        value: impl Into<ShaderValue>,
        combine: F,
    ) -> Result<()>
    where
        H: RenderHost + ?Sized,
        F: FnOnce(&ShaderValue, ShaderValue) -> Option<ShaderValue>,
    {
        let current = self
            .live(name)?
            .descriptor
            .inputs
            .get(key)
            .ok_or_else(|| PipelineError::UnknownInput {
                stage: name.to_string(),
                input: key.to_string(),
            })?;
        let combined = combine(current, value.into()).ok_or_else(|| PipelineError::InputMismatch {
            stage: name.to_string(),
            input: key.to_string(),
        })?;
        self.set_input(host, name, key, combined)
    }

    // ------------------------------------------------------------------
    // Whole-graph operations
    // ------------------------------------------------------------------

    /// Replaces every stage with `descriptors`, carrying the directional
    /// light state of [`FINAL_LIGHT_STAGE`] over to the new list.
    ///
    /// The new list is validated first; an invalid list leaves the graph as
    /// it was. A resource failure while building leaves the graph empty.
    /// Stages are sized for the window of the last [`resize`](Self::resize).
    pub fn rebuild<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        descriptors: &[StageDescriptor],
    ) -> Result<()> {
        Self::validate(descriptors)?;
        let lights = self.capture_lights(host);
        self.teardown(host);

        *self = Self::build(host, shaders, descriptors, self.sources.clone(), self.window_size)?;
        self.restore_lights(host, shaders, lights)
    }

    fn capture_lights<H: RenderHost + ?Sized>(&self, host: &H) -> LightState {
        let Some(stage) = self.stages.get(FINAL_LIGHT_STAGE) else {
            return LightState::default();
        };
        let input = |key| stage.quad.and_then(|quad| host.shader_input(quad, key));
        LightState {
            num_lights: stage.descriptor.defines.get(NUM_LIGHTS).copied(),
            color: input("light_color"),
            direction: input("direction"),
        }
    }

    fn restore_lights<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        lights: LightState,
    ) -> Result<()> {
        if !self.stages.contains_key(FINAL_LIGHT_STAGE) {
            return Ok(());
        }
        self.set_define(host, shaders, FINAL_LIGHT_STAGE, NUM_LIGHTS, lights.num_lights)?;
        if let Some(color) = lights.color {
            self.set_input(host, FINAL_LIGHT_STAGE, "light_color", color)?;
        }
        if let Some(direction) = lights.direction {
            self.set_input(host, FINAL_LIGHT_STAGE, "direction", direction)?;
        }
        Ok(())
    }

    /// Resizes every off-screen stage in proportion to the window change.
    ///
    /// Each new size is `new_window * current_size / previous_window`, so a
    /// stage keeps the ratio it had rather than its declared factor. A stage
    /// whose target the host no longer knows is skipped.
    pub fn resize<H: RenderHost + ?Sized>(&mut self, host: &mut H, new_window: UVec2) -> Result<()> {
        if new_window.x == 0 || new_window.y == 0 || new_window == self.window_size {
            return Ok(());
        }
        let mut sizes = Vec::with_capacity(self.stages.len());
        for stage in self.stages.values() {
            let Some(target) = stage.target else {
                continue;
            };
            match host.target_size(target) {
                Some(current) => {
                    sizes.push((target, proportional_size(new_window, current, self.window_size)));
                }
                None => log::warn!("Stage '{}' lost its target {target:?}, not resizing it", stage.name()),
            }
        }
        self.window_size = new_window;
        for (target, size) in sizes {
            host.resize_target(target, size)?;
        }
        Ok(())
    }

    /// Reloads every stage built from one of the `changed` shader sources.
    ///
    /// A stage whose program no longer compiles keeps the previous one.
    /// Returns the names of the stages that reloaded.
    pub fn reload_sources<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        changed: &[PathBuf],
    ) -> Vec<String> {
        let affected: Vec<String> = self
            .stages
            .values()
            .filter(|stage| shaders.uses_any(&stage.descriptor.shader, changed))
            .map(|stage| stage.name().to_string())
            .collect();

        let mut reloaded = Vec::new();
        for name in affected {
            match self.reload_stage(host, shaders, &name) {
                Ok(()) => {
                    log::info!("Reloaded filter stage '{name}'");
                    reloaded.push(name);
                }
                Err(err) => log::warn!("Keeping previous program for stage '{name}': {err}"),
            }
        }
        reloaded
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec4};

    use super::*;
    use crate::error::HostError;
    use crate::headless::HeadlessHost;
    use crate::host::{Bitplane, TargetSpec, TextureFormat};
    use crate::test_support::{self, ShaderDir};
    use crate::texture_policy::{Filter, Wrap};

    struct Fixture {
        dir: ShaderDir,
        host: HeadlessHost,
        shaders: ShaderLibrary,
        sources: StageSources,
    }

    impl Fixture {
        fn new(names: &[&str]) -> Self {
            Self::with_host(names, test_support::host())
        }

        fn with_host(names: &[&str], mut host: HeadlessHost) -> Self {
            let dir = ShaderDir::new(names);
            let lit = host
                .create_target(&TargetSpec::tracking("light buffer", 0))
                .unwrap();
            let lit_tex = host
                .add_render_texture(lit, Bitplane::Color, TextureFormat::Rgba8)
                .unwrap();
            let mut common_inputs = Inputs::new();
            common_inputs.insert("lit_tex".into(), ShaderValue::Texture(lit_tex));
            common_inputs.insert("win_scale".into(), ShaderValue::Float(1.0));
            let shaders = dir.library();
            Self {
                dir,
                host,
                shaders,
                sources: StageSources {
                    common_inputs,
                    lit_target: lit,
                },
            }
        }

        fn build(&mut self, descriptors: &[StageDescriptor]) -> Result<FilterGraph> {
            let window = self.host.window_size();
            FilterGraph::build(
                &mut self.host,
                &mut self.shaders,
                descriptors,
                self.sources.clone(),
                window,
            )
        }

        fn filter_targets(&self) -> usize {
            self.host
                .offscreen_targets()
                .filter(|(_, state)| state.spec.name.starts_with("filter_stage_"))
                .count()
        }
    }

    fn three_stages() -> Vec<StageDescriptor> {
        vec![
            StageDescriptor::new("x").named("A"),
            StageDescriptor::new("y")
                .named("B")
                .size(0.5)
                .translate("A", "prev"),
            StageDescriptor::new("z").named("C").terminal(),
        ]
    }

    fn bound(f: &Fixture, graph: &FilterGraph, stage: &str, key: &str) -> Option<ShaderValue> {
        graph.get_input(&f.host, stage, key).unwrap()
    }

    #[test]
    fn builds_three_stage_scenario() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let graph = f.build(&three_stages()).unwrap();

        let a = graph.stage("A").unwrap();
        let b = graph.stage("B").unwrap();
        let c = graph.stage("C").unwrap();
        assert_eq!(f.host.target_size(a.target().unwrap()), Some(UVec2::new(800, 600)));
        assert_eq!(f.host.target_size(b.target().unwrap()), Some(UVec2::new(400, 300)));
        assert_eq!(
            bound(&f, &graph, "B", "prev"),
            Some(ShaderValue::Texture(a.output().unwrap()))
        );

        assert!(c.target().is_none());
        assert!(c.output().is_none());
        let card = c.quad().unwrap();
        assert_eq!(f.host.card_target(card), Some(f.sources.lit_target));
        assert_eq!(
            f.host.scene_node(card).unwrap().parent,
            Some(f.host.overlay_root())
        );
        assert_eq!(f.filter_targets(), 2);
    }

    #[test]
    fn stage_outputs_become_common_inputs() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let graph = f.build(&three_stages()).unwrap();
        let a_out = ShaderValue::Texture(graph.stage("A").unwrap().output().unwrap());

        assert_eq!(graph.common_inputs().get("A"), Some(&a_out));
        // every stage sees every output, the terminal one included
        assert_eq!(bound(&f, &graph, "C", "A"), Some(a_out.clone()));
        assert_eq!(bound(&f, &graph, "A", "A"), Some(a_out));
        assert_eq!(bound(&f, &graph, "C", "win_scale"), Some(ShaderValue::Float(1.0)));
    }

    #[test]
    fn later_bindings_win_on_collision() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let stages = vec![
            StageDescriptor::new("x").named("A").with_input("win_scale", 4.0),
            StageDescriptor::new("y")
                .named("B")
                .with_input("prev", 2.0)
                .translate("A", "prev"),
            StageDescriptor::new("z").terminal(),
        ];
        let graph = f.build(&stages).unwrap();

        // common beats declared
        assert_eq!(bound(&f, &graph, "A", "win_scale"), Some(ShaderValue::Float(1.0)));
        // translation beats declared
        let a_out = graph.stage("A").unwrap().output().unwrap();
        assert_eq!(bound(&f, &graph, "B", "prev"), Some(ShaderValue::Texture(a_out)));
    }

    #[test]
    fn forward_and_self_translations_allocate_nothing() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let nodes = f.host.node_count();
        let forward = vec![
            StageDescriptor::new("x").translate("y", "next"),
            StageDescriptor::new("y"),
            StageDescriptor::new("z").terminal(),
        ];
        let own = vec![
            StageDescriptor::new("x").translate("x", "me"),
            StageDescriptor::new("z").terminal(),
        ];
        let absent = vec![
            StageDescriptor::new("x"),
            StageDescriptor::new("z").translate("ghost", "g").terminal(),
        ];

        for list in [forward, own, absent] {
            let err = f.build(&list).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidTranslation { .. }), "{err}");
            assert!(err.is_configuration());
        }
        assert_eq!(f.filter_targets(), 0);
        assert_eq!(f.host.node_count(), nodes);
        assert_eq!(f.host.compile_count(), 0);
    }

    #[test]
    fn validation_rejects_bad_lists() {
        assert!(matches!(FilterGraph::validate(&[]), Err(PipelineError::EmptyGraph)));
        assert!(matches!(
            FilterGraph::validate(&[
                StageDescriptor::new("blur"),
                StageDescriptor::new("blur").terminal()
            ]),
            Err(PipelineError::DuplicateStage(name)) if name == "blur"
        ));
        assert!(matches!(
            FilterGraph::validate(&[StageDescriptor::new("ao"), StageDescriptor::new("fxaa")]),
            Err(PipelineError::MissingTerminal)
        ));
        assert!(matches!(
            FilterGraph::validate(&[
                StageDescriptor::new("ao").terminal(),
                StageDescriptor::new("fxaa")
            ]),
            Err(PipelineError::TerminalNotLast(name)) if name == "ao"
        ));
        assert!(matches!(
            FilterGraph::validate(&[
                StageDescriptor::new("ao").terminal(),
                StageDescriptor::new("fxaa").terminal()
            ]),
            Err(PipelineError::MultipleTerminals(..))
        ));
        assert!(FilterGraph::validate(&three_stages()).is_ok());
    }

    #[test]
    fn missing_shader_tears_down_partial_build() {
        let mut f = Fixture::new(&["x", "z"]);
        let nodes = f.host.node_count();
        let err = f.build(&three_stages()).unwrap_err();
        assert!(matches!(err, PipelineError::Shader(_)));
        assert!(!err.is_configuration());
        assert_eq!(f.filter_targets(), 0);
        // only the detached lit buffer card survives
        assert_eq!(f.host.node_count(), nodes + 1);
    }

    #[test]
    fn set_define_is_idempotent_and_reversible() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let mut graph = f.build(&three_stages()).unwrap();
        let original = graph.stage("B").unwrap().shader();
        let original_defines = graph.stage("B").unwrap().descriptor().defines.clone();

        let h = &mut f.host;
        let s = &mut f.shaders;
        graph.set_define(h, s, "B", "DISABLE_SSR", Some(1.into())).unwrap();
        let first = graph.stage("B").unwrap().shader();
        let compiles = h.compile_count();
        graph.set_define(h, s, "B", "DISABLE_SSR", Some(1.into())).unwrap();
        assert_eq!(graph.stage("B").unwrap().shader(), first);
        assert_eq!(h.compile_count(), compiles);
        assert_ne!(first, original);
        assert_eq!(graph.get_define("B", "DISABLE_SSR").unwrap(), Some(DefineValue::Int(1)));

        graph.set_define(h, s, "B", "DISABLE_SSR", None).unwrap();
        assert_eq!(graph.stage("B").unwrap().descriptor().defines, original_defines);
        assert_eq!(graph.stage("B").unwrap().shader(), original);
        assert_eq!(graph.get_define("B", "DISABLE_SSR").unwrap(), None);
    }

    #[test]
    fn failed_define_reload_leaves_stage_untouched() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let mut graph = f.build(&three_stages()).unwrap();
        let before = graph.stage("A").unwrap().shader();
        let quad = graph.stage("A").unwrap().quad().unwrap();

        f.host.reject_shaders_matching("x_v.glsl");
        let err = graph
            .set_define(&mut f.host, &mut f.shaders, "A", "FAST", Some(1.into()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Host(HostError::ShaderCompile { .. })));
        assert_eq!(graph.get_define("A", "FAST").unwrap(), None);
        assert_eq!(graph.stage("A").unwrap().shader(), before);
        assert_eq!(f.host.scene_node(quad).unwrap().shader, before);
    }

    #[test]
    fn texture_inputs_follow_path_policy() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let mut graph = f.build(&three_stages()).unwrap();
        graph
            .set_input(&mut f.host, "B", "lut_tex", "tex/lut_nearest_clamp.png")
            .unwrap();

        let Some(ShaderValue::Texture(id)) = bound(&f, &graph, "B", "lut_tex") else {
            panic!("lut_tex not bound as a texture");
        };
        let policy = f.host.texture(id).unwrap().policy.unwrap();
        assert_eq!(policy.filter, Filter::Nearest);
        assert_eq!(policy.wrap, Wrap::Clamp);
        assert_eq!(
            graph.stage("B").unwrap().descriptor().inputs.get("lut_tex"),
            Some(&ShaderValue::TexturePath("tex/lut_nearest_clamp.png".into()))
        );
    }

    #[test]
    fn unresolvable_texture_is_reported_and_not_bound() {
        let assets = tempfile::tempdir().unwrap();
        let host = test_support::host().with_asset_root(assets.path());
        let mut f = Fixture::with_host(&["x", "y", "z"], host);
        let mut graph = f.build(&three_stages()).unwrap();

        let err = graph
            .set_input(&mut f.host, "A", "noise_tex", "tex/missing.png")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Host(HostError::TextureLoad { .. })));
        assert_eq!(bound(&f, &graph, "A", "noise_tex"), None);
        assert!(graph.stage("A").unwrap().descriptor().inputs.get("noise_tex").is_none());
    }

    #[test]
    fn combined_inputs_adjust_declared_values() {
        let mut f = Fixture::new(&["fog", "z"]);
        let stages = vec![
            StageDescriptor::new("fog")
                .with_input("dof_far", 55.0)
                .with_input("fog_color", Vec4::ZERO)
                .with_input("steps", i32::MAX),
            StageDescriptor::new("z").terminal(),
        ];
        let mut graph = f.build(&stages).unwrap();
        let h = &mut f.host;

        graph
            .set_input_with(h, "fog", "dof_far", 5.0, |old, delta| old.offset_by(&delta))
            .unwrap();
        assert_eq!(graph.get_input(h, "fog", "dof_far").unwrap(), Some(ShaderValue::Float(60.0)));
        assert_eq!(
            graph.stage("fog").unwrap().descriptor().inputs.get("dof_far"),
            Some(&ShaderValue::Float(60.0))
        );

        assert!(matches!(
            graph.set_input_with(h, "fog", "dof_near", 1.0, |old, d| old.offset_by(&d)),
            Err(PipelineError::UnknownInput { .. })
        ));
        assert!(matches!(
            graph.set_input_with(h, "fog", "fog_color", Vec3::ONE, |old, d| old.offset_by(&d)),
            Err(PipelineError::InputMismatch { .. })
        ));
        assert!(matches!(
            graph.set_input_with(h, "fog", "steps", 1, |old, d| old.offset_by(&d)),
            Err(PipelineError::InputMismatch { .. })
        ));
        assert_eq!(
            graph.get_input(h, "fog", "steps").unwrap(),
            Some(ShaderValue::Int(i32::MAX))
        );
    }

    #[test]
    fn unknown_stage_is_reported() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let mut graph = f.build(&three_stages()).unwrap();
        let h = &mut f.host;
        let s = &mut f.shaders;

        assert!(matches!(graph.get_define("nope", "X"), Err(PipelineError::UnknownStage(_))));
        assert!(matches!(
            graph.set_define(h, s, "nope", "X", None),
            Err(PipelineError::UnknownStage(_))
        ));
        assert!(matches!(graph.get_input(h, "nope", "x"), Err(PipelineError::UnknownStage(_))));
        assert!(matches!(
            graph.set_input(h, "nope", "x", 1.0),
            Err(PipelineError::UnknownStage(_))
        ));
        assert!(matches!(
            graph.reload_stage(h, s, "nope"),
            Err(PipelineError::UnknownStage(_))
        ));
    }

    #[test]
    fn reload_is_idempotent() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let mut graph = f.build(&three_stages()).unwrap();
        let compiles = f.host.compile_count();
        let quad = graph.stage("B").unwrap().quad().unwrap();
        let before = f.host.scene_node(quad).unwrap();

        graph.reload_stage(&mut f.host, &mut f.shaders, "B").unwrap();
        graph.reload_stage(&mut f.host, &mut f.shaders, "B").unwrap();
        assert_eq!(f.host.scene_node(quad).unwrap(), before);
        assert_eq!(f.host.compile_count(), compiles);
    }

    #[test]
    fn resize_is_relative_to_previous_size() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let stages = vec![
            StageDescriptor::new("x").size(0.5),
            StageDescriptor::new("y").size(0.33),
            StageDescriptor::new("z").terminal(),
        ];
        let mut graph = f.build(&stages).unwrap();
        let half = graph.stage("x").unwrap().target().unwrap();
        let third = graph.stage("y").unwrap().target().unwrap();
        assert_eq!(f.host.target_size(third), Some(UVec2::new(264, 198)));

        graph.resize(&mut f.host, UVec2::new(1000, 700)).unwrap();
        assert_eq!(f.host.target_size(half), Some(UVec2::new(500, 350)));
        // round(1000 * 264 / 800), round(700 * 198 / 600)
        assert_eq!(f.host.target_size(third), Some(UVec2::new(330, 231)));
        assert_eq!(graph.window_size(), UVec2::new(1000, 700));

        // zero and unchanged sizes are ignored
        graph.resize(&mut f.host, UVec2::new(0, 700)).unwrap();
        graph.resize(&mut f.host, UVec2::new(1000, 700)).unwrap();
        assert_eq!(f.host.target_size(half), Some(UVec2::new(500, 350)));
    }

    #[test]
    fn rebuild_after_resize_uses_the_new_window() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let mut graph = f.build(&three_stages()).unwrap();
        graph.resize(&mut f.host, UVec2::new(1000, 700)).unwrap();

        graph.rebuild(&mut f.host, &mut f.shaders, &three_stages()).unwrap();
        let b = graph.stage("B").unwrap().target().unwrap();
        assert_eq!(f.host.target_size(b), Some(UVec2::new(500, 350)));
        assert_eq!(graph.window_size(), UVec2::new(1000, 700));
    }

    #[test]
    fn resize_skips_targets_the_host_lost() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let mut graph = f.build(&three_stages()).unwrap();
        let a = graph.stage("A").unwrap().target().unwrap();
        let b = graph.stage("B").unwrap().target().unwrap();
        f.host.release_target(a);

        graph.resize(&mut f.host, UVec2::new(1000, 700)).unwrap();
        assert_eq!(f.host.target_size(b), Some(UVec2::new(500, 350)));
        assert_eq!(graph.window_size(), UVec2::new(1000, 700));

        graph.resize(&mut f.host, UVec2::new(800, 600)).unwrap();
        assert_eq!(f.host.target_size(b), Some(UVec2::new(400, 300)));
    }

    #[test]
    fn rebuild_carries_directional_light_state() {
        let mut f = Fixture::new(&["dir_light", "blur", "fxaa"]);
        let first = vec![
            StageDescriptor::new("dir_light")
                .named(FINAL_LIGHT_STAGE)
                .with_input("light_color", Vec3::ZERO)
                .with_input("direction", Vec3::ZERO),
            StageDescriptor::new("blur"),
            StageDescriptor::new("fxaa").terminal(),
        ];
        let mut graph = f.build(&first).unwrap();
        let card = graph.terminal().unwrap().quad().unwrap();
        let h = &mut f.host;
        let s = &mut f.shaders;

        let colors = vec![Vec3::X, Vec3::Y];
        graph.set_define(h, s, FINAL_LIGHT_STAGE, NUM_LIGHTS, Some(2.into())).unwrap();
        graph.set_input(h, FINAL_LIGHT_STAGE, "light_color", colors.clone()).unwrap();
        graph.set_input(h, FINAL_LIGHT_STAGE, "direction", vec![Vec3::Z, Vec3::NEG_Z]).unwrap();

        let second = vec![
            StageDescriptor::new("dir_light")
                .named(FINAL_LIGHT_STAGE)
                .with_input("light_color", Vec3::ZERO)
                .with_input("direction", Vec3::ZERO),
            StageDescriptor::new("fxaa").terminal(),
        ];
        graph.rebuild(h, s, &second).unwrap();

        assert_eq!(graph.len(), 2);
        assert!(graph.stage("blur").is_none());
        assert_eq!(
            graph.get_define(FINAL_LIGHT_STAGE, NUM_LIGHTS).unwrap(),
            Some(DefineValue::Int(2))
        );
        assert_eq!(
            graph.get_input(h, FINAL_LIGHT_STAGE, "light_color").unwrap(),
            Some(ShaderValue::Vec3Array(colors))
        );
        assert_eq!(graph.terminal().unwrap().quad(), Some(card));
        assert_eq!(f.filter_targets(), 1);
    }

    #[test]
    fn invalid_rebuild_keeps_current_graph() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let mut graph = f.build(&three_stages()).unwrap();
        let err = graph
            .rebuild(&mut f.host, &mut f.shaders, &[StageDescriptor::new("x")])
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingTerminal));
        assert_eq!(graph.len(), 3);
        assert_eq!(f.filter_targets(), 2);
    }

    #[test]
    fn hot_reload_recompiles_affected_stages() {
        let mut f = Fixture::new(&["x", "y", "z"]);
        let mut graph = f.build(&three_stages()).unwrap();
        let before = graph.stage("B").unwrap().shader();

        f.dir.touch("y", "// tweak\n");
        let changed = f.shaders.check_modified();
        let reloaded = graph.reload_sources(&mut f.host, &mut f.shaders, &changed);
        assert_eq!(reloaded, vec!["B".to_string()]);
        assert_ne!(graph.stage("B").unwrap().shader(), before);

        // a broken edit keeps the last working program
        let working = graph.stage("B").unwrap().shader();
        f.host.reject_shaders_matching("y_f.glsl");
        f.dir.touch("y", "syntax error\n");
        let changed = f.shaders.check_modified();
        assert!(graph.reload_sources(&mut f.host, &mut f.shaders, &changed).is_empty());
        assert_eq!(graph.stage("B").unwrap().shader(), working);
    }
}
