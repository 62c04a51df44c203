use glam::Vec3;
use indexmap::IndexMap;

use crate::error::Result;
use crate::filter_graph::{FINAL_LIGHT_STAGE, FilterGraph};
use crate::host::RenderHost;
use crate::shader_library::ShaderLibrary;
use crate::value::{DefineValue, ShaderValue};

const NUM_LIGHTS: &str = "NUM_LIGHTS";

/// One directional light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub direction: Vec3,
    pub shadow_size: u32,
}

/// Every directional light in the scene, folded into the `final_light`
/// filter stage.
///
/// | lights | `NUM_LIGHTS` | `light_color` / `direction` |
/// |--------|--------------|-----------------------------|
/// | 0      | unset        | `Vec3::ZERO`                |
/// | 1      | unset        | `Vec3`                      |
/// | n > 1  | `n`          | `Vec3Array` of length n     |
///
/// Lights keep insertion order, so array slot `i` is the `i`-th light added.
#[derive(Clone, Debug, Default)]
pub struct SceneLight {
    lights: IndexMap<String, DirectionalLight>,
}

impl SceneLight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DirectionalLight> {
        self.lights.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lights.keys().map(String::as_str)
    }

    /// Adds (or replaces) a light and re-applies the aggregate.
    ///
    /// If the stage cannot be updated the light is not kept.
    pub fn add_light<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        graph: &mut FilterGraph,
        name: &str,
        light: DirectionalLight,
    ) -> Result<()> {
        let previous = self.lights.insert(name.to_string(), light);
        if let Err(err) = self.apply(host, shaders, graph) {
            match previous {
                Some(previous) => {
                    self.lights.insert(name.to_string(), previous);
                }
                None => {
                    self.lights.shift_remove(name);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Removes a light. Returns `false` if there was no light by that name.
    pub fn remove_light<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        graph: &mut FilterGraph,
        name: &str,
    ) -> Result<bool> {
        let Some(index) = self.lights.get_index_of(name) else {
            return Ok(false);
        };
        let Some((key, removed)) = self.lights.shift_remove_index(index) else {
            return Ok(false);
        };
        if let Err(err) = self.apply(host, shaders, graph) {
            self.lights.shift_insert(index, key, removed);
            return Err(err);
        }
        Ok(true)
    }

    /// Changes one light's colour. Returns `false` for an unknown name.
    ///
    /// If the stage cannot be updated the light keeps its old colour.
    pub fn set_color<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        graph: &mut FilterGraph,
        name: &str,
        color: Vec3,
    ) -> Result<bool> {
        self.update_field(host, graph, name, "light_color", |light| &mut light.color, color)
    }

    /// Changes one light's direction. Returns `false` for an unknown name.
    ///
    /// If the stage cannot be updated the light keeps its old direction.
    pub fn set_direction<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        graph: &mut FilterGraph,
        name: &str,
        direction: Vec3,
    ) -> Result<bool> {
        self.update_field(host, graph, name, "direction", |light| &mut light.direction, direction)
    }

    fn update_field<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        graph: &mut FilterGraph,
        name: &str,
        input: &str,
        field: fn(&mut DirectionalLight) -> &mut Vec3,
        value: Vec3,
    ) -> Result<bool> {
        let Some(light) = self.lights.get_mut(name) else {
            return Ok(false);
        };
        let old = std::mem::replace(field(light), value);
        let packed = self.pack(|light| {
            let mut copy = *light;
            *field(&mut copy)
        });
        if let Err(err) = graph.set_input(host, FINAL_LIGHT_STAGE, input, packed) {
            if let Some(light) = self.lights.get_mut(name) {
                *field(light) = old;
            }
            return Err(err);
        }
        Ok(true)
    }

    /// Removes every light.
    pub fn clear<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        graph: &mut FilterGraph,
    ) -> Result<()> {
        self.lights.clear();
        self.apply(host, shaders, graph)
    }

    /// Re-applies the aggregate, e.g. after the filter graph was replaced.
    pub fn apply<H: RenderHost + ?Sized>(
        &self,
        host: &mut H,
        shaders: &mut ShaderLibrary,
        graph: &mut FilterGraph,
    ) -> Result<()> {
        let count = match self.lights.len() {
            0 | 1 => None,
            n => Some(DefineValue::from(n)),
        };
        if graph.get_define(FINAL_LIGHT_STAGE, NUM_LIGHTS)? != count {
            graph.set_define(host, shaders, FINAL_LIGHT_STAGE, NUM_LIGHTS, count)?;
        }
        graph.set_input(host, FINAL_LIGHT_STAGE, "light_color", self.colors())?;
        graph.set_input(host, FINAL_LIGHT_STAGE, "direction", self.directions())?;
        Ok(())
    }

    fn colors(&self) -> ShaderValue {
        self.pack(|light| light.color)
    }

    fn directions(&self) -> ShaderValue {
        self.pack(|light| light.direction)
    }

    fn pack(&self, field: impl Fn(&DirectionalLight) -> Vec3) -> ShaderValue {
        let mut values: Vec<Vec3> = self.lights.values().map(field).collect();
        match values.len() {
            0 => ShaderValue::Vec3(Vec3::ZERO),
            1 => ShaderValue::Vec3(values.remove(0)),
            _ => ShaderValue::Vec3Array(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_graph::{StageDescriptor, StageSources};
    use crate::headless::HeadlessHost;
    use crate::host::TargetSpec;
    use crate::test_support::{ShaderDir, host};
    use crate::value::Inputs;

    struct Fixture {
        _dir: ShaderDir,
        host: HeadlessHost,
        shaders: ShaderLibrary,
        graph: FilterGraph,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = ShaderDir::new(&["dir_light", "fxaa"]);
            let mut host = host();
            let mut shaders = dir.library();
            let lit_target = host.create_target(&TargetSpec::tracking("light buffer", 0)).unwrap();
            let stages = [
                StageDescriptor::new("dir_light")
                    .named(FINAL_LIGHT_STAGE)
                    .with_input("light_color", Vec3::ZERO)
                    .with_input("direction", Vec3::ZERO),
                StageDescriptor::new("fxaa").terminal(),
            ];
            let sources = StageSources {
                common_inputs: Inputs::new(),
                lit_target,
            };
            let window = host.window_size();
            let graph = FilterGraph::build(&mut host, &mut shaders, &stages, sources, window).unwrap();
            Self {
                _dir: dir,
                host,
                shaders,
                graph,
            }
        }

        fn add(&mut self, lights: &mut SceneLight, name: &str, color: Vec3) {
            let light = DirectionalLight {
                color,
                direction: Vec3::NEG_Z,
                shadow_size: 1024,
            };
            lights
                .add_light(&mut self.host, &mut self.shaders, &mut self.graph, name, light)
                .unwrap();
        }

        fn input(&self, key: &str) -> Option<ShaderValue> {
            self.graph.get_input(&self.host, FINAL_LIGHT_STAGE, key).unwrap()
        }

        fn num_lights(&self) -> Option<DefineValue> {
            self.graph.get_define(FINAL_LIGHT_STAGE, NUM_LIGHTS).unwrap()
        }
    }

    #[test]
    fn one_light_binds_scalars() {
        let mut f = Fixture::new();
        let mut lights = SceneLight::new();
        f.add(&mut lights, "sun", Vec3::ONE);
        assert_eq!(f.num_lights(), None);
        assert_eq!(f.input("light_color"), Some(ShaderValue::Vec3(Vec3::ONE)));
        assert_eq!(f.input("direction"), Some(ShaderValue::Vec3(Vec3::NEG_Z)));
    }

    #[test]
    fn many_lights_bind_arrays_in_insertion_order() {
        let mut f = Fixture::new();
        let mut lights = SceneLight::new();
        f.add(&mut lights, "sun", Vec3::X);
        f.add(&mut lights, "moon", Vec3::Y);
        f.add(&mut lights, "rim", Vec3::Z);
        assert_eq!(f.num_lights(), Some(DefineValue::Int(3)));
        assert_eq!(
            f.input("light_color"),
            Some(ShaderValue::Vec3Array(vec![Vec3::X, Vec3::Y, Vec3::Z]))
        );

        lights
            .set_color(&mut f.host, &mut f.graph, "moon", Vec3::ONE)
            .unwrap();
        assert_eq!(
            f.input("light_color"),
            Some(ShaderValue::Vec3Array(vec![Vec3::X, Vec3::ONE, Vec3::Z]))
        );
    }

    #[test]
    fn removing_lights_walks_back_down() {
        let mut f = Fixture::new();
        let mut lights = SceneLight::new();
        f.add(&mut lights, "sun", Vec3::X);
        f.add(&mut lights, "moon", Vec3::Y);
        assert_eq!(f.num_lights(), Some(DefineValue::Int(2)));

        let removed = lights
            .remove_light(&mut f.host, &mut f.shaders, &mut f.graph, "sun")
            .unwrap();
        assert!(removed);
        assert_eq!(f.num_lights(), None);
        assert_eq!(f.input("light_color"), Some(ShaderValue::Vec3(Vec3::Y)));

        lights
            .remove_light(&mut f.host, &mut f.shaders, &mut f.graph, "moon")
            .unwrap();
        assert!(lights.is_empty());
        assert_eq!(f.num_lights(), None);
        assert_eq!(f.input("light_color"), Some(ShaderValue::Vec3(Vec3::ZERO)));
        assert_eq!(f.input("direction"), Some(ShaderValue::Vec3(Vec3::ZERO)));
    }

    #[test]
    fn unknown_names_are_reported() {
        let mut f = Fixture::new();
        let mut lights = SceneLight::new();
        let removed = lights
            .remove_light(&mut f.host, &mut f.shaders, &mut f.graph, "nope")
            .unwrap();
        assert!(!removed);
        assert!(!lights.set_direction(&mut f.host, &mut f.graph, "nope", Vec3::X).unwrap());
    }

    #[test]
    fn failed_updates_leave_lights_unchanged() {
        let mut f = Fixture::new();
        let mut lights = SceneLight::new();
        f.add(&mut lights, "sun", Vec3::X);
        f.graph
            .rebuild(&mut f.host, &mut f.shaders, &[StageDescriptor::new("fxaa").terminal()])
            .unwrap();

        let result = lights.set_color(&mut f.host, &mut f.graph, "sun", Vec3::Y);
        assert!(matches!(result, Err(crate::PipelineError::UnknownStage(_))));
        let result = lights.set_direction(&mut f.host, &mut f.graph, "sun", Vec3::Z);
        assert!(matches!(result, Err(crate::PipelineError::UnknownStage(_))));

        let sun = lights.get("sun").unwrap();
        assert_eq!(sun.color, Vec3::X);
        assert_eq!(sun.direction, Vec3::NEG_Z);
    }

    #[test]
    fn failed_define_reload_keeps_the_old_set() {
        let mut f = Fixture::new();
        let mut lights = SceneLight::new();
        f.add(&mut lights, "sun", Vec3::X);
        f.host.reject_shaders_matching("dir_light");

        let light = DirectionalLight {
            color: Vec3::Y,
            direction: Vec3::Z,
            shadow_size: 512,
        };
        let result = lights.add_light(&mut f.host, &mut f.shaders, &mut f.graph, "moon", light);
        assert!(result.is_err());
        assert_eq!(lights.len(), 1);
        assert_eq!(f.num_lights(), None);
        assert_eq!(f.input("light_color"), Some(ShaderValue::Vec3(Vec3::X)));
    }
}
