//! Built-in quality presets.
//!
//! Each preset names a set of shading defines (compiled into the geometry,
//! light and forward programs) and a filter chain.
//!
//! | preset    | shading defines                                       | filters |
//! |-----------|-------------------------------------------------------|---------|
//! | `custom`  | none                                                  | ao, final_light, bloom, bloom_blur, pre_aa, fxaa |
//! | `full`    | none                                                  | ao, final_light, fog, ssr, bloom, bloom_blur, compose, pre_aa, fxaa |
//! | `medium`  | `DISABLE_POM`, `DISABLE_SOFTSHADOW`                   | ao (half size), final_light, fog, bloom, bloom_blur, compose, fxaa |
//! | `minimal` | `DISABLE_POM`, `DISABLE_SOFTSHADOW`, `DISABLE_NORMALMAP` | final_light, compose, fxaa |

use std::fmt;
use std::str::FromStr;

use glam::{Vec3, Vec4};

use crate::error::ConfigError;
use crate::filter_graph::{FINAL_LIGHT_STAGE, StageDescriptor};
use crate::value::{DefineValue, Defines};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Preset {
    Custom,
    Full,
    #[default]
    Medium,
    Minimal,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Preset::Custom, Preset::Full, Preset::Medium, Preset::Minimal];

    pub fn name(self) -> &'static str {
        match self {
            Preset::Custom => "custom",
            Preset::Full => "full",
            Preset::Medium => "medium",
            Preset::Minimal => "minimal",
        }
    }

    /// Defines for the geometry, light and forward programs.
    pub fn shading(self) -> Defines {
        let flags: &[&str] = match self {
            Preset::Custom | Preset::Full => &[],
            Preset::Medium => &["DISABLE_POM", "DISABLE_SOFTSHADOW"],
            Preset::Minimal => &["DISABLE_POM", "DISABLE_SOFTSHADOW", "DISABLE_NORMALMAP"],
        };
        flags
            .iter()
            .map(|flag| (flag.to_string(), DefineValue::Int(1)))
            .collect()
    }

    /// The filter chain, ending in a terminal `fxaa` stage.
    pub fn filter_stages(self) -> Vec<StageDescriptor> {
        match self {
            Preset::Custom => vec![
                ambient_occlusion(),
                final_light(),
                bloom(2.0),
                bloom_blur(3.0).translate("bloom", "input_tex"),
                compose()
                    .named("pre_aa")
                    .translate(FINAL_LIGHT_STAGE, "final_color")
                    .with_define("DISABLE_SSR", 1),
                fxaa(),
            ],
            Preset::Full => vec![
                ambient_occlusion(),
                final_light(),
                fog(Vec4::ZERO, Vec4::new(25.0, 60.0, 2.0, 1.0), 3.0, 55.0),
                StageDescriptor::new("ssr"),
                bloom(2.0),
                bloom_blur(4.0).translate("bloom", "input_tex"),
                compose().translate("fog", "final_color"),
                StageDescriptor::new("dof").named("pre_aa").with_input("blur", 4.0),
                fxaa(),
            ],
            Preset::Medium => vec![
                ambient_occlusion().size(0.5),
                final_light(),
                fog(
                    Vec4::new(0.1, 0.1, 0.1, 0.0),
                    Vec4::new(1.0, 100.0, 2.0, 1.0),
                    0.5,
                    60.0,
                ),
                bloom(5.0),
                bloom_blur(3.0),
                compose()
                    .translate("fog", "final_color")
                    .with_define("DISABLE_SSR", 1),
                fxaa().translate("compose", "pre_aa"),
            ],
            Preset::Minimal => vec![
                final_light(),
                compose()
                    .translate(FINAL_LIGHT_STAGE, "final_color")
                    .with_define("DISABLE_SSR", 1)
                    .with_define("DISABLE_AO", 1)
                    .with_define("DISABLE_BLOOM", 1)
                    .with_define("DISABLE_LUT", 1)
                    .with_define("DISABLE_DITHERING", 1),
                fxaa().translate("compose", "pre_aa"),
            ],
        }
    }
}

fn ambient_occlusion() -> StageDescriptor {
    StageDescriptor::new("ao")
        .with_input("random_tex", "tex/random.png")
        .with_input("random_size", 64.0)
        .with_input("sample_rad", 0.4)
        .with_input("intensity", 10.0)
        .with_input("scale", 0.9)
        .with_input("bias", 0.4)
        .with_input("fade_distance", 80.0)
}

fn final_light() -> StageDescriptor {
    StageDescriptor::new("dir_light")
        .named(FINAL_LIGHT_STAGE)
        .with_define("HALFLAMBERT", 2.0)
        .with_input("light_color", Vec3::ZERO)
        .with_input("direction", Vec3::ZERO)
}

fn fog(color: Vec4, config: Vec4, dof_near: f32, dof_far: f32) -> StageDescriptor {
    // fog_config: start, stop, power, mix
    StageDescriptor::new("fog")
        .with_input("fog_color", color)
        .with_input("fog_config", config)
        .with_input("dof_near", dof_near)
        .with_input("dof_far", dof_far)
}

fn bloom(glow_power: f32) -> StageDescriptor {
    StageDescriptor::new("bloom")
        .size(0.5)
        .with_input("glow_power", glow_power)
}

fn bloom_blur(blur: f32) -> StageDescriptor {
    StageDescriptor::new("blur")
        .named("bloom_blur")
        .with_input("blur", blur)
        .size(0.5)
}

fn compose() -> StageDescriptor {
    StageDescriptor::new("mix")
        .named("compose")
        .with_input("lut_tex", "tex/lut_v1.png")
        .with_input("noise_tex", "tex/noise.png")
}

fn fxaa() -> StageDescriptor {
    StageDescriptor::new("fxaa")
        .with_input("span_max", 2.0)
        .with_input("reduce_mul", 1.0 / 16.0)
        .with_input("subpix_shift", 1.0 / 8.0)
        .terminal()
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownPreset(s.to_string()))
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_graph::FilterGraph;
    use crate::value::ShaderValue;

    #[test]
    fn every_preset_is_a_valid_graph() {
        for preset in Preset::ALL {
            let stages = preset.filter_stages();
            FilterGraph::validate(&stages).unwrap();
            assert_eq!(stages.last().map(|s| s.display_name()), Some("fxaa"), "{preset}");
            assert!(stages.iter().any(|s| s.display_name() == FINAL_LIGHT_STAGE));
        }
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("Minimal".parse::<Preset>().unwrap(), Preset::Minimal);
        assert_eq!(" full ".parse::<Preset>().unwrap(), Preset::Full);
        assert!(matches!("ultra".parse::<Preset>(), Err(ConfigError::UnknownPreset(_))));
    }

    #[test]
    fn shading_defines_grow_with_lower_quality() {
        assert!(Preset::Full.shading().is_empty());
        assert_eq!(Preset::Medium.shading().len(), 2);
        let minimal = Preset::Minimal.shading();
        assert_eq!(minimal.get("DISABLE_NORMALMAP"), Some(&DefineValue::Int(1)));
    }

    #[test]
    fn medium_chain_matches_its_layout() {
        let stages = Preset::Medium.filter_stages();
        let names: Vec<&str> = stages.iter().map(|s| s.display_name()).collect();
        assert_eq!(
            names,
            ["ao", "final_light", "fog", "bloom", "bloom_blur", "compose", "fxaa"]
        );
        assert_eq!(stages[0].size_factor, 0.5);
        assert!(stages[4].translate.is_empty());
        assert_eq!(stages[6].translate.get("compose").map(String::as_str), Some("pre_aa"));
        assert_eq!(stages[3].inputs.get("glow_power"), Some(&ShaderValue::Float(5.0)));
    }
}
