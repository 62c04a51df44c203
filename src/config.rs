//! The persisted graphics configuration.
//!
//! An INI file with one section per filter stage plus two fixed sections:
//!
//! ```ini
//! [SHADOWS]
//! size = 256
//!
//! [SETUP]
//! disable_pom = 1
//!
//! [0]
//! shader = ao
//! size = 0.5
//! inputs = random_tex : tex/random.png
//! 	sample_rad : 0.4
//!
//! [1]
//! name = final_light
//! shader = dir_light
//! define = HALFLAMBERT : 2.0
//! ```
//!
//! - Keys are case-insensitive; `SETUP` keys are upper-cased on read.
//! - `inputs`, `define` and `translate_tex_name` hold one `key : value` pair
//!   per line; continuation lines are indented.
//! - Comma separated values are 2, 3 or 4 component vectors. Other values
//!   are tried as an integer, then a float, and are otherwise a texture path.
//! - Resolved textures, nodes and light arrays cannot be written and are
//!   skipped with a warning.
//! - A file without any `terminal` key gets its last stage marked terminal.

use std::fmt;
use std::fs;
use std::path::Path;

use configparser::ini::Ini;
use glam::{Vec2, Vec3, Vec4};
use indexmap::IndexMap;

use crate::error::ConfigError;
use crate::filter_graph::StageDescriptor;
use crate::presets::Preset;
use crate::value::{DefineValue, Defines, ShaderValue};

/// Shadow map size when `[SHADOWS]` is absent.
pub const DEFAULT_SHADOW_SIZE: u32 = 256;

const SHADOWS: &str = "SHADOWS";
const SETUP: &str = "SETUP";

/// Filter chain, shading defines and shadow size, as stored on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphicsConfig {
    pub stages: Vec<StageDescriptor>,
    pub shading: Defines,
    pub shadow_size: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self::from_preset(Preset::default())
    }
}

impl GraphicsConfig {
    pub fn from_preset(preset: Preset) -> Self {
        Self {
            stages: preset.filter_stages(),
            shading: preset.shading(),
            shadow_size: DEFAULT_SHADOW_SIZE,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text)?;
        log::info!(
            "Loaded graphics config {} ({} stages)",
            path.display(),
            config.stages.len()
        );
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        fs::write(path, self.to_ini_string()).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Saved graphics config to {}", path.display());
        Ok(())
    }

    pub fn to_ini_string(&self) -> String {
        self.to_string()
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self {
            stages: Vec::new(),
            shading: Defines::new(),
            shadow_size: DEFAULT_SHADOW_SIZE,
        };
        let mut stages = Vec::new();

        for (section, entries) in read_sections(text)? {
            match section.as_str() {
                SHADOWS => {
                    if let Some(size) = entries.get("size") {
                        config.shadow_size = size.parse().map_err(|_| ConfigError::InvalidValue {
                            section: section.clone(),
                            key: "size".into(),
                            message: format!("'{size}' is not a shadow map size"),
                        })?;
                    }
                }
                SETUP => {
                    for (key, value) in &entries {
                        let define = decode_define(value).ok_or_else(|| ConfigError::InvalidValue {
                            section: section.clone(),
                            key: key.clone(),
                            message: format!("'{value}' is not a number"),
                        })?;
                        config.shading.insert(key.to_uppercase(), define);
                    }
                }
                _ => {
                    let index: usize = section
                        .parse()
                        .map_err(|_| ConfigError::UnknownSection(section.clone()))?;
                    stages.push((index, decode_stage(&section, &entries)?));
                }
            }
        }

        stages.sort_by_key(|(index, _)| *index);
        config.stages = stages.into_iter().map(|(_, stage)| stage).collect();
        if !config.stages.iter().any(|stage| stage.terminal) {
            if let Some(last) = config.stages.last_mut() {
                last.terminal = true;
            }
        }
        Ok(config)
    }
}

impl fmt::Display for GraphicsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{SHADOWS}]")?;
        writeln!(f, "size = {}", self.shadow_size)?;
        writeln!(f)?;

        writeln!(f, "[{SETUP}]")?;
        for (key, value) in &self.shading {
            writeln!(f, "{} = {value}", key.to_lowercase())?;
        }

        for (index, stage) in self.stages.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "[{index}]")?;
            if let Some(name) = &stage.name {
                writeln!(f, "name = {name}")?;
            }
            writeln!(f, "shader = {}", stage.shader)?;
            if stage.size_factor != 1.0 {
                writeln!(f, "size = {:?}", stage.size_factor)?;
            }
            match stage.clear_color {
                Some(color) if color == Vec4::ZERO => {}
                Some(color) => writeln!(f, "clear_color = {}", join(&color.to_array()))?,
                None => writeln!(f, "clear_color = none")?,
            }

            let mut inputs = Vec::new();
            for (key, value) in &stage.inputs {
                match encode_value(value) {
                    Some(text) => inputs.push((key.as_str(), text)),
                    None => log::warn!(
                        "Input '{key}' of stage '{}' cannot be persisted, skipping it",
                        stage.display_name()
                    ),
                }
            }
            write_map(f, "inputs", inputs)?;
            write_map(
                f,
                "define",
                stage.defines.iter().map(|(k, v)| (k.as_str(), v.to_string())).collect(),
            )?;
            write_map(
                f,
                "translate_tex_name",
                stage.translate.iter().map(|(k, v)| (k.as_str(), v.clone())).collect(),
            )?;
            if stage.terminal {
                writeln!(f, "terminal = true")?;
            }
        }
        Ok(())
    }
}

fn write_map(f: &mut fmt::Formatter<'_>, key: &str, entries: Vec<(&str, String)>) -> fmt::Result {
    for (i, (name, value)) in entries.iter().enumerate() {
        if i == 0 {
            writeln!(f, "{key} = {name} : {value}")?;
        } else {
            writeln!(f, "\t{name} : {value}")?;
        }
    }
    Ok(())
}

fn join(components: &[f32]) -> String {
    components
        .iter()
        .map(|c| format!("{c:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn encode_value(value: &ShaderValue) -> Option<String> {
    match value {
        ShaderValue::Float(v) => Some(format!("{v:?}")),
        ShaderValue::Int(v) => Some(v.to_string()),
        ShaderValue::Vec2(v) => Some(join(&v.to_array())),
        ShaderValue::Vec3(v) => Some(join(&v.to_array())),
        ShaderValue::Vec4(v) => Some(join(&v.to_array())),
        ShaderValue::TexturePath(path) => Some(path.clone()),
        ShaderValue::Vec3Array(_) | ShaderValue::Texture(_) | ShaderValue::Node(_) => None,
    }
}

/// Decodes one value: a vector when comma separated, else int, float or path.
fn decode_value(text: &str) -> Result<ShaderValue, String> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.len() == 1 {
        let text = parts[0];
        if let Ok(v) = text.parse::<i32>() {
            return Ok(ShaderValue::Int(v));
        }
        if let Ok(v) = text.parse::<f32>() {
            return Ok(ShaderValue::Float(v));
        }
        return Ok(ShaderValue::TexturePath(text.to_string()));
    }

    let lanes = parts
        .iter()
        .map(|part| part.parse::<f32>())
        .collect::<Result<Vec<f32>, _>>()
        .map_err(|_| format!("'{text}' is not a numeric vector"))?;
    match lanes[..] {
        [x, y] => Ok(ShaderValue::Vec2(Vec2::new(x, y))),
        [x, y, z] => Ok(ShaderValue::Vec3(Vec3::new(x, y, z))),
        [x, y, z, w] => Ok(ShaderValue::Vec4(Vec4::new(x, y, z, w))),
        _ => Err(format!("'{text}' has {} components, expected 2 to 4", lanes.len())),
    }
}

fn decode_define(text: &str) -> Option<DefineValue> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Some(DefineValue::Int(v));
    }
    text.parse::<f64>().ok().map(DefineValue::Float)
}

fn decode_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a nested `key : value` block into pairs.
fn nested_pairs<'a>(
    section: &str,
    key: &str,
    block: &'a str,
) -> Result<Vec<(&'a str, &'a str)>, ConfigError> {
    block
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split_once(':')
                .map(|(name, value)| (name.trim(), value.trim()))
                .ok_or_else(|| ConfigError::InvalidValue {
                    section: section.to_string(),
                    key: key.to_string(),
                    message: format!("'{line}' is not a 'name : value' pair"),
                })
        })
        .collect()
}

fn decode_stage(section: &str, entries: &IndexMap<String, String>) -> Result<StageDescriptor, ConfigError> {
    let invalid = |key: &str, message: String| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        message,
    };
    let shader = entries
        .get("shader")
        .ok_or_else(|| ConfigError::MissingShader(section.to_string()))?;
    let mut stage = StageDescriptor::new(shader);

    for (key, value) in entries {
        match key.as_str() {
            "shader" => {}
            "name" => stage.name = Some(value.clone()),
            "size" => {
                stage.size_factor = value
                    .parse()
                    .map_err(|_| invalid(key, format!("'{value}' is not a size factor")))?;
            }
            "clear_color" => {
                stage.clear_color = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    match decode_value(value).map_err(|message| invalid(key, message))? {
                        ShaderValue::Vec4(color) => Some(color),
                        _ => return Err(invalid(key, format!("'{value}' is not an RGBA colour"))),
                    }
                };
            }
            "terminal" => {
                stage.terminal = decode_bool(value)
                    .ok_or_else(|| invalid(key, format!("'{value}' is not a boolean")))?;
            }
            "inputs" => {
                for (name, text) in nested_pairs(section, key, value)? {
                    let value = decode_value(text).map_err(|message| invalid(key, message))?;
                    stage.inputs.insert(name.to_string(), value);
                }
            }
            "define" => {
                for (name, text) in nested_pairs(section, key, value)? {
                    let define = decode_define(text)
                        .ok_or_else(|| invalid(key, format!("define {name} = '{text}' is not a number")))?;
                    stage.defines.insert(name.to_string(), define);
                }
            }
            "translate_tex_name" => {
                for (source, input) in nested_pairs(section, key, value)? {
                    stage.translate.insert(source.to_string(), input.to_string());
                }
            }
            _ => log::warn!("Ignoring unknown key '{key}' in stage section [{section}]"),
        }
    }
    Ok(stage)
}

/// Section that collects entries written before the first header.
const ORPHANS: &str = "__orphans__";

/// Reads `[section]` blocks of `key = value` (or `key : value`) entries.
///
/// Indented lines continue the previous value; `#` and `;` start comments.
/// Section names keep their case, keys are lower-cased.
fn read_sections(text: &str) -> Result<Vec<(String, IndexMap<String, String>)>, ConfigError> {
    let mut defaults = Ini::new_cs().defaults();
    defaults.multiline = true;
    defaults.default_section = ORPHANS.to_string();
    let mut ini = Ini::new_from_defaults(defaults);
    let map = ini.read(text.to_string()).map_err(ConfigError::Syntax)?;

    let mut sections = Vec::new();
    for (section, entries) in map {
        if section == ORPHANS {
            if entries.is_empty() {
                continue;
            }
            return Err(ConfigError::Syntax("entry before the first section header".into()));
        }
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value.unwrap_or_default()))
            .collect();
        sections.push((section, entries));
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn every_preset_round_trips() {
        for preset in Preset::ALL {
            let config = GraphicsConfig::from_preset(preset);
            let parsed = GraphicsConfig::parse(&config.to_ini_string()).unwrap();
            assert_eq!(parsed, config, "{preset}");
        }
    }

    #[test]
    fn save_and_load_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphics.ini");
        let mut config = GraphicsConfig::from_preset(Preset::Minimal);
        config.shadow_size = 1024;
        config.stages[1].clear_color = None;
        config.stages[1].inputs.insert("tint".into(), ShaderValue::Vec2(Vec2::new(0.5, 2.0)));

        config.save(&path).unwrap();
        assert_eq!(GraphicsConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn hand_written_files_decode_by_shape() {
        let text = "\
[SHADOWS]
size = 512

[SETUP]
disable_pom = 1

; the filters
[1]
shader = fxaa
inputs = span_max : 2
\treduce_mul : 0.0625

[0]
shader = ao
size = 0.5
clear_color = 1, 0, 0, 1
inputs =
\trandom_tex : tex/random.png
\tsample_rad : 0.4
\toffset : 1.0, 2.0
";
        let config = GraphicsConfig::parse(text).unwrap();
        assert_eq!(config.shadow_size, 512);
        assert_eq!(config.shading.get("DISABLE_POM"), Some(&DefineValue::Int(1)));

        let names: Vec<&str> = config.stages.iter().map(|s| s.display_name()).collect();
        assert_eq!(names, ["ao", "fxaa"]);
        assert!(config.stages[1].terminal);
        assert!(!config.stages[0].terminal);

        let ao = &config.stages[0];
        assert_relative_eq!(ao.size_factor, 0.5);
        assert_eq!(ao.clear_color, Some(Vec4::new(1.0, 0.0, 0.0, 1.0)));
        assert_eq!(
            ao.inputs.get("random_tex"),
            Some(&ShaderValue::TexturePath("tex/random.png".into()))
        );
        assert_relative_eq!(ao.inputs["sample_rad"].as_f32().unwrap(), 0.4);
        assert_eq!(ao.inputs.get("offset"), Some(&ShaderValue::Vec2(Vec2::new(1.0, 2.0))));
        assert_eq!(config.stages[1].inputs.get("span_max"), Some(&ShaderValue::Int(2)));
    }

    #[test]
    fn section_names_keep_case_and_keys_fold() {
        let text = "[SETUP]\nDisable_Shadows = 1\n\n[0]\nSHADER = blur\nInputs = radius : 3\n";
        let config = GraphicsConfig::parse(text).unwrap();
        assert_eq!(config.shading.get("DISABLE_SHADOWS"), Some(&DefineValue::Int(1)));
        assert_eq!(config.stages[0].shader, "blur");
        assert_eq!(config.stages[0].inputs.get("radius"), Some(&ShaderValue::Int(3)));
        assert!(config.stages[0].terminal);
    }

    #[test]
    fn runtime_only_inputs_are_skipped() {
        let mut config = GraphicsConfig::from_preset(Preset::Minimal);
        config.stages[0].inputs.insert(
            "light_color".into(),
            ShaderValue::Vec3Array(vec![Vec3::X, Vec3::Y]),
        );
        let parsed = GraphicsConfig::parse(&config.to_ini_string()).unwrap();
        assert!(!parsed.stages[0].inputs.contains_key("light_color"));
        assert!(parsed.stages[0].inputs.contains_key("direction"));
    }

    #[test]
    fn malformed_files_are_rejected() {
        assert!(matches!(
            GraphicsConfig::parse("[0]\nname = lonely\n"),
            Err(ConfigError::MissingShader(_))
        ));
        assert!(matches!(
            GraphicsConfig::parse("[EXTRA]\nfoo = 1\n"),
            Err(ConfigError::UnknownSection(_))
        ));
        assert!(matches!(
            GraphicsConfig::parse("size = 1\n"),
            Err(ConfigError::Syntax(_))
        ));
        assert!(matches!(
            GraphicsConfig::parse("[0\nshader = mix\n"),
            Err(ConfigError::Syntax(_))
        ));
        assert!(matches!(
            GraphicsConfig::parse("[0]\nshader = mix\ndefine = FAST : yes\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            GraphicsConfig::parse("[0]\nshader = mix\ninputs = v : 1, 2, 3, 4, 5\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
