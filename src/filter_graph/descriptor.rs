//! Declarative configuration of one filter stage.

use glam::Vec4;
use indexmap::IndexMap;

use crate::value::{DefineValue, Defines, Inputs, ShaderValue};

/// One filter stage as the caller describes it.
///
/// Built with chained methods:
///
/// ```ignore
/// let blur = StageDescriptor::new("blur")
///     .named("bloom_blur")
///     .size(0.5)
///     .translate("bloom", "input_tex")
///     .with_input("blur", 3.0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct StageDescriptor {
    /// Logical shader name, resolved through the shader path templates.
    pub shader: String,
    /// Display name; the shader name when absent.
    pub name: Option<String>,
    pub inputs: Inputs,
    pub defines: Defines,
    /// Output resolution relative to the window, per axis.
    pub size_factor: f32,
    /// `None` leaves the previous contents in place.
    pub clear_color: Option<Vec4>,
    /// `earlier_stage_name -> input_name`.
    pub translate: IndexMap<String, String>,
    /// Marks the stage drawn on screen through the lit buffer's card.
    pub terminal: bool,
}

impl StageDescriptor {
    pub fn new(shader: &str) -> Self {
        Self {
            shader: shader.to_string(),
            name: None,
            inputs: Inputs::new(),
            defines: Defines::new(),
            size_factor: 1.0,
            clear_color: Some(Vec4::ZERO),
            translate: IndexMap::new(),
            terminal: false,
        }
    }

    /// The key this stage is looked up by.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.shader)
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_input(mut self, name: &str, value: impl Into<ShaderValue>) -> Self {
        self.inputs.insert(name.to_string(), value.into());
        self
    }

    pub fn with_define(mut self, name: &str, value: impl Into<DefineValue>) -> Self {
        self.defines.insert(name.to_string(), value.into());
        self
    }

    pub fn size(mut self, size_factor: f32) -> Self {
        self.size_factor = size_factor;
        self
    }

    pub fn with_clear(mut self, color: Vec4) -> Self {
        self.clear_color = Some(color);
        self
    }

    pub fn no_clear(mut self) -> Self {
        self.clear_color = None;
        self
    }

    /// Binds the output of the earlier stage `source` as input `input`.
    pub fn translate(mut self, source: &str, input: &str) -> Self {
        self.translate.insert(source.to_string(), input.to_string());
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}
