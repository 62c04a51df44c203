//! Shader input and preprocessor define values.

use std::fmt;

use glam::{Vec2, Vec3, Vec4};
use indexmap::IndexMap;

use crate::host::{NodeId, TextureId};

/// Ordered preprocessor defines for one shader variant.
pub type Defines = IndexMap<String, DefineValue>;

/// Ordered shader inputs, keyed by input name.
pub type Inputs = IndexMap<String, ShaderValue>;

/// A value bound to a named shader input.
///
/// `TexturePath` is the deferred form of a texture: it is resolved through the
/// host's texture loader every time the input is (re)bound, and the host only
/// ever sees the resolved [`ShaderValue::Texture`].
#[derive(Clone, Debug, PartialEq)]
pub enum ShaderValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    /// A dynamic-length array, used for aggregated directional lights.
    Vec3Array(Vec<Vec3>),
    /// A texture that still has to be loaded.
    TexturePath(String),
    /// A texture the host already owns.
    Texture(TextureId),
    /// A scene-graph node (render root, camera, light projector).
    Node(NodeId),
}

impl ShaderValue {
    /// Returns the texture path when this value still needs loading.
    pub fn texture_path(&self) -> Option<&str> {
        match self {
            ShaderValue::TexturePath(path) => Some(path),
            _ => None,
        }
    }

    /// Returns the scalar as `f32` for both float and int values.
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            ShaderValue::Float(v) => Some(v),
            ShaderValue::Int(v) => Some(v as f32),
            _ => None,
        }
    }

    /// Component-wise sum of two numeric values of the same shape.
    ///
    /// Mixed int/float scalars promote to float. Returns `None` for anything
    /// that is not a number or vector, when the shapes differ, or when an
    /// integer sum overflows.
    pub fn offset_by(&self, delta: &ShaderValue) -> Option<ShaderValue> {
        use ShaderValue::*;
        match (self, delta) {
            (Int(a), Int(b)) => a.checked_add(*b).map(Int),
            (Float(_) | Int(_), Float(_) | Int(_)) => {
                Some(Float(self.as_f32()? + delta.as_f32()?))
            }
            (Vec2(a), Vec2(b)) => Some(Vec2(*a + *b)),
            (Vec3(a), Vec3(b)) => Some(Vec3(*a + *b)),
            (Vec4(a), Vec4(b)) => Some(Vec4(*a + *b)),
            _ => None,
        }
    }

    /// Whether the value can be written to the persisted configuration.
    pub fn is_persistable(&self) -> bool {
        !matches!(
            self,
            ShaderValue::Vec3Array(_) | ShaderValue::Texture(_) | ShaderValue::Node(_)
        )
    }

    /// Flattens numeric values into `f32` lanes for uniform upload.
    pub(crate) fn lanes(&self) -> Option<Vec<f32>> {
        match self {
            ShaderValue::Float(v) => Some(vec![*v]),
            ShaderValue::Int(v) => Some(vec![*v as f32]),
            ShaderValue::Vec2(v) => Some(v.to_array().to_vec()),
            ShaderValue::Vec3(v) => Some(v.to_array().to_vec()),
            ShaderValue::Vec4(v) => Some(v.to_array().to_vec()),
            ShaderValue::Vec3Array(values) => {
                Some(values.iter().flat_map(|v| v.to_array()).collect())
            }
            _ => None,
        }
    }
}

impl From<f32> for ShaderValue {
    fn from(v: f32) -> Self {
        ShaderValue::Float(v)
    }
}

impl From<f64> for ShaderValue {
    fn from(v: f64) -> Self {
        ShaderValue::Float(v as f32)
    }
}

impl From<i32> for ShaderValue {
    fn from(v: i32) -> Self {
        ShaderValue::Int(v)
    }
}

impl From<Vec2> for ShaderValue {
    fn from(v: Vec2) -> Self {
        ShaderValue::Vec2(v)
    }
}

impl From<Vec3> for ShaderValue {
    fn from(v: Vec3) -> Self {
        ShaderValue::Vec3(v)
    }
}

impl From<Vec4> for ShaderValue {
    fn from(v: Vec4) -> Self {
        ShaderValue::Vec4(v)
    }
}

impl From<Vec<Vec3>> for ShaderValue {
    fn from(v: Vec<Vec3>) -> Self {
        ShaderValue::Vec3Array(v)
    }
}

impl From<&str> for ShaderValue {
    fn from(path: &str) -> Self {
        ShaderValue::TexturePath(path.to_string())
    }
}

impl From<String> for ShaderValue {
    fn from(path: String) -> Self {
        ShaderValue::TexturePath(path)
    }
}

impl From<TextureId> for ShaderValue {
    fn from(id: TextureId) -> Self {
        ShaderValue::Texture(id)
    }
}

impl From<NodeId> for ShaderValue {
    fn from(id: NodeId) -> Self {
        ShaderValue::Node(id)
    }
}

/// The value of a `#define NAME VALUE` line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DefineValue {
    Int(i64),
    Float(f64),
}

impl fmt::Display for DefineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefineValue::Int(v) => write!(f, "{v}"),
            // Debug keeps the decimal point, so GLSL still sees a float literal
            DefineValue::Float(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for DefineValue {
    fn from(v: i64) -> Self {
        DefineValue::Int(v)
    }
}

impl From<i32> for DefineValue {
    fn from(v: i32) -> Self {
        DefineValue::Int(v as i64)
    }
}

impl From<usize> for DefineValue {
    fn from(v: usize) -> Self {
        DefineValue::Int(v as i64)
    }
}

impl From<f64> for DefineValue {
    fn from(v: f64) -> Self {
        DefineValue::Float(v)
    }
}

impl From<f32> for DefineValue {
    fn from(v: f32) -> Self {
        DefineValue::Float(v as f64)
    }
}
