//! Sampler and format policy inferred from texture file names.
//!
//! Texture inputs are plain path strings, so the only place to say "sample
//! this one with nearest filtering" is the file name itself:
//!
//! | substring | effect                  |
//! |-----------|-------------------------|
//! | `srgb`    | sRGB colour format      |
//! | `nearest` | nearest min/mag filter  |
//! | `f_rgb16` | 16-bit RGB format       |
//! | `clamp`   | clamp-to-edge wrapping  |

use crate::host::TextureFormat;

/// Texture filtering mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    Linear,
    Nearest,
}

/// Texture coordinate wrapping mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Wrap {
    #[default]
    Repeat,
    Clamp,
}

/// How the host should store and sample a loaded texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TexturePolicy {
    pub format: TextureFormat,
    pub filter: Filter,
    pub wrap: Wrap,
}

impl Default for TexturePolicy {
    fn default() -> Self {
        Self {
            format: TextureFormat::Rgba8,
            filter: Filter::Linear,
            wrap: Wrap::Repeat,
        }
    }
}

impl TexturePolicy {
    /// Derives the policy from substrings of `path`.
    pub fn from_path(path: &str) -> Self {
        let mut policy = Self::default();
        if path.contains("srgb") {
            policy.format = TextureFormat::Rgba8Srgb;
        }
        if path.contains("f_rgb16") {
            policy.format = TextureFormat::Rgb16;
        }
        if path.contains("nearest") {
            policy.filter = Filter::Nearest;
        }
        if path.contains("clamp") {
            policy.wrap = Wrap::Clamp;
        }
        policy
    }
}
