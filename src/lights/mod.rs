//! Light handles.
//!
//! Point and spot lights are drawn as proxy volumes (a sphere, a cone) under
//! the light root; every pixel a volume covers runs the light shader once.
//! Directional lights have no volume and are folded into the `final_light`
//! filter stage by [`SceneLight`].
//!
//! Volume lights are explicitly owned: a handle must be given back with
//! `remove`. Dropping one that is still live leaves its nodes in the scene
//! and logs a warning.

mod cone_light;
mod scene_light;
mod sphere_light;

pub use cone_light::{ConeLight, ConeLightDesc, MAX_CONE_FOV};
pub use scene_light::{DirectionalLight, SceneLight};
pub use sphere_light::{SphereLight, SphereLightDesc};

use crate::host::{CameraMask, NodeId, RenderHost, Transform};
use crate::value::Defines;

/// How the depth bias of a shadow-casting light is derived.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShadowBias {
    /// The same bias at every radius.
    Fixed(f32),
    /// `k / radius`.
    InverseRadius(f32),
}

impl ShadowBias {
    pub fn value(self, radius: f32) -> f32 {
        match self {
            ShadowBias::Fixed(bias) => bias,
            ShadowBias::InverseRadius(k) => k / radius.max(f32::EPSILON),
        }
    }
}

/// Where new light volumes go and what they are built from.
#[derive(Clone, Debug)]
pub struct LightVolumes {
    /// Parent of every volume (the G-buffer's light root).
    pub root: NodeId,
    /// Parent of shadow projectors.
    pub scene_root: NodeId,
    pub shading: Defines,
    /// Camera bits of the shadow-map cameras.
    pub shadow_mask: CameraMask,
    pub sphere_model: String,
    pub cone_model: String,
}

/// Read-modify-write of a node's transform.
pub(crate) fn update_transform<H, F>(host: &mut H, node: NodeId, update: F)
where
    H: RenderHost + ?Sized,
    F: FnOnce(&mut Transform),
{
    let mut transform = host.transform(node).unwrap_or_default();
    update(&mut transform);
    host.set_transform(node, transform);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bias_scales_with_radius_only_when_asked() {
        assert_relative_eq!(ShadowBias::Fixed(0.001).value(50.0), 0.001);
        assert_relative_eq!(ShadowBias::InverseRadius(0.095).value(10.0), 0.0095);
    }
}
