use glam::Vec3;

use crate::error::Result;
use crate::host::{NodeId, ProjectorKind, ProjectorLens, RenderAttribs, RenderHost, Transform};
use crate::lights::{LightVolumes, ShadowBias, update_transform};
use crate::shader_library::ShaderLibrary;
use crate::value::ShaderValue;

/// Widest cone a spot light may have, in degrees.
pub const MAX_CONE_FOV: f32 = 179.0;

const SPOT_EXPONENT: f32 = 20.0;
const SHADOW_NEAR: f32 = 1.0;

/// Parameters of a new spot light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConeLightDesc {
    pub color: Vec3,
    pub pos: Vec3,
    /// Heading, pitch, roll in degrees. Ignored when `look_at` is set.
    pub hpr: Vec3,
    pub look_at: Option<Vec3>,
    pub radius: f32,
    /// Full cone angle in degrees.
    pub fov: f32,
    pub shadow_size: Option<u32>,
    pub shadow_bias: ShadowBias,
}

impl ConeLightDesc {
    pub fn new(color: Vec3, pos: Vec3, radius: f32, fov: f32) -> Self {
        Self {
            color,
            pos,
            hpr: Vec3::ZERO,
            look_at: None,
            radius,
            fov,
            shadow_size: None,
            shadow_bias: ShadowBias::Fixed(0.001),
        }
    }

    pub fn with_hpr(mut self, hpr: Vec3) -> Self {
        self.hpr = hpr;
        self
    }

    pub fn looking_at(mut self, target: Vec3) -> Self {
        self.look_at = Some(target);
        self
    }

    pub fn with_shadows(mut self, size: u32) -> Self {
        self.shadow_size = Some(size);
        self
    }

    pub fn with_bias(mut self, bias: ShadowBias) -> Self {
        self.shadow_bias = bias;
        self
    }
}

/// Scale of the unit cone model for a given range and angle.
fn cone_scale(radius: f32, fov: f32) -> Vec3 {
    let xy = (fov.to_radians() * 0.5).tan();
    Vec3::new(xy * radius, radius, xy * radius)
}

/// A spot light drawn as a cone volume, with a spot projector for the
/// falloff and optional shadows.
#[derive(Debug)]
pub struct ConeLight {
    volume: NodeId,
    projector: NodeId,
    color: Vec3,
    pos: Vec3,
    hpr: Vec3,
    radius: f32,
    fov: f32,
    bias: ShadowBias,
    shadows: bool,
    removed: bool,
}

impl ConeLight {
    /// Creates the cone. `fov` is clamped to [`MAX_CONE_FOV`].
    pub fn new<H: RenderHost + ?Sized>(
        host: &mut H,
        shaders: &mut ShaderLibrary,
        volumes: &LightVolumes,
        desc: ConeLightDesc,
    ) -> Result<Self> {
        let shader_name = if desc.shadow_size.is_some() {
            "spot_light_shadow"
        } else {
            "spot_light"
        };
        let shader = shaders.load(host, shader_name, &volumes.shading)?;
        let volume = host.load_model(&volumes.cone_model)?;
        host.reparent(volume, volumes.root);

        let fov = desc.fov.min(MAX_CONE_FOV);
        let pose = Transform {
            pos: desc.pos,
            hpr: desc.hpr,
            scale: cone_scale(desc.radius, fov),
        };
        host.set_transform(volume, pose);
        if let Some(target) = desc.look_at {
            host.look_at(volume, target);
        }
        let hpr = host.transform(volume).map_or(desc.hpr, |t| t.hpr);
        host.set_render_attribs(volume, RenderAttribs::LIGHT_VOLUME);
        host.set_shader(volume, shader);

        let projector = host.create_projector(
            ProjectorKind::Spot {
                exponent: SPOT_EXPONENT,
            },
            volumes.scene_root,
        );
        host.set_transform(
            projector,
            Transform {
                pos: desc.pos,
                hpr,
                ..Transform::default()
            },
        );
        host.set_light_color(projector, desc.color.extend(1.0));

        let light = Self {
            volume,
            projector,
            color: desc.color,
            pos: desc.pos,
            hpr,
            radius: desc.radius,
            fov,
            bias: desc.shadow_bias,
            shadows: desc.shadow_size.is_some(),
            removed: false,
        };
        if let Some(size) = desc.shadow_size {
            host.set_shadow_caster(projector, Some(size));
            host.set_projector_mask(projector, volumes.shadow_mask);
            light.bind_bias(host);
        }
        light.bind_lens(host);
        host.set_shader_input(volume, "light_radius", ShaderValue::Float(light.radius));
        host.set_shader_input(volume, "light_pos", ShaderValue::Vec4(light.pos.extend(1.0)));
        host.set_shader_input(volume, "light_fov", ShaderValue::Float(fov.to_radians()));
        host.set_shader_input(volume, "spot", ShaderValue::Node(projector));
        Ok(light)
    }

    fn bind_lens<H: RenderHost + ?Sized>(&self, host: &mut H) {
        host.set_projector_lens(
            self.projector,
            ProjectorLens {
                near: SHADOW_NEAR,
                far: self.radius,
                fov: Some(self.fov),
            },
        );
    }

    fn bind_bias<H: RenderHost + ?Sized>(&self, host: &mut H) {
        if self.shadows {
            host.set_shader_input(self.volume, "bias", ShaderValue::Float(self.bias.value(self.radius)));
        }
    }

    pub fn volume(&self) -> NodeId {
        self.volume
    }

    /// The spot projector; it also carries the shadow map when enabled.
    pub fn projector(&self) -> NodeId {
        self.projector
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn pos(&self) -> Vec3 {
        self.pos
    }

    pub fn hpr(&self) -> Vec3 {
        self.hpr
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Cone angle in degrees, after clamping.
    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn casts_shadows(&self) -> bool {
        self.shadows
    }

    pub fn set_color<H: RenderHost + ?Sized>(&mut self, host: &mut H, color: Vec3) {
        self.color = color;
        host.set_light_color(self.projector, color.extend(1.0));
    }

    /// Re-shapes the cone and patches `light_fov`.
    pub fn set_fov<H: RenderHost + ?Sized>(&mut self, host: &mut H, fov: f32) {
        self.fov = fov.min(MAX_CONE_FOV);
        let scale = cone_scale(self.radius, self.fov);
        update_transform(host, self.volume, |t| t.scale = scale);
        self.bind_lens(host);
        host.set_shader_input(self.volume, "light_fov", ShaderValue::Float(self.fov.to_radians()));
    }

    pub fn set_radius<H: RenderHost + ?Sized>(&mut self, host: &mut H, radius: f32) {
        self.radius = radius;
        let scale = cone_scale(radius, self.fov);
        update_transform(host, self.volume, |t| t.scale = scale);
        self.bind_lens(host);
        self.bind_bias(host);
        host.set_shader_input(self.volume, "light_radius", ShaderValue::Float(radius));
    }

    pub fn set_pos<H: RenderHost + ?Sized>(&mut self, host: &mut H, pos: Vec3) {
        self.pos = pos;
        update_transform(host, self.volume, |t| t.pos = pos);
        update_transform(host, self.projector, |t| t.pos = pos);
        host.set_shader_input(self.volume, "light_pos", ShaderValue::Vec4(pos.extend(1.0)));
    }

    pub fn set_hpr<H: RenderHost + ?Sized>(&mut self, host: &mut H, hpr: Vec3) {
        self.hpr = hpr;
        update_transform(host, self.volume, |t| t.hpr = hpr);
        update_transform(host, self.projector, |t| t.hpr = hpr);
    }

    /// Points the cone and its projector at `target`.
    pub fn look_at<H: RenderHost + ?Sized>(&mut self, host: &mut H, target: Vec3) {
        host.look_at(self.volume, target);
        host.look_at(self.projector, target);
        if let Some(transform) = host.transform(self.volume) {
            self.hpr = transform.hpr;
        }
    }

    pub fn set_shadow_bias<H: RenderHost + ?Sized>(&mut self, host: &mut H, bias: ShadowBias) {
        self.bias = bias;
        self.bind_bias(host);
    }

    pub fn set_shadow_size<H: RenderHost + ?Sized>(&mut self, host: &mut H, size: u32) {
        if self.shadows {
            host.set_shadow_caster(self.projector, Some(size));
        }
    }

    /// Removes the cone and the projector, releasing any shadow buffer.
    pub fn remove<H: RenderHost + ?Sized>(mut self, host: &mut H) {
        if self.shadows {
            host.set_shadow_caster(self.projector, None);
        }
        host.remove_node(self.projector);
        host.remove_node(self.volume);
        self.removed = true;
    }
}

impl Drop for ConeLight {
    fn drop(&mut self) {
        if !self.removed {
            log::warn!(
                "Spot light at {:?} dropped without remove(); its volume stays in the scene",
                self.pos
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessHost;
    use crate::host::CameraMask;
    use glam::Vec4;
    use crate::test_support::{ShaderDir, host, light_volumes};
    use approx::assert_relative_eq;

    fn setup() -> (ShaderDir, HeadlessHost, ShaderLibrary, LightVolumes) {
        let dir = ShaderDir::with_pipeline(&[]);
        let mut host = host();
        let volumes = light_volumes(&mut host);
        let shaders = dir.library();
        (dir, host, shaders, volumes)
    }

    #[test]
    fn fov_is_clamped_and_shapes_the_cone() {
        let (_dir, mut host, mut shaders, volumes) = setup();
        let desc = ConeLightDesc::new(Vec3::ONE, Vec3::ZERO, 10.0, 200.0);
        let mut light = ConeLight::new(&mut host, &mut shaders, &volumes, desc).unwrap();
        assert_eq!(light.fov(), MAX_CONE_FOV);

        light.set_fov(&mut host, 90.0);
        let scale = host.transform(light.volume()).unwrap().scale;
        assert_relative_eq!(scale.x, 10.0, epsilon = 1e-4);
        assert_relative_eq!(scale.y, 10.0);
        let fov = host.shader_input(light.volume(), "light_fov").and_then(|v| v.as_f32()).unwrap();
        assert_relative_eq!(fov, std::f32::consts::FRAC_PI_2);
        let lens = host.projector(light.projector()).unwrap().lens.unwrap();
        assert_eq!(lens.fov, Some(90.0));
        light.remove(&mut host);
    }

    #[test]
    fn spot_projector_carries_color_and_range() {
        let (_dir, mut host, mut shaders, volumes) = setup();
        let desc = ConeLightDesc::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 5.0), 30.0, 45.0);
        let light = ConeLight::new(&mut host, &mut shaders, &volumes, desc).unwrap();

        let projector = host.projector(light.projector()).unwrap();
        assert_eq!(projector.kind, ProjectorKind::Spot { exponent: 20.0 });
        assert_eq!(projector.color, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(projector.shadow_size, None);
        let lens = projector.lens.unwrap();
        assert_eq!((lens.near, lens.far), (1.0, 30.0));
        assert_eq!(
            host.shader_input(light.volume(), "spot"),
            Some(ShaderValue::Node(light.projector()))
        );
        assert_eq!(host.shader_input(light.volume(), "light_radius"), Some(ShaderValue::Float(30.0)));
        assert_eq!(host.shader_input(light.volume(), "bias"), None);
        light.remove(&mut host);
    }

    #[test]
    fn shadow_variant_uses_a_fixed_bias() {
        let (_dir, mut host, mut shaders, volumes) = setup();
        let desc = ConeLightDesc::new(Vec3::ONE, Vec3::ZERO, 30.0, 45.0).with_shadows(1024);
        let light = ConeLight::new(&mut host, &mut shaders, &volumes, desc).unwrap();

        let projector = host.projector(light.projector()).unwrap();
        assert_eq!(projector.shadow_size, Some(1024));
        assert_eq!(projector.mask, CameraMask::bit(13));
        assert_eq!(host.shader_input(light.volume(), "bias"), Some(ShaderValue::Float(0.001)));
        let shader = host.scene_node(light.volume()).unwrap().shader.unwrap();
        assert!(host.program(shader).unwrap().label.contains("spot_light_shadow"));
        light.remove(&mut host);
    }

    #[test]
    fn look_at_orients_volume_and_projector() {
        let (_dir, mut host, mut shaders, volumes) = setup();
        let desc = ConeLightDesc::new(Vec3::ONE, Vec3::ZERO, 10.0, 60.0).looking_at(Vec3::new(-1.0, 0.0, 0.0));
        let mut light = ConeLight::new(&mut host, &mut shaders, &volumes, desc).unwrap();
        assert_relative_eq!(light.hpr().x, 90.0, epsilon = 1e-4);
        assert_eq!(host.transform(light.projector()).unwrap().hpr, light.hpr());

        light.look_at(&mut host, Vec3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(light.hpr().x, 0.0, epsilon = 1e-4);
        assert_eq!(host.transform(light.projector()).unwrap().hpr, light.hpr());
        light.remove(&mut host);
    }

    #[test]
    fn remove_releases_both_nodes() {
        let (_dir, mut host, mut shaders, volumes) = setup();
        let nodes = host.node_count();
        let desc = ConeLightDesc::new(Vec3::ONE, Vec3::ZERO, 10.0, 60.0).with_shadows(256);
        let light = ConeLight::new(&mut host, &mut shaders, &volumes, desc).unwrap();
        light.remove(&mut host);
        assert_eq!(host.node_count(), nodes);
    }
}
