use glam::{Vec3, Vec4};

use crate::error::Result;
use crate::host::{NodeId, ProjectorKind, ProjectorLens, RenderAttribs, RenderHost, Transform};
use crate::lights::{LightVolumes, ShadowBias, update_transform};
use crate::shader_library::ShaderLibrary;
use crate::value::ShaderValue;

/// The sphere is scaled past the radius so its faceted surface still covers
/// the whole attenuation range.
const VOLUME_PADDING: f32 = 1.1;
const SHADOW_NEAR: f32 = 0.1;

/// Parameters of a new point light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphereLightDesc {
    pub color: Vec3,
    pub pos: Vec3,
    pub radius: f32,
    /// Side of the shadow cube map; `None` casts no shadows.
    pub shadow_size: Option<u32>,
    pub shadow_bias: ShadowBias,
}

impl SphereLightDesc {
    pub fn new(color: Vec3, pos: Vec3, radius: f32) -> Self {
        Self {
            color,
            pos,
            radius,
            shadow_size: None,
            shadow_bias: ShadowBias::InverseRadius(0.095),
        }
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

/// A point light drawn as a sphere volume.
#[derive(Debug)]
pub struct SphereLight {
    volume: NodeId,
    projector: Option<NodeId>,
    color: Vec3,
    pos: Vec3,
    radius: f32,
    bias: ShadowBias,
    removed: bool,
}

impl SphereLight {
    pub fn new<H: RenderHost + ?Sized>(
        host: &mut H,
        shaders: &mut ShaderLibrary,
        volumes: &LightVolumes,
        desc: SphereLightDesc,
    ) -> Result<Self> {
        let shader_name = if desc.shadow_size.is_some() {
            "light_shadow"
        } else {
            "light"
        };
        let shader = shaders.load(host, shader_name, &volumes.shading)?;
        let volume = host.load_model(&volumes.sphere_model)?;
        host.reparent(volume, volumes.root);
        host.set_transform(
            volume,
            Transform {
                pos: desc.pos,
                scale: Vec3::splat(desc.radius * VOLUME_PADDING),
                ..Transform::default()
            },
        );
        host.set_render_attribs(volume, RenderAttribs::LIGHT_VOLUME);
        host.set_shader(volume, shader);

        let mut light = Self {
            volume,
            projector: None,
            color: desc.color,
            pos: desc.pos,
            radius: desc.radius,
            bias: desc.shadow_bias,
            removed: false,
        };
        light.bind_light(host);
        host.set_shader_input(volume, "light_pos", ShaderValue::Vec4(desc.pos.extend(1.0)));

        if let Some(size) = desc.shadow_size {
            let projector = host.create_projector(ProjectorKind::Point, volumes.scene_root);
            host.set_transform(
                projector,
                Transform {
                    pos: desc.pos,
                    ..Transform::default()
                },
            );
            host.set_shadow_caster(projector, Some(size));
            host.set_projector_mask(projector, volumes.shadow_mask);
            host.set_projector_lens(
                projector,
                ProjectorLens {
                    near: SHADOW_NEAR,
                    far: desc.radius,
                    fov: None,
                },
            );
            host.set_shader_input(volume, "shadowcaster", ShaderValue::Node(projector));
            host.set_shader_input(volume, "near", ShaderValue::Float(SHADOW_NEAR));
            light.projector = Some(projector);
            light.bind_bias(host);
        }
        Ok(light)
    }

    fn bind_light<H: RenderHost + ?Sized>(&self, host: &mut H) {
        let packed = Vec4::new(self.color.x, self.color.y, self.color.z, self.radius * self.radius);
        host.set_shader_input(self.volume, "light", ShaderValue::Vec4(packed));
    }

    fn bind_bias<H: RenderHost + ?Sized>(&self, host: &mut H) {
        if self.projector.is_some() {
            host.set_shader_input(self.volume, "bias", ShaderValue::Float(self.bias.value(self.radius)));
        }
    }

    pub fn volume(&self) -> NodeId {
        self.volume
    }

    /// The shadow projector, if this light casts shadows.
    pub fn projector(&self) -> Option<NodeId> {
        self.projector
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn pos(&self) -> Vec3 {
        self.pos
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn casts_shadows(&self) -> bool {
        self.projector.is_some()
    }

    pub fn set_color<H: RenderHost + ?Sized>(&mut self, host: &mut H, color: Vec3) {
        self.color = color;
        self.bind_light(host);
    }

    /// Rescales the volume and the shadow range.
    pub fn set_radius<H: RenderHost + ?Sized>(&mut self, host: &mut H, radius: f32) {
        self.radius = radius;
        self.bind_light(host);
        update_transform(host, self.volume, |t| t.scale = Vec3::splat(radius * VOLUME_PADDING));
        if let Some(projector) = self.projector {
            host.set_projector_lens(
                projector,
                ProjectorLens {
                    near: SHADOW_NEAR,
                    far: radius,
                    fov: None,
                },
            );
        }
        self.bind_bias(host);
    }

    pub fn set_pos<H: RenderHost + ?Sized>(&mut self, host: &mut H, pos: Vec3) {
        self.pos = pos;
        update_transform(host, self.volume, |t| t.pos = pos);
        if let Some(projector) = self.projector {
            update_transform(host, projector, |t| t.pos = pos);
        }
        host.set_shader_input(self.volume, "light_pos", ShaderValue::Vec4(pos.extend(1.0)));
    }

    pub fn set_shadow_bias<H: RenderHost + ?Sized>(&mut self, host: &mut H, bias: ShadowBias) {
        self.bias = bias;
        self.bind_bias(host);
    }

    /// Resizes the shadow map. No-op for lights without shadows.
    pub fn set_shadow_size<H: RenderHost + ?Sized>(&mut self, host: &mut H, size: u32) {
        if let Some(projector) = self.projector {
            host.set_shadow_caster(projector, Some(size));
        }
    }

    /// Removes the volume and releases the shadow buffer.
    pub fn remove<H: RenderHost + ?Sized>(mut self, host: &mut H) {
        if let Some(projector) = self.projector.take() {
            host.set_shadow_caster(projector, None);
            host.remove_node(projector);
        }
        host.remove_node(self.volume);
        self.removed = true;
    }
}

impl Drop for SphereLight {
    fn drop(&mut self) {
        if !self.removed {
            log::warn!(
                "Point light at {:?} dropped without remove(); its volume stays in the scene",
                self.pos
            );
        }
    }
}
