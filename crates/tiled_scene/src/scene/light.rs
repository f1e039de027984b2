//! Lights and their GPU records

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{stable_up, utils, Mat4, Mat4Ext, Vec3, Vec4};
use crate::render::DeviceLimits;

bitflags! {
    /// Pending light updates
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LightDirty: u32 {
        /// GPU record must be rewritten
        const DIRTY         = 1 << 0;
        /// Shadow map must be re-rendered
        const DIRTY_SHADOWS = 1 << 1;
        /// Light view matrix changed
        const DIRTY_VIEW    = 1 << 2;
    }
}

/// Light kind, stored in the record's `origin.w`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LightType {
    /// Infinitely far light; `origin` is the direction light travels
    Directional = 0,
    /// Omnidirectional positional light
    Point = 1,
    /// Positional light limited to a cone
    Spot = 2,
}

/// std140 light record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightRecord {
    /// Position or direction; `w` holds the light type
    pub origin: [f32; 4],
    /// Diffuse color
    pub diffuse: [f32; 4],
    /// Ambient color
    pub ambient: [f32; 4],
    /// Specular color
    pub specular: [f32; 4],
    /// Constant, linear and quadratic attenuation
    pub attenuation: [f32; 4],
    /// Spotlight rotation in degrees
    pub spot_rotation: [f32; 4],
    /// Spotlight direction
    pub spot_direction: [f32; 4],
    /// Cosine of the cutoff angle
    pub cutoff: f32,
    /// Cutoff angle (half aperture) in degrees
    pub cutoff_angle: f32,
    /// Angular to linear distance factor for ambient falloff
    pub angle_dist_factor: f32,
    /// Ambient clamp at the cone edge
    pub ambient_clamp_factor: f32,
    /// Light view matrix
    pub view: [[f32; 4]; 4],
    /// Inverse light view matrix
    pub view_inv: [[f32; 4]; 4],
    /// 0 (off) to 1 (full)
    pub intensity: f32,
    /// Nonzero when the light has a shadow map
    pub casts_shadows: u32,
    /// Padding to 16 bytes
    pub _pad: [u32; 2],
}

unsafe impl Pod for LightRecord {}
unsafe impl Zeroable for LightRecord {}

/// std140 shadow map record, one per light after the light records
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowMapRecord {
    /// Light view-projection
    pub light_viewproj: [[f32; 4]; 4],
    /// Shadow map resolution
    pub shadow_map_size: u32,
    /// PCF kernel size
    pub pcf_kernel_size: u32,
    /// Padding to 16 bytes
    pub _pad: [u32; 2],
}

unsafe impl Pod for ShadowMapRecord {}
unsafe impl Zeroable for ShadowMapRecord {}

/// Bytes per light record
pub const LIGHT_RECORD_SIZE: u64 = std::mem::size_of::<LightRecord>() as u64;

/// Bytes per shadow map record
pub const SHADOW_MAP_RECORD_SIZE: u64 = std::mem::size_of::<ShadowMapRecord>() as u64;

/// Byte layout of the light buffer
///
/// ```text
/// [light 0 .. light n-1][pad to alignment][shadow 0 .. shadow n-1]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightBufferLayout {
    /// Number of lights
    pub light_count: u32,
    /// Offset of the first shadow map record
    pub shadow_offset: u64,
    /// Bytes of light records (the light binding's range)
    pub lights_size: u64,
    /// Bytes of shadow map records
    pub shadow_size: u64,
}

impl LightBufferLayout {
    /// Layout for `light_count` lights
    pub fn new(light_count: u32, limits: &DeviceLimits) -> Self {
        let lights_size = light_count as u64 * LIGHT_RECORD_SIZE;
        Self {
            light_count,
            shadow_offset: utils::align_up(lights_size, limits.min_uniform_buffer_offset_alignment),
            lights_size,
            shadow_size: light_count as u64 * SHADOW_MAP_RECORD_SIZE,
        }
    }

    /// Offset of light `index`'s record
    pub fn light_offset(&self, index: usize) -> u64 {
        index as u64 * LIGHT_RECORD_SIZE
    }

    /// Offset of light `index`'s shadow map record
    pub fn shadow_record_offset(&self, index: usize) -> u64 {
        self.shadow_offset + index as u64 * SHADOW_MAP_RECORD_SIZE
    }

    /// Buffer size, never zero
    pub fn total_size(&self) -> u64 {
        (self.shadow_offset + self.shadow_size).max(LIGHT_RECORD_SIZE)
    }
}

/// A scene light
#[derive(Debug, Clone)]
pub struct Light {
    light_type: LightType,
    origin: Vec3,
    diffuse: Vec4,
    ambient: Vec4,
    specular: Vec4,
    attenuation: Vec4,
    rotation: Vec3,
    cutoff_angle: f32,
    cutoff: f32,
    angle_dist_factor: f32,
    ambient_clamp_factor: f32,
    intensity: f32,
    casts_shadows: bool,
    view: Mat4,
    dirty: LightDirty,
}

impl Light {
    fn base(light_type: LightType, origin: Vec3, diffuse: Vec4, ambient: Vec4, specular: Vec4) -> Self {
        let mut light = Self {
            light_type,
            origin,
            diffuse,
            ambient,
            specular,
            attenuation: Vec4::new(1.0, 0.0, 0.0, 0.0),
            rotation: Vec3::zeros(),
            cutoff_angle: 180.0,
            cutoff: -1.0,
            angle_dist_factor: 1.0,
            ambient_clamp_factor: 1.0,
            intensity: 1.0,
            casts_shadows: false,
            view: Mat4::identity(),
            dirty: LightDirty::all(),
        };
        light.update_view();
        light
    }

    /// Directional light travelling along `direction`
    pub fn directional(direction: Vec3, diffuse: Vec4, ambient: Vec4, specular: Vec4) -> Self {
        Self::base(LightType::Directional, direction.normalize(), diffuse, ambient, specular)
    }

    /// Point light
    pub fn point(position: Vec3, diffuse: Vec4, ambient: Vec4, specular: Vec4, attenuation: Vec4) -> Self {
        let mut light = Self::base(LightType::Point, position, diffuse, ambient, specular);
        light.attenuation = attenuation;
        light
    }

    /// Spotlight with a cutoff (half aperture) angle in degrees
    pub fn spot(
        position: Vec3,
        cutoff_angle: f32,
        diffuse: Vec4,
        ambient: Vec4,
        specular: Vec4,
        attenuation: Vec4,
    ) -> Self {
        let mut light = Self::base(LightType::Spot, position, diffuse, ambient, specular);
        light.attenuation = attenuation;
        light.set_cutoff_angle(cutoff_angle);
        light
    }

    /// Light kind
    pub fn light_type(&self) -> LightType {
        self.light_type
    }

    /// Position (point, spot) or direction (directional)
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Direction the light shines in
    pub fn direction(&self) -> Vec3 {
        match self.light_type {
            LightType::Directional => self.origin,
            LightType::Spot | LightType::Point => {
                (utils::quat_from_euler_degrees(&self.rotation) * Vec3::new(0.0, 0.0, -1.0)).normalize()
            }
        }
    }

    /// Move a point or spot light
    pub fn set_position(&mut self, position: Vec3) {
        debug_assert!(self.light_type != LightType::Directional);
        self.origin = position;
        self.dirty |= LightDirty::all();
        self.update_view();
    }

    /// Change a directional light's direction
    pub fn set_direction(&mut self, direction: Vec3) {
        debug_assert!(self.light_type == LightType::Directional);
        self.origin = direction.normalize();
        self.dirty |= LightDirty::all();
        self.update_view();
    }

    /// Euler rotation of a spotlight, degrees
    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    /// Orient a spotlight
    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation.map(utils::wrap_degrees);
        self.dirty |= LightDirty::all();
        self.update_view();
    }

    /// Aim a spotlight at `target`
    pub fn look_at(&mut self, target: Vec3) {
        let offset = target - self.origin;
        if offset.norm_squared() <= f32::EPSILON {
            return;
        }
        let dir = offset.normalize();
        let pitch = utils::rad_to_deg(dir.y.clamp(-1.0, 1.0).asin());
        let yaw = utils::rad_to_deg((-dir.x).atan2(-dir.z));
        self.set_rotation(Vec3::new(pitch, yaw, 0.0));
    }

    /// Cutoff angle in degrees
    pub fn cutoff_angle(&self) -> f32 {
        self.cutoff_angle
    }

    /// Cosine of the cutoff angle
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// Set the spotlight cutoff (half aperture) angle in degrees
    pub fn set_cutoff_angle(&mut self, degrees: f32) {
        self.cutoff_angle = degrees;
        self.cutoff = utils::deg_to_rad(degrees).cos();
        self.dirty |= LightDirty::DIRTY | LightDirty::DIRTY_SHADOWS;
    }

    /// Spotlight ambient falloff parameters
    pub fn set_spot_ambient(&mut self, angle_dist_factor: f32, ambient_clamp_factor: f32) {
        self.angle_dist_factor = angle_dist_factor;
        self.ambient_clamp_factor = ambient_clamp_factor;
        self.dirty |= LightDirty::DIRTY;
    }

    /// Diffuse color
    pub fn set_diffuse(&mut self, diffuse: Vec4) {
        self.diffuse = diffuse;
        self.dirty |= LightDirty::DIRTY;
    }

    /// Ambient color
    pub fn set_ambient(&mut self, ambient: Vec4) {
        self.ambient = ambient;
        self.dirty |= LightDirty::DIRTY;
    }

    /// Specular color
    pub fn set_specular(&mut self, specular: Vec4) {
        self.specular = specular;
        self.dirty |= LightDirty::DIRTY;
    }

    /// Intensity in `[0, 1]`
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Set the intensity, clamped to `[0, 1]`
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity.clamp(0.0, 1.0);
        self.dirty |= LightDirty::DIRTY;
    }

    /// True when the light has a shadow map
    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows
    }

    pub(crate) fn set_casts_shadows(&mut self, casts: bool) {
        self.casts_shadows = casts;
        self.dirty |= LightDirty::all();
    }

    /// Light view matrix
    ///
    /// Spot and point lights look along their direction from their position;
    /// directional lights look along their direction from the origin.
    pub fn view_matrix(&self) -> &Mat4 {
        &self.view
    }

    /// Pending updates
    pub fn dirty(&self) -> LightDirty {
        self.dirty
    }

    /// Clear some pending update bits
    pub fn clear_dirty(&mut self, bits: LightDirty) {
        self.dirty.remove(bits);
    }

    /// GPU record
    pub fn record(&self) -> LightRecord {
        let view_inv = self.view.try_inverse().unwrap_or_else(Mat4::identity);
        let dir = self.direction();
        LightRecord {
            origin: [self.origin.x, self.origin.y, self.origin.z, self.light_type as u32 as f32],
            diffuse: self.diffuse.into(),
            ambient: self.ambient.into(),
            specular: self.specular.into(),
            attenuation: self.attenuation.into(),
            spot_rotation: [self.rotation.x, self.rotation.y, self.rotation.z, 0.0],
            spot_direction: [dir.x, dir.y, dir.z, 0.0],
            cutoff: self.cutoff,
            cutoff_angle: self.cutoff_angle,
            angle_dist_factor: self.angle_dist_factor,
            ambient_clamp_factor: self.ambient_clamp_factor,
            view: utils::to_gpu_matrix(&self.view),
            view_inv: utils::to_gpu_matrix(&view_inv),
            intensity: self.intensity,
            casts_shadows: u32::from(self.casts_shadows),
            _pad: [0; 2],
        }
    }

    fn update_view(&mut self) {
        let dir = self.direction();
        let eye = match self.light_type {
            LightType::Directional => Vec3::zeros(),
            LightType::Point | LightType::Spot => self.origin,
        };
        self.view = Mat4::look_at(eye, eye + dir, stable_up(&dir));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn white() -> Vec4 {
        Vec4::new(1.0, 1.0, 1.0, 1.0)
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(LIGHT_RECORD_SIZE, 272);
        assert_eq!(SHADOW_MAP_RECORD_SIZE, 80);
    }

    #[test]
    fn test_shadow_records_are_aligned() {
        let limits = DeviceLimits { min_uniform_buffer_offset_alignment: 256, ..Default::default() };
        let layout = LightBufferLayout::new(3, &limits);
        assert_eq!(layout.lights_size, 816);
        assert_eq!(layout.shadow_offset, 1024);
        assert_eq!(layout.shadow_offset % 256, 0);
        assert_eq!(layout.shadow_record_offset(2), 1024 + 160);
        assert_eq!(layout.total_size(), 1024 + 240);

        assert_eq!(LightBufferLayout::new(0, &limits).total_size(), LIGHT_RECORD_SIZE);
    }

    #[test]
    fn test_spot_cutoff_cosine() {
        let light = Light::spot(Vec3::zeros(), 60.0, white(), white(), white(), Vec4::new(1.0, 0.1, 0.01, 0.0));
        assert_relative_eq!(light.cutoff(), 0.5, epsilon = 1e-6);
        assert_eq!(light.record().origin[3], 2.0);
    }

    #[test]
    fn test_spot_look_at_sets_direction() {
        let mut light = Light::spot(Vec3::new(0.0, 10.0, 0.0), 30.0, white(), white(), white(), Vec4::zeros());
        light.clear_dirty(LightDirty::all());
        light.look_at(Vec3::new(0.0, 0.0, -10.0));
        let expected = Vec3::new(0.0, -10.0, -10.0).normalize();
        assert_relative_eq!(light.direction(), expected, epsilon = 1e-5);
        assert!(light.dirty().contains(LightDirty::DIRTY_VIEW | LightDirty::DIRTY_SHADOWS));
    }

    #[test]
    fn test_record_view_inverse() {
        let light = Light::spot(Vec3::new(3.0, 4.0, 5.0), 45.0, white(), white(), white(), Vec4::zeros());
        let record = light.record();
        let view = Mat4::from_fn(|r, c| record.view[c][r]);
        let view_inv = Mat4::from_fn(|r, c| record.view_inv[c][r]);
        assert_relative_eq!(view * view_inv, Mat4::identity(), epsilon = 1e-5);
    }

    #[test]
    fn test_intensity_and_dirty() {
        let mut light = Light::directional(Vec3::new(0.0, -2.0, 0.0), white(), white(), white());
        assert_relative_eq!(light.direction(), Vec3::new(0.0, -1.0, 0.0));
        light.clear_dirty(LightDirty::all());
        light.set_intensity(2.0);
        assert_eq!(light.intensity(), 1.0);
        assert_eq!(light.dirty(), LightDirty::DIRTY);
    }
}
