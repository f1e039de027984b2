//! # Scene camera
//!
//! Euler-angle camera with cached matrices and frustum. Every mutation
//! recomputes the derived state immediately and raises a dirty bit; the scene
//! consumes the bits once per frame to decide whether visibility, packing
//! and recording must run again.
//!
//! ## Conventions
//! - Rotation is stored as Euler angles in degrees `(pitch, yaw, roll)`,
//!   wrapped into `(-360, 360)`.
//! - With zero rotation the camera looks down -Z with +Y up.
//! - The view-projection is `P × X × V`, where `X` converts the Y-up view
//!   space into Vulkan's clip conventions.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3};
use crate::spatial::{Frustum, AABB};

bitflags! {
    /// What changed since the scene last consumed the camera
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CameraDirty: u32 {
        /// Field of view, aspect or clip planes
        const PROJECTION = 1 << 0;
        /// Position
        const POSITION   = 1 << 1;
        /// Rotation
        const VIEW_DIR   = 1 << 2;
    }
}

/// Perspective projection parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Projection {
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Width / height
    pub aspect: f32,
    /// Near clip distance (> 0)
    pub near: f32,
    /// Far clip distance (> near)
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov_degrees: 45.0,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 500.0,
        }
    }
}

impl Projection {
    /// Create projection parameters
    pub fn new(fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self { fov_degrees, aspect, near, far }
    }

    /// Projection matrix (before the Vulkan coordinate transform)
    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective(utils::deg_to_rad(self.fov_degrees), self.aspect, self.near, self.far)
    }
}

/// Camera with cached view state
///
/// # Example
/// ```rust
/// use tiled_scene::foundation::math::Vec3;
/// use tiled_scene::scene::{Camera, Projection};
///
/// let mut camera = Camera::new(Vec3::new(0.0, 2.0, 10.0), Vec3::zeros(), Projection::default());
/// camera.look_at(Vec3::zeros());
/// assert!(camera.is_dirty());
/// ```
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    rotation: Vec3,
    projection: Projection,

    forward: Vec3,
    up: Vec3,
    view: Mat4,
    proj: Mat4,
    view_proj: Mat4,
    frustum: Frustum,

    dirty: CameraDirty,
}

impl Camera {
    /// Create a camera
    ///
    /// # Arguments
    /// * `position` - World-space position
    /// * `rotation` - Euler angles in degrees `(pitch, yaw, roll)`
    /// * `projection` - Perspective parameters
    pub fn new(position: Vec3, rotation: Vec3, projection: Projection) -> Self {
        let proj = projection.matrix();
        let mut camera = Self {
            position,
            rotation: rotation.map(utils::wrap_degrees),
            projection,
            forward: Vec3::new(0.0, 0.0, -1.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            view: Mat4::identity(),
            proj,
            view_proj: Mat4::identity(),
            frustum: Frustum::from_matrix(&proj),
            dirty: CameraDirty::all(),
        };
        camera.update_view();
        camera
    }

    /// Move to an absolute position
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty |= CameraDirty::POSITION;
        self.update_view();
        log::trace!("Camera position updated to: {:?}", position);
    }

    /// Move by a world-space offset
    pub fn translate(&mut self, delta: Vec3) {
        self.set_position(self.position + delta);
    }

    /// Move along the view direction
    pub fn step(&mut self, distance: f32) {
        self.set_position(self.position + self.forward * distance);
    }

    /// Set absolute Euler angles (degrees)
    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation.map(utils::wrap_degrees);
        self.dirty |= CameraDirty::VIEW_DIR;
        self.update_view();
    }

    /// Add to the Euler angles (degrees)
    pub fn rotate(&mut self, delta: Vec3) {
        self.set_rotation(self.rotation + delta);
    }

    /// Turn to face `target`, keeping roll at zero
    ///
    /// Does nothing when `target` coincides with the camera position.
    pub fn look_at(&mut self, target: Vec3) {
        let offset = target - self.position;
        if offset.norm_squared() <= f32::EPSILON {
            return;
        }
        let dir = offset.normalize();
        let pitch = utils::rad_to_deg(dir.y.clamp(-1.0, 1.0).asin());
        let yaw = utils::rad_to_deg((-dir.x).atan2(-dir.z));
        self.set_rotation(Vec3::new(pitch, yaw, 0.0));
    }

    /// Replace the projection parameters
    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
        self.proj = projection.matrix();
        self.dirty |= CameraDirty::PROJECTION;
        self.update_view_proj();
    }

    /// Update the aspect ratio after a viewport resize
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if (self.projection.aspect - aspect).abs() > f32::EPSILON {
            self.set_projection(Projection { aspect, ..self.projection });
        }
    }

    /// World-space position
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Euler angles in degrees
    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    /// Projection parameters
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Unit view direction
    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    /// Unit up vector
    pub fn up(&self) -> Vec3 {
        self.up
    }

    /// World to view matrix
    pub fn view_matrix(&self) -> &Mat4 {
        &self.view
    }

    /// Projection matrix
    pub fn projection_matrix(&self) -> &Mat4 {
        &self.proj
    }

    /// Combined `P × X × V`
    pub fn view_projection(&self) -> &Mat4 {
        &self.view_proj
    }

    /// World-space frustum
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Pending change bits
    pub fn dirty(&self) -> CameraDirty {
        self.dirty
    }

    /// True when anything changed since the last `clear_dirty()`
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Mark the current state as consumed
    pub fn clear_dirty(&mut self) {
        self.dirty = CameraDirty::empty();
    }

    /// Box of half-size `radius` around the camera, for collision probes
    pub fn collision_box(&self, radius: f32) -> AABB {
        AABB::from_center_extents(self.position, Vec3::repeat(radius))
    }

    fn update_view(&mut self) {
        let orientation = utils::quat_from_euler_degrees(&self.rotation);
        self.forward = (orientation * Vec3::new(0.0, 0.0, -1.0)).normalize();
        self.up = (orientation * Vec3::new(0.0, 1.0, 0.0)).normalize();
        self.view = Mat4::look_at(self.position, self.position + self.forward, self.up);
        self.update_view_proj();
    }

    fn update_view_proj(&mut self) {
        self.view_proj = self.proj * Mat4::vulkan_coordinate_transform() * self.view;
        self.frustum = Frustum::from_matrix(&self.view_proj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> Camera {
        Camera::new(Vec3::zeros(), Vec3::zeros(), Projection::new(60.0, 1.0, 0.1, 100.0))
    }

    #[test]
    fn test_default_orientation_looks_down_negative_z() {
        let camera = camera();
        assert_relative_eq!(camera.forward(), Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-6);
        assert!(camera.frustum().contains_point(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!camera.frustum().contains_point(Vec3::new(0.0, 0.0, 10.0)));
    }

    #[test]
    fn test_yaw_turns_left() {
        let mut camera = camera();
        camera.set_rotation(Vec3::new(0.0, 90.0, 0.0));
        assert_relative_eq!(camera.forward(), Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-6);
        assert!(camera.frustum().contains_point(Vec3::new(-10.0, 0.0, 0.0)));
    }

    #[test]
    fn test_look_at_faces_target() {
        let mut camera = camera();
        camera.set_position(Vec3::new(5.0, 5.0, 5.0));
        camera.look_at(Vec3::new(5.0, 0.0, -20.0));
        let expected = Vec3::new(0.0, -5.0, -25.0).normalize();
        assert_relative_eq!(camera.forward(), expected, epsilon = 1e-5);
        assert!(camera.frustum().contains_point(Vec3::new(5.0, 0.0, -20.0)));
    }

    #[test]
    fn test_rotation_wraps() {
        let mut camera = camera();
        camera.rotate(Vec3::new(0.0, 350.0, 0.0));
        camera.rotate(Vec3::new(0.0, 20.0, 0.0));
        assert_relative_eq!(camera.rotation().y, 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_dirty_bits_track_changes() {
        let mut camera = camera();
        assert!(camera.is_dirty());
        camera.clear_dirty();
        assert!(!camera.is_dirty());

        camera.step(2.0);
        assert_eq!(camera.dirty(), CameraDirty::POSITION);
        assert_relative_eq!(camera.position(), Vec3::new(0.0, 0.0, -2.0), epsilon = 1e-6);

        camera.set_aspect_ratio(2.0);
        assert!(camera.dirty().contains(CameraDirty::POSITION | CameraDirty::PROJECTION));

        camera.clear_dirty();
        camera.set_aspect_ratio(2.0);
        assert!(!camera.is_dirty());
    }
}
