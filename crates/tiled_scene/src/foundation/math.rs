//! Math utilities and types
//!
//! nalgebra aliases plus the projection helpers used by cameras and shadow
//! casting lights. All projections target Vulkan clip space: depth in
//! `[0, 1]` and Y pointing down, reached through the intermediate `X`
//! transform returned by [`Mat4Ext::vulkan_coordinate_transform`].

pub use nalgebra::{
    Vector3, Vector4,
    Matrix4,
    Quaternion,
    Unit,
};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation as Euler angles in degrees (x, y, z)
    pub rotation: Vec3,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Builder-style rotation override (degrees)
    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    /// Builder-style scale override
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Rotation quaternion for the stored Euler angles
    pub fn quaternion(&self) -> Quat {
        utils::quat_from_euler_degrees(&self.rotation)
    }

    /// Convert to a transformation matrix: `T * R * S`
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.quaternion().to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;

    /// Radians to degrees conversion factor
    pub const RAD_TO_DEG: f32 = 180.0 / PI;
}

/// Math utility functions
pub mod utils {
    use super::*;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }

    /// Convert radians to degrees
    pub fn rad_to_deg(radians: f32) -> f32 {
        radians * constants::RAD_TO_DEG
    }

    /// Wrap an angle in degrees into `(-360, 360)`
    pub fn wrap_degrees(angle: f32) -> f32 {
        angle % 360.0
    }

    /// Quaternion from Euler angles in degrees, applied X then Y then Z
    pub fn quat_from_euler_degrees(rotation: &Vec3) -> Quat {
        Quat::from_euler_angles(
            deg_to_rad(rotation.x),
            deg_to_rad(rotation.y),
            deg_to_rad(rotation.z),
        )
    }

    /// Round `value` up to the next multiple of `alignment` (a power of two or any non-zero value)
    pub const fn align_up(value: u64, alignment: u64) -> u64 {
        if alignment == 0 {
            value
        } else {
            value.div_ceil(alignment) * alignment
        }
    }

    /// Column-major float array, the layout GLSL expects for `mat4`
    pub fn to_gpu_matrix(matrix: &Mat4) -> [[f32; 4]; 4] {
        let mut out = [[0.0; 4]; 4];
        for (col, column) in out.iter_mut().enumerate() {
            for (row, value) in column.iter_mut().enumerate() {
                *value = matrix[(row, col)];
            }
        }
        out
    }
}

/// Extension trait for Mat4 with projection helpers
pub trait Mat4Ext {
    /// Create a perspective projection matrix (`fov_y` in radians)
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Create an orthographic projection matrix
    ///
    /// Bounds are expressed in the `X`-transformed view space, so `near`
    /// and `far` are positive distances along the view direction.
    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4;

    /// Create a look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Create the intermediate coordinate system transformation for Vulkan
    fn vulkan_coordinate_transform() -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        // P = [a⁻¹/tan(φ/2)    0              0                    0           ]
        //     [0               1/tan(φ/2)     0                    0           ]
        //     [0               0              f/(f-n)              -nf/(f-n)   ]
        //     [0               0              1                    0           ]
        let tan_half_fovy = (fov_y * 0.5).tan();

        let mut result = Mat4::zeros();
        result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
        result[(1, 1)] = 1.0 / tan_half_fovy;
        result[(2, 2)] = far / (far - near);
        result[(2, 3)] = -(near * far) / (far - near);
        result[(3, 2)] = 1.0;
        result
    }

    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
        let mut result = Mat4::identity();
        result[(0, 0)] = 2.0 / (right - left);
        result[(0, 3)] = -(right + left) / (right - left);
        result[(1, 1)] = 2.0 / (top - bottom);
        result[(1, 3)] = -(top + bottom) / (top - bottom);
        result[(2, 2)] = 1.0 / (far - near);
        result[(2, 3)] = -near / (far - near);
        result
    }

    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        let translation = Mat4::new(
            1.0, 0.0, 0.0, -eye.x,
            0.0, 1.0, 0.0, -eye.y,
            0.0, 0.0, 1.0, -eye.z,
            0.0, 0.0, 0.0, 1.0,
        );

        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            camera_up.x, camera_up.y, camera_up.z, 0.0,
            -forward.x, -forward.y, -forward.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        rotation * translation
    }

    fn vulkan_coordinate_transform() -> Mat4 {
        // Flips Y and Z: right stays right, up becomes down, forward goes into the screen
        Mat4::new(
            1.0,  0.0,  0.0, 0.0,
            0.0, -1.0,  0.0, 0.0,
            0.0,  0.0, -1.0, 0.0,
            0.0,  0.0,  0.0, 1.0,
        )
    }
}

/// Pick an up vector that is not parallel to `direction`
pub fn stable_up(direction: &Vec3) -> Vec3 {
    if direction.normalize().y.abs() > 0.99 {
        Vec3::new(0.0, 0.0, 1.0)
    } else {
        Vec3::new(0.0, 1.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_align_up() {
        assert_eq!(utils::align_up(68, 16), 80);
        assert_eq!(utils::align_up(64, 16), 64);
        assert_eq!(utils::align_up(0, 256), 0);
        assert_eq!(utils::align_up(17, 0), 17);
    }

    #[test]
    fn test_perspective_depth_range() {
        let proj = Mat4::perspective(utils::deg_to_rad(90.0), 1.0, 0.1, 100.0);
        let near = proj * Vec4::new(0.0, 0.0, 0.1, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, 100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_orthographic_maps_box_to_clip() {
        let proj = Mat4::orthographic(-2.0, 2.0, -1.0, 1.0, 1.0, 11.0);
        let corner = proj * Vec4::new(2.0, 1.0, 11.0, 1.0);
        assert_relative_eq!(corner.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(corner.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(corner.z, 1.0, epsilon = 1e-6);
        let near = proj * Vec4::new(-2.0, -1.0, 1.0, 1.0);
        assert_relative_eq!(near.x, -1.0, epsilon = 1e-6);
        assert_relative_eq!(near.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_transform_matrix_translation() {
        let t = Transform::from_position(Vec3::new(1.0, 2.0, 3.0)).with_scale(Vec3::new(2.0, 2.0, 2.0));
        let m = t.to_matrix();
        let p = m.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 3.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gpu_matrix_is_column_major() {
        let m = Mat4::new_translation(&Vec3::new(5.0, 6.0, 7.0));
        let cols = utils::to_gpu_matrix(&m);
        assert_eq!(cols[3], [5.0, 6.0, 7.0, 1.0]);
    }
}
