//! Bounding volumes and frustum classification
//!
//! Axis-aligned boxes, planes and view frustums shared by the tile index,
//! the visibility engine and the shadow manager.

use crate::foundation::math::{Mat4, Point3, Vec3, Vec4};

/// Axis-Aligned Bounding Box for spatial queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl AABB {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Smallest box containing every point; `None` for an empty iterator
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut aabb = Self::new(first, first);
        for p in points {
            aabb.min = aabb.min.inf(&p);
            aabb.max = aabb.max.sup(&p);
        }
        Some(aabb)
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Full edge lengths
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Volume of the box
    pub fn volume(&self) -> f32 {
        let s = self.size();
        s.x * s.y * s.z
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if `other` lies completely inside this box
    pub fn contains(&self, other: &AABB) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Interiors overlap (touching faces do not count)
    pub fn overlaps_interior(&self, other: &AABB) -> bool {
        self.min.x < other.max.x && self.max.x > other.min.x &&
        self.min.y < other.max.y && self.max.y > other.min.y &&
        self.min.z < other.max.z && self.max.z > other.min.z
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &AABB) -> AABB {
        AABB::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    /// The eight corners, bit 0 selects x, bit 1 y, bit 2 z
    pub fn corners(&self) -> [Vec3; 8] {
        let mut corners = [Vec3::zeros(); 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            *corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
        }
        corners
    }

    /// Box enclosing this box after an affine transform
    pub fn transformed(&self, matrix: &Mat4) -> AABB {
        let corners = self.corners();
        let mut out = AABB::new(
            Vec3::repeat(f32::INFINITY),
            Vec3::repeat(f32::NEG_INFINITY),
        );
        for c in &corners {
            let p = matrix.transform_point(&Point3::from(*c)).coords;
            out.min = out.min.inf(&p);
            out.max = out.max.sup(&p);
        }
        out
    }
}

/// Plane defined by normal and distance from origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Normal vector (should be normalized)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal: normal.normalize(), distance }
    }

    /// Plane `ax + by + cz + d = 0`, normalized
    pub fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = coefficients.xyz();
        let length = normal.magnitude();
        if length <= f32::EPSILON {
            return Self { normal: Vec3::zeros(), distance: 0.0 };
        }
        Self {
            normal: normal / length,
            distance: coefficients.w / length,
        }
    }

    /// Plane through three points; the normal follows `(p2 - p0) x (p1 - p0)`
    pub fn from_points(p0: Vec3, p1: Vec3, p2: Vec3) -> Self {
        let normal = (p2 - p0).cross(&(p1 - p0)).normalize();
        Self { normal, distance: -normal.dot(&p0) }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }
}

/// Result of classifying a box against a frustum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrustumTest {
    /// Completely outside at least one plane
    Outside,
    /// Straddles one or more planes
    Intersect,
    /// Completely inside all planes
    Inside,
}

impl FrustumTest {
    /// Anything not outside is drawn
    pub fn is_visible(self) -> bool {
        self != FrustumTest::Outside
    }
}

/// Frustum for visibility culling
///
/// Planes point inward: a point is inside when its distance to every plane
/// is non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    /// Six planes defining the frustum (left, right, bottom, top, near, far)
    pub planes: [Plane; 6],
    /// Box around the frustum corners, used as an early reject
    pub bounds: Option<AABB>,
}

impl Frustum {
    /// Create a frustum from six planes
    pub fn new(planes: [Plane; 6]) -> Self {
        Self { planes, bounds: None }
    }

    /// Extract frustum planes from a view-projection matrix
    ///
    /// Gribb-Hartmann extraction for clip spaces with depth in `[0, 1]`.
    /// Works for perspective and orthographic projections alike.
    pub fn from_matrix(vp_matrix: &Mat4) -> Self {
        let row = |i: usize| -> Vec4 { vp_matrix.row(i).transpose() };
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let planes = [
            Plane::from_coefficients(r3 + r0),
            Plane::from_coefficients(r3 - r0),
            Plane::from_coefficients(r3 + r1),
            Plane::from_coefficients(r3 - r1),
            Plane::from_coefficients(r2),
            Plane::from_coefficients(r3 - r2),
        ];

        let bounds = Self::corners_from_matrix(vp_matrix)
            .and_then(AABB::from_points);

        Self { planes, bounds }
    }

    /// World-space frustum corners obtained by unprojecting the clip cube
    pub fn corners_from_matrix(vp_matrix: &Mat4) -> Option<[Vec3; 8]> {
        let inverse = vp_matrix.try_inverse()?;
        let mut corners = [Vec3::zeros(); 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let ndc = Vec4::new(
                if i & 1 == 0 { -1.0 } else { 1.0 },
                if i & 2 == 0 { -1.0 } else { 1.0 },
                if i & 4 == 0 { 0.0 } else { 1.0 },
                1.0,
            );
            let world = inverse * ndc;
            if world.w.abs() <= f32::EPSILON {
                return None;
            }
            *corner = world.xyz() / world.w;
        }
        Some(corners)
    }

    /// Classify a box as inside, outside or straddling the frustum
    pub fn classify_aabb(&self, aabb: &AABB) -> FrustumTest {
        if let Some(bounds) = &self.bounds {
            if !bounds.intersects(aabb) {
                return FrustumTest::Outside;
            }
        }

        let mut result = FrustumTest::Inside;
        for plane in &self.planes {
            // p-vertex: the corner furthest along the plane normal
            let mut p = aabb.min;
            let mut n = aabb.max;
            if plane.normal.x >= 0.0 { p.x = aabb.max.x; n.x = aabb.min.x; }
            if plane.normal.y >= 0.0 { p.y = aabb.max.y; n.y = aabb.min.y; }
            if plane.normal.z >= 0.0 { p.z = aabb.max.z; n.z = aabb.min.z; }

            if plane.distance_to_point(p) < 0.0 {
                return FrustumTest::Outside;
            }
            if plane.distance_to_point(n) < 0.0 {
                result = FrustumTest::Intersect;
            }
        }
        result
    }

    /// Check if an AABB is inside or intersects the frustum
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        self.classify_aabb(aabb).is_visible()
    }

    /// Check if a point lies inside every plane
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4Ext, utils};
    use approx::assert_relative_eq;

    fn looking_down_negative_z() -> Frustum {
        let view = Mat4::look_at(Vec3::zeros(), Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 1.0, 0.0));
        let proj = Mat4::perspective(utils::deg_to_rad(90.0), 1.0, 1.0, 100.0);
        Frustum::from_matrix(&(proj * Mat4::vulkan_coordinate_transform() * view))
    }

    #[test]
    fn test_aabb_contains_point() {
        let aabb = AABB::new(
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
        );

        assert!(aabb.contains_point(Vec3::zeros()));
        assert!(aabb.contains_point(Vec3::new(0.5, 0.5, 0.5)));
        assert!(!aabb.contains_point(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_intersects() {
        let aabb1 = AABB::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 2.0, 2.0));
        let aabb2 = AABB::new(Vec3::new(1.0, 1.0, 1.0), Vec3::new(3.0, 3.0, 3.0));
        let aabb3 = AABB::new(Vec3::new(5.0, 5.0, 5.0), Vec3::new(7.0, 7.0, 7.0));

        assert!(aabb1.intersects(&aabb2));
        assert!(!aabb1.intersects(&aabb3));
    }

    #[test]
    fn test_touching_boxes_do_not_overlap_interior() {
        let a = AABB::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        let b = AABB::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
        assert!(!a.overlaps_interior(&b));
    }

    #[test]
    fn test_transformed_box_encloses_rotation() {
        let aabb = AABB::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let rotated = aabb.transformed(&Mat4::from_euler_angles(0.0, utils::deg_to_rad(45.0), 0.0));
        assert_relative_eq!(rotated.max.x, 2.0_f32.sqrt(), epsilon = 1e-5);
        assert_relative_eq!(rotated.max.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_plane_from_points() {
        let plane = Plane::from_points(
            Vec3::zeros(),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        );
        assert_relative_eq!(plane.distance_to_point(Vec3::new(0.0, 2.0, 0.0)), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_frustum_classification() {
        let frustum = looking_down_negative_z();

        let inside = AABB::from_center_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::repeat(1.0));
        let behind = AABB::from_center_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::repeat(1.0));
        let straddling = AABB::from_center_extents(Vec3::new(0.0, 0.0, -100.0), Vec3::repeat(5.0));

        assert_eq!(frustum.classify_aabb(&inside), FrustumTest::Inside);
        assert_eq!(frustum.classify_aabb(&behind), FrustumTest::Outside);
        assert_eq!(frustum.classify_aabb(&straddling), FrustumTest::Intersect);
        assert!(frustum.intersects_aabb(&straddling));
    }

    #[test]
    fn test_frustum_bounds_enclose_corners() {
        let frustum = looking_down_negative_z();
        let bounds = frustum.bounds.expect("perspective matrix is invertible");
        assert_relative_eq!(bounds.min.z, -100.0, epsilon = 1e-2);
        assert_relative_eq!(bounds.max.z, -1.0, epsilon = 1e-3);
        assert_relative_eq!(bounds.max.x, 100.0, epsilon = 1e-2);
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -50.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -0.5)));
    }
}
