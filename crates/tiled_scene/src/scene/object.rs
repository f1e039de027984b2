//! Scene objects
//!
//! An object is a placed instance of a category. Its model matrix and world
//! box are derived from the transform and recomputed whenever the transform
//! changes.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::foundation::math::{Mat4, Transform, Vec3};
use crate::scene::CategoryId;
use crate::spatial::AABB;

new_key_type! {
    /// Stable key of an object registered with the scene
    pub struct ObjectKey;
}

/// Whether an object is packed once or every dirty frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ObjectKind {
    /// Packed at prepare time; moving it forces a relayout
    #[default]
    Static,
    /// Repacked whenever it or the camera changes
    Dynamic,
}

bitflags! {
    /// Derived state that is out of date
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectDirty: u32 {
        /// Transform changed since the object was last packed
        const TRANSFORM = 1 << 0;
        /// Material index changed since the object was last packed
        const MATERIAL = 1 << 1;
    }
}

/// An object placed in the scene
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    transform: Transform,
    model_bounds: AABB,
    mesh_bounds: Vec<AABB>,
    material_base: u32,
    casts_shadows: bool,
    receives_shadows: bool,
    kind: ObjectKind,

    model_matrix: Mat4,
    world_bounds: AABB,
    dirty: ObjectDirty,

    pub(crate) category: Option<CategoryId>,
    pub(crate) tile: Option<usize>,
}

impl SceneObject {
    /// Static object at `position` with point bounds
    pub fn new(position: Vec3) -> Self {
        Self::with_transform(Transform::from_position(position))
    }

    /// Static object with a full transform
    pub fn with_transform(transform: Transform) -> Self {
        let mut object = Self {
            transform,
            model_bounds: AABB::new(Vec3::zeros(), Vec3::zeros()),
            mesh_bounds: Vec::new(),
            material_base: 0,
            casts_shadows: true,
            receives_shadows: true,
            kind: ObjectKind::Static,
            model_matrix: Mat4::identity(),
            world_bounds: AABB::new(Vec3::zeros(), Vec3::zeros()),
            dirty: ObjectDirty::all(),
            category: None,
            tile: None,
        };
        object.refresh();
        object
    }

    /// Builder-style model-space bounds
    pub fn with_bounds(mut self, bounds: AABB) -> Self {
        self.model_bounds = bounds;
        self.refresh();
        self
    }

    /// Builder-style model-space mesh bounds, used for fine collision tests
    pub fn with_mesh_bounds(mut self, meshes: Vec<AABB>) -> Self {
        self.mesh_bounds = meshes;
        self
    }

    /// Builder-style material base index
    pub fn with_material_base(mut self, material_base: u32) -> Self {
        self.material_base = material_base;
        self
    }

    /// Builder-style shadow participation
    pub fn with_shadows(mut self, casts: bool, receives: bool) -> Self {
        self.casts_shadows = casts;
        self.receives_shadows = receives;
        self
    }

    /// Mark the object as dynamic
    pub fn dynamic(mut self) -> Self {
        self.kind = ObjectKind::Dynamic;
        self
    }

    /// Current transform
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// World position
    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    /// Cached model matrix
    pub fn model_matrix(&self) -> &Mat4 {
        &self.model_matrix
    }

    /// Cached world-space box
    pub fn world_bounds(&self) -> &AABB {
        &self.world_bounds
    }

    /// Model-space box
    pub fn model_bounds(&self) -> &AABB {
        &self.model_bounds
    }

    /// Model-space mesh boxes
    pub fn mesh_bounds(&self) -> &[AABB] {
        &self.mesh_bounds
    }

    /// Material base index
    pub fn material_base(&self) -> u32 {
        self.material_base
    }

    /// Whether the object is drawn into shadow maps
    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows
    }

    /// Whether the object samples shadow maps
    pub fn receives_shadows(&self) -> bool {
        self.receives_shadows
    }

    /// Static or dynamic
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// True for dynamic objects
    pub fn is_dynamic(&self) -> bool {
        self.kind == ObjectKind::Dynamic
    }

    /// Category the object was registered under
    pub fn category(&self) -> Option<CategoryId> {
        self.category
    }

    /// Index of the tile that holds the object
    pub fn tile(&self) -> Option<usize> {
        self.tile
    }

    /// Pending derived-state changes
    pub fn dirty(&self) -> ObjectDirty {
        self.dirty
    }

    pub(crate) fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
        self.refresh();
    }

    pub(crate) fn set_material_base(&mut self, material_base: u32) {
        self.material_base = material_base;
        self.dirty |= ObjectDirty::MATERIAL;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = ObjectDirty::empty();
    }

    /// World-space mesh boxes, or the object box when no meshes are known
    pub fn world_mesh_bounds(&self) -> Vec<AABB> {
        if self.mesh_bounds.is_empty() {
            vec![self.world_bounds]
        } else {
            self.mesh_bounds
                .iter()
                .map(|mesh| mesh.transformed(&self.model_matrix))
                .collect()
        }
    }

    fn refresh(&mut self) {
        self.model_matrix = self.transform.to_matrix();
        self.world_bounds = self.model_bounds.transformed(&self.model_matrix);
        self.dirty |= ObjectDirty::TRANSFORM;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_world_bounds_follow_transform() {
        let mut object = SceneObject::new(Vec3::new(10.0, 0.0, 0.0))
            .with_bounds(AABB::new(Vec3::repeat(-1.0), Vec3::repeat(1.0)));
        assert_relative_eq!(object.world_bounds().min.x, 9.0);

        let moved = Transform::from_position(Vec3::new(0.0, 5.0, 0.0)).with_scale(Vec3::repeat(2.0));
        object.clear_dirty();
        object.set_transform(moved);
        assert!(object.dirty().contains(ObjectDirty::TRANSFORM));
        assert_relative_eq!(object.world_bounds().min.y, 3.0);
        assert_relative_eq!(object.world_bounds().max.x, 2.0);
        assert_relative_eq!(object.model_matrix()[(1, 3)], 5.0);
    }

    #[test]
    fn test_mesh_bounds_fall_back_to_object_box() {
        let object = SceneObject::new(Vec3::zeros()).with_bounds(AABB::new(Vec3::zeros(), Vec3::repeat(1.0)));
        assert_eq!(object.world_mesh_bounds(), vec![*object.world_bounds()]);

        let meshes = vec![AABB::new(Vec3::zeros(), Vec3::repeat(0.5))];
        let object = object.with_mesh_bounds(meshes);
        assert_relative_eq!(object.world_mesh_bounds()[0].max.x, 0.5);
    }

    #[test]
    fn test_builders() {
        let object = SceneObject::new(Vec3::zeros())
            .with_material_base(3)
            .with_shadows(false, true)
            .dynamic();
        assert_eq!(object.material_base(), 3);
        assert!(!object.casts_shadows());
        assert!(object.is_dynamic());
        assert_eq!(object.category(), None);
    }
}
