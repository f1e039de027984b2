//! Instance data packing
//!
//! Converts objects into the fixed-stride records the shaders read. Static
//! records follow the catalog's static layout and are packed once; dynamic
//! records are rebuilt from the visible dynamic objects whenever the camera
//! or a dynamic object changed.
//!
//! Capacities are fixed by `prepare()`: writing past them means the
//! catalog's capacity checks were bypassed, which is a bug, so it panics.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::utils;
use crate::scene::catalog::{ObjectCatalog, StaticLayout};
use crate::scene::category::{MaterialRecord, MAX_MATERIALS_PER_CATEGORY};
use crate::scene::tile::VisibleSetInfo;
use crate::scene::{CategoryRegistry, ObjectKey, SceneObject};

/// Per-instance data for the color pass
///
/// 64-byte model matrix followed by a 16-byte block, so the stride is a
/// multiple of 16 as std140/std430 arrays require.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceRecord {
    /// Column-major model matrix
    pub model: [[f32; 4]; 4],
    /// Base index into the category's material table
    pub material_index: u32,
    /// Category id
    pub model_index: u32,
    /// Nonzero when the object samples shadow maps
    pub receives_shadows: u32,
    /// Padding to 16 bytes
    pub _pad: u32,
}

unsafe impl Pod for InstanceRecord {}
unsafe impl Zeroable for InstanceRecord {}

impl InstanceRecord {
    /// Record of a categorized object
    pub fn from_object(object: &SceneObject) -> Self {
        Self {
            model: utils::to_gpu_matrix(object.model_matrix()),
            material_index: object.material_base(),
            model_index: object.category().map_or(0, |id| id.index() as u32),
            receives_shadows: u32::from(object.receives_shadows()),
            _pad: 0,
        }
    }
}

/// Per-instance data for shadow passes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowCasterRecord {
    /// Column-major model matrix
    pub model: [[f32; 4]; 4],
}

unsafe impl Pod for ShadowCasterRecord {}
unsafe impl Zeroable for ShadowCasterRecord {}

impl ShadowCasterRecord {
    /// Record of a shadow casting object
    pub fn from_object(object: &SceneObject) -> Self {
        Self { model: utils::to_gpu_matrix(object.model_matrix()) }
    }
}

/// Bytes per instance record
pub const INSTANCE_STRIDE: u64 = std::mem::size_of::<InstanceRecord>() as u64;

/// Bytes per shadow caster record
pub const SHADOW_CASTER_STRIDE: u64 = std::mem::size_of::<ShadowCasterRecord>() as u64;

/// Bytes per material record
pub const MATERIAL_STRIDE: u64 = std::mem::size_of::<MaterialRecord>() as u64;

/// Size of a buffer region holding `instances` instance records
pub const fn region_size(instances: u64) -> u64 {
    instances * INSTANCE_STRIDE
}

/// Size of the material buffer for `categories` categories
pub const fn material_buffer_size(categories: u64) -> u64 {
    categories * MAX_MATERIALS_PER_CATEGORY as u64 * MATERIAL_STRIDE
}

/// Result of packing a set of dynamic objects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicPack {
    /// Per-category ranges, indexed by category id
    pub sets: Vec<VisibleSetInfo>,
    /// Packed objects in buffer order
    pub objects: Vec<ObjectKey>,
}

impl DynamicPack {
    /// Number of packed instances
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing was packed
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// CPU-side images of the instance buffers
#[derive(Debug, Default)]
pub struct InstanceDataPacker {
    static_capacity: u32,
    dynamic_capacity: u32,
    static_instances: Vec<u8>,
    static_casters: Vec<u8>,
    dynamic_instances: Vec<u8>,
    dynamic_casters: Vec<Vec<u8>>,
}

impl InstanceDataPacker {
    /// Create a packer for the given capacities
    pub fn new(static_capacity: u32, dynamic_capacity: u32) -> Self {
        Self {
            static_capacity,
            dynamic_capacity,
            ..Self::default()
        }
    }

    /// Static instance capacity
    pub fn static_capacity(&self) -> u32 {
        self.static_capacity
    }

    /// Dynamic instance capacity
    pub fn dynamic_capacity(&self) -> u32 {
        self.dynamic_capacity
    }

    /// Pack static records in layout order
    ///
    /// # Panics
    /// If the layout holds more instances than the static capacity.
    pub fn pack_static(&mut self, catalog: &ObjectCatalog, layout: &StaticLayout) {
        assert!(
            layout.instances.len() <= self.static_capacity as usize,
            "static layout holds {} instances, capacity is {}",
            layout.instances.len(),
            self.static_capacity
        );

        self.static_instances.clear();
        self.static_casters.clear();
        for object in layout.instances.iter().filter_map(|&key| catalog.object(key)) {
            self.static_instances
                .extend_from_slice(bytemuck::bytes_of(&InstanceRecord::from_object(object)));
        }
        for object in layout.casters.iter().filter_map(|&key| catalog.object(key)) {
            self.static_casters
                .extend_from_slice(bytemuck::bytes_of(&ShadowCasterRecord::from_object(object)));
        }
        log::debug!(
            "Packed {} static instances ({} bytes), {} shadow casters",
            layout.instances.len(),
            self.static_instances.len(),
            layout.casters.len()
        );
    }

    /// Pack visible dynamic objects, category-major
    ///
    /// Objects keep their relative order inside each category, so identical
    /// input always produces identical bytes.
    ///
    /// # Panics
    /// If more objects are given than the dynamic capacity.
    pub fn pack_dynamic(&mut self, catalog: &ObjectCatalog, visible: &[ObjectKey]) -> DynamicPack {
        let pack = Self::order_by_category(catalog, visible, self.dynamic_capacity);

        self.dynamic_instances.clear();
        for object in pack.objects.iter().filter_map(|&key| catalog.object(key)) {
            self.dynamic_instances
                .extend_from_slice(bytemuck::bytes_of(&InstanceRecord::from_object(object)));
        }
        log::trace!("Packed {} dynamic instances", pack.len());
        pack
    }

    /// Pack the dynamic shadow casters visible to light `slot`
    ///
    /// # Panics
    /// If more objects are given than the dynamic capacity.
    pub fn pack_dynamic_casters(&mut self, slot: usize, catalog: &ObjectCatalog, visible: &[ObjectKey]) -> DynamicPack {
        let pack = Self::order_by_category(catalog, visible, self.dynamic_capacity);

        if self.dynamic_casters.len() <= slot {
            self.dynamic_casters.resize_with(slot + 1, Vec::new);
        }
        let bytes = &mut self.dynamic_casters[slot];
        bytes.clear();
        for object in pack.objects.iter().filter_map(|&key| catalog.object(key)) {
            bytes.extend_from_slice(bytemuck::bytes_of(&ShadowCasterRecord::from_object(object)));
        }
        pack
    }

    /// Material table, one 32-entry block per category
    pub fn pack_materials(registry: &CategoryRegistry) -> Vec<u8> {
        let mut bytes = vec![0u8; material_buffer_size(registry.len() as u64) as usize];
        for id in registry.ids() {
            let block = id.index() * MAX_MATERIALS_PER_CATEGORY;
            for (slot, material) in registry.desc(id).materials.iter().enumerate() {
                let offset = (block + slot) * MATERIAL_STRIDE as usize;
                bytes[offset..offset + MATERIAL_STRIDE as usize].copy_from_slice(bytemuck::bytes_of(material));
            }
        }
        bytes
    }

    /// Packed static instance records
    pub fn static_instances(&self) -> &[u8] {
        &self.static_instances
    }

    /// Packed static shadow caster records
    pub fn static_casters(&self) -> &[u8] {
        &self.static_casters
    }

    /// Packed dynamic instance records
    pub fn dynamic_instances(&self) -> &[u8] {
        &self.dynamic_instances
    }

    /// Packed dynamic shadow casters of light `slot`
    pub fn dynamic_casters(&self, slot: usize) -> &[u8] {
        self.dynamic_casters.get(slot).map_or(&[], Vec::as_slice)
    }

    fn order_by_category(catalog: &ObjectCatalog, visible: &[ObjectKey], capacity: u32) -> DynamicPack {
        assert!(
            visible.len() <= capacity as usize,
            "{} dynamic instances exceed the capacity of {}",
            visible.len(),
            capacity
        );

        let category_of = |key: &ObjectKey| catalog.object(*key).and_then(SceneObject::category);
        let mut objects: Vec<ObjectKey> = visible.iter().copied().filter(|key| category_of(key).is_some()).collect();
        objects.sort_by_key(|key| category_of(key).map(|id| id.index()));

        let mut sets = vec![VisibleSetInfo::default(); catalog.categories().len()];
        for (index, key) in objects.iter().enumerate() {
            if let Some(id) = category_of(key) {
                let set = &mut sets[id.index()];
                if set.count == 0 {
                    set.start_index = index as u32;
                }
                set.count += 1;
            }
        }
        DynamicPack { sets, objects }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Transform, Vec3};
    use crate::scene::CategoryDesc;
    use crate::spatial::SpatialTileIndex;

    fn read<T: Pod>(bytes: &[u8]) -> Vec<T> {
        bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    fn catalog() -> ObjectCatalog {
        let grid = SpatialTileIndex::new(Vec3::zeros(), Vec3::repeat(100.0), Vec3::repeat(50.0)).unwrap();
        ObjectCatalog::new(grid, 1, 16)
    }

    #[test]
    fn test_record_strides() {
        assert_eq!(INSTANCE_STRIDE, 80);
        assert_eq!(INSTANCE_STRIDE % 16, 0);
        assert_eq!(SHADOW_CASTER_STRIDE, 64);
        assert_eq!(MATERIAL_STRIDE, 64);
    }

    #[test]
    fn test_million_instance_region() {
        assert_eq!(region_size(1_000_000), 80_000_000);
        assert_eq!(material_buffer_size(3), 3 * 32 * 64);
    }

    #[test]
    fn test_static_pack_follows_layout() {
        let mut catalog = catalog();
        let near = catalog.add_object("rock", SceneObject::new(Vec3::new(1.0, 2.0, 3.0)).with_material_base(4)).unwrap();
        catalog.add_object("rock", SceneObject::new(Vec3::new(80.0, 2.0, 3.0)).with_shadows(false, false)).unwrap();
        let layout = catalog.prepare();

        let mut packer = InstanceDataPacker::new(catalog.static_capacity(), 0);
        packer.pack_static(&catalog, &layout);
        assert_eq!(packer.static_instances().len(), 2 * INSTANCE_STRIDE as usize);
        assert_eq!(packer.static_casters().len(), SHADOW_CASTER_STRIDE as usize);

        let records: Vec<InstanceRecord> = read(packer.static_instances());
        assert_eq!(layout.instances[0], near);
        assert_eq!(records[0].material_index, 4);
        assert_eq!(records[0].receives_shadows, 1);
        assert_eq!(records[1].receives_shadows, 0);
        // Translation lives in the last column
        assert_eq!(records[0].model[3][..3], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_dynamic_pack_is_category_major() {
        let mut catalog = catalog();
        let a0 = catalog.add_object("a", SceneObject::new(Vec3::repeat(1.0)).dynamic()).unwrap();
        let b0 = catalog.add_object("b", SceneObject::new(Vec3::repeat(2.0)).dynamic()).unwrap();
        let a1 = catalog.add_object("a", SceneObject::new(Vec3::repeat(3.0)).dynamic()).unwrap();
        catalog.prepare();

        let mut packer = InstanceDataPacker::new(0, catalog.dynamic_capacity());
        let pack = packer.pack_dynamic(&catalog, &[b0, a0, a1]);
        assert_eq!(pack.objects, vec![a0, a1, b0]);
        assert_eq!(pack.sets, vec![VisibleSetInfo::new(0, 2), VisibleSetInfo::new(2, 1)]);

        let records: Vec<InstanceRecord> = read(packer.dynamic_instances());
        assert_eq!(records.iter().map(|r| r.model_index).collect::<Vec<_>>(), vec![0, 0, 1]);
    }

    #[test]
    fn test_repacking_is_byte_identical() {
        let mut catalog = catalog();
        let keys: Vec<_> = (0..5)
            .map(|i| {
                let category = if i % 2 == 0 { "ship" } else { "drone" };
                let object = SceneObject::with_transform(
                    Transform::from_position(Vec3::new(i as f32 * 10.0 + 1.0, 5.0, 5.0))
                        .with_rotation(Vec3::new(0.0, 30.0 * i as f32, 0.0)),
                )
                .dynamic();
                catalog.add_object(category, object).unwrap()
            })
            .collect();
        catalog.prepare();

        let mut packer = InstanceDataPacker::new(0, catalog.dynamic_capacity());
        let first_pack = packer.pack_dynamic(&catalog, &keys);
        let first = packer.dynamic_instances().to_vec();
        let second_pack = packer.pack_dynamic(&catalog, &keys);
        assert_eq!(first, packer.dynamic_instances());
        assert_eq!(first_pack, second_pack);
    }

    #[test]
    fn test_dynamic_casters_per_light() {
        let mut catalog = catalog();
        let ship = catalog.add_object("ship", SceneObject::new(Vec3::repeat(1.0)).dynamic()).unwrap();
        catalog.prepare();

        let mut packer = InstanceDataPacker::new(0, catalog.dynamic_capacity());
        packer.pack_dynamic_casters(1, &catalog, &[ship]);
        assert!(packer.dynamic_casters(0).is_empty());
        assert_eq!(packer.dynamic_casters(1).len(), SHADOW_CASTER_STRIDE as usize);
        assert!(packer.dynamic_casters(5).is_empty());
    }

    #[test]
    fn test_material_blocks_per_category() {
        let mut registry = CategoryRegistry::new();
        let red = MaterialRecord::new([1.0, 0.0, 0.0, 1.0], [0.1; 4], [0.5; 4], 8.0);
        registry.register("plain", CategoryDesc::default());
        registry.register("red", CategoryDesc::default().with_materials(vec![red]));

        let bytes = InstanceDataPacker::pack_materials(&registry);
        assert_eq!(bytes.len(), 2 * 32 * 64);
        let materials: Vec<MaterialRecord> = read(&bytes);
        assert_eq!(materials[32], red);
        assert_eq!(materials[0], MaterialRecord::zeroed());
    }

    #[test]
    #[should_panic(expected = "exceed the capacity")]
    fn test_dynamic_overflow_panics() {
        let mut catalog = catalog();
        let key = catalog.add_object("ship", SceneObject::new(Vec3::repeat(1.0)).dynamic()).unwrap();
        catalog.prepare();

        let mut packer = InstanceDataPacker::new(0, 1);
        packer.pack_dynamic(&catalog, &[key, key]);
    }
}
