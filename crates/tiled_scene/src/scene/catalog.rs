//! Object catalog
//!
//! Owns every object (in a slot map) and the tiles that index them. Objects
//! are filed under the deepest subtile containing their position, one list
//! per category and kind. `prepare()` freezes per-category capacities and
//! lays out the static instance buffer:
//!
//! ```text
//! for category in registration order
//!     for tile in grid index order
//!         for leaf in depth-first octant order
//!             objects of (leaf, category)
//! ```
//!
//! so each category occupies one contiguous block, each tile one contiguous
//! run inside that block, and each subtile a contiguous run inside its
//! parent's.

use std::collections::BTreeMap;

use slotmap::SlotMap;

use crate::foundation::math::{Transform, Vec3};
use crate::scene::tile::{NodeId, Tile, TileNode, VisibleSetInfo};
use crate::scene::{
    CategoryDesc, CategoryId, CategoryRegistry, ObjectKey, ObjectKind, SceneError, SceneObject,
    SceneResult,
};
use crate::spatial::{SpatialTileIndex, AABB};

/// Per-category object counts and the capacities frozen by `prepare()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryCounts {
    /// Registered static objects
    pub static_count: u32,
    /// Registered dynamic objects
    pub dynamic_count: u32,
    /// Registered static shadow casters
    pub static_casters: u32,
    /// Extra static slots requested before prepare
    pub reserved_static: u32,
    /// Extra dynamic slots requested before prepare
    pub reserved_dynamic: u32,
    /// Static capacity (valid once prepared)
    pub static_capacity: u32,
    /// Dynamic capacity (valid once prepared)
    pub dynamic_capacity: u32,
}

impl CategoryCounts {
    fn count(&self, kind: ObjectKind) -> u32 {
        match kind {
            ObjectKind::Static => self.static_count,
            ObjectKind::Dynamic => self.dynamic_count,
        }
    }

    fn capacity(&self, kind: ObjectKind) -> u32 {
        match kind {
            ObjectKind::Static => self.static_capacity,
            ObjectKind::Dynamic => self.dynamic_capacity,
        }
    }
}

/// Order of static objects in the packed buffers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticLayout {
    /// Every static object, in instance buffer order
    pub instances: Vec<ObjectKey>,
    /// Static shadow casters, in caster buffer order
    pub casters: Vec<ObjectKey>,
    /// Whole-world block of each category in the instance buffer
    pub blocks: Vec<VisibleSetInfo>,
}

struct Placement {
    key: ObjectKey,
    category: usize,
    position: Vec3,
    bounds: AABB,
    kind: ObjectKind,
    casts_shadows: bool,
}

/// Tile-indexed registry of scene objects
pub struct ObjectCatalog {
    grid: SpatialTileIndex,
    subdivisions: u32,
    categories: CategoryRegistry,
    objects: SlotMap<ObjectKey, SceneObject>,
    tiles: BTreeMap<usize, Tile>,
    counts: Vec<CategoryCounts>,
    max_dynamic_objects: u32,
    dynamic_total: u32,
    prepared: bool,
    static_layout_dirty: bool,
    dynamic_dirty: bool,
    changed_dynamic: Vec<ObjectKey>,
    layout_generation: u64,
}

impl ObjectCatalog {
    /// Create an empty catalog over `grid`
    ///
    /// # Arguments
    /// * `tile_levels` - depth of each tile's subtile tree, 1 for no subtiles
    /// * `max_dynamic_objects` - upper bound on dynamic objects across all categories
    pub fn new(grid: SpatialTileIndex, tile_levels: u32, max_dynamic_objects: u32) -> Self {
        Self {
            grid,
            subdivisions: tile_levels.max(1) - 1,
            categories: CategoryRegistry::new(),
            objects: SlotMap::with_key(),
            tiles: BTreeMap::new(),
            counts: Vec::new(),
            max_dynamic_objects,
            dynamic_total: 0,
            prepared: false,
            static_layout_dirty: false,
            dynamic_dirty: false,
            changed_dynamic: Vec::new(),
            layout_generation: 0,
        }
    }

    /// The tile grid
    pub fn grid(&self) -> &SpatialTileIndex {
        &self.grid
    }

    /// Registered categories
    pub fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    /// Register a category with a description
    ///
    /// New categories cannot be added once the scene is prepared: their
    /// materials and instances would not fit the buffers sized at prepare time.
    pub fn register_category(&mut self, name: &str, desc: CategoryDesc) -> SceneResult<CategoryId> {
        if self.categories.get(name).is_some() {
            return Ok(self.categories.register(name, desc));
        }
        if self.prepared {
            log::error!("Category '{}' registered after prepare()", name);
            return Err(SceneError::InvalidOperation {
                reason: format!("category '{}' registered after prepare()", name),
            });
        }
        let id = self.categories.register(name, desc);
        self.counts.push(CategoryCounts::default());
        Ok(id)
    }

    /// Look up a category by name
    pub fn category(&self, name: &str) -> Option<CategoryId> {
        self.categories.get(name)
    }

    /// Reserve extra capacity for objects registered after `prepare()`
    pub fn reserve(&mut self, category: &str, kind: ObjectKind, additional: u32) -> SceneResult<()> {
        if self.prepared {
            return Err(SceneError::InvalidOperation {
                reason: "capacity can only be reserved before prepare()".to_string(),
            });
        }
        let id = self.register_category(category, CategoryDesc::default())?;
        match kind {
            ObjectKind::Static => self.counts[id.index()].reserved_static += additional,
            ObjectKind::Dynamic => {
                let reserved_total: u32 = self.counts.iter().map(|c| c.dynamic_count + c.reserved_dynamic).sum();
                if reserved_total + additional > self.max_dynamic_objects {
                    return Err(SceneError::CapacityExceeded {
                        category: category.to_string(),
                        kind,
                        capacity: self.max_dynamic_objects,
                    });
                }
                self.counts[id.index()].reserved_dynamic += additional;
            }
        }
        Ok(())
    }

    /// Register an object under `category`
    ///
    /// Fails when the position is outside the world volume, or when the scene
    /// is prepared and the category has no spare capacity for this kind.
    pub fn add_object(&mut self, category: &str, mut object: SceneObject) -> SceneResult<ObjectKey> {
        let position = object.position();
        let Some(coord) = self.grid.tile_coord(position) else {
            log::error!("Object of category '{}' at {:?} is outside the world volume", category, position);
            return Err(SceneError::OutOfBounds { position });
        };

        let kind = object.kind();
        let id = match self.categories.get(category) {
            Some(id) => id,
            None if self.prepared => {
                log::error!("Category '{}' has no capacity: it was not registered before prepare()", category);
                return Err(SceneError::CapacityExceeded {
                    category: category.to_string(),
                    kind,
                    capacity: 0,
                });
            }
            None => self.register_category(category, CategoryDesc::default())?,
        };

        self.check_capacity(id, kind, 1)?;

        object.category = Some(id);
        object.tile = Some(self.grid.tile_index(coord));
        let key = self.objects.insert(object);
        self.link(key);

        let counts = &mut self.counts[id.index()];
        match kind {
            ObjectKind::Static => {
                counts.static_count += 1;
                if self.objects[key].casts_shadows() {
                    counts.static_casters += 1;
                }
                if self.prepared {
                    self.static_layout_dirty = true;
                }
            }
            ObjectKind::Dynamic => {
                counts.dynamic_count += 1;
                self.dynamic_total += 1;
                self.changed_dynamic.push(key);
            }
        }

        log::trace!("Added {:?} object {:?} to tile {:?}", kind, key, coord);
        Ok(key)
    }

    /// Remove an object, returning it
    pub fn remove_object(&mut self, key: ObjectKey) -> SceneResult<SceneObject> {
        if !self.objects.contains_key(key) {
            return Err(SceneError::UnknownObject);
        }
        self.unlink(key);
        let mut object = self.objects.remove(key).ok_or(SceneError::UnknownObject)?;

        if let Some(id) = object.category {
            let counts = &mut self.counts[id.index()];
            match object.kind() {
                ObjectKind::Static => {
                    counts.static_count -= 1;
                    if object.casts_shadows() {
                        counts.static_casters -= 1;
                    }
                    if self.prepared {
                        self.static_layout_dirty = true;
                    }
                }
                ObjectKind::Dynamic => {
                    counts.dynamic_count -= 1;
                    self.dynamic_total -= 1;
                    self.dynamic_dirty = true;
                }
            }
        }
        object.category = None;
        object.tile = None;
        Ok(object)
    }

    /// Move an object, re-indexing it when it leaves its (sub)tile
    ///
    /// Returns `true` when the object changed node.
    pub fn move_object(&mut self, key: ObjectKey, transform: Transform) -> SceneResult<bool> {
        let position = transform.position;
        let Some(coord) = self.grid.tile_coord(position) else {
            log::error!("Object {:?} moved outside the world volume to {:?}", key, position);
            return Err(SceneError::OutOfBounds { position });
        };
        let object = self.objects.get(key).ok_or(SceneError::UnknownObject)?;
        let was_clean = object.dirty().is_empty();
        let old_tile = object.tile.unwrap_or_default();
        let new_tile = self.grid.tile_index(coord);

        let same_node = old_tile == new_tile
            && self.tiles.get(&old_tile).is_some_and(|tile| {
                let root = NodeId::root(old_tile);
                tile.root.leaf_id(root, object.position()) == tile.root.leaf_id(root, position)
            });

        if same_node {
            self.objects[key].set_transform(transform);
            self.refit_tile(old_tile);
        } else {
            self.unlink(key);
            let object = &mut self.objects[key];
            object.set_transform(transform);
            object.tile = Some(new_tile);
            self.link(key);
            log::trace!("Object {:?} re-indexed from tile {} to tile {}", key, old_tile, new_tile);
        }

        self.mark_changed(key, was_clean);
        Ok(!same_node)
    }

    /// Change an object's material base index
    pub fn set_material_base(&mut self, key: ObjectKey, material_base: u32) -> SceneResult<()> {
        let object = self.objects.get_mut(key).ok_or(SceneError::UnknownObject)?;
        let was_clean = object.dirty().is_empty();
        object.set_material_base(material_base);
        self.mark_changed(key, was_clean);
        Ok(())
    }

    /// Freeze capacities (first call) and lay out the static buffers
    pub fn prepare(&mut self) -> StaticLayout {
        if !self.prepared {
            for counts in &mut self.counts {
                counts.static_capacity = counts.static_count + counts.reserved_static;
                counts.dynamic_capacity = counts.dynamic_count + counts.reserved_dynamic;
            }
            self.prepared = true;
            log::info!(
                "Catalog prepared: {} categories, {} tiles in use, {} static / {} dynamic capacity",
                self.categories.len(),
                self.tiles.len(),
                self.static_capacity(),
                self.dynamic_capacity()
            );
        }
        self.relayout()
    }

    /// Recompute every node's static ranges
    pub fn relayout(&mut self) -> StaticLayout {
        let num_categories = self.categories.len();
        let mut layout = StaticLayout {
            instances: Vec::with_capacity(self.static_capacity() as usize),
            casters: Vec::new(),
            blocks: vec![VisibleSetInfo::default(); num_categories],
        };

        for tile in self.tiles.values_mut() {
            tile.root.ensure_categories(num_categories);
        }

        let mut next = 0u32;
        let mut next_caster = 0u32;
        for category in 0..num_categories {
            let block_start = next;
            for tile in self.tiles.values_mut() {
                assign_ranges(&mut tile.root, category, &self.objects, &mut layout, &mut next, &mut next_caster);
            }
            layout.blocks[category] = VisibleSetInfo::new(block_start, next - block_start);
        }

        for object in self.objects.values_mut().filter(|object| !object.is_dynamic()) {
            object.clear_dirty();
        }
        self.static_layout_dirty = false;
        self.layout_generation += 1;
        log::debug!(
            "Static layout #{}: {} instances, {} shadow casters",
            self.layout_generation,
            layout.instances.len(),
            layout.casters.len()
        );
        layout
    }

    /// Object by key
    pub fn object(&self, key: ObjectKey) -> Option<&SceneObject> {
        self.objects.get(key)
    }

    pub(crate) fn object_mut(&mut self, key: ObjectKey) -> Option<&mut SceneObject> {
        self.objects.get_mut(key)
    }

    /// All objects
    pub fn objects(&self) -> impl Iterator<Item = (ObjectKey, &SceneObject)> {
        self.objects.iter()
    }

    /// Number of objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Tiles that have held objects, in grid index order
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    /// Tile by grid index
    pub fn tile(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(&index)
    }

    pub(crate) fn tile_mut(&mut self, index: usize) -> Option<&mut Tile> {
        self.tiles.get_mut(&index)
    }

    /// Tile or subtile by id
    pub fn node(&self, id: NodeId) -> Option<&TileNode> {
        self.tiles.get(&id.tile).and_then(|tile| tile.node(id))
    }

    /// Counts and capacities of a category
    pub fn counts(&self, id: CategoryId) -> CategoryCounts {
        self.counts.get(id.index()).copied().unwrap_or_default()
    }

    /// Total static capacity (instances the static buffer must hold)
    pub fn static_capacity(&self) -> u32 {
        self.counts.iter().map(|c| c.static_capacity).sum()
    }

    /// Total dynamic capacity
    pub fn dynamic_capacity(&self) -> u32 {
        self.counts.iter().map(|c| c.dynamic_capacity).sum()
    }

    /// Number of dynamic objects currently registered
    pub fn dynamic_count(&self) -> u32 {
        self.dynamic_total
    }

    /// True once `prepare()` ran
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Static objects changed since the last layout
    pub fn static_layout_dirty(&self) -> bool {
        self.static_layout_dirty
    }

    /// Dynamic objects added, removed or changed since the flag was last taken
    pub fn dynamic_dirty(&self) -> bool {
        self.dynamic_dirty || !self.changed_dynamic.is_empty()
    }

    /// Read the dynamic change state and clear the dirty bits of the
    /// dynamic objects that carried it
    pub fn take_dynamic_dirty(&mut self) -> bool {
        let mut changed = std::mem::take(&mut self.dynamic_dirty);
        for key in std::mem::take(&mut self.changed_dynamic) {
            if let Some(object) = self.objects.get_mut(key) {
                changed |= !object.dirty().is_empty();
                object.clear_dirty();
            }
        }
        changed
    }

    /// Incremented by every layout
    pub fn layout_generation(&self) -> u64 {
        self.layout_generation
    }

    /// First object whose boxes overlap `probe`
    ///
    /// Walks tile bounds, then subtiles, then object boxes, then mesh boxes.
    pub fn camera_collision(&self, probe: &AABB) -> Option<ObjectKey> {
        self.tiles
            .values()
            .find_map(|tile| self.collide_node(&tile.root, probe))
    }

    fn collide_node(&self, node: &TileNode, probe: &AABB) -> Option<ObjectKey> {
        let touches = [node.static_bounds, node.dynamic_bounds]
            .iter()
            .flatten()
            .any(|bounds| bounds.intersects(probe));
        if !touches {
            return None;
        }

        if let Some(children) = node.children() {
            return children.iter().find_map(|child| self.collide_node(child, probe));
        }

        node.static_objects
            .iter()
            .chain(node.dynamic_objects.iter())
            .flatten()
            .copied()
            .find(|&key| {
                let object = &self.objects[key];
                object.world_bounds().intersects(probe)
                    && object.world_mesh_bounds().iter().any(|mesh| mesh.intersects(probe))
            })
    }

    fn check_capacity(&self, id: CategoryId, kind: ObjectKind, additional: u32) -> SceneResult<()> {
        let counts = self.counts(id);
        if self.prepared && counts.count(kind) + additional > counts.capacity(kind) {
            log::error!(
                "Category '{}' {:?} capacity {} exceeded",
                self.categories.name(id),
                kind,
                counts.capacity(kind)
            );
            return Err(SceneError::CapacityExceeded {
                category: self.categories.name(id).to_string(),
                kind,
                capacity: counts.capacity(kind),
            });
        }
        if kind == ObjectKind::Dynamic && self.dynamic_total + additional > self.max_dynamic_objects {
            log::error!("Dynamic object limit {} exceeded", self.max_dynamic_objects);
            return Err(SceneError::CapacityExceeded {
                category: self.categories.name(id).to_string(),
                kind,
                capacity: self.max_dynamic_objects,
            });
        }
        Ok(())
    }

    fn mark_changed(&mut self, key: ObjectKey, was_clean: bool) {
        let is_dynamic = self.objects.get(key).is_some_and(SceneObject::is_dynamic);
        if is_dynamic {
            if was_clean {
                self.changed_dynamic.push(key);
            }
        } else if self.prepared {
            self.static_layout_dirty = true;
        }
    }

    fn placement(&self, key: ObjectKey) -> Option<(usize, Placement)> {
        let object = self.objects.get(key)?;
        Some((
            object.tile?,
            Placement {
                key,
                category: object.category?.index(),
                position: object.position(),
                bounds: *object.world_bounds(),
                kind: object.kind(),
                casts_shadows: object.casts_shadows(),
            },
        ))
    }

    fn link(&mut self, key: ObjectKey) {
        let Some((index, placement)) = self.placement(key) else {
            return;
        };
        let coord = self.grid.coord_of(index);
        let cell = self.grid.tile_aabb(coord);
        let subdivisions = self.subdivisions;
        let num_categories = self.categories.len();

        let tile = self
            .tiles
            .entry(index)
            .or_insert_with(|| Tile::new(coord, index, cell, subdivisions));
        tile.root.ensure_categories(num_categories);
        insert_into(&mut tile.root, &placement);
    }

    fn unlink(&mut self, key: ObjectKey) {
        let Some((index, placement)) = self.placement(key) else {
            return;
        };
        if let Some(tile) = self.tiles.get_mut(&index) {
            remove_from(&mut tile.root, &placement);
        }
        self.refit_tile(index);
    }

    fn refit_tile(&mut self, index: usize) {
        if let Some(tile) = self.tiles.get_mut(&index) {
            refit(&mut tile.root, &self.objects);
        }
    }
}

fn union_opt(bounds: Option<AABB>, other: &AABB) -> Option<AABB> {
    Some(bounds.map_or(*other, |b| b.union(other)))
}

fn insert_into(node: &mut TileNode, placement: &Placement) {
    match placement.kind {
        ObjectKind::Static => {
            node.static_count += 1;
            if placement.casts_shadows {
                node.caster_count += 1;
            }
            node.static_bounds = union_opt(node.static_bounds, &placement.bounds);
        }
        ObjectKind::Dynamic => {
            node.dynamic_count += 1;
            node.dynamic_bounds = union_opt(node.dynamic_bounds, &placement.bounds);
        }
    }

    let octant = node.octant_of(placement.position);
    match node.children {
        Some(ref mut children) => insert_into(&mut children[octant], placement),
        None => {
            let list = match placement.kind {
                ObjectKind::Static => &mut node.static_objects[placement.category],
                ObjectKind::Dynamic => &mut node.dynamic_objects[placement.category],
            };
            list.push(placement.key);
        }
    }
}

fn remove_from(node: &mut TileNode, placement: &Placement) {
    match placement.kind {
        ObjectKind::Static => {
            node.static_count -= 1;
            if placement.casts_shadows {
                node.caster_count -= 1;
            }
        }
        ObjectKind::Dynamic => node.dynamic_count -= 1,
    }

    let octant = node.octant_of(placement.position);
    match node.children {
        Some(ref mut children) => remove_from(&mut children[octant], placement),
        None => {
            let list = match placement.kind {
                ObjectKind::Static => &mut node.static_objects[placement.category],
                ObjectKind::Dynamic => &mut node.dynamic_objects[placement.category],
            };
            // Vec::remove keeps the remaining objects in registration order
            if let Some(pos) = list.iter().position(|&k| k == placement.key) {
                list.remove(pos);
            }
        }
    }
}

fn refit(node: &mut TileNode, objects: &SlotMap<ObjectKey, SceneObject>) {
    let (static_bounds, dynamic_bounds) = match node.children {
        Some(ref mut children) => {
            let mut bounds = (None, None);
            for child in children.iter_mut() {
                refit(child, objects);
                if let Some(b) = &child.static_bounds {
                    bounds.0 = union_opt(bounds.0, b);
                }
                if let Some(b) = &child.dynamic_bounds {
                    bounds.1 = union_opt(bounds.1, b);
                }
            }
            bounds
        }
        None => {
            let fit = |lists: &Vec<Vec<ObjectKey>>| {
                lists
                    .iter()
                    .flatten()
                    .filter_map(|&key| objects.get(key))
                    .fold(None, |acc, object| union_opt(acc, object.world_bounds()))
            };
            (fit(&node.static_objects), fit(&node.dynamic_objects))
        }
    };
    node.static_bounds = static_bounds;
    node.dynamic_bounds = dynamic_bounds;
}

fn assign_ranges(
    node: &mut TileNode,
    category: usize,
    objects: &SlotMap<ObjectKey, SceneObject>,
    layout: &mut StaticLayout,
    next: &mut u32,
    next_caster: &mut u32,
) {
    let start = *next;
    let caster_start = *next_caster;

    match node.children {
        Some(ref mut children) => {
            for child in children.iter_mut() {
                assign_ranges(child, category, objects, layout, next, next_caster);
            }
        }
        None => {
            for &key in &node.static_objects[category] {
                layout.instances.push(key);
                *next += 1;
                if objects.get(key).is_some_and(SceneObject::casts_shadows) {
                    layout.casters.push(key);
                    *next_caster += 1;
                }
            }
        }
    }

    node.ranges[category] = VisibleSetInfo::new(start, *next - start);
    node.caster_ranges[category] = VisibleSetInfo::new(caster_start, *next_caster - caster_start);
}
