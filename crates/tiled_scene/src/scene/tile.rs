//! Tiles, subtiles and per-category ranges
//!
//! Every tile is the root of a small octree of subtiles. Objects live in the
//! deepest node containing their position, in one contiguous list per
//! category. After layout every node knows the `(start_index, count)` of its
//! objects in the packed static buffer; a parent's range is exactly the
//! concatenation of its children's ranges.

use crate::foundation::math::Vec3;
use crate::scene::{CategoryId, ObjectKey};
use crate::spatial::{TileCoord, AABB};

/// Location of a category's instances inside a packed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VisibleSetInfo {
    /// First instance index
    pub start_index: u32,
    /// Number of instances
    pub count: u32,
}

impl VisibleSetInfo {
    /// Create a range
    pub const fn new(start_index: u32, count: u32) -> Self {
        Self { start_index, count }
    }

    /// One past the last instance
    pub const fn end(&self) -> u32 {
        self.start_index + self.count
    }

    /// True when the range holds no instances
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Non-empty category ranges handed to draw recording, in draw order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CategorySets {
    entries: Vec<(CategoryId, VisibleSetInfo)>,
}

impl CategorySets {
    /// Collect the non-empty ranges of an id-indexed table following `order`
    pub fn from_indexed(ranges: &[VisibleSetInfo], order: &[CategoryId]) -> Self {
        let entries = order
            .iter()
            .filter_map(|&id| {
                ranges
                    .get(id.index())
                    .filter(|info| !info.is_empty())
                    .map(|info| (id, *info))
            })
            .collect();
        Self { entries }
    }

    /// Range of one category
    pub fn get(&self, id: CategoryId) -> Option<VisibleSetInfo> {
        self.entries.iter().find(|(c, _)| *c == id).map(|(_, info)| *info)
    }

    /// Iterate `(category, range)` in draw order
    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, VisibleSetInfo)> + '_ {
        self.entries.iter().copied()
    }

    /// Total instances over all categories
    pub fn total_count(&self) -> u32 {
        self.entries.iter().map(|(_, info)| info.count).sum()
    }

    /// True when no category has instances
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identifies a tile or one of its subtiles
///
/// `node` is 0 for the tile itself; child `k` of node `n` is `8n + k + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    /// Grid index of the tile
    pub tile: usize,
    /// Node inside the tile's subtile tree
    pub node: u32,
}

impl NodeId {
    /// The tile's root node
    pub const fn root(tile: usize) -> Self {
        Self { tile, node: 0 }
    }

    /// Id of child `octant`
    pub const fn child(self, octant: usize) -> Self {
        Self { tile: self.tile, node: self.node * 8 + octant as u32 + 1 }
    }

    /// True for the tile's root node
    pub const fn is_root(self) -> bool {
        self.node == 0
    }
}

/// Residency of a tile's recorded commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Residency {
    /// No command buffer recorded
    #[default]
    NotResident,
    /// Part of the current visible set
    Active,
    /// Held by the tile cache
    Cached,
}

/// A tile or subtile
#[derive(Debug, Clone)]
pub struct TileNode {
    pub(crate) cell: AABB,
    pub(crate) static_bounds: Option<AABB>,
    pub(crate) dynamic_bounds: Option<AABB>,
    pub(crate) static_count: u32,
    pub(crate) dynamic_count: u32,
    pub(crate) caster_count: u32,
    pub(crate) static_objects: Vec<Vec<ObjectKey>>,
    pub(crate) dynamic_objects: Vec<Vec<ObjectKey>>,
    pub(crate) ranges: Vec<VisibleSetInfo>,
    pub(crate) caster_ranges: Vec<VisibleSetInfo>,
    pub(crate) children: Option<Box<[TileNode; 8]>>,
}

impl TileNode {
    /// Build a node subdivided `levels` more times
    pub(crate) fn new(cell: AABB, levels: u32) -> Self {
        let children = (levels > 0).then(|| {
            let center = cell.center();
            Box::new(std::array::from_fn(|octant| {
                TileNode::new(Self::octant_cell(&cell, center, octant), levels - 1)
            }))
        });
        Self {
            cell,
            static_bounds: None,
            dynamic_bounds: None,
            static_count: 0,
            dynamic_count: 0,
            caster_count: 0,
            static_objects: Vec::new(),
            dynamic_objects: Vec::new(),
            ranges: Vec::new(),
            caster_ranges: Vec::new(),
            children,
        }
    }

    // Octant layout: bit 0 = +X, bit 1 = +Y, bit 2 = +Z
    fn octant_cell(cell: &AABB, center: Vec3, octant: usize) -> AABB {
        let pick = |bit: usize, axis: usize| {
            if octant & bit != 0 { (center[axis], cell.max[axis]) } else { (cell.min[axis], center[axis]) }
        };
        let (x0, x1) = pick(1, 0);
        let (y0, y1) = pick(2, 1);
        let (z0, z1) = pick(4, 2);
        AABB::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    }

    pub(crate) fn octant_of(&self, position: Vec3) -> usize {
        let center = self.cell.center();
        let x_bit = usize::from(position.x >= center.x);
        let y_bit = usize::from(position.y >= center.y);
        let z_bit = usize::from(position.z >= center.z);
        (z_bit << 2) | (y_bit << 1) | x_bit
    }

    /// Grid cell (or octant) of the node
    pub fn cell(&self) -> &AABB {
        &self.cell
    }

    /// Union of the static object boxes below this node
    pub fn static_bounds(&self) -> Option<&AABB> {
        self.static_bounds.as_ref()
    }

    /// Union of the dynamic object boxes below this node
    pub fn dynamic_bounds(&self) -> Option<&AABB> {
        self.dynamic_bounds.as_ref()
    }

    /// Static objects below this node
    pub fn static_count(&self) -> u32 {
        self.static_count
    }

    /// Dynamic objects below this node
    pub fn dynamic_count(&self) -> u32 {
        self.dynamic_count
    }

    /// Static shadow casters below this node
    pub fn caster_count(&self) -> u32 {
        self.caster_count
    }

    /// Child nodes, `None` for a leaf
    pub fn children(&self) -> Option<&[TileNode; 8]> {
        self.children.as_deref()
    }

    /// True when the node has no subtiles
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Static range of a category in the packed instance buffer
    pub fn range(&self, category: CategoryId) -> VisibleSetInfo {
        self.ranges.get(category.index()).copied().unwrap_or_default()
    }

    /// Static range of a category in the packed shadow caster buffer
    pub fn caster_range(&self, category: CategoryId) -> VisibleSetInfo {
        self.caster_ranges.get(category.index()).copied().unwrap_or_default()
    }

    /// Static objects of one category held directly by this (leaf) node
    pub fn static_objects(&self, category: CategoryId) -> &[ObjectKey] {
        self.static_objects.get(category.index()).map_or(&[], Vec::as_slice)
    }

    /// Dynamic objects of one category held directly by this (leaf) node
    pub fn dynamic_objects(&self, category: CategoryId) -> &[ObjectKey] {
        self.dynamic_objects.get(category.index()).map_or(&[], Vec::as_slice)
    }

    /// Leaf containing `position`
    pub(crate) fn leaf_mut(&mut self, position: Vec3) -> &mut TileNode {
        let octant = self.octant_of(position);
        match self.children {
            Some(ref mut children) => children[octant].leaf_mut(position),
            None => self,
        }
    }

    /// Id of the leaf containing `position`
    pub(crate) fn leaf_id(&self, id: NodeId, position: Vec3) -> NodeId {
        match self.children.as_deref() {
            Some(children) => {
                let octant = self.octant_of(position);
                children[octant].leaf_id(id.child(octant), position)
            }
            None => id,
        }
    }

    /// Node with the given id below (or equal to) this node
    pub fn find(&self, own: NodeId, target: NodeId) -> Option<&TileNode> {
        if own == target {
            return Some(self);
        }
        if target.node < own.node {
            return None;
        }
        let children = self.children.as_deref()?;
        children
            .iter()
            .enumerate()
            .find_map(|(octant, child)| child.find(own.child(octant), target))
    }

    pub(crate) fn ensure_categories(&mut self, count: usize) {
        if self.ranges.len() < count {
            self.ranges.resize(count, VisibleSetInfo::default());
            self.caster_ranges.resize(count, VisibleSetInfo::default());
        }
        if self.is_leaf() {
            if self.static_objects.len() < count {
                self.static_objects.resize_with(count, Vec::new);
                self.dynamic_objects.resize_with(count, Vec::new);
            }
        } else if let Some(children) = self.children.as_deref_mut() {
            for child in children.iter_mut() {
                child.ensure_categories(count);
            }
        }
    }
}

/// A grid tile with its subtile tree
#[derive(Debug, Clone)]
pub struct Tile {
    pub(crate) coord: TileCoord,
    pub(crate) index: usize,
    pub(crate) root: TileNode,
    pub(crate) last_visible_frame: Option<u64>,
    pub(crate) residency: Residency,
}

impl Tile {
    pub(crate) fn new(coord: TileCoord, index: usize, cell: AABB, subdivisions: u32) -> Self {
        Self {
            coord,
            index,
            root: TileNode::new(cell, subdivisions),
            last_visible_frame: None,
            residency: Residency::NotResident,
        }
    }

    /// Grid coordinate
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Linear grid index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Root node
    pub fn root(&self) -> &TileNode {
        &self.root
    }

    /// Frame number the tile was last part of the camera's visible set
    pub fn last_visible_frame(&self) -> Option<u64> {
        self.last_visible_frame
    }

    /// Command buffer residency
    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Objects in the tile, static and dynamic
    pub fn object_count(&self) -> u32 {
        self.root.static_count + self.root.dynamic_count
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> Option<&TileNode> {
        if id.tile != self.index {
            return None;
        }
        self.root.find(NodeId::root(self.index), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdivision_covers_cell() {
        let cell = AABB::new(Vec3::zeros(), Vec3::repeat(8.0));
        let node = TileNode::new(cell, 2);
        let children = node.children().unwrap();
        let volume: f32 = children.iter().map(|c| c.cell().volume()).sum();
        assert_eq!(volume, cell.volume());
        assert_eq!(children[7].cell().min, Vec3::repeat(4.0));
        assert!(children[0].children().is_some());
        assert!(children[0].children().unwrap()[0].is_leaf());
    }

    #[test]
    fn test_leaf_lookup() {
        let cell = AABB::new(Vec3::zeros(), Vec3::repeat(8.0));
        let mut node = TileNode::new(cell, 1);
        let leaf = node.leaf_mut(Vec3::new(5.0, 1.0, 7.0));
        assert_eq!(leaf.cell().min, Vec3::new(4.0, 0.0, 4.0));

        let id = node.leaf_id(NodeId::root(3), Vec3::new(5.0, 1.0, 7.0));
        assert_eq!(id, NodeId::root(3).child(5));
        assert_eq!(node.find(NodeId::root(3), id).unwrap().cell().min, Vec3::new(4.0, 0.0, 4.0));
    }

    #[test]
    fn test_category_sets_follow_order_and_skip_empty() {
        let ranges = [
            VisibleSetInfo::new(0, 2),
            VisibleSetInfo::new(2, 0),
            VisibleSetInfo::new(2, 5),
        ];
        let order = [CategoryId(2), CategoryId(0), CategoryId(1)];
        let sets = CategorySets::from_indexed(&ranges, &order);
        let collected: Vec<_> = sets.iter().collect();
        assert_eq!(collected, vec![(CategoryId(2), VisibleSetInfo::new(2, 5)), (CategoryId(0), VisibleSetInfo::new(0, 2))]);
        assert_eq!(sets.total_count(), 7);
        assert_eq!(sets.get(CategoryId(1)), None);
    }
}
