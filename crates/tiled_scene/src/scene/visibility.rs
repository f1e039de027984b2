//! Visibility determination
//!
//! Tiles are culled against a frustum hierarchically: a tile fully inside is
//! taken whole, a straddling tile descends into its subtiles, and a parent
//! whose non-empty children are all fully visible is taken whole again so the
//! recorder emits one draw per category instead of eight.

use std::collections::BTreeSet;

use crate::foundation::math::Vec3;
use crate::scene::catalog::ObjectCatalog;
use crate::scene::tile::{CategorySets, NodeId, TileNode, VisibleSetInfo};
use crate::scene::{CategoryId, ObjectKey};
use crate::spatial::{Frustum, FrustumTest};

/// Which static content a visibility query looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisibilityFilter {
    /// All static objects
    Static,
    /// Static objects that cast shadows
    ShadowCasters,
}

/// A tile or subtile selected for drawing
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleNode {
    /// Node id
    pub id: NodeId,
    /// Center of the node's grid cell
    pub center: Vec3,
    /// Per-category ranges, indexed by category id
    pub ranges: Vec<VisibleSetInfo>,
}

impl VisibleNode {
    /// Ranges in draw order, skipping empty categories
    pub fn category_sets(&self, order: &[CategoryId]) -> CategorySets {
        CategorySets::from_indexed(&self.ranges, order)
    }
}

/// Result of a visibility query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleSet {
    nodes: Vec<VisibleNode>,
}

impl VisibleSet {
    /// Selected nodes, in tile index order
    pub fn nodes(&self) -> &[VisibleNode] {
        &self.nodes
    }

    /// Number of selected nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing is visible
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True when `id` was selected
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|node| node.id == id)
    }

    /// Grid indices of tiles with at least one selected node
    pub fn tiles(&self) -> BTreeSet<usize> {
        self.nodes.iter().map(|node| node.id.tile).collect()
    }

    /// Total visible instances of a category
    pub fn count(&self, category: CategoryId) -> u32 {
        self.nodes
            .iter()
            .filter_map(|node| node.ranges.get(category.index()))
            .map(|info| info.count)
            .sum()
    }

    /// Visible ranges of a category
    pub fn ranges(&self, category: CategoryId) -> impl Iterator<Item = VisibleSetInfo> + '_ {
        self.nodes
            .iter()
            .filter_map(move |node| node.ranges.get(category.index()).copied())
            .filter(|info| !info.is_empty())
    }

    /// True when instance `index` of the packed buffer is drawn
    pub fn covers_instance(&self, index: u32) -> bool {
        self.nodes.iter().any(|node| {
            node.ranges
                .iter()
                .any(|info| index >= info.start_index && index < info.end())
        })
    }
}

impl FromIterator<VisibleNode> for VisibleSet {
    fn from_iter<I: IntoIterator<Item = VisibleNode>>(iter: I) -> Self {
        Self { nodes: iter.into_iter().collect() }
    }
}

enum Selection {
    Empty,
    Hidden,
    Whole,
    Partial(Vec<VisibleNode>),
}

fn has_content(node: &TileNode, filter: VisibilityFilter) -> bool {
    match filter {
        VisibilityFilter::Static => node.static_count > 0,
        VisibilityFilter::ShadowCasters => node.caster_count > 0,
    }
}

fn visible_node(node: &TileNode, id: NodeId, filter: VisibilityFilter) -> VisibleNode {
    let ranges = match filter {
        VisibilityFilter::Static => &node.ranges,
        VisibilityFilter::ShadowCasters => &node.caster_ranges,
    };
    VisibleNode {
        id,
        center: node.cell.center(),
        ranges: ranges.clone(),
    }
}

fn select(node: &TileNode, id: NodeId, frustum: &Frustum, filter: VisibilityFilter) -> Selection {
    if !has_content(node, filter) {
        return Selection::Empty;
    }
    // Fitted bounds, not the grid cell: objects may poke out of their cell
    let Some(bounds) = node.static_bounds else {
        return Selection::Empty;
    };

    match frustum.classify_aabb(&bounds) {
        FrustumTest::Outside => Selection::Hidden,
        FrustumTest::Inside => Selection::Whole,
        FrustumTest::Intersect => {
            let Some(children) = node.children() else {
                return Selection::Whole;
            };

            let mut selected = Vec::new();
            let mut all_whole = true;
            for (octant, child) in children.iter().enumerate() {
                let child_id = id.child(octant);
                match select(child, child_id, frustum, filter) {
                    Selection::Empty => {}
                    Selection::Hidden => all_whole = false,
                    Selection::Whole => selected.push(visible_node(child, child_id, filter)),
                    Selection::Partial(nodes) => {
                        all_whole = false;
                        selected.extend(nodes);
                    }
                }
            }

            if all_whole {
                Selection::Whole
            } else if selected.is_empty() {
                Selection::Hidden
            } else {
                Selection::Partial(selected)
            }
        }
    }
}

/// Static nodes of `catalog` visible through `frustum`
///
/// The result is sound: every static object whose box intersects the
/// frustum lies inside the range of some selected node.
pub fn compute_visible(frustum: &Frustum, catalog: &ObjectCatalog, filter: VisibilityFilter) -> VisibleSet {
    let mut nodes = Vec::new();
    for tile in catalog.tiles() {
        let id = NodeId::root(tile.index());
        match select(tile.root(), id, frustum, filter) {
            Selection::Whole => nodes.push(visible_node(tile.root(), id, filter)),
            Selection::Partial(selected) => nodes.extend(selected),
            Selection::Empty | Selection::Hidden => {}
        }
    }
    VisibleSet { nodes }
}

fn collect_dynamic(
    node: &TileNode,
    frustum: &Frustum,
    catalog: &ObjectCatalog,
    casters_only: bool,
    test_objects: bool,
    out: &mut Vec<ObjectKey>,
) {
    if node.dynamic_count == 0 {
        return;
    }
    let test_objects = test_objects && {
        let bounds = node.dynamic_bounds.unwrap_or(node.cell);
        match frustum.classify_aabb(&bounds) {
            FrustumTest::Outside => return,
            FrustumTest::Inside => false,
            FrustumTest::Intersect => true,
        }
    };

    if let Some(children) = node.children() {
        for child in children.iter() {
            collect_dynamic(child, frustum, catalog, casters_only, test_objects, out);
        }
        return;
    }

    for list in &node.dynamic_objects {
        for &key in list {
            let Some(object) = catalog.object(key) else {
                continue;
            };
            if casters_only && !object.casts_shadows() {
                continue;
            }
            if test_objects && !frustum.intersects_aabb(object.world_bounds()) {
                continue;
            }
            out.push(key);
        }
    }
}

/// Dynamic objects visible through `frustum`
///
/// Tiles are tested first; objects are tested one by one only in tiles that
/// straddle the frustum. Results are in tile order, then category id order.
pub fn visible_dynamic_objects(frustum: &Frustum, catalog: &ObjectCatalog, casters_only: bool) -> Vec<ObjectKey> {
    let mut out = Vec::new();
    for tile in catalog.tiles() {
        collect_dynamic(tile.root(), frustum, catalog, casters_only, true, &mut out);
    }
    out
}

/// Cached visibility query
///
/// The static visible set only changes when the frustum moves or the static
/// layout is rebuilt, so it is kept until one of those happens.
#[derive(Debug, Default)]
pub struct VisibilityEngine {
    cached: Option<VisibleSet>,
    generation: u64,
    recomputations: u64,
}

impl VisibilityEngine {
    /// Create an engine with nothing cached
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible static nodes, recomputed only when needed
    pub fn update(
        &mut self,
        frustum: &Frustum,
        frustum_dirty: bool,
        catalog: &ObjectCatalog,
        filter: VisibilityFilter,
    ) -> &VisibleSet {
        let stale = frustum_dirty || self.generation != catalog.layout_generation();
        if stale || self.cached.is_none() {
            let set = compute_visible(frustum, catalog, filter);
            log::trace!("Visibility recomputed: {} nodes", set.len());
            self.generation = catalog.layout_generation();
            self.recomputations += 1;
            self.cached = Some(set);
        }
        self.cached.get_or_insert_with(VisibleSet::default)
    }

    /// Last computed set
    pub fn visible(&self) -> Option<&VisibleSet> {
        self.cached.as_ref()
    }

    /// Drop the cached set
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// How often the set was recomputed
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}
