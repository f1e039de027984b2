//! Regular grid partitioning of the world volume
//!
//! The world box is cut into `ceil(size / tile_size)` cells per axis. Cells on
//! the upper boundary are clipped to the world box, so the cells partition
//! the world exactly.

use crate::foundation::math::Vec3;
use crate::scene::{SceneError, SceneResult};
use crate::spatial::AABB;

/// Integer grid coordinate of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TileCoord {
    /// Column along X
    pub x: u32,
    /// Row along Y
    pub y: u32,
    /// Slice along Z
    pub z: u32,
}

impl TileCoord {
    /// Create a tile coordinate
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Largest per-axis distance between two coordinates
    pub fn chebyshev_distance(&self, other: &TileCoord) -> u32 {
        self.x.abs_diff(other.x)
            .max(self.y.abs_diff(other.y))
            .max(self.z.abs_diff(other.z))
    }
}

/// Maps world positions to tiles of a fixed-size grid
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialTileIndex {
    origin: Vec3,
    size: Vec3,
    tile_size: Vec3,
    dims: [u32; 3],
}

impl SpatialTileIndex {
    /// Build the grid for a world volume
    ///
    /// # Arguments
    /// * `origin` - minimum corner of the world
    /// * `size` - world extent per axis, must be positive
    /// * `tile_size` - tile extent per axis, must be positive and no larger than `size`
    pub fn new(origin: Vec3, size: Vec3, tile_size: Vec3) -> SceneResult<Self> {
        for axis in 0..3 {
            if !(size[axis] > 0.0) || !(tile_size[axis] > 0.0) {
                return Err(SceneError::InvalidConfig(format!(
                    "world size {:?} and tile size {:?} must be positive",
                    size, tile_size
                )));
            }
            if tile_size[axis] > size[axis] {
                return Err(SceneError::InvalidConfig(format!(
                    "tile size {:?} exceeds world size {:?}",
                    tile_size, size
                )));
            }
        }

        let dims = [0, 1, 2].map(|axis| axis_tiles(origin[axis], size[axis], tile_size[axis]));
        log::debug!(
            "Tile grid {}x{}x{} over world origin {:?} size {:?}",
            dims[0], dims[1], dims[2], origin, size
        );

        Ok(Self { origin, size, tile_size, dims })
    }

    /// Grid dimensions `(w, h, d)`
    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    /// Total number of tiles
    pub fn tile_count(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Tile extent
    pub fn tile_size(&self) -> Vec3 {
        self.tile_size
    }

    /// Box covering the whole world
    pub fn world_aabb(&self) -> AABB {
        AABB::new(self.origin, self.origin + self.size)
    }

    /// Tile holding `pos`, or `None` when `pos` lies outside the world box
    pub fn tile_coord(&self, pos: Vec3) -> Option<TileCoord> {
        if !self.world_aabb().contains_point(pos) {
            return None;
        }
        let rel = (pos - self.origin).component_div(&self.tile_size);
        let clamp = |value: f32, axis: usize| (value.floor().max(0.0) as u32).min(self.dims[axis] - 1);
        Some(TileCoord::new(clamp(rel.x, 0), clamp(rel.y, 1), clamp(rel.z, 2)))
    }

    /// Linear index: `y * w * d + z * w + x`
    pub fn tile_index(&self, coord: TileCoord) -> usize {
        let [w, _, d] = self.dims.map(|v| v as usize);
        coord.y as usize * w * d + coord.z as usize * w + coord.x as usize
    }

    /// Inverse of [`Self::tile_index`]
    pub fn coord_of(&self, index: usize) -> TileCoord {
        let [w, _, d] = self.dims.map(|v| v as usize);
        let y = index / (w * d);
        let rem = index % (w * d);
        TileCoord::new((rem % w) as u32, y as u32, (rem / w) as u32)
    }

    /// Grid cell of a tile, clipped to the world box
    pub fn tile_aabb(&self, coord: TileCoord) -> AABB {
        let offset = Vec3::new(coord.x as f32, coord.y as f32, coord.z as f32);
        let min = self.origin + offset.component_mul(&self.tile_size);
        let max = (min + self.tile_size).inf(&(self.origin + self.size));
        AABB::new(min, max)
    }

    /// Coordinates within `radius` grid steps of `center`, excluding `center`
    pub fn neighbors(&self, center: TileCoord, radius: u32) -> impl Iterator<Item = TileCoord> + '_ {
        let range = |c: u32, axis: usize| c.saturating_sub(radius)..=(c + radius).min(self.dims[axis] - 1);
        let (xs, ys, zs) = (range(center.x, 0), range(center.y, 1), range(center.z, 2));
        ys.flat_map(move |y| {
            let xs = xs.clone();
            zs.clone().flat_map(move |z| xs.clone().map(move |x| TileCoord::new(x, y, z)))
        })
        .filter(move |coord| *coord != center)
    }
}

/// Tiles along one axis; the last one is clipped but never empty
fn axis_tiles(origin: f32, size: f32, tile_size: f32) -> u32 {
    let end = origin + size;
    let mut count = (size / tile_size).ceil().max(1.0) as u32;
    // Rounding in the division can add a tile starting at the far face,
    // or drop the sliver before it
    while count > 1 && origin + (count - 1) as f32 * tile_size >= end {
        count -= 1;
    }
    while origin + (count - 1) as f32 * tile_size + tile_size < end {
        count += 1;
    }
    count
}
