//! Spatial partitioning data structures
//!
//! Bounding volumes, frustum classification and the fixed tile grid the
//! scene uses to partition its world volume.

mod bounds;
mod tile_index;

pub use bounds::{AABB, Frustum, FrustumTest, Plane};
pub use tile_index::{SpatialTileIndex, TileCoord};
