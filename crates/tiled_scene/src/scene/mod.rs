//! Tiled scene
//!
//! Objects are grouped into categories and partitioned into a fixed grid of
//! tiles, each optionally subdivided into an octree of subtiles. Per frame
//! the scene finds the visible static nodes, packs instance data into GPU
//! buffers and keeps one secondary command buffer per visible node.
//!
//! ## Architecture
//!
//! ```text
//! Scene (orchestrator)
//!   ├─ ObjectCatalog ── tiles, subtiles, categories, objects
//!   ├─ VisibilityEngine ── frustum → visible nodes
//!   ├─ InstanceDataPacker ── objects → instance / caster / material bytes
//!   ├─ ShadowManager ── per light depth passes
//!   └─ CommandRecorder ── secondaries on the worker pool, tile cache
//! ```

pub mod camera;
pub mod catalog;
pub mod category;
pub mod error;
pub mod hooks;
pub mod light;
pub mod object;
pub mod orchestrator;
pub mod packer;
pub mod recorder;
pub mod shadow;
pub mod tile;
pub mod tile_cache;
pub mod visibility;

#[cfg(test)]
mod tests;

pub use camera::{Camera, CameraDirty, Projection};
pub use catalog::{CategoryCounts, ObjectCatalog, StaticLayout};
pub use category::{CategoryDesc, CategoryId, CategoryRegistry, MaterialRecord, MAX_MATERIALS_PER_CATEGORY};
pub use error::{SceneError, SceneResult};
pub use hooks::{
    CategoryDrawer, DrawHandlerTable, DrawPass, MeshBinding, MeshDrawer, RecordContext, SceneHooks,
    ShadowPassInfo,
};
pub use light::{Light, LightBufferLayout, LightDirty, LightRecord, LightType, ShadowMapRecord};
pub use object::{ObjectDirty, ObjectKey, ObjectKind, SceneObject};
pub use orchestrator::{step_camera, FramePhase, FrameState, Scene, SceneTargets};
pub use packer::{DynamicPack, InstanceDataPacker, InstanceRecord, ShadowCasterRecord};
pub use recorder::{CommandRecorder, RecordSummary};
pub use shadow::{ShadowManager, ShadowMap, ShadowSpec};
pub use tile::{CategorySets, NodeId, Residency, Tile, TileNode, VisibleSetInfo};
pub use tile_cache::{CacheStats, TileCache};
pub use visibility::{VisibilityFilter, VisibleNode, VisibleSet};
