//! # Tiled Scene
//!
//! Tiled scene management and visibility for large Vulkan-rendered worlds.
//!
//! ## Features
//!
//! - **Spatial Tiling**: The world volume is cut into a fixed grid of tiles,
//!   each recursively split into subtiles
//! - **Visibility**: Per-frame frustum culling of tile nodes against the
//!   camera and every shadow casting light
//! - **Instance Packing**: Static instances packed once per layout, dynamic
//!   instances repacked into bounded buffers when they move
//! - **Command Caching**: Secondary command buffers recorded per visible node
//!   and kept in an LRU cache, recorded on a worker pool
//! - **Backends**: Vulkan through `ash`, plus a headless recorder
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tiled_scene::prelude::*;
//!
//! struct Hooks;
//!
//! impl SceneHooks for Hooks {
//!     fn record_commands(
//!         &self,
//!         _ctx: &RecordContext,
//!         backend: &dyn GpuBackend,
//!         cmd: CommandBufferHandle,
//!         sets: &CategorySets,
//!         _pass: DrawPass,
//!     ) {
//!         for (_, info) in sets.iter() {
//!             backend.cmd_draw(cmd, 36, info.count, 0, info.start_index);
//!         }
//!     }
//! }
//!
//! fn run(targets: SceneTargets) -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(HeadlessBackend::new(4));
//!     let mut scene = Scene::new(SceneConfig::default(), backend, Arc::new(Hooks), targets)?;
//!     scene.add_object("crate", SceneObject::new(Vec3::new(10.0, 10.0, 10.0)))?;
//!     scene.prepare()?;
//!     loop {
//!         scene.update()?;
//!         let _done = scene.draw()?;
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;
pub mod spatial;

/// Common imports for scene users
pub mod prelude {
    pub use crate::{
        config::{CameraConfig, Config, ConfigError, SceneConfig},
        foundation::math::{Mat4, Transform, Vec3, Vec4},
        render::{
            backends::HeadlessBackend, CommandBufferHandle, GpuBackend, PassTarget, RenderError,
            SemaphoreHandle,
        },
        scene::{
            step_camera, CategoryId, CategorySets, DrawPass, Light, ObjectKey, ObjectKind,
            Projection, RecordContext, Scene, SceneError, SceneHooks, SceneObject, SceneTargets,
            ShadowSpec,
        },
        spatial::{SpatialTileIndex, TileCoord, AABB},
    };
}
