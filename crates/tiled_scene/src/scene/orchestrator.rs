//! Frame orchestration
//!
//! [`Scene`] owns the camera, lights, objects and every GPU resource the
//! scene needs, and drives one frame as
//!
//! ```text
//! update():  wait fence → resource updates → visibility → pack → record
//! draw():    submit updates → shadow passes → static pass → dynamic pass → postprocess
//! ```
//!
//! Dirty flags gate the expensive steps: with a still camera and no moving
//! objects a frame resubmits the previous recording unchanged.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::SceneConfig;
use crate::foundation::math::{Transform, Vec3};
use crate::render::{
    cmd_update_buffer_chunked, BufferHandle, BufferUsage, CommandBufferHandle, CommandBufferLevel,
    CommandBufferUsage, FenceHandle, FenceStatus, GpuBackend, ImageHandle, Inheritance, PassTarget,
    PipelineStages, RenderError, SamplerHandle, SemaphoreHandle, Submission,
};
use crate::scene::catalog::{CategoryCounts, ObjectCatalog};
use crate::scene::hooks::{RecordContext, SceneHooks};
use crate::scene::light::{Light, LightBufferLayout, LightDirty, LIGHT_RECORD_SIZE, SHADOW_MAP_RECORD_SIZE};
use crate::scene::packer::{
    material_buffer_size, region_size, DynamicPack, InstanceDataPacker, SHADOW_CASTER_STRIDE,
};
use crate::scene::recorder::{CommandRecorder, RecordInputs, RecordSummary};
use crate::scene::shadow::{ShadowManager, ShadowSpec};
use crate::scene::tile::{CategorySets, Tile};
use crate::scene::tile_cache::CacheStats;
use crate::scene::visibility::{visible_dynamic_objects, VisibilityEngine, VisibilityFilter, VisibleSet};
use crate::scene::{
    Camera, CategoryDesc, CategoryId, ObjectKey, ObjectKind, SceneError, SceneObject, SceneResult,
};

const FENCE_TIMEOUT_NS: u64 = 100_000_000;

/// Where the scene is in its frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePhase {
    /// Not prepared yet, or the previous frame was submitted
    Idle,
    /// Resource update commands recorded
    ResourcesUpdated,
    /// Visible set current
    VisibilityComputed,
    /// Instance data packed
    Packed,
    /// Command buffers current; `draw()` may be called
    Recorded,
    /// Frame handed to the queue
    Submitted,
}

/// Render pass instances the scene records into, one per swap-chain image
#[derive(Debug, Clone, Default)]
pub struct SceneTargets {
    /// Static geometry pass; clears the attachments
    pub static_passes: Vec<PassTarget>,
    /// Dynamic geometry pass; loads what the static pass produced
    pub dynamic_passes: Vec<PassTarget>,
}

/// Command buffers of one swap-chain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    /// Primary executing the static secondaries
    pub static_cmd: CommandBufferHandle,
    /// Primary with inline dynamic draws
    pub dynamic_cmd: CommandBufferHandle,
    /// The primaries are stale and must be recorded before submission
    pub needs_record: bool,
}

#[derive(Debug, Clone, Copy)]
struct SceneBuffers {
    static_instances: (BufferHandle, u64),
    static_casters: (BufferHandle, u64),
    dynamic_instances: (BufferHandle, u64),
    dynamic_casters: (BufferHandle, u64),
    dynamic_caster_region: u64,
    materials: (BufferHandle, u64),
    lights: BufferHandle,
    light_layout: LightBufferLayout,
}

#[derive(Debug, Clone, Copy)]
struct FrameSync {
    update_cmd: CommandBufferHandle,
    update_done: SemaphoreHandle,
    shadows_done: SemaphoreHandle,
    static_done: SemaphoreHandle,
    dynamic_done: SemaphoreHandle,
    postprocess_done: SemaphoreHandle,
    fence: FenceHandle,
}

/// Tiled scene and frame driver
pub struct Scene {
    config: SceneConfig,
    backend: Arc<dyn GpuBackend>,
    hooks: Arc<dyn SceneHooks>,
    targets: SceneTargets,

    camera: Camera,
    catalog: ObjectCatalog,
    lights: Vec<Light>,
    shadows: ShadowManager,

    visibility: VisibilityEngine,
    recorder: CommandRecorder,
    packer: InstanceDataPacker,
    dynamic_pack: DynamicPack,

    buffers: Option<SceneBuffers>,
    sync: Option<FrameSync>,
    frames: Vec<FrameState>,
    context: Option<Arc<RecordContext>>,

    phase: FramePhase,
    frame: u64,
    frame_slot: usize,
    fence_pending: bool,
    light_buffer_dirty: bool,
    update_pending: bool,
    pending_shadows: BTreeSet<usize>,
}

impl Scene {
    /// Create a scene
    ///
    /// # Arguments
    /// * `config` - world volume, tiling, cache and threading parameters
    /// * `backend` - GPU services
    /// * `hooks` - host recording callbacks
    /// * `targets` - static and dynamic pass instances per swap-chain image
    pub fn new(
        config: SceneConfig,
        backend: Arc<dyn GpuBackend>,
        hooks: Arc<dyn SceneHooks>,
        targets: SceneTargets,
    ) -> SceneResult<Self> {
        config.validate()?;
        if targets.static_passes.is_empty() || targets.static_passes.len() != targets.dynamic_passes.len() {
            return Err(SceneError::InvalidConfig(format!(
                "need one static and one dynamic pass per frame slot, got {} and {}",
                targets.static_passes.len(),
                targets.dynamic_passes.len()
            )));
        }

        let grid = config.tile_grid()?;
        let dims = grid.dims();
        let catalog = ObjectCatalog::new(grid, config.tile_levels, config.max_dynamic_objects);
        let recorder = CommandRecorder::new(config.worker_threads, backend.command_pool_count(), config.cache_size);

        log::debug!(
            "Scene created: {}x{}x{} tiles of {:?}, {} levels, {} frame slots",
            dims[0],
            dims[1],
            dims[2],
            config.tile_size,
            config.tile_levels,
            targets.static_passes.len()
        );

        Ok(Self {
            camera: config.camera.build(),
            config,
            backend,
            hooks,
            targets,
            catalog,
            lights: Vec::new(),
            shadows: ShadowManager::new(),
            visibility: VisibilityEngine::new(),
            recorder,
            packer: InstanceDataPacker::default(),
            dynamic_pack: DynamicPack::default(),
            buffers: None,
            sync: None,
            frames: Vec::new(),
            context: None,
            phase: FramePhase::Idle,
            frame: 0,
            frame_slot: 0,
            fence_pending: false,
            light_buffer_dirty: true,
            update_pending: false,
            pending_shadows: BTreeSet::new(),
        })
    }

    /// Register a category with its materials and pipeline group
    pub fn register_category(&mut self, name: &str, desc: CategoryDesc) -> SceneResult<CategoryId> {
        self.catalog.register_category(name, desc)
    }

    /// Reserve capacity for objects added after `prepare()`
    pub fn reserve(&mut self, category: &str, kind: ObjectKind, additional: u32) -> SceneResult<()> {
        self.catalog.reserve(category, kind, additional)
    }

    /// Add an object under `category`
    pub fn add_object(&mut self, category: &str, object: SceneObject) -> SceneResult<ObjectKey> {
        self.catalog.add_object(category, object)
    }

    /// Remove an object
    pub fn remove_object(&mut self, key: ObjectKey) -> SceneResult<SceneObject> {
        self.catalog.remove_object(key)
    }

    /// Move, rotate or scale an object
    pub fn move_object(&mut self, key: ObjectKey, transform: Transform) -> SceneResult<()> {
        self.catalog.move_object(key, transform).map(|_| ())
    }

    /// Point an object at another entry of its category's material table
    pub fn set_material_base(&mut self, key: ObjectKey, material_base: u32) -> SceneResult<()> {
        self.catalog.set_material_base(key, material_base)
    }

    /// Add a light, optionally casting shadows
    ///
    /// Lights must be added before `prepare()`; only spot and directional
    /// lights can cast shadows.
    pub fn add_light(&mut self, mut light: Light, shadow: Option<ShadowSpec>) -> SceneResult<usize> {
        if self.catalog.is_prepared() {
            log::error!("Lights must be added before the scene is prepared");
            return Err(SceneError::InvalidOperation {
                reason: "lights must be added before prepare()".to_string(),
            });
        }

        let index = self.lights.len();
        if let Some(spec) = shadow {
            let world = self.catalog.grid().world_aabb();
            self.shadows.add(self.backend.as_ref(), index, &light, spec, &world)?;
            light.set_casts_shadows(true);
        }
        log::debug!("Added {:?} light {}", light.light_type(), index);
        self.lights.push(light);
        self.light_buffer_dirty = true;
        Ok(index)
    }

    /// Freeze capacities, create GPU resources and pack static data
    pub fn prepare(&mut self) -> SceneResult<()> {
        if self.catalog.is_prepared() {
            return Err(SceneError::InvalidOperation { reason: "scene already prepared".to_string() });
        }

        let layout = self.catalog.prepare();
        self.packer = InstanceDataPacker::new(self.catalog.static_capacity(), self.catalog.dynamic_capacity());
        self.packer.pack_static(&self.catalog, &layout);

        let buffers = self.create_buffers(layout.casters.len() as u64)?;
        self.buffers = Some(buffers);
        self.write_static_buffers()?;
        let materials = InstanceDataPacker::pack_materials(self.catalog.categories());
        self.backend.write_buffer(buffers.materials.0, 0, &materials)?;

        let backend = self.backend.as_ref();
        let slots = self.targets.static_passes.len() as u32;
        let primaries = backend.allocate_command_buffers(0, CommandBufferLevel::Primary, slots * 2 + 1)?;
        self.frames = primaries
            .chunks_exact(2)
            .map(|pair| FrameState { static_cmd: pair[0], dynamic_cmd: pair[1], needs_record: true })
            .collect();
        let update_cmd = primaries[primaries.len() - 1];

        self.sync = Some(FrameSync {
            update_cmd,
            update_done: backend.create_semaphore()?,
            shadows_done: backend.create_semaphore()?,
            static_done: backend.create_semaphore()?,
            dynamic_done: backend.create_semaphore()?,
            postprocess_done: backend.create_semaphore()?,
            fence: backend.create_fence(false)?,
        });

        log::info!(
            "Scene prepared: {} objects, {} lights ({} shadow maps), static buffer {} bytes",
            self.catalog.object_count(),
            self.lights.len(),
            self.shadows.len(),
            buffers.static_instances.1
        );
        Ok(())
    }

    /// Run the CPU side of a frame
    ///
    /// Waits for the previous frame, then refreshes whatever the dirty
    /// flags say changed. Must precede every `draw()`.
    pub fn update(&mut self) -> SceneResult<()> {
        let (Some(buffers), Some(sync)) = (self.buffers, self.sync) else {
            return Err(SceneError::InvalidOperation { reason: "update() called before prepare()".to_string() });
        };
        self.wait_previous_frame(sync.fence)?;
        self.phase = FramePhase::Idle;
        self.frame += 1;
        log::trace!("Frame {} update", self.frame);

        if self.catalog.static_layout_dirty() {
            self.rebuild_static_layout()?;
        }

        // Lights and shadow matrices
        if self.lights.iter().any(|light| !light.dirty().is_empty()) {
            self.light_buffer_dirty = true;
        }
        let dynamic_changed = self.catalog.take_dynamic_dirty();
        let world = self.catalog.grid().world_aabb();
        let repacked_casters = self.shadows.update(
            &mut self.lights,
            &world,
            &self.catalog,
            dynamic_changed,
            &mut self.packer,
        );
        for light in &mut self.lights {
            light.clear_dirty(LightDirty::all());
        }

        let ctx = Arc::new(self.record_context(&buffers));
        self.context = Some(Arc::clone(&ctx));
        self.record_resource_updates(&ctx, &buffers, &sync)?;
        self.phase = FramePhase::ResourcesUpdated;

        // Visibility
        let inheritance = self.inheritance();
        let camera_dirty = self.camera.is_dirty();
        let visible = self.visibility.update(
            self.camera.frustum(),
            camera_dirty,
            &self.catalog,
            VisibilityFilter::Static,
        );
        self.phase = FramePhase::VisibilityComputed;

        // Pack
        let repack = camera_dirty || dynamic_changed;
        if repack {
            let keys = visible_dynamic_objects(self.camera.frustum(), &self.catalog, false);
            self.dynamic_pack = self.packer.pack_dynamic(&self.catalog, &keys);
            self.backend
                .write_buffer(buffers.dynamic_instances.0, 0, self.packer.dynamic_instances())?;
        }
        for slot in repacked_casters {
            let offset = slot as u64 * buffers.dynamic_caster_region;
            self.backend
                .write_buffer(buffers.dynamic_casters.0, offset, self.packer.dynamic_casters(slot))?;
        }
        self.phase = FramePhase::Packed;

        // Record
        let order = self.catalog.categories().draw_order().to_vec();
        let inputs = RecordInputs {
            backend: Arc::clone(&self.backend),
            hooks: Arc::clone(&self.hooks),
            ctx: Arc::clone(&ctx),
            inheritance,
        };
        let summary = self.recorder.sync_visible(visible, &order, &inputs)?;
        if self.config.cache_depth > 0 {
            self.recorder
                .warm(&self.catalog, visible, self.config.cache_depth, &order, &inputs)?;
        }
        let visible_tiles = visible.tiles();

        for index in self.shadows.due() {
            self.shadows
                .record(index, self.backend.as_ref(), self.hooks.as_ref(), &ctx, &order)?;
            self.pending_shadows.insert(index);
        }

        if camera_dirty || repack || summary.changed() {
            for frame in &mut self.frames {
                frame.needs_record = true;
            }
        }
        self.refresh_tiles(&visible_tiles, summary);
        self.camera.clear_dirty();
        self.phase = FramePhase::Recorded;
        Ok(())
    }

    /// Submit the frame
    ///
    /// Returns the semaphore the presentation step must wait on.
    pub fn draw(&mut self) -> SceneResult<SemaphoreHandle> {
        if self.phase != FramePhase::Recorded {
            log::error!("draw() called in phase {:?}", self.phase);
            return Err(SceneError::InvalidOperation {
                reason: format!("draw() requires update() first (phase is {:?})", self.phase),
            });
        }
        let (Some(sync), Some(ctx)) = (self.sync, self.context.clone()) else {
            return Err(SceneError::InvalidOperation { reason: "draw() called before prepare()".to_string() });
        };

        let slot = self.frame_slot;
        self.record_frame(slot, &ctx)?;
        let frame = self.frames[slot];
        let backend = self.backend.as_ref();

        let mut wait: Vec<(SemaphoreHandle, PipelineStages)> = Vec::new();
        if self.update_pending {
            backend.submit(&Submission {
                command_buffers: &[sync.update_cmd],
                wait: &wait,
                signal: &[sync.update_done],
                fence: None,
            })?;
            wait = vec![(sync.update_done, PipelineStages::VERTEX_SHADER | PipelineStages::FRAGMENT_SHADER)];
        }

        if !self.pending_shadows.is_empty() {
            let shadow_cmds: Vec<CommandBufferHandle> = self
                .pending_shadows
                .iter()
                .filter_map(|&index| self.shadows.maps().get(index))
                .map(|map| map.command_buffer())
                .collect();
            backend.submit(&Submission {
                command_buffers: &shadow_cmds,
                wait: &wait,
                signal: &[sync.shadows_done],
                fence: None,
            })?;
            wait = vec![(sync.shadows_done, PipelineStages::FRAGMENT_SHADER)];
        }

        backend.submit(&Submission {
            command_buffers: &[frame.static_cmd],
            wait: &wait,
            signal: &[sync.static_done],
            fence: None,
        })?;
        backend.submit(&Submission {
            command_buffers: &[frame.dynamic_cmd],
            wait: &[(sync.static_done, PipelineStages::COLOR_ATTACHMENT_OUTPUT)],
            signal: &[sync.dynamic_done],
            fence: Some(sync.fence),
        })?;
        self.fence_pending = true;

        let done = if self.hooks.postprocess(&ctx, backend, sync.dynamic_done, sync.postprocess_done) {
            sync.postprocess_done
        } else {
            sync.dynamic_done
        };

        self.update_pending = false;
        self.light_buffer_dirty = false;
        self.pending_shadows.clear();
        self.phase = FramePhase::Submitted;
        log::trace!("Frame {} submitted on slot {}", self.frame, slot);
        Ok(done)
    }

    /// Select the swap-chain image the next `draw()` renders to
    pub fn set_frame_slot(&mut self, slot: usize) -> SceneResult<()> {
        if slot >= self.targets.static_passes.len() {
            return Err(SceneError::InvalidOperation {
                reason: format!("frame slot {} out of range ({} slots)", slot, self.targets.static_passes.len()),
            });
        }
        self.frame_slot = slot;
        Ok(())
    }

    /// First object the camera's collision box touches
    pub fn check_camera_collision(&self) -> Option<ObjectKey> {
        let probe = self.camera.collision_box(self.config.camera.collision_radius);
        self.catalog.camera_collision(&probe)
    }

    /// Block until the GPU finished the last submitted frame
    pub fn wait_idle(&mut self) -> SceneResult<()> {
        match self.sync {
            Some(sync) => self.wait_previous_frame(sync.fence),
            None => Ok(()),
        }
    }

    /// Scene parameters
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Camera
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Mutable camera; mutations raise its dirty bits
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Objects and tiles
    pub fn catalog(&self) -> &ObjectCatalog {
        &self.catalog
    }

    /// Object by key
    pub fn object(&self, key: ObjectKey) -> Option<&SceneObject> {
        self.catalog.object(key)
    }

    /// Category id by name
    pub fn category(&self, name: &str) -> Option<CategoryId> {
        self.catalog.category(name)
    }

    /// Counts and capacities of a category
    pub fn category_counts(&self, id: CategoryId) -> CategoryCounts {
        self.catalog.counts(id)
    }

    /// Lights in insertion order
    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Mutable light; setters raise its dirty bits
    pub fn light_mut(&mut self, index: usize) -> SceneResult<&mut Light> {
        self.lights.get_mut(index).ok_or(SceneError::UnknownLight(index))
    }

    /// Shadow maps
    pub fn shadows(&self) -> &ShadowManager {
        &self.shadows
    }

    /// Depth image and sampler of light `index`'s shadow map
    pub fn shadow_map(&self, index: usize) -> Option<(ImageHandle, SamplerHandle)> {
        self.shadows.map_for_light(index).map(|map| (map.image(), map.sampler()))
    }

    /// Static instance buffer and its size
    pub fn static_instance_buffer(&self) -> Option<(BufferHandle, u64)> {
        self.buffers.map(|b| b.static_instances)
    }

    /// Static shadow caster buffer and its size
    pub fn static_caster_buffer(&self) -> Option<(BufferHandle, u64)> {
        self.buffers.map(|b| b.static_casters)
    }

    /// Dynamic instance buffer and its size
    pub fn dynamic_instance_buffer(&self) -> Option<(BufferHandle, u64)> {
        self.buffers.map(|b| b.dynamic_instances)
    }

    /// Dynamic shadow caster buffer and its size
    pub fn dynamic_caster_buffer(&self) -> Option<(BufferHandle, u64)> {
        self.buffers.map(|b| b.dynamic_casters)
    }

    /// Material buffer and its size
    pub fn material_buffer(&self) -> Option<(BufferHandle, u64)> {
        self.buffers.map(|b| b.materials)
    }

    /// Light buffer and its layout
    pub fn light_buffer(&self) -> Option<(BufferHandle, LightBufferLayout)> {
        self.buffers.map(|b| (b.lights, b.light_layout))
    }

    /// Static nodes visible from the camera
    pub fn visible(&self) -> Option<&VisibleSet> {
        self.visibility.visible()
    }

    /// Visible dynamic objects in draw order
    pub fn dynamic_sets(&self) -> CategorySets {
        CategorySets::from_indexed(&self.dynamic_pack.sets, self.catalog.categories().draw_order())
    }

    /// Visible dynamic objects in buffer order
    pub fn dynamic_objects(&self) -> &[ObjectKey] {
        &self.dynamic_pack.objects
    }

    /// Tile cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.recorder.cache_stats()
    }

    /// Nodes whose secondaries are parked in the tile cache
    pub fn cached_nodes(&self) -> usize {
        self.recorder.cached_nodes().len()
    }

    /// Secondary command buffers recorded so far
    pub fn secondaries_recorded(&self) -> u64 {
        self.recorder.secondaries_recorded()
    }

    /// How often the camera's visible set was recomputed
    pub fn visibility_recomputations(&self) -> u64 {
        self.visibility.recomputations()
    }

    /// Current frame phase
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Frames updated so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Command buffers of frame slot `slot`
    pub fn frame_state(&self, slot: usize) -> Option<&FrameState> {
        self.frames.get(slot)
    }

    fn inheritance(&self) -> Inheritance {
        let pass = &self.targets.static_passes[0];
        Inheritance { render_pass: pass.render_pass, subpass: 0, framebuffer: None }
    }

    fn wait_previous_frame(&mut self, fence: FenceHandle) -> SceneResult<()> {
        if !self.fence_pending {
            return Ok(());
        }
        while self.backend.wait_fence(fence, FENCE_TIMEOUT_NS)? == FenceStatus::NotReady {
            log::trace!("Waiting for frame {} to finish", self.frame);
        }
        self.backend.reset_fence(fence)?;
        self.fence_pending = false;
        Ok(())
    }

    fn create_buffers(&self, static_casters: u64) -> SceneResult<SceneBuffers> {
        let backend = self.backend.as_ref();
        let storage = BufferUsage::STORAGE | BufferUsage::TRANSFER_DST;
        let uniform = BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST;

        let create = |size: u64, usage: BufferUsage| -> SceneResult<(BufferHandle, u64)> {
            Ok((backend.create_buffer(size, usage)?, size))
        };

        let dynamic_capacity = u64::from(self.catalog.dynamic_capacity());
        let dynamic_caster_region = dynamic_capacity * SHADOW_CASTER_STRIDE;
        let shadow_slots = self.shadows.len().max(1) as u64;
        let light_layout = LightBufferLayout::new(self.lights.len() as u32, &backend.limits());

        Ok(SceneBuffers {
            static_instances: create(region_size(u64::from(self.catalog.static_capacity()).max(1)), storage)?,
            static_casters: create(static_casters.max(1) * SHADOW_CASTER_STRIDE, storage)?,
            dynamic_instances: create(region_size(dynamic_capacity.max(1)), storage)?,
            dynamic_casters: create((dynamic_caster_region * shadow_slots).max(SHADOW_CASTER_STRIDE), storage)?,
            dynamic_caster_region,
            materials: create(material_buffer_size(self.catalog.categories().len().max(1) as u64), uniform)?,
            lights: backend.create_buffer(light_layout.total_size(), uniform)?,
            light_layout,
        })
    }

    fn write_static_buffers(&self) -> SceneResult<()> {
        let Some(buffers) = self.buffers else {
            return Ok(());
        };
        self.backend
            .write_buffer(buffers.static_instances.0, 0, self.packer.static_instances())?;
        self.backend
            .write_buffer(buffers.static_casters.0, 0, self.packer.static_casters())?;
        Ok(())
    }

    fn rebuild_static_layout(&mut self) -> SceneResult<()> {
        let layout = self.catalog.relayout();
        if let Some(buffers) = self.buffers {
            let caster_bytes = layout.casters.len() as u64 * SHADOW_CASTER_STRIDE;
            if caster_bytes > buffers.static_casters.1 {
                // Shadow casters are not reserved separately; grow the buffer
                self.backend.destroy_buffer(buffers.static_casters.0);
                let size = caster_bytes;
                let handle = self
                    .backend
                    .create_buffer(size, BufferUsage::STORAGE | BufferUsage::TRANSFER_DST)?;
                self.buffers = Some(SceneBuffers { static_casters: (handle, size), ..buffers });
            }
        }
        self.packer.pack_static(&self.catalog, &layout);
        self.write_static_buffers()?;
        self.recorder.invalidate();
        self.visibility.invalidate();
        log::debug!("Static layout rebuilt for frame {}", self.frame);
        Ok(())
    }

    fn record_context(&self, buffers: &SceneBuffers) -> RecordContext {
        RecordContext {
            frame: self.frame,
            extent: self.targets.static_passes[0].extent,
            static_instances: buffers.static_instances.0,
            static_casters: buffers.static_casters.0,
            dynamic_instances: buffers.dynamic_instances.0,
            dynamic_casters: buffers.dynamic_casters.0,
            dynamic_caster_region: buffers.dynamic_caster_region,
            materials: buffers.materials.0,
            lights: buffers.lights,
            light_layout: buffers.light_layout,
            camera_view_proj: *self.camera.view_projection(),
            camera_position: self.camera.position(),
            shadows: self.shadows.pass_infos(),
        }
    }

    fn light_buffer_contents(&self, layout: &LightBufferLayout) -> Vec<u8> {
        let mut bytes = vec![0u8; layout.total_size() as usize];
        for (index, light) in self.lights.iter().enumerate() {
            let offset = layout.light_offset(index) as usize;
            bytes[offset..offset + LIGHT_RECORD_SIZE as usize].copy_from_slice(bytemuck::bytes_of(&light.record()));
        }
        for map in self.shadows.maps() {
            let offset = layout.shadow_record_offset(map.light()) as usize;
            bytes[offset..offset + SHADOW_MAP_RECORD_SIZE as usize].copy_from_slice(bytemuck::bytes_of(&map.record()));
        }
        bytes
    }

    fn record_resource_updates(&mut self, ctx: &RecordContext, buffers: &SceneBuffers, sync: &FrameSync) -> SceneResult<()> {
        let backend = self.backend.as_ref();
        let cmd = sync.update_cmd;
        backend.begin_command_buffer(cmd, CommandBufferUsage::ONE_TIME_SUBMIT, None)?;
        let mut recorded = self.hooks.update_resources(ctx, backend, cmd);
        if self.light_buffer_dirty && !self.lights.is_empty() {
            let contents = self.light_buffer_contents(&buffers.light_layout);
            cmd_update_buffer_chunked(backend, cmd, buffers.lights, 0, &contents);
            recorded = true;
        }
        backend.end_command_buffer(cmd)?;
        self.update_pending = recorded;
        Ok(())
    }

    fn record_frame(&mut self, slot: usize, ctx: &RecordContext) -> SceneResult<()> {
        let Some(frame) = self.frames.get(slot).copied() else {
            return Err(SceneError::InvalidOperation { reason: format!("no frame slot {}", slot) });
        };
        if !frame.needs_record {
            return Ok(());
        }
        let Some(visible) = self.visibility.visible() else {
            return Err(SceneError::InvalidOperation { reason: "no visible set computed".to_string() });
        };

        let backend = self.backend.as_ref();
        self.recorder
            .record_static_primary(backend, frame.static_cmd, &self.targets.static_passes[slot], visible, self.camera.position())
            .map_err(|err| Self::recording_failed("static pass", err))?;
        CommandRecorder::record_dynamic_primary(
            backend,
            self.hooks.as_ref(),
            ctx,
            frame.dynamic_cmd,
            &self.targets.dynamic_passes[slot],
            &self.dynamic_sets(),
        )
        .map_err(|err| Self::recording_failed("dynamic pass", err))?;

        self.frames[slot].needs_record = false;
        log::trace!("Recorded primaries for slot {}", slot);
        Ok(())
    }

    fn recording_failed(pass: &str, err: RenderError) -> SceneError {
        log::error!("Recording the {} failed: {}", pass, err);
        SceneError::RecordingFailed(format!("{}: {}", pass, err))
    }

    fn refresh_tiles(&mut self, visible_tiles: &BTreeSet<usize>, summary: RecordSummary) {
        for &index in visible_tiles {
            if let Some(tile) = self.catalog.tile_mut(index) {
                tile.last_visible_frame = Some(self.frame);
            }
        }
        if !summary.changed() && self.config.cache_depth == 0 {
            return;
        }
        let indices: Vec<usize> = self.catalog.tiles().map(Tile::index).collect();
        for index in indices {
            let residency = self.recorder.residency(index);
            if let Some(tile) = self.catalog.tile_mut(index) {
                tile.residency = residency;
            }
        }
    }

    fn release(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::error!("Waiting for the last frame failed: {}", err);
        }
        let backend = Arc::clone(&self.backend);
        self.recorder.destroy(backend.as_ref());
        self.shadows.destroy(backend.as_ref());

        let mut primaries: Vec<CommandBufferHandle> =
            self.frames.drain(..).flat_map(|frame| [frame.static_cmd, frame.dynamic_cmd]).collect();
        if let Some(sync) = self.sync.take() {
            primaries.push(sync.update_cmd);
            for semaphore in [
                sync.update_done,
                sync.shadows_done,
                sync.static_done,
                sync.dynamic_done,
                sync.postprocess_done,
            ] {
                backend.destroy_semaphore(semaphore);
            }
            backend.destroy_fence(sync.fence);
        }
        if !primaries.is_empty() {
            backend.free_command_buffers(0, &primaries);
        }

        if let Some(buffers) = self.buffers.take() {
            for buffer in [
                buffers.static_instances.0,
                buffers.static_casters.0,
                buffers.dynamic_instances.0,
                buffers.dynamic_casters.0,
                buffers.materials.0,
                buffers.lights,
            ] {
                backend.destroy_buffer(buffer);
            }
        }
        log::debug!("Scene resources released");
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("phase", &self.phase)
            .field("frame", &self.frame)
            .field("objects", &self.catalog.object_count())
            .field("lights", &self.lights.len())
            .finish_non_exhaustive()
    }
}

/// Camera position helper for hosts that steer by collision
///
/// Moves the camera by `delta` and reverts the move when it would put the
/// camera inside an object. Returns the object hit, if any.
pub fn step_camera(scene: &mut Scene, delta: Vec3) -> Option<ObjectKey> {
    let previous = scene.camera().position();
    scene.camera_mut().translate(delta);
    let hit = scene.check_camera_collision();
    if hit.is_some() {
        scene.camera_mut().set_position(previous);
    }
    hit
}
