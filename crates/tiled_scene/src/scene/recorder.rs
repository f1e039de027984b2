//! Command recording
//!
//! Static geometry is recorded once per visible node into a secondary
//! command buffer that continues the static render pass. A secondary stays
//! valid while its node is visible and is parked in the [`TileCache`] when
//! the node leaves the visible set, so a camera moving back and forth does
//! not re-record anything. Newly visible nodes are recorded on the
//! [`WorkerPool`], one job per command pool, and joined before the primary
//! buffer that executes them is recorded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::foundation::math::Vec3;
use crate::foundation::worker_pool::WorkerPool;
use crate::render::{
    CommandBufferHandle, CommandBufferLevel, CommandBufferUsage, GpuBackend, Inheritance,
    PassTarget, RenderError, RenderResult, SubpassContents,
};
use crate::scene::catalog::ObjectCatalog;
use crate::scene::hooks::{DrawPass, RecordContext, SceneHooks};
use crate::scene::tile::{CategorySets, NodeId, Residency};
use crate::scene::tile_cache::{CacheStats, TileCache};
use crate::scene::visibility::VisibleSet;
use crate::scene::{CategoryId, SceneError, SceneResult};

/// Secondary command buffer of one node and the pool it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCommands {
    /// Secondary command buffer
    pub cmd: CommandBufferHandle,
    /// Command pool it was allocated from
    pub pool: usize,
}

/// Everything a recording job reads
///
/// Cloned into every job; the context is an immutable per-frame snapshot.
#[derive(Clone)]
pub struct RecordInputs {
    /// GPU backend
    pub backend: Arc<dyn GpuBackend>,
    /// Host recording callbacks
    pub hooks: Arc<dyn SceneHooks>,
    /// Frame snapshot
    pub ctx: Arc<RecordContext>,
    /// Render pass the secondaries continue
    pub inheritance: Inheritance,
}

/// What a visible set sync did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordSummary {
    /// Secondaries recorded
    pub recorded: usize,
    /// Secondaries taken back from the cache
    pub reused: usize,
    /// Secondaries parked in the cache
    pub parked: usize,
}

impl RecordSummary {
    /// True when the set of active secondaries changed
    pub fn changed(&self) -> bool {
        self.recorded + self.reused + self.parked > 0
    }
}

struct RecordJob {
    node: NodeId,
    sets: CategorySets,
    commands: NodeCommands,
}

/// Records and keeps the per-node secondaries of the static pass
pub struct CommandRecorder {
    workers: Option<WorkerPool>,
    pool_count: usize,
    next_pool: usize,
    active: BTreeMap<NodeId, NodeCommands>,
    cache: TileCache<NodeId, NodeCommands>,
    secondaries_recorded: u64,
}

impl CommandRecorder {
    /// Create a recorder
    ///
    /// # Arguments
    /// * `worker_threads` - recording threads, 0 records on the calling thread
    /// * `pool_count` - command pools the backend provides
    /// * `cache_size` - secondaries kept for nodes that left the visible set
    pub fn new(worker_threads: usize, pool_count: usize, cache_size: usize) -> Self {
        let workers = (worker_threads > 0).then(|| WorkerPool::new(worker_threads));
        log::debug!(
            "Command recorder: {} worker threads, {} command pools, cache of {}",
            worker_threads,
            pool_count,
            cache_size
        );
        Self {
            workers,
            pool_count: pool_count.max(1),
            next_pool: 0,
            active: BTreeMap::new(),
            cache: TileCache::new(cache_size),
            secondaries_recorded: 0,
        }
    }

    /// Bring the active secondaries in line with `visible`
    ///
    /// Nodes that left the set are parked in the cache, nodes that entered
    /// it are taken from the cache or recorded.
    pub fn sync_visible(
        &mut self,
        visible: &VisibleSet,
        order: &[CategoryId],
        inputs: &RecordInputs,
    ) -> SceneResult<RecordSummary> {
        let mut summary = RecordSummary::default();
        let visible_ids: BTreeSet<NodeId> = visible.nodes().iter().map(|node| node.id).collect();

        let gone: Vec<NodeId> = self
            .active
            .keys()
            .filter(|id| !visible_ids.contains(id))
            .copied()
            .collect();
        for id in gone {
            if let Some(commands) = self.active.remove(&id) {
                self.cache.insert(id, commands);
                summary.parked += 1;
            }
        }

        let mut jobs = Vec::new();
        for node in visible.nodes() {
            if self.active.contains_key(&node.id) {
                continue;
            }
            if let Some(commands) = self.cache.take(node.id) {
                self.active.insert(node.id, commands);
                summary.reused += 1;
                continue;
            }
            let commands = self.acquire(inputs.backend.as_ref())?;
            jobs.push(RecordJob { node: node.id, sets: node.category_sets(order), commands });
        }

        summary.recorded = jobs.len();
        let recorded: Vec<(NodeId, NodeCommands)> = jobs.iter().map(|job| (job.node, job.commands)).collect();
        match self.run(jobs, inputs) {
            Ok(()) => self.active.extend(recorded),
            Err(err) => {
                for (_, commands) in recorded {
                    self.cache.release(commands);
                }
                return Err(err);
            }
        }

        if summary.changed() {
            log::trace!(
                "Secondaries: {} recorded, {} reused, {} parked, {} active",
                summary.recorded,
                summary.reused,
                summary.parked,
                self.active.len()
            );
        }
        Ok(summary)
    }

    /// Record ahead the tiles within `depth` grid steps of the visible set
    ///
    /// Warmed tiles go into the cache only while it has room, so warming
    /// never evicts recently visible nodes. Returns the number of tiles
    /// recorded.
    pub fn warm(
        &mut self,
        catalog: &ObjectCatalog,
        visible: &VisibleSet,
        depth: u32,
        order: &[CategoryId],
        inputs: &RecordInputs,
    ) -> SceneResult<usize> {
        if depth == 0 {
            return Ok(0);
        }
        let grid = catalog.grid();
        let visible_tiles = visible.tiles();
        let mut candidates = BTreeSet::new();
        for &tile in &visible_tiles {
            for coord in grid.neighbors(grid.coord_of(tile), depth) {
                let index = grid.tile_index(coord);
                let id = NodeId::root(index);
                let populated = catalog.tile(index).is_some_and(|t| t.root().static_count() > 0);
                if populated
                    && !visible_tiles.contains(&index)
                    && !self.active.contains_key(&id)
                    && !self.cache.contains(id)
                {
                    candidates.insert(id);
                }
            }
        }

        let spare = self.cache.capacity().saturating_sub(self.cache.len());
        let mut jobs = Vec::new();
        for id in candidates.into_iter().take(spare) {
            let Some(tile) = catalog.tile(id.tile) else {
                continue;
            };
            let sets = CategorySets::from_indexed(&tile.root().ranges, order);
            let commands = self.acquire(inputs.backend.as_ref())?;
            jobs.push(RecordJob { node: id, sets, commands });
        }

        let warmed: Vec<(NodeId, NodeCommands)> = jobs.iter().map(|job| (job.node, job.commands)).collect();
        let result = self.run(jobs, inputs);
        let mut admitted = 0;
        for (id, commands) in warmed {
            if result.is_err() {
                self.cache.release(commands);
                continue;
            }
            match self.cache.admit(id, commands) {
                Ok(()) => admitted += 1,
                Err(commands) => self.cache.release(commands),
            }
        }
        result?;

        if admitted > 0 {
            log::trace!("Warmed {} tiles around the visible set", admitted);
        }
        Ok(admitted)
    }

    /// Record the static primary: execute the active secondaries front to back
    ///
    /// Secondaries are ordered by distance from `eye` to the node center,
    /// ties broken by node id.
    pub fn record_static_primary(
        &self,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
        target: &PassTarget,
        visible: &VisibleSet,
        eye: Vec3,
    ) -> RenderResult<()> {
        let mut ordered: Vec<(f32, NodeId, CommandBufferHandle)> = visible
            .nodes()
            .iter()
            .filter_map(|node| {
                self.active
                    .get(&node.id)
                    .map(|commands| ((node.center - eye).norm_squared(), node.id, commands.cmd))
            })
            .collect();
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let secondaries: Vec<CommandBufferHandle> = ordered.into_iter().map(|(_, _, cmd)| cmd).collect();

        backend.begin_command_buffer(cmd, CommandBufferUsage::empty(), None)?;
        backend.cmd_begin_render_pass(cmd, target, SubpassContents::SecondaryCommandBuffers);
        if !secondaries.is_empty() {
            backend.cmd_execute_commands(cmd, &secondaries);
        }
        backend.cmd_end_render_pass(cmd);
        backend.end_command_buffer(cmd)
    }

    /// Record the dynamic primary with inline draws
    pub fn record_dynamic_primary(
        backend: &dyn GpuBackend,
        hooks: &dyn SceneHooks,
        ctx: &RecordContext,
        cmd: CommandBufferHandle,
        target: &PassTarget,
        sets: &CategorySets,
    ) -> RenderResult<()> {
        backend.begin_command_buffer(cmd, CommandBufferUsage::empty(), None)?;
        backend.cmd_begin_render_pass(cmd, target, SubpassContents::Inline);
        backend.cmd_set_viewport(cmd, target.extent);
        backend.cmd_set_scissor(cmd, target.extent);
        if !sets.is_empty() {
            hooks.record_commands(ctx, backend, cmd, sets, DrawPass::Dynamic);
        }
        backend.cmd_end_render_pass(cmd);
        backend.end_command_buffer(cmd)
    }

    /// Drop every recorded secondary; their buffers return to the free pool
    pub fn invalidate(&mut self) {
        let active = std::mem::take(&mut self.active);
        let pooled = self.cache.drain();
        for commands in active.into_values().chain(pooled) {
            self.cache.release(commands);
        }
        log::debug!("All secondaries invalidated");
    }

    /// Residency of a tile's secondaries
    pub fn residency(&self, tile: usize) -> Residency {
        let nodes = NodeId::root(tile)..=NodeId { tile, node: u32::MAX };
        if self.active.range(nodes).next().is_some() {
            Residency::Active
        } else if self.cache.keys().any(|id| id.tile == tile) {
            Residency::Cached
        } else {
            Residency::NotResident
        }
    }

    /// Secondary of an active node
    pub fn active(&self, id: NodeId) -> Option<NodeCommands> {
        self.active.get(&id).copied()
    }

    /// Number of active secondaries
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Nodes whose secondaries are cached
    pub fn cached_nodes(&self) -> Vec<NodeId> {
        self.cache.keys().collect()
    }

    /// Cache hit, miss and eviction counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Secondaries recorded over the recorder's lifetime
    pub fn secondaries_recorded(&self) -> u64 {
        self.secondaries_recorded
    }

    /// Recording threads, 0 when recording inline
    pub fn worker_threads(&self) -> usize {
        self.workers.as_ref().map_or(0, WorkerPool::num_threads)
    }

    /// Free every command buffer
    pub fn destroy(&mut self, backend: &dyn GpuBackend) {
        let active = std::mem::take(&mut self.active);
        let mut by_pool: BTreeMap<usize, Vec<CommandBufferHandle>> = BTreeMap::new();
        for commands in active.into_values().chain(self.cache.drain()) {
            by_pool.entry(commands.pool).or_default().push(commands.cmd);
        }
        for (pool, buffers) in by_pool {
            backend.free_command_buffers(pool, &buffers);
        }
    }

    fn acquire(&mut self, backend: &dyn GpuBackend) -> RenderResult<NodeCommands> {
        if let Some(commands) = self.cache.take_free() {
            return Ok(commands);
        }
        let pool = self.next_pool;
        self.next_pool = (self.next_pool + 1) % self.pool_count;
        let cmd = backend
            .allocate_command_buffers(pool, CommandBufferLevel::Secondary, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| RenderError::ResourceCreationFailed("no secondary command buffer returned".to_string()))?;
        Ok(NodeCommands { cmd, pool })
    }

    fn run(&mut self, jobs: Vec<RecordJob>, inputs: &RecordInputs) -> SceneResult<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        self.secondaries_recorded += jobs.len() as u64;

        // One batch per pool: a pool is only ever used by one thread at a time
        let mut batches: BTreeMap<usize, Vec<RecordJob>> = BTreeMap::new();
        for job in jobs {
            batches.entry(job.commands.pool).or_default().push(job);
        }

        let Some(workers) = &self.workers else {
            for job in batches.values().flatten() {
                record_secondary(inputs, job)
                    .map_err(|err| SceneError::RecordingFailed(format!("node {:?}: {}", job.node, err)))?;
            }
            return Ok(());
        };

        let failures = Arc::new(Mutex::new(Vec::new()));
        for (_, batch) in batches {
            let inputs = inputs.clone();
            let failures = Arc::clone(&failures);
            workers.execute(move || {
                for job in &batch {
                    if let Err(err) = record_secondary(&inputs, job) {
                        log::error!("Recording node {:?} failed: {}", job.node, err);
                        failures
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(format!("node {:?}: {}", job.node, err));
                    }
                }
            });
        }
        workers.wait();

        let panicked = workers.take_panicked();
        if panicked > 0 {
            return Err(SceneError::RecordingFailed(format!("{} recording jobs panicked", panicked)));
        }
        let failures = std::mem::take(&mut *failures.lock().unwrap_or_else(PoisonError::into_inner));
        match failures.into_iter().next() {
            Some(first) => Err(SceneError::RecordingFailed(first)),
            None => Ok(()),
        }
    }
}

fn record_secondary(inputs: &RecordInputs, job: &RecordJob) -> RenderResult<()> {
    let backend = inputs.backend.as_ref();
    let cmd = job.commands.cmd;
    let usage = CommandBufferUsage::RENDER_PASS_CONTINUE | CommandBufferUsage::SIMULTANEOUS_USE;
    backend.begin_command_buffer(cmd, usage, Some(&inputs.inheritance))?;
    backend.cmd_set_viewport(cmd, inputs.ctx.extent);
    backend.cmd_set_scissor(cmd, inputs.ctx.extent);
    if !job.sets.is_empty() {
        inputs.hooks.record_commands(&inputs.ctx, backend, cmd, &job.sets, DrawPass::Static);
    }
    backend.end_command_buffer(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::render::backends::{HeadlessBackend, RecordedCommand};
    use crate::render::{
        BufferHandle, DeviceLimits, Extent2D, FramebufferHandle, RenderPassHandle,
    };
    use crate::scene::light::LightBufferLayout;
    use crate::scene::tile::VisibleSetInfo;
    use crate::scene::visibility::VisibleNode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHooks {
        calls: AtomicUsize,
    }

    impl SceneHooks for CountingHooks {
        fn record_commands(
            &self,
            _ctx: &RecordContext,
            backend: &dyn GpuBackend,
            cmd: CommandBufferHandle,
            sets: &CategorySets,
            _pass: DrawPass,
        ) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for (_, info) in sets.iter() {
                backend.cmd_draw(cmd, 3, info.count, 0, info.start_index);
            }
        }
    }

    struct PanickingHooks;

    impl SceneHooks for PanickingHooks {
        fn record_commands(
            &self,
            _ctx: &RecordContext,
            _backend: &dyn GpuBackend,
            _cmd: CommandBufferHandle,
            _sets: &CategorySets,
            _pass: DrawPass,
        ) {
            panic!("host draw callback failed");
        }
    }

    fn context() -> RecordContext {
        RecordContext {
            frame: 1,
            extent: Extent2D::new(320, 200),
            static_instances: BufferHandle(1),
            static_casters: BufferHandle(2),
            dynamic_instances: BufferHandle(3),
            dynamic_casters: BufferHandle(4),
            dynamic_caster_region: 0,
            materials: BufferHandle(5),
            lights: BufferHandle(6),
            light_layout: LightBufferLayout::new(0, &DeviceLimits::default()),
            camera_view_proj: Mat4::identity(),
            camera_position: Vec3::zeros(),
            shadows: Vec::new(),
        }
    }

    fn inputs(backend: &Arc<HeadlessBackend>, hooks: Arc<dyn SceneHooks>) -> RecordInputs {
        RecordInputs {
            backend: backend.clone(),
            hooks,
            ctx: Arc::new(context()),
            inheritance: Inheritance {
                render_pass: RenderPassHandle(100),
                subpass: 0,
                framebuffer: None,
            },
        }
    }

    fn node(tile: usize, x: f32) -> VisibleNode {
        VisibleNode {
            id: NodeId::root(tile),
            center: Vec3::new(x, 0.0, 0.0),
            ranges: vec![VisibleSetInfo::new(tile as u32 * 4, 4)],
        }
    }

    fn target() -> PassTarget {
        PassTarget {
            render_pass: RenderPassHandle(100),
            framebuffer: FramebufferHandle(101),
            extent: Extent2D::new(320, 200),
            clear_values: Vec::new(),
        }
    }

    const ORDER: [CategoryId; 1] = [CategoryId(0)];

    #[test]
    fn test_secondaries_recorded_once_while_visible() {
        let backend = Arc::new(HeadlessBackend::new(1));
        let hooks = Arc::new(CountingHooks::default());
        let inputs = inputs(&backend, hooks.clone());
        let mut recorder = CommandRecorder::new(0, 1, 4);

        let visible: VisibleSet = [node(0, 1.0), node(1, 2.0)].into_iter().collect();
        let first = recorder.sync_visible(&visible, &ORDER, &inputs).unwrap();
        assert_eq!(first, RecordSummary { recorded: 2, reused: 0, parked: 0 });
        let second = recorder.sync_visible(&visible, &ORDER, &inputs).unwrap();
        assert!(!second.changed());
        assert_eq!(hooks.calls.load(Ordering::SeqCst), 2);

        let cmd = recorder.active(NodeId::root(1)).unwrap().cmd;
        assert_eq!(backend.level(cmd), Some(CommandBufferLevel::Secondary));
        assert!(backend.usage(cmd).unwrap().contains(CommandBufferUsage::RENDER_PASS_CONTINUE));
        assert!(backend.commands(cmd).contains(&RecordedCommand::Draw {
            vertex_count: 3,
            instance_count: 4,
            first_vertex: 0,
            first_instance: 4,
        }));
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_returning_node_hits_cache() {
        let backend = Arc::new(HeadlessBackend::new(1));
        let inputs = inputs(&backend, Arc::new(CountingHooks::default()));
        let mut recorder = CommandRecorder::new(0, 1, 4);

        let both: VisibleSet = [node(0, 1.0), node(1, 2.0)].into_iter().collect();
        let one: VisibleSet = [node(0, 1.0)].into_iter().collect();
        recorder.sync_visible(&both, &ORDER, &inputs).unwrap();
        let parked = recorder.sync_visible(&one, &ORDER, &inputs).unwrap();
        assert_eq!(parked.parked, 1);
        assert_eq!(recorder.residency(1), Residency::Cached);

        let back = recorder.sync_visible(&both, &ORDER, &inputs).unwrap();
        assert_eq!(back, RecordSummary { recorded: 0, reused: 1, parked: 0 });
        assert_eq!(recorder.cache_stats().hits, 1);
        assert_eq!(recorder.residency(1), Residency::Active);
        assert_eq!(recorder.secondaries_recorded(), 2);
    }

    #[test]
    fn test_evicted_buffers_are_reused() {
        let backend = Arc::new(HeadlessBackend::new(1));
        let inputs = inputs(&backend, Arc::new(CountingHooks::default()));
        let mut recorder = CommandRecorder::new(0, 1, 0);

        for tile in 0..5 {
            let visible: VisibleSet = [node(tile, 0.0)].into_iter().collect();
            recorder.sync_visible(&visible, &ORDER, &inputs).unwrap();
        }
        // Without a cache every departing buffer goes straight to the free pool
        assert_eq!(backend.command_buffers_allocated(), 1);
        assert_eq!(recorder.secondaries_recorded(), 5);
    }

    #[test]
    fn test_primary_executes_front_to_back() {
        let backend = Arc::new(HeadlessBackend::new(1));
        let inputs = inputs(&backend, Arc::new(CountingHooks::default()));
        let mut recorder = CommandRecorder::new(0, 1, 4);

        let visible: VisibleSet = [node(0, 30.0), node(1, 10.0), node(2, 20.0), node(3, 10.0)].into_iter().collect();
        recorder.sync_visible(&visible, &ORDER, &inputs).unwrap();

        let primary = backend.allocate_command_buffers(0, CommandBufferLevel::Primary, 1).unwrap()[0];
        recorder
            .record_static_primary(backend.as_ref(), primary, &target(), &visible, Vec3::zeros())
            .unwrap();

        let expected: Vec<_> = [1, 3, 2, 0]
            .iter()
            .map(|&tile| recorder.active(NodeId::root(tile)).unwrap().cmd)
            .collect();
        let commands = backend.commands(primary);
        assert!(matches!(
            commands[0],
            RecordedCommand::BeginRenderPass { contents: SubpassContents::SecondaryCommandBuffers, .. }
        ));
        assert_eq!(commands[1], RecordedCommand::ExecuteCommands(expected));
        assert_eq!(commands[2], RecordedCommand::EndRenderPass);
    }

    #[test]
    fn test_parallel_recording_uses_every_pool() {
        let backend = Arc::new(HeadlessBackend::new(3));
        let hooks = Arc::new(CountingHooks::default());
        let inputs = inputs(&backend, hooks.clone());
        let mut recorder = CommandRecorder::new(3, 3, 16);

        let visible: VisibleSet = (0..12).map(|tile| node(tile, tile as f32)).collect();
        let summary = recorder.sync_visible(&visible, &ORDER, &inputs).unwrap();
        assert_eq!(summary.recorded, 12);
        assert_eq!(hooks.calls.load(Ordering::SeqCst), 12);

        let pools: BTreeSet<usize> = (0..12)
            .filter_map(|tile| recorder.active(NodeId::root(tile)))
            .map(|commands| commands.pool)
            .collect();
        assert_eq!(pools.len(), 3);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_worker_panic_reports_failure() {
        let backend = Arc::new(HeadlessBackend::new(2));
        let inputs = inputs(&backend, Arc::new(PanickingHooks));
        let mut recorder = CommandRecorder::new(2, 2, 4);

        let visible: VisibleSet = [node(0, 0.0), node(1, 1.0)].into_iter().collect();
        let result = recorder.sync_visible(&visible, &ORDER, &inputs);
        assert!(matches!(result, Err(SceneError::RecordingFailed(_))));
        assert_eq!(recorder.active_len(), 0);
    }

    #[test]
    fn test_destroy_frees_everything() {
        let backend = Arc::new(HeadlessBackend::new(2));
        let inputs = inputs(&backend, Arc::new(CountingHooks::default()));
        let mut recorder = CommandRecorder::new(0, 2, 4);

        let visible: VisibleSet = (0..4).map(|tile| node(tile, 0.0)).collect();
        recorder.sync_visible(&visible, &ORDER, &inputs).unwrap();
        recorder.sync_visible(&VisibleSet::default(), &ORDER, &inputs).unwrap();
        recorder.destroy(backend.as_ref());
        assert_eq!(backend.live_command_buffers(), 0);
        assert!(backend.violations().is_empty());
    }
}
