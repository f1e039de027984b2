//! Scene-level tests driven through the headless backend

mod frame_cycle;
mod scenarios;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{CameraConfig, SceneConfig};
use crate::foundation::math::Vec3;
use crate::render::backends::HeadlessBackend;
use crate::render::{
    ClearValue, CommandBufferHandle, Extent2D, FramebufferHandle, GpuBackend, PassTarget,
    PipelineStages, RenderPassHandle, SemaphoreHandle, Submission,
};
use crate::scene::hooks::{DrawPass, RecordContext, SceneHooks};
use crate::scene::tile::CategorySets;
use crate::scene::{Projection, Scene, SceneTargets};
use crate::spatial::AABB;

/// Hooks that count calls per pass and draw every range as one instanced draw
#[derive(Default)]
pub(super) struct TestHooks {
    pub static_calls: AtomicUsize,
    pub dynamic_calls: AtomicUsize,
    pub shadow_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub postprocess: bool,
}

impl TestHooks {
    pub fn with_postprocess() -> Self {
        Self { postprocess: true, ..Self::default() }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl SceneHooks for TestHooks {
    fn update_resources(&self, _ctx: &RecordContext, _backend: &dyn GpuBackend, _cmd: CommandBufferHandle) -> bool {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        false
    }

    fn record_commands(
        &self,
        _ctx: &RecordContext,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
        sets: &CategorySets,
        pass: DrawPass,
    ) {
        let counter = match pass {
            DrawPass::Static => &self.static_calls,
            DrawPass::Dynamic => &self.dynamic_calls,
            DrawPass::Shadow { .. } => &self.shadow_calls,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        for (_, info) in sets.iter() {
            backend.cmd_draw(cmd, 36, info.count, 0, info.start_index);
        }
    }

    fn postprocess(
        &self,
        _ctx: &RecordContext,
        backend: &dyn GpuBackend,
        wait: SemaphoreHandle,
        signal: SemaphoreHandle,
    ) -> bool {
        if !self.postprocess {
            return false;
        }
        backend
            .submit(&Submission {
                command_buffers: &[],
                wait: &[(wait, PipelineStages::FRAGMENT_SHADER)],
                signal: &[signal],
                fence: None,
            })
            .is_ok()
    }
}

pub(super) fn targets(slots: usize) -> SceneTargets {
    let extent = Extent2D::new(800, 600);
    let pass = |render_pass: u64, framebuffer: u64, clear: bool| PassTarget {
        render_pass: RenderPassHandle(render_pass),
        framebuffer: FramebufferHandle(framebuffer),
        extent,
        clear_values: if clear {
            vec![ClearValue::Color([0.0, 0.0, 0.0, 1.0]), ClearValue::DepthStencil { depth: 1.0, stencil: 0 }]
        } else {
            Vec::new()
        },
    };
    SceneTargets {
        static_passes: (0..slots).map(|i| pass(900, 1000 + i as u64, true)).collect(),
        dynamic_passes: (0..slots).map(|i| pass(901, 1100 + i as u64, false)).collect(),
    }
}

/// 100³ world of 25³ tiles; the camera sits in front of the z = 100 face looking down -z
pub(super) fn config() -> SceneConfig {
    SceneConfig::default()
        .with_world(Vec3::zeros(), Vec3::repeat(100.0))
        .with_tile_size(Vec3::repeat(25.0))
        .with_tile_levels(2)
        .with_cache(8, 0)
        .with_max_dynamic_objects(16)
        .with_camera(CameraConfig {
            position: Vec3::new(50.0, 50.0, 150.0),
            rotation: Vec3::zeros(),
            projection: Projection::new(60.0, 4.0 / 3.0, 0.1, 500.0),
            collision_radius: 0.5,
        })
}

pub(super) fn build(config: SceneConfig, hooks: Arc<TestHooks>, slots: usize) -> (Scene, Arc<HeadlessBackend>) {
    let backend = Arc::new(HeadlessBackend::new(3));
    let scene = Scene::new(config, backend.clone(), hooks, targets(slots)).unwrap();
    (scene, backend)
}

pub(super) fn unit_box() -> AABB {
    AABB::new(Vec3::repeat(-0.5), Vec3::repeat(0.5))
}
