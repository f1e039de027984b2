//! Tiled scene fly-through
//!
//! Builds a scene from a config file on the headless backend, orbits the
//! camera around the world while drones wander through it, and logs
//! visibility and cache statistics.
//!
//! Usage: `scene_demo [config.toml|config.ron] [frames]`

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use tiled_scene::config::{Config, ConfigError, SceneConfig};
use tiled_scene::foundation::math::{Transform, Vec3, Vec4};
use tiled_scene::render::backends::HeadlessBackend;
use tiled_scene::render::{
    BufferHandle, BufferUsage, ClearValue, CommandBufferHandle, DescriptorSetHandle, Extent2D,
    FramebufferHandle, GpuBackend, IndexType, PassTarget, PipelineHandle, PipelineLayoutHandle,
    RenderError, RenderPassHandle,
};
use tiled_scene::scene::{
    step_camera, CategoryDesc, CategorySets, DrawHandlerTable, DrawPass, Light, MaterialRecord,
    MeshBinding, MeshDrawer, ObjectKey, RecordContext, Scene, SceneError, SceneHooks, SceneObject,
    SceneTargets, ShadowSpec,
};
use tiled_scene::spatial::AABB;

const DEFAULT_CONFIG: &str = "scene_demo/scene.toml";
const DEFAULT_FRAMES: u64 = 600;
const FRAME_SLOTS: usize = 2;
const STATIC_CRATES: usize = 800;
const DRONES: usize = 48;
const STATS_INTERVAL: u64 = 60;

#[derive(Debug, Error)]
enum DemoError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Invalid frame count: {0}")]
    Frames(String),
}

/// Hooks dispatching to a draw table filled in once categories exist
#[derive(Default)]
struct DemoHooks {
    table: OnceLock<DrawHandlerTable>,
    batches: AtomicU64,
}

impl SceneHooks for DemoHooks {
    fn record_commands(
        &self,
        ctx: &RecordContext,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
        sets: &CategorySets,
        pass: DrawPass,
    ) {
        if let Some(table) = self.table.get() {
            let drawn = table.record(ctx, backend, cmd, sets, pass);
            self.batches.fetch_add(drawn as u64, Ordering::Relaxed);
        }
    }
}

struct Drone {
    key: ObjectKey,
    velocity: Vec3,
}

struct FlyThroughApp {
    backend: Arc<HeadlessBackend>,
    hooks: Arc<DemoHooks>,
    scene: Scene,
    drones: Vec<Drone>,
    mesh_buffers: [BufferHandle; 2],
    rng: StdRng,
}

impl FlyThroughApp {
    fn new(config: SceneConfig) -> Result<Self, DemoError> {
        let backend = Arc::new(HeadlessBackend::new(config.worker_threads + 1));
        let hooks = Arc::new(DemoHooks::default());
        let origin = config.origin;
        let size = config.size;
        let mut scene = Scene::new(config, backend.clone(), hooks.clone(), targets())?;

        let crate_category = scene.register_category(
            "crate",
            CategoryDesc::default().with_materials(vec![
                MaterialRecord::new([0.6, 0.45, 0.25, 1.0], [0.1, 0.08, 0.05, 1.0], [0.2, 0.2, 0.2, 1.0], 16.0),
                MaterialRecord::new([0.4, 0.4, 0.45, 1.0], [0.05, 0.05, 0.06, 1.0], [0.8, 0.8, 0.8, 1.0], 64.0),
            ]),
        )?;
        let drone_category = scene.register_category(
            "drone",
            CategoryDesc::default()
                .with_pipeline_group(1)
                .with_materials(vec![MaterialRecord::new(
                    [0.9, 0.2, 0.1, 1.0],
                    [0.1, 0.02, 0.01, 1.0],
                    [1.0, 1.0, 1.0, 1.0],
                    32.0,
                )]),
        )?;

        // Unit cube: 24 vertices, 36 indices
        let vertex_buffer = backend.create_buffer(24 * 32, BufferUsage::VERTEX)?;
        let index_buffer = backend.create_buffer(36 * 2, BufferUsage::INDEX)?;
        let cube = MeshBinding {
            vertex_buffer,
            vertex_buffer_offset: 0,
            index_buffer,
            index_buffer_offset: 0,
            index_type: IndexType::U16,
            index_count: 36,
            first_index: 0,
            vertex_offset: 0,
        };
        let drawer = |pipeline: u64| {
            Arc::new(MeshDrawer {
                pipeline: PipelineHandle(pipeline),
                shadow_pipeline: Some(PipelineHandle(pipeline + 1)),
                layout: PipelineLayoutHandle(20),
                descriptor_sets: vec![DescriptorSetHandle(30)],
                meshes: vec![cube],
            })
        };
        let mut table = DrawHandlerTable::new();
        table.register(crate_category, drawer(10));
        table.register(drone_category, drawer(12));
        if hooks.table.set(table).is_err() {
            log::warn!("Draw table already installed");
        }

        let mut rng = StdRng::seed_from_u64(7);
        let random_point = |rng: &mut StdRng| {
            Vec3::new(
                origin.x + rng.gen_range(2.0..size.x - 2.0),
                origin.y + rng.gen_range(2.0..size.y - 2.0),
                origin.z + rng.gen_range(2.0..size.z - 2.0),
            )
        };

        let bounds = AABB::new(Vec3::repeat(-1.0), Vec3::repeat(1.0));
        for i in 0..STATIC_CRATES {
            let object = SceneObject::new(random_point(&mut rng))
                .with_bounds(bounds)
                .with_material_base((i % 2) as u32);
            scene.add_object("crate", object)?;
        }

        let mut drones = Vec::with_capacity(DRONES);
        for _ in 0..DRONES {
            let object = SceneObject::new(random_point(&mut rng)).with_bounds(bounds).dynamic();
            let key = scene.add_object("drone", object)?;
            let velocity = Vec3::new(rng.gen_range(-0.5..0.5), rng.gen_range(-0.1..0.1), rng.gen_range(-0.5..0.5));
            drones.push(Drone { key, velocity });
        }

        let white = Vec4::new(1.0, 1.0, 1.0, 1.0);
        let dim = Vec4::new(0.1, 0.1, 0.1, 1.0);
        scene.add_light(
            Light::directional(Vec3::new(-0.3, -1.0, -0.2), white, dim, white),
            Some(ShadowSpec::default().with_range(0.1, 600.0).with_map_size(2048)),
        )?;
        let mut lamp = Light::spot(
            origin + Vec3::new(size.x * 0.5, size.y, size.z * 0.5),
            35.0,
            white,
            dim,
            white,
            Vec4::new(1.0, 0.01, 0.0, 0.0),
        );
        lamp.set_direction(Vec3::new(0.0, -1.0, 0.0));
        scene.add_light(lamp, Some(ShadowSpec::default().with_range(0.5, size.y * 2.0)))?;

        scene.prepare()?;

        Ok(Self {
            backend,
            hooks,
            scene,
            drones,
            mesh_buffers: [vertex_buffer, index_buffer],
            rng,
        })
    }

    fn run(mut self, frames: u64) -> Result<(), DemoError> {
        let config = self.scene.config().clone();
        let center = config.origin + config.size * 0.5;
        let radius = config.size.x.min(config.size.z) * 0.4;
        let mut collisions = 0u64;

        for frame in 0..frames {
            let angle = frame as f32 * 0.01;
            let target = center + Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius);
            let delta = target - self.scene.camera().position();
            if let Some(hit) = step_camera(&mut self.scene, delta) {
                log::debug!("Camera blocked by {:?} at frame {}", hit, frame);
                collisions += 1;
            }
            self.scene.camera_mut().look_at(center);

            self.move_drones(&config)?;

            // Flicker the lamp now and then so the light buffer is re-uploaded
            if frame % 120 == 0 {
                let intensity = self.rng.gen_range(0.5..1.5);
                self.scene.light_mut(1)?.set_intensity(intensity);
            }

            self.scene.set_frame_slot((frame as usize) % FRAME_SLOTS)?;
            self.scene.update()?;
            self.scene.draw()?;

            if frame % STATS_INTERVAL == 0 {
                self.log_stats(frame);
            }
        }

        self.scene.wait_idle()?;
        self.log_stats(frames);
        log::info!(
            "Fly-through finished: {} frames, {} camera collisions, {} draw batches recorded",
            frames,
            collisions,
            self.hooks.batches.load(Ordering::Relaxed)
        );

        let violations = self.backend.violations();
        if !violations.is_empty() {
            log::warn!("{} backend usage violations", violations.len());
            for violation in violations.iter().take(10) {
                log::warn!("  {}", violation);
            }
        }

        let Self { backend, scene, mesh_buffers, .. } = self;
        drop(scene);
        for buffer in mesh_buffers {
            backend.destroy_buffer(buffer);
        }
        log::info!(
            "Released scene: {} buffers and {} command buffers still alive",
            backend.live_buffers(),
            backend.live_command_buffers()
        );
        Ok(())
    }

    fn move_drones(&mut self, config: &SceneConfig) -> Result<(), DemoError> {
        let min = config.origin + Vec3::repeat(1.5);
        let max = config.origin + config.size - Vec3::repeat(1.5);
        for drone in &mut self.drones {
            let Some(object) = self.scene.object(drone.key) else {
                continue;
            };
            let mut position = object.position() + drone.velocity;
            for axis in 0..3 {
                if position[axis] < min[axis] || position[axis] > max[axis] {
                    drone.velocity[axis] = -drone.velocity[axis];
                    position[axis] = position[axis].clamp(min[axis], max[axis]);
                }
            }
            self.scene.move_object(drone.key, Transform::from_position(position))?;
        }
        Ok(())
    }

    fn log_stats(&self, frame: u64) {
        let stats = self.scene.cache_stats();
        let visible = self.scene.visible().map_or(0, |set| set.len());
        log::info!(
            "frame {:>5}: {:>4} visible nodes, {:>4} cached, hit rate {:.2} ({} hits, {} misses, {} evictions), {} secondaries recorded, {} visibility passes",
            frame,
            visible,
            self.scene.cached_nodes(),
            stats.hit_rate(),
            stats.hits,
            stats.misses,
            stats.evictions,
            self.scene.secondaries_recorded(),
            self.scene.visibility_recomputations()
        );
    }
}

fn targets() -> SceneTargets {
    let extent = Extent2D::new(1280, 720);
    let pass = |render_pass: u64, framebuffer: u64, clear_values: Vec<ClearValue>| PassTarget {
        render_pass: RenderPassHandle(render_pass),
        framebuffer: FramebufferHandle(framebuffer),
        extent,
        clear_values,
    };
    let clear = vec![
        ClearValue::Color([0.02, 0.02, 0.05, 1.0]),
        ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
    ];
    SceneTargets {
        static_passes: (0..FRAME_SLOTS).map(|i| pass(1, 100 + i as u64, clear.clone())).collect(),
        dynamic_passes: (0..FRAME_SLOTS).map(|i| pass(2, 200 + i as u64, Vec::new())).collect(),
    }
}

fn load_config(path: &str) -> Result<SceneConfig, DemoError> {
    if Path::new(path).exists() {
        log::info!("Loading scene config from {}", path);
        Ok(SceneConfig::load_from_file(path)?)
    } else {
        log::warn!("{} not found, using the default scene config", path);
        Ok(SceneConfig::default())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map_or(DEFAULT_CONFIG, String::as_str);
    let frames = match args.get(2) {
        Some(text) => text.parse::<u64>().map_err(|_| DemoError::Frames(text.clone()))?,
        None => DEFAULT_FRAMES,
    };

    let config = load_config(config_path)?;
    let app = FlyThroughApp::new(config)?;
    app.run(frames)?;
    Ok(())
}
