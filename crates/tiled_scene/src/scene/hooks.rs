//! Host integration
//!
//! The scene decides *what* is visible and *where* its instance data lives;
//! the host decides *how* it is drawn. [`SceneHooks`] is the host side of that
//! contract. Hosts that draw each category with a fixed set of meshes can
//! use [`DrawHandlerTable`] instead of writing the hooks by hand.

use std::sync::Arc;

use crate::foundation::math::{utils, Mat4, Vec3};
use crate::render::{
    BufferHandle, CommandBufferHandle, DescriptorSetHandle, Extent2D, GpuBackend, IndexType,
    PipelineHandle, PipelineLayoutHandle, SemaphoreHandle, ShaderStages,
};
use crate::scene::light::LightBufferLayout;
use crate::scene::tile::{CategorySets, VisibleSetInfo};
use crate::scene::CategoryId;

/// Which pass a batch of draws belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPass {
    /// Static instances, recorded into per-node secondary buffers
    Static,
    /// Dynamic instances, recorded inline every dirty frame
    Dynamic,
    /// Depth-only pass of a shadow casting light
    Shadow {
        /// Light index
        light: usize,
        /// Dynamic casters rather than static ones
        dynamic: bool,
    },
}

/// Shadow parameters of one light, as seen by recording code
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowPassInfo {
    /// Light index
    pub light: usize,
    /// Region of the dynamic caster buffer holding this light's casters
    pub slot: usize,
    /// Light-space view-projection
    pub view_proj: Mat4,
    /// Shadow map resolution
    pub map_size: u32,
    /// PCF kernel size
    pub pcf_kernel_size: u32,
}

/// Per-frame snapshot handed to recording code
///
/// Immutable once built; recording jobs share it through an `Arc`.
#[derive(Debug, Clone)]
pub struct RecordContext {
    /// Frame counter
    pub frame: u64,
    /// Color pass render area
    pub extent: Extent2D,
    /// Static instance records
    pub static_instances: BufferHandle,
    /// Static shadow caster records
    pub static_casters: BufferHandle,
    /// Dynamic instance records
    pub dynamic_instances: BufferHandle,
    /// Dynamic shadow caster records, one region per light
    pub dynamic_casters: BufferHandle,
    /// Bytes per light region of `dynamic_casters`
    pub dynamic_caster_region: u64,
    /// Material table
    pub materials: BufferHandle,
    /// Light and shadow map records
    pub lights: BufferHandle,
    /// Layout of `lights`
    pub light_layout: LightBufferLayout,
    /// Camera `P × X × V`
    pub camera_view_proj: Mat4,
    /// Camera position
    pub camera_position: Vec3,
    /// Shadow casting lights
    pub shadows: Vec<ShadowPassInfo>,
}

impl RecordContext {
    /// Shadow parameters of light `light`
    pub fn shadow(&self, light: usize) -> Option<&ShadowPassInfo> {
        self.shadows.iter().find(|info| info.light == light)
    }
}

/// Host callbacks invoked by the scene
pub trait SceneHooks: Send + Sync {
    /// Record per-frame buffer updates into `cmd`
    ///
    /// Returns `true` when something was recorded.
    fn update_resources(&self, _ctx: &RecordContext, _backend: &dyn GpuBackend, _cmd: CommandBufferHandle) -> bool {
        false
    }

    /// Record draws for `sets` into `cmd`
    ///
    /// Called from worker threads for static nodes.
    fn record_commands(
        &self,
        ctx: &RecordContext,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
        sets: &CategorySets,
        pass: DrawPass,
    );

    /// Submit an extra pass that waits on `wait` and signals `signal`
    ///
    /// Returns `true` when a pass was submitted.
    fn postprocess(
        &self,
        _ctx: &RecordContext,
        _backend: &dyn GpuBackend,
        _wait: SemaphoreHandle,
        _signal: SemaphoreHandle,
    ) -> bool {
        false
    }
}

/// Draws the instances of one category
pub trait CategoryDrawer: Send + Sync {
    /// Pipeline for `pass`; `None` skips the category in that pass
    fn pipeline(&self, pass: DrawPass) -> Option<PipelineHandle>;

    /// Record draws for `info` (pipeline already bound)
    fn draw(
        &self,
        ctx: &RecordContext,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
        info: VisibleSetInfo,
        pass: DrawPass,
    );
}

/// Vertex and index ranges of one mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBinding {
    /// Vertex buffer
    pub vertex_buffer: BufferHandle,
    /// Byte offset into the vertex buffer
    pub vertex_buffer_offset: u64,
    /// Index buffer
    pub index_buffer: BufferHandle,
    /// Byte offset into the index buffer
    pub index_buffer_offset: u64,
    /// Index element type
    pub index_type: IndexType,
    /// Indices per instance
    pub index_count: u32,
    /// First index
    pub first_index: u32,
    /// Added to every index
    pub vertex_offset: i32,
}

/// Instanced mesh drawer
///
/// Draws every mesh once per range with `first_instance = start_index` and
/// `instance_count = count`. Shadow passes push the light's view-projection
/// as a 64-byte vertex push constant.
#[derive(Debug, Clone)]
pub struct MeshDrawer {
    /// Color pass pipeline
    pub pipeline: PipelineHandle,
    /// Depth-only pipeline, `None` when the category casts no shadows
    pub shadow_pipeline: Option<PipelineHandle>,
    /// Layout shared by both pipelines
    pub layout: PipelineLayoutHandle,
    /// Sets bound from set 0
    pub descriptor_sets: Vec<DescriptorSetHandle>,
    /// Meshes drawn per instance
    pub meshes: Vec<MeshBinding>,
}

impl CategoryDrawer for MeshDrawer {
    fn pipeline(&self, pass: DrawPass) -> Option<PipelineHandle> {
        match pass {
            DrawPass::Static | DrawPass::Dynamic => Some(self.pipeline),
            DrawPass::Shadow { .. } => self.shadow_pipeline,
        }
    }

    fn draw(
        &self,
        ctx: &RecordContext,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
        info: VisibleSetInfo,
        pass: DrawPass,
    ) {
        if !self.descriptor_sets.is_empty() {
            backend.cmd_bind_descriptor_sets(cmd, self.layout, 0, &self.descriptor_sets);
        }
        if let DrawPass::Shadow { light, .. } = pass {
            if let Some(shadow) = ctx.shadow(light) {
                let matrix = utils::to_gpu_matrix(&shadow.view_proj);
                backend.cmd_push_constants(cmd, self.layout, ShaderStages::VERTEX, 0, bytemuck::bytes_of(&matrix));
            }
        }

        for mesh in &self.meshes {
            backend.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer], &[mesh.vertex_buffer_offset]);
            backend.cmd_bind_index_buffer(cmd, mesh.index_buffer, mesh.index_buffer_offset, mesh.index_type);
            backend.cmd_draw_indexed(
                cmd,
                mesh.index_count,
                info.count,
                mesh.first_index,
                mesh.vertex_offset,
                info.start_index,
            );
        }
    }
}

/// Category id to drawer table
///
/// Implements [`SceneHooks::record_commands`] by dispatching each category to
/// its drawer in draw order, binding a pipeline only when it changes.
#[derive(Default, Clone)]
pub struct DrawHandlerTable {
    handlers: Vec<Option<Arc<dyn CategoryDrawer>>>,
}

impl DrawHandlerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the drawer of `category`, replacing any previous one
    pub fn register(&mut self, category: CategoryId, drawer: Arc<dyn CategoryDrawer>) {
        let index = category.index();
        if self.handlers.len() <= index {
            self.handlers.resize_with(index + 1, || None);
        }
        self.handlers[index] = Some(drawer);
    }

    /// Drawer of `category`
    pub fn get(&self, category: CategoryId) -> Option<&Arc<dyn CategoryDrawer>> {
        self.handlers.get(category.index()).and_then(Option::as_ref)
    }

    /// Record every category of `sets`; returns the number of categories drawn
    pub fn record(
        &self,
        ctx: &RecordContext,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
        sets: &CategorySets,
        pass: DrawPass,
    ) -> usize {
        let mut bound: Option<PipelineHandle> = None;
        let mut drawn = 0;
        for (category, info) in sets.iter() {
            let Some(drawer) = self.get(category) else {
                log::warn!("No drawer registered for {:?}", category);
                continue;
            };
            let Some(pipeline) = drawer.pipeline(pass) else {
                continue;
            };
            if bound != Some(pipeline) {
                backend.cmd_bind_pipeline(cmd, pipeline);
                bound = Some(pipeline);
            }
            drawer.draw(ctx, backend, cmd, info, pass);
            drawn += 1;
        }
        drawn
    }
}

impl SceneHooks for DrawHandlerTable {
    fn record_commands(
        &self,
        ctx: &RecordContext,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
        sets: &CategorySets,
        pass: DrawPass,
    ) {
        self.record(ctx, backend, cmd, sets, pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::{HeadlessBackend, RecordedCommand};
    use crate::render::{CommandBufferLevel, CommandBufferUsage, DeviceLimits};

    fn context() -> RecordContext {
        RecordContext {
            frame: 0,
            extent: Extent2D::new(64, 64),
            static_instances: BufferHandle(1),
            static_casters: BufferHandle(2),
            dynamic_instances: BufferHandle(3),
            dynamic_casters: BufferHandle(4),
            dynamic_caster_region: 0,
            materials: BufferHandle(5),
            lights: BufferHandle(6),
            light_layout: LightBufferLayout::new(1, &DeviceLimits::default()),
            camera_view_proj: Mat4::identity(),
            camera_position: Vec3::zeros(),
            shadows: vec![ShadowPassInfo {
                light: 0,
                slot: 0,
                view_proj: Mat4::identity(),
                map_size: 512,
                pcf_kernel_size: 1,
            }],
        }
    }

    fn drawer(pipeline: u64, shadow: Option<u64>) -> Arc<dyn CategoryDrawer> {
        Arc::new(MeshDrawer {
            pipeline: PipelineHandle(pipeline),
            shadow_pipeline: shadow.map(PipelineHandle),
            layout: PipelineLayoutHandle(7),
            descriptor_sets: vec![DescriptorSetHandle(8)],
            meshes: vec![MeshBinding {
                vertex_buffer: BufferHandle(20),
                vertex_buffer_offset: 0,
                index_buffer: BufferHandle(21),
                index_buffer_offset: 0,
                index_type: IndexType::U32,
                index_count: 36,
                first_index: 0,
                vertex_offset: 0,
            }],
        })
    }

    fn recorded(table: &DrawHandlerTable, sets: &CategorySets, pass: DrawPass) -> Vec<RecordedCommand> {
        let backend = HeadlessBackend::new(1);
        let cmd = backend.allocate_command_buffers(0, CommandBufferLevel::Primary, 1).unwrap()[0];
        backend.begin_command_buffer(cmd, CommandBufferUsage::empty(), None).unwrap();
        table.record(&context(), &backend, cmd, sets, pass);
        backend.end_command_buffer(cmd).unwrap();
        assert!(backend.violations().is_empty());
        backend.commands(cmd)
    }

    #[test]
    fn test_instanced_draw_uses_range() {
        let mut table = DrawHandlerTable::new();
        table.register(CategoryId(0), drawer(1, None));
        let sets = CategorySets::from_indexed(&[VisibleSetInfo::new(12, 5)], &[CategoryId(0)]);

        let commands = recorded(&table, &sets, DrawPass::Static);
        assert!(commands.contains(&RecordedCommand::DrawIndexed {
            index_count: 36,
            instance_count: 5,
            first_index: 0,
            vertex_offset: 0,
            first_instance: 12,
        }));
    }

    #[test]
    fn test_shared_pipeline_bound_once() {
        let mut table = DrawHandlerTable::new();
        table.register(CategoryId(0), drawer(1, None));
        table.register(CategoryId(1), drawer(1, None));
        table.register(CategoryId(2), drawer(2, None));
        let ranges = [VisibleSetInfo::new(0, 1), VisibleSetInfo::new(1, 1), VisibleSetInfo::new(2, 1)];
        let sets = CategorySets::from_indexed(&ranges, &[CategoryId(0), CategoryId(1), CategoryId(2)]);

        let binds: Vec<_> = recorded(&table, &sets, DrawPass::Dynamic)
            .into_iter()
            .filter(|c| matches!(c, RecordedCommand::BindPipeline(_)))
            .collect();
        assert_eq!(binds, vec![
            RecordedCommand::BindPipeline(PipelineHandle(1)),
            RecordedCommand::BindPipeline(PipelineHandle(2)),
        ]);
    }

    #[test]
    fn test_shadow_pass_pushes_light_matrix() {
        let mut table = DrawHandlerTable::new();
        table.register(CategoryId(0), drawer(1, Some(9)));
        table.register(CategoryId(1), drawer(2, None));
        let ranges = [VisibleSetInfo::new(0, 2), VisibleSetInfo::new(2, 2)];
        let sets = CategorySets::from_indexed(&ranges, &[CategoryId(0), CategoryId(1)]);

        let commands = recorded(&table, &sets, DrawPass::Shadow { light: 0, dynamic: false });
        assert_eq!(commands[0], RecordedCommand::BindPipeline(PipelineHandle(9)));
        let pushes: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::PushConstants { data, .. } => Some(data.len()),
                _ => None,
            })
            .collect();
        assert_eq!(pushes, vec![64]);
        let draws = commands.iter().filter(|c| matches!(c, RecordedCommand::DrawIndexed { .. })).count();
        assert_eq!(draws, 1);
    }
}
