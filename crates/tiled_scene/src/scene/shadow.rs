//! Shadow maps
//!
//! Every shadow casting light owns a depth target, a light-space
//! view-projection, the visible caster nodes of its frustum and a primary
//! command buffer holding its depth pass. The pass is only re-recorded when
//! the light moved or the casters changed, and at most once every
//! `skip_frames + 1` frames.

use serde::{Deserialize, Serialize};

use crate::foundation::math::{utils, Mat4, Mat4Ext};
use crate::render::{
    ClearValue, CommandBufferHandle, CommandBufferLevel, CommandBufferUsage, Extent2D, GpuBackend,
    ImageHandle, PassTarget, SamplerHandle, ShadowTarget, SubpassContents,
};
use crate::scene::catalog::ObjectCatalog;
use crate::scene::hooks::{DrawPass, RecordContext, SceneHooks, ShadowPassInfo};
use crate::scene::light::{Light, LightDirty, LightType, ShadowMapRecord};
use crate::scene::packer::{DynamicPack, InstanceDataPacker};
use crate::scene::tile::CategorySets;
use crate::scene::visibility::{compute_visible, visible_dynamic_objects, VisibilityFilter, VisibleSet};
use crate::scene::{CategoryId, SceneError, SceneResult};
use crate::spatial::{Frustum, AABB};

/// Shadow map parameters of a light
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSpec {
    /// Near plane of the light projection
    pub near: f32,
    /// Far plane of the light projection
    pub far: f32,
    /// Square shadow map resolution
    pub map_size: u32,
    /// Constant depth bias factor
    pub depth_bias_const: f32,
    /// Slope-scaled depth bias factor
    pub depth_bias_slope: f32,
    /// PCF kernel size (1 disables filtering)
    pub pcf_kernel_size: u32,
    /// Frames to skip between shadow map updates
    pub skip_frames: u32,
}

impl Default for ShadowSpec {
    fn default() -> Self {
        Self {
            near: 0.1,
            far: 100.0,
            map_size: 1024,
            depth_bias_const: 4.0,
            depth_bias_slope: 1.5,
            pcf_kernel_size: 1,
            skip_frames: 0,
        }
    }
}

impl ShadowSpec {
    /// Builder-style depth range
    pub fn with_range(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// Builder-style map resolution
    pub fn with_map_size(mut self, map_size: u32) -> Self {
        self.map_size = map_size;
        self
    }

    /// Builder-style depth bias
    pub fn with_depth_bias(mut self, constant: f32, slope: f32) -> Self {
        self.depth_bias_const = constant;
        self.depth_bias_slope = slope;
        self
    }

    /// Builder-style PCF kernel size
    pub fn with_pcf_kernel_size(mut self, size: u32) -> Self {
        self.pcf_kernel_size = size;
        self
    }

    /// Builder-style update interval
    pub fn with_skip_frames(mut self, frames: u32) -> Self {
        self.skip_frames = frames;
        self
    }

    /// Check the parameters
    pub fn validate(&self) -> SceneResult<()> {
        if self.near <= 0.0 {
            return Err(SceneError::InvalidShadowSpec(format!("near plane must be positive, got {}", self.near)));
        }
        if self.far <= self.near {
            return Err(SceneError::InvalidShadowSpec(format!(
                "far plane {} must be beyond near plane {}",
                self.far, self.near
            )));
        }
        if self.map_size == 0 {
            return Err(SceneError::InvalidShadowSpec("shadow map size must be non-zero".to_string()));
        }
        if self.pcf_kernel_size == 0 {
            return Err(SceneError::InvalidShadowSpec("PCF kernel size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Light view and projection for shadow rendering
///
/// Spotlights get a square perspective whose field of view is twice the
/// cutoff angle. Directional lights get an orthographic projection that
/// encloses `world` in light space. Point lights have no single projection.
pub fn light_space_matrices(light: &Light, spec: &ShadowSpec, world: &AABB) -> Option<(Mat4, Mat4)> {
    let view = *light.view_matrix();
    match light.light_type() {
        LightType::Spot => {
            let fov = utils::deg_to_rad(2.0 * light.cutoff_angle());
            Some((view, Mat4::perspective(fov, 1.0, spec.near, spec.far)))
        }
        LightType::Directional => {
            let to_clip_space = Mat4::vulkan_coordinate_transform() * view;
            let corners = world.corners().map(|corner| to_clip_space.transform_point(&corner.into()).coords);
            let bounds = AABB::from_points(corners)?;
            let projection = Mat4::orthographic(
                bounds.min.x,
                bounds.max.x,
                bounds.min.y,
                bounds.max.y,
                bounds.min.z,
                bounds.max.z,
            );
            Some((view, projection))
        }
        LightType::Point => None,
    }
}

/// Shadow resources and state of one light
#[derive(Debug)]
pub struct ShadowMap {
    light: usize,
    slot: usize,
    spec: ShadowSpec,
    target: ShadowTarget,
    view: Mat4,
    projection: Mat4,
    view_proj: Mat4,
    frustum: Frustum,
    visible: VisibleSet,
    layout_generation: Option<u64>,
    dynamic: DynamicPack,
    command_buffer: CommandBufferHandle,
    frames_since_render: u32,
    needs_record: bool,
}

impl ShadowMap {
    /// Index of the light
    pub fn light(&self) -> usize {
        self.light
    }

    /// Region of the dynamic caster buffer used by this light
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Parameters
    pub fn spec(&self) -> &ShadowSpec {
        &self.spec
    }

    /// Depth target
    pub fn target(&self) -> &ShadowTarget {
        &self.target
    }

    /// Depth image sampled by the main pass
    pub fn image(&self) -> ImageHandle {
        self.target.image
    }

    /// Comparison sampler
    pub fn sampler(&self) -> SamplerHandle {
        self.target.sampler
    }

    /// Light view matrix
    pub fn view(&self) -> &Mat4 {
        &self.view
    }

    /// Light projection matrix
    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    /// Light `P × X × V`
    pub fn view_proj(&self) -> &Mat4 {
        &self.view_proj
    }

    /// Light frustum
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Static caster nodes inside the light frustum
    pub fn visible(&self) -> &VisibleSet {
        &self.visible
    }

    /// Dynamic casters inside the light frustum
    pub fn dynamic(&self) -> &DynamicPack {
        &self.dynamic
    }

    /// Depth pass command buffer
    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    /// True when the depth pass must be recorded again
    pub fn needs_record(&self) -> bool {
        self.needs_record
    }

    /// GPU record
    pub fn record(&self) -> ShadowMapRecord {
        ShadowMapRecord {
            light_viewproj: utils::to_gpu_matrix(&self.view_proj),
            shadow_map_size: self.spec.map_size,
            pcf_kernel_size: self.spec.pcf_kernel_size,
            _pad: [0; 2],
        }
    }

    /// Parameters for recording code
    pub fn pass_info(&self) -> ShadowPassInfo {
        ShadowPassInfo {
            light: self.light,
            slot: self.slot,
            view_proj: self.view_proj,
            map_size: self.spec.map_size,
            pcf_kernel_size: self.spec.pcf_kernel_size,
        }
    }

    fn update_matrices(&mut self, light: &Light, world: &AABB) {
        if let Some((view, projection)) = light_space_matrices(light, &self.spec, world) {
            self.view = view;
            self.projection = projection;
            self.view_proj = projection * Mat4::vulkan_coordinate_transform() * view;
            self.frustum = Frustum::from_matrix(&self.view_proj);
        }
    }

    /// Record the depth pass
    pub fn record_commands(
        &self,
        backend: &dyn GpuBackend,
        hooks: &dyn SceneHooks,
        ctx: &RecordContext,
        order: &[CategoryId],
    ) -> SceneResult<()> {
        let cmd = self.command_buffer;
        let extent = Extent2D::square(self.spec.map_size);
        let target = PassTarget {
            render_pass: self.target.render_pass,
            framebuffer: self.target.framebuffer,
            extent,
            clear_values: vec![ClearValue::DepthStencil { depth: 1.0, stencil: 0 }],
        };

        backend.begin_command_buffer(cmd, CommandBufferUsage::empty(), None)?;
        backend.cmd_begin_render_pass(cmd, &target, SubpassContents::Inline);
        backend.cmd_set_viewport(cmd, extent);
        backend.cmd_set_scissor(cmd, extent);
        backend.cmd_set_depth_bias(cmd, self.spec.depth_bias_const, 0.0, self.spec.depth_bias_slope);

        for node in self.visible.nodes() {
            let sets = node.category_sets(order);
            if !sets.is_empty() {
                hooks.record_commands(ctx, backend, cmd, &sets, DrawPass::Shadow { light: self.light, dynamic: false });
            }
        }

        let dynamic_sets = CategorySets::from_indexed(&self.dynamic.sets, order);
        if !dynamic_sets.is_empty() {
            hooks.record_commands(ctx, backend, cmd, &dynamic_sets, DrawPass::Shadow { light: self.light, dynamic: true });
        }

        backend.cmd_end_render_pass(cmd);
        backend.end_command_buffer(cmd)?;
        Ok(())
    }
}

/// Shadow maps of every shadow casting light
#[derive(Debug, Default)]
pub struct ShadowManager {
    maps: Vec<ShadowMap>,
}

impl ShadowManager {
    /// Create a manager without shadow maps
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate shadow resources for light `light_index`
    pub fn add(
        &mut self,
        backend: &dyn GpuBackend,
        light_index: usize,
        light: &Light,
        spec: ShadowSpec,
        world: &AABB,
    ) -> SceneResult<()> {
        spec.validate()?;
        if light.light_type() == LightType::Point {
            log::error!("Light {} is a point light and cannot cast shadows", light_index);
            return Err(SceneError::UnsupportedShadowLight(light_index));
        }

        let target = backend.create_shadow_target(spec.map_size)?;
        let allocated = backend
            .allocate_command_buffers(0, CommandBufferLevel::Primary, 1)
            .map_err(SceneError::from)
            .and_then(|buffers| {
                buffers.into_iter().next().ok_or_else(|| SceneError::InvalidOperation {
                    reason: "backend returned no shadow command buffer".to_string(),
                })
            });
        let command_buffer = match allocated {
            Ok(cmd) => cmd,
            Err(err) => {
                backend.destroy_shadow_target(&target);
                return Err(err);
            }
        };

        let mut map = ShadowMap {
            light: light_index,
            slot: self.maps.len(),
            spec,
            target,
            view: Mat4::identity(),
            projection: Mat4::identity(),
            view_proj: Mat4::identity(),
            frustum: Frustum::from_matrix(&Mat4::identity()),
            visible: VisibleSet::default(),
            layout_generation: None,
            dynamic: DynamicPack::default(),
            command_buffer,
            frames_since_render: 0,
            needs_record: true,
        };
        map.update_matrices(light, world);
        log::debug!(
            "Shadow map for light {} ({:?}): {}x{}",
            light_index,
            light.light_type(),
            spec.map_size,
            spec.map_size
        );
        self.maps.push(map);
        Ok(())
    }

    /// Shadow maps in creation order
    pub fn maps(&self) -> &[ShadowMap] {
        &self.maps
    }

    /// Shadow map of light `light_index`
    pub fn map_for_light(&self, light_index: usize) -> Option<&ShadowMap> {
        self.maps.iter().find(|map| map.light == light_index)
    }

    /// Number of shadow maps
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// True when no light casts shadows
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Parameters of every shadow map, for the record context
    pub fn pass_infos(&self) -> Vec<ShadowPassInfo> {
        self.maps.iter().map(ShadowMap::pass_info).collect()
    }

    /// Refresh matrices, caster sets and dynamic caster packs
    ///
    /// Clears the shadow dirty bits of the lights it consumed. Returns the
    /// slots whose dynamic caster records were repacked and need uploading.
    pub fn update(
        &mut self,
        lights: &mut [Light],
        world: &AABB,
        catalog: &ObjectCatalog,
        dynamic_changed: bool,
        packer: &mut InstanceDataPacker,
    ) -> Vec<usize> {
        let mut repacked = Vec::new();
        for map in &mut self.maps {
            let Some(light) = lights.get_mut(map.light) else {
                continue;
            };

            let moved = light.dirty().intersects(LightDirty::DIRTY_SHADOWS | LightDirty::DIRTY_VIEW);
            if moved {
                map.update_matrices(light, world);
                light.clear_dirty(LightDirty::DIRTY_SHADOWS | LightDirty::DIRTY_VIEW);
                map.needs_record = true;
            }

            if moved || map.layout_generation != Some(catalog.layout_generation()) {
                map.visible = compute_visible(&map.frustum, catalog, VisibilityFilter::ShadowCasters);
                map.layout_generation = Some(catalog.layout_generation());
                map.needs_record = true;
            }

            if moved || dynamic_changed {
                let casters = visible_dynamic_objects(&map.frustum, catalog, true);
                if !(casters.is_empty() && map.dynamic.is_empty()) {
                    map.needs_record = true;
                }
                map.dynamic = packer.pack_dynamic_casters(map.slot, catalog, &casters);
                repacked.push(map.slot);
            }
        }
        repacked
    }

    /// Shadow maps to render this frame
    ///
    /// A map with pending changes renders once `skip_frames` frames passed
    /// since its last render.
    pub fn due(&mut self) -> Vec<usize> {
        let mut due = Vec::new();
        for (index, map) in self.maps.iter_mut().enumerate() {
            if map.needs_record && map.frames_since_render >= map.spec.skip_frames {
                due.push(index);
            } else {
                map.frames_since_render = map.frames_since_render.saturating_add(1);
            }
        }
        due
    }

    /// Record the depth pass of map `index`
    pub fn record(
        &mut self,
        index: usize,
        backend: &dyn GpuBackend,
        hooks: &dyn SceneHooks,
        ctx: &RecordContext,
        order: &[CategoryId],
    ) -> SceneResult<CommandBufferHandle> {
        let map = self
            .maps
            .get_mut(index)
            .ok_or_else(|| SceneError::InvalidOperation { reason: format!("no shadow map {}", index) })?;
        map.record_commands(backend, hooks, ctx, order)?;
        map.needs_record = false;
        map.frames_since_render = 0;
        log::trace!("Recorded shadow pass of light {}", map.light);
        Ok(map.command_buffer)
    }

    /// Release GPU resources
    pub fn destroy(&mut self, backend: &dyn GpuBackend) {
        for map in self.maps.drain(..) {
            backend.free_command_buffers(0, &[map.command_buffer]);
            backend.destroy_shadow_target(&map.target);
        }
    }
}
