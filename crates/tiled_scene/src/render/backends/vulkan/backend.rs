//! `GpuBackend` over an `ash` device

use std::collections::HashMap;
use std::sync::Mutex;

use ash::vk::Handle;
use ash::{vk, Device, Instance};

use super::memory::{DeviceImage, MappedBuffer};
use super::{VulkanError, VulkanResult};
use crate::render::{
    BufferHandle, BufferUsage, ClearValue, CommandBufferHandle, CommandBufferLevel, CommandBufferUsage,
    DescriptorSetHandle, DeviceLimits, Extent2D, FenceHandle, FenceStatus, FramebufferHandle, GpuBackend,
    ImageHandle, IndexType, Inheritance, PassTarget, PipelineHandle, PipelineLayoutHandle, PipelineStages,
    RenderError, RenderPassHandle, RenderResult, SamplerHandle, SemaphoreHandle, ShaderStages, ShadowTarget,
    Submission, SubpassContents,
};

const SHADOW_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Device objects created by the host application
///
/// The host keeps ownership: the backend never destroys the device or instance.
#[derive(Clone)]
pub struct VulkanDevice {
    /// Instance the device was created from
    pub instance: Instance,
    /// Logical device
    pub device: Device,
    /// Physical device backing `device`
    pub physical_device: vk::PhysicalDevice,
    /// Queue all scene work is submitted to
    pub graphics_queue: vk::Queue,
    /// Family of `graphics_queue`
    pub graphics_family: u32,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("device", &self.device.handle())
            .field("physical_device", &self.physical_device)
            .field("graphics_queue", &self.graphics_queue)
            .field("graphics_family", &self.graphics_family)
            .finish()
    }
}

/// Resources behind one shadow target
#[derive(Debug, Clone, Copy)]
struct ShadowResources {
    image: DeviceImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
}

/// Vulkan implementation of [`GpuBackend`]
pub struct VulkanBackend {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: DeviceLimits,
    queue: Mutex<vk::Queue>,
    command_pools: Vec<Mutex<vk::CommandPool>>,
    buffers: Mutex<HashMap<u64, MappedBuffer>>,
    shadow_targets: Mutex<HashMap<u64, ShadowResources>>,
}

impl VulkanBackend {
    /// Create the backend with `command_pools` resettable pools on the graphics family
    pub fn new(context: &VulkanDevice, command_pools: usize) -> VulkanResult<Self> {
        if command_pools == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "at least one command pool is required".to_string(),
            });
        }

        let memory_properties =
            unsafe { context.instance.get_physical_device_memory_properties(context.physical_device) };
        let properties = unsafe { context.instance.get_physical_device_properties(context.physical_device) };
        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: properties.limits.min_uniform_buffer_offset_alignment.max(1),
            max_uniform_buffer_range: u64::from(properties.limits.max_uniform_buffer_range),
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.graphics_family);

        let mut pools = Vec::with_capacity(command_pools);
        for _ in 0..command_pools {
            match unsafe { context.device.create_command_pool(&pool_info, None) } {
                Ok(pool) => pools.push(Mutex::new(pool)),
                Err(err) => {
                    for pool in pools {
                        if let Ok(pool) = pool.into_inner() {
                            unsafe { context.device.destroy_command_pool(pool, None) };
                        }
                    }
                    return Err(VulkanError::Api(err));
                }
            }
        }

        log::info!(
            "Vulkan scene backend ready: {} command pools, uniform alignment {}",
            command_pools,
            limits.min_uniform_buffer_offset_alignment
        );

        Ok(Self {
            device: context.device.clone(),
            memory_properties,
            limits,
            queue: Mutex::new(context.graphics_queue),
            command_pools: pools,
            buffers: Mutex::new(HashMap::new()),
            shadow_targets: Mutex::new(HashMap::new()),
        })
    }

    /// Native buffer behind a scene handle, for binding in host descriptor sets
    pub fn buffer(&self, handle: BufferHandle) -> Option<vk::Buffer> {
        let buffers = self.buffers.lock().ok()?;
        buffers.get(&handle.0).map(|buffer| buffer.buffer)
    }

    /// Native image view behind a shadow target, for binding in host descriptor sets
    pub fn shadow_view(&self, image: ImageHandle) -> Option<vk::ImageView> {
        let targets = self.shadow_targets.lock().ok()?;
        targets.get(&image.0).map(|target| target.view)
    }

    fn pool(&self, index: usize) -> RenderResult<&Mutex<vk::CommandPool>> {
        self.command_pools
            .get(index)
            .ok_or(RenderError::InvalidHandle { kind: "command pool", id: index as u64 })
    }

    fn create_shadow_resources(&self, size: u32) -> VulkanResult<ShadowResources> {
        let image = DeviceImage::new(
            &self.device,
            &self.memory_properties,
            size,
            SHADOW_DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )?;

        let mut resources = ShadowResources {
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
        };
        match self.fill_shadow_resources(&mut resources, size) {
            Ok(()) => Ok(resources),
            Err(err) => {
                self.destroy_shadow_resources(resources);
                Err(err)
            }
        }
    }

    fn fill_shadow_resources(&self, resources: &mut ShadowResources, size: u32) -> VulkanResult<()> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(resources.image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(SHADOW_DEPTH_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        resources.view = unsafe { self.device.create_image_view(&view_info, None).map_err(VulkanError::Api)? };

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .compare_enable(true)
            .compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .min_lod(0.0)
            .max_lod(1.0);
        resources.sampler = unsafe { self.device.create_sampler(&sampler_info, None).map_err(VulkanError::Api)? };

        let attachments = [vk::AttachmentDescription::builder()
            .format(SHADOW_DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
            .build()];
        let depth_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .depth_stencil_attachment(&depth_ref)
            .build()];
        let dependencies = [
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                src_access_mask: vk::AccessFlags::SHADER_READ,
                dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ];
        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        resources.render_pass =
            unsafe { self.device.create_render_pass(&render_pass_info, None).map_err(VulkanError::Api)? };

        let views = [resources.view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(resources.render_pass)
            .attachments(&views)
            .width(size)
            .height(size)
            .layers(1);
        resources.framebuffer =
            unsafe { self.device.create_framebuffer(&framebuffer_info, None).map_err(VulkanError::Api)? };
        Ok(())
    }

    fn destroy_shadow_resources(&self, resources: ShadowResources) {
        unsafe {
            if resources.framebuffer != vk::Framebuffer::null() {
                self.device.destroy_framebuffer(resources.framebuffer, None);
            }
            if resources.render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(resources.render_pass, None);
            }
            if resources.sampler != vk::Sampler::null() {
                self.device.destroy_sampler(resources.sampler, None);
            }
            if resources.view != vk::ImageView::null() {
                self.device.destroy_image_view(resources.view, None);
            }
        }
        resources.image.destroy(&self.device);
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("device", &self.device.handle())
            .field("limits", &self.limits)
            .field("command_pools", &self.command_pools.len())
            .finish_non_exhaustive()
    }
}

fn poisoned<T>(_: T) -> RenderError {
    RenderError::BackendError("backend lock poisoned".to_string())
}

fn cmd(handle: CommandBufferHandle) -> vk::CommandBuffer {
    vk::CommandBuffer::from_raw(handle.0)
}

fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

fn pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    const MAPPING: [(PipelineStages, vk::PipelineStageFlags); 8] = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStages::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (PipelineStages::EARLY_FRAGMENT_TESTS, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS),
        (PipelineStages::LATE_FRAGMENT_TESTS, vk::PipelineStageFlags::LATE_FRAGMENT_TESTS),
        (PipelineStages::COLOR_ATTACHMENT_OUTPUT, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
    ];
    MAPPING
        .iter()
        .filter(|(ours, _)| stages.contains(*ours))
        .fold(vk::PipelineStageFlags::empty(), |acc, (_, theirs)| acc | *theirs)
}

fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    flags
}

fn command_buffer_usage(usage: CommandBufferUsage) -> vk::CommandBufferUsageFlags {
    let mut flags = vk::CommandBufferUsageFlags::empty();
    if usage.contains(CommandBufferUsage::ONE_TIME_SUBMIT) {
        flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
    }
    if usage.contains(CommandBufferUsage::RENDER_PASS_CONTINUE) {
        flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
    }
    if usage.contains(CommandBufferUsage::SIMULTANEOUS_USE) {
        flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
    }
    flags
}

fn clear_value(value: &ClearValue) -> vk::ClearValue {
    match *value {
        ClearValue::Color(float32) => vk::ClearValue { color: vk::ClearColorValue { float32 } },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

fn full_rect(extent: Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D { width: extent.width, height: extent.height },
    }
}

impl GpuBackend for VulkanBackend {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn command_pool_count(&self) -> usize {
        self.command_pools.len()
    }

    fn create_buffer(&self, size: u64, usage: BufferUsage) -> RenderResult<BufferHandle> {
        let buffer = MappedBuffer::new(&self.device, &self.memory_properties, size.max(4), buffer_usage(usage))?;
        let handle = BufferHandle(buffer.buffer.as_raw());
        self.buffers.lock().map_err(poisoned)?.insert(handle.0, buffer);
        Ok(handle)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let buffers = self.buffers.lock().map_err(poisoned)?;
        let target = buffers.get(&buffer.0).ok_or(VulkanError::ResourceNotFound { id: buffer.0 })?;
        target.write(offset, data)?;
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let removed = match self.buffers.lock() {
            Ok(mut buffers) => buffers.remove(&buffer.0),
            Err(_) => None,
        };
        match removed {
            Some(mapped) => mapped.destroy(&self.device),
            None => log::warn!("Destroy of unknown buffer {:#x}", buffer.0),
        }
    }

    fn create_shadow_target(&self, size: u32) -> RenderResult<ShadowTarget> {
        let resources = self.create_shadow_resources(size)?;
        let target = ShadowTarget {
            image: ImageHandle(resources.image.image.as_raw()),
            sampler: SamplerHandle(resources.sampler.as_raw()),
            render_pass: RenderPassHandle(resources.render_pass.as_raw()),
            framebuffer: FramebufferHandle(resources.framebuffer.as_raw()),
            size,
        };
        match self.shadow_targets.lock() {
            Ok(mut targets) => {
                targets.insert(target.image.0, resources);
                Ok(target)
            }
            Err(err) => {
                self.destroy_shadow_resources(resources);
                Err(poisoned(err))
            }
        }
    }

    fn destroy_shadow_target(&self, target: &ShadowTarget) {
        let removed = match self.shadow_targets.lock() {
            Ok(mut targets) => targets.remove(&target.image.0),
            Err(_) => None,
        };
        match removed {
            Some(resources) => self.destroy_shadow_resources(resources),
            None => log::warn!("Destroy of unknown shadow target {:#x}", target.image.0),
        }
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle> {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&info, None).map_err(VulkanError::Api)? };
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe { self.device.destroy_semaphore(vk::Semaphore::from_raw(semaphore.0), None) };
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.device.create_fence(&info, None).map_err(VulkanError::Api)? };
        Ok(FenceHandle(fence.as_raw()))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe { self.device.destroy_fence(vk::Fence::from_raw(fence.0), None) };
    }

    fn wait_fence(&self, fence: FenceHandle, timeout_ns: u64) -> RenderResult<FenceStatus> {
        let fences = [vk::Fence::from_raw(fence.0)];
        match unsafe { self.device.wait_for_fences(&fences, true, timeout_ns) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::NotReady),
            Err(err) => Err(VulkanError::Api(err).into()),
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> RenderResult<()> {
        let fences = [vk::Fence::from_raw(fence.0)];
        unsafe { self.device.reset_fences(&fences).map_err(VulkanError::Api)? };
        Ok(())
    }

    fn allocate_command_buffers(
        &self,
        pool: usize,
        level: CommandBufferLevel,
        count: u32,
    ) -> RenderResult<Vec<CommandBufferHandle>> {
        let pool = self.pool(pool)?.lock().map_err(poisoned)?;
        let level = match level {
            CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
            CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
        };
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(level)
            .command_buffer_count(count);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api)? };
        Ok(buffers.into_iter().map(|b| CommandBufferHandle(b.as_raw())).collect())
    }

    fn free_command_buffers(&self, pool: usize, buffers: &[CommandBufferHandle]) {
        if buffers.is_empty() {
            return;
        }
        let Ok(pool) = self.pool(pool) else {
            log::warn!("Free from unknown command pool {}", pool);
            return;
        };
        let Ok(pool) = pool.lock() else {
            return;
        };
        let native: Vec<_> = buffers.iter().map(|b| cmd(*b)).collect();
        unsafe { self.device.free_command_buffers(*pool, &native) };
    }

    fn begin_command_buffer(
        &self,
        handle: CommandBufferHandle,
        usage: CommandBufferUsage,
        inheritance: Option<&Inheritance>,
    ) -> RenderResult<()> {
        let inheritance_info = inheritance.map(|inheritance| {
            vk::CommandBufferInheritanceInfo::builder()
                .render_pass(vk::RenderPass::from_raw(inheritance.render_pass.0))
                .subpass(inheritance.subpass)
                .framebuffer(
                    inheritance
                        .framebuffer
                        .map_or(vk::Framebuffer::null(), |fb| vk::Framebuffer::from_raw(fb.0)),
                )
                .build()
        });
        let mut begin_info = vk::CommandBufferBeginInfo::builder().flags(command_buffer_usage(usage));
        if let Some(info) = inheritance_info.as_ref() {
            begin_info = begin_info.inheritance_info(info);
        }
        unsafe {
            self.device
                .begin_command_buffer(cmd(handle), &begin_info)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn end_command_buffer(&self, handle: CommandBufferHandle) -> RenderResult<()> {
        unsafe { self.device.end_command_buffer(cmd(handle)).map_err(VulkanError::Api)? };
        Ok(())
    }

    fn cmd_begin_render_pass(&self, handle: CommandBufferHandle, target: &PassTarget, contents: SubpassContents) {
        let clear_values: Vec<_> = target.clear_values.iter().map(clear_value).collect();
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(vk::RenderPass::from_raw(target.render_pass.0))
            .framebuffer(vk::Framebuffer::from_raw(target.framebuffer.0))
            .render_area(full_rect(target.extent))
            .clear_values(&clear_values);
        let contents = match contents {
            SubpassContents::Inline => vk::SubpassContents::INLINE,
            SubpassContents::SecondaryCommandBuffers => vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
        };
        unsafe { self.device.cmd_begin_render_pass(cmd(handle), &begin_info, contents) };
    }

    fn cmd_end_render_pass(&self, handle: CommandBufferHandle) {
        unsafe { self.device.cmd_end_render_pass(cmd(handle)) };
    }

    fn cmd_set_viewport(&self, handle: CommandBufferHandle, extent: Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe { self.device.cmd_set_viewport(cmd(handle), 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, handle: CommandBufferHandle, extent: Extent2D) {
        unsafe { self.device.cmd_set_scissor(cmd(handle), 0, &[full_rect(extent)]) };
    }

    fn cmd_set_depth_bias(&self, handle: CommandBufferHandle, constant: f32, clamp: f32, slope: f32) {
        unsafe { self.device.cmd_set_depth_bias(cmd(handle), constant, clamp, slope) };
    }

    fn cmd_bind_pipeline(&self, handle: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device.cmd_bind_pipeline(
                cmd(handle),
                vk::PipelineBindPoint::GRAPHICS,
                vk::Pipeline::from_raw(pipeline.0),
            );
        }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        handle: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        let native: Vec<_> = sets.iter().map(|s| vk::DescriptorSet::from_raw(s.0)).collect();
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd(handle),
                vk::PipelineBindPoint::GRAPHICS,
                vk::PipelineLayout::from_raw(layout.0),
                first_set,
                &native,
                &[],
            );
        }
    }

    fn cmd_bind_vertex_buffers(
        &self,
        handle: CommandBufferHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
        offsets: &[u64],
    ) {
        let native: Vec<_> = buffers.iter().map(|b| vk::Buffer::from_raw(b.0)).collect();
        unsafe { self.device.cmd_bind_vertex_buffers(cmd(handle), first_binding, &native, offsets) };
    }

    fn cmd_bind_index_buffer(&self, handle: CommandBufferHandle, buffer: BufferHandle, offset: u64, index_type: IndexType) {
        let index_type = match index_type {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        };
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd(handle), vk::Buffer::from_raw(buffer.0), offset, index_type);
        }
    }

    fn cmd_push_constants(
        &self,
        handle: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(
                cmd(handle),
                vk::PipelineLayout::from_raw(layout.0),
                shader_stages(stages),
                offset,
                data,
            );
        }
    }

    fn cmd_draw_indexed(
        &self,
        handle: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd(handle),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn cmd_draw(&self, handle: CommandBufferHandle, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .cmd_draw(cmd(handle), vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    fn cmd_update_buffer(&self, handle: CommandBufferHandle, buffer: BufferHandle, offset: u64, data: &[u8]) {
        unsafe {
            self.device
                .cmd_update_buffer(cmd(handle), vk::Buffer::from_raw(buffer.0), offset, data);
        }
    }

    fn cmd_execute_commands(&self, handle: CommandBufferHandle, secondaries: &[CommandBufferHandle]) {
        if secondaries.is_empty() {
            return;
        }
        let native: Vec<_> = secondaries.iter().map(|b| cmd(*b)).collect();
        unsafe { self.device.cmd_execute_commands(cmd(handle), &native) };
    }

    fn submit(&self, submission: &Submission<'_>) -> RenderResult<()> {
        let wait_semaphores: Vec<_> = submission
            .wait
            .iter()
            .map(|(semaphore, _)| vk::Semaphore::from_raw(semaphore.0))
            .collect();
        let wait_stages: Vec<_> = submission.wait.iter().map(|(_, stages)| pipeline_stages(*stages)).collect();
        let command_buffers: Vec<_> = submission.command_buffers.iter().map(|b| cmd(*b)).collect();
        let signal_semaphores: Vec<_> = submission
            .signal
            .iter()
            .map(|semaphore| vk::Semaphore::from_raw(semaphore.0))
            .collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        let fence = submission.fence.map_or(vk::Fence::null(), |f| vk::Fence::from_raw(f.0));

        let queue = self.queue.lock().map_err(poisoned)?;
        unsafe {
            self.device
                .queue_submit(*queue, &[submit_info], fence)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }

        if let Ok(buffers) = self.buffers.get_mut() {
            if !buffers.is_empty() {
                log::warn!("{} scene buffers still alive at backend shutdown", buffers.len());
            }
            for (_, buffer) in buffers.drain() {
                buffer.destroy(&self.device);
            }
        }

        let leftover: Vec<_> = match self.shadow_targets.get_mut() {
            Ok(targets) => targets.drain().map(|(_, resources)| resources).collect(),
            Err(_) => Vec::new(),
        };
        for resources in leftover {
            self.destroy_shadow_resources(resources);
        }

        for pool in &self.command_pools {
            if let Ok(pool) = pool.lock() {
                unsafe { self.device.destroy_command_pool(*pool, None) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_flags_translate_bit_for_bit() {
        let stages = PipelineStages::COLOR_ATTACHMENT_OUTPUT | PipelineStages::FRAGMENT_SHADER;
        assert_eq!(
            pipeline_stages(stages),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        assert_eq!(pipeline_stages(PipelineStages::empty()), vk::PipelineStageFlags::empty());
    }

    #[test]
    fn test_buffer_usage_translation() {
        let flags = buffer_usage(BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST);
        assert_eq!(flags, vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST);
        assert_eq!(
            command_buffer_usage(CommandBufferUsage::RENDER_PASS_CONTINUE | CommandBufferUsage::SIMULTANEOUS_USE),
            vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE | vk::CommandBufferUsageFlags::SIMULTANEOUS_USE
        );
    }

    #[test]
    fn test_depth_clear_value() {
        let value = clear_value(&ClearValue::DepthStencil { depth: 1.0, stencil: 0 });
        let depth = unsafe { value.depth_stencil.depth };
        assert_eq!(depth, 1.0);
    }
}
