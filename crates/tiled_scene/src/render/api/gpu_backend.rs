//! Backend abstraction traits for the tiled scene
//!
//! The scene never talks to a graphics API directly. Everything it needs
//! from the GPU (host-visible buffers, shadow depth targets, command buffer
//! recording, queue submission and fences) goes through [`GpuBackend`], which
//! hands out opaque `u64` handles. The Vulkan implementation stores raw
//! `ash` handles in them; the headless implementation stores counters.

use bitflags::bitflags;

use crate::render::RenderResult;

/// Handle to a host-visible, persistently mapped buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Handle to an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub u64);

/// Handle to a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassHandle(pub u64);

/// Handle to a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub u64);

/// Handle to a graphics pipeline owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

/// Handle to a pipeline layout owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineLayoutHandle(pub u64);

/// Handle to a descriptor set owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetHandle(pub u64);

/// Handle to a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferHandle(pub u64);

/// Handle to a GPU-GPU semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub u64);

/// Handle to a GPU-CPU fence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub u64);

bitflags! {
    /// How a buffer is going to be bound
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Uniform buffer
        const UNIFORM = 1 << 0;
        /// Storage buffer
        const STORAGE = 1 << 1;
        /// Vertex buffer
        const VERTEX = 1 << 2;
        /// Index buffer
        const INDEX = 1 << 3;
        /// Target of `cmd_update_buffer`
        const TRANSFER_DST = 1 << 4;
    }
}

bitflags! {
    /// Pipeline stages a submission waits at
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        /// Start of the pipeline
        const TOP_OF_PIPE = 1 << 0;
        /// Vertex shading
        const VERTEX_SHADER = 1 << 1;
        /// Fragment shading
        const FRAGMENT_SHADER = 1 << 2;
        /// Early depth tests
        const EARLY_FRAGMENT_TESTS = 1 << 3;
        /// Late depth tests
        const LATE_FRAGMENT_TESTS = 1 << 4;
        /// Color attachment writes
        const COLOR_ATTACHMENT_OUTPUT = 1 << 5;
        /// Transfer commands
        const TRANSFER = 1 << 6;
        /// End of the pipeline
        const BOTTOM_OF_PIPE = 1 << 7;
    }
}

bitflags! {
    /// Shader stages that see push constants
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Fragment stage
        const FRAGMENT = 1 << 1;
    }
}

bitflags! {
    /// Command buffer begin flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandBufferUsage: u32 {
        /// Submitted once, then reset
        const ONE_TIME_SUBMIT = 1 << 0;
        /// Secondary buffer entirely inside a render pass
        const RENDER_PASS_CONTINUE = 1 << 1;
        /// May be pending on the queue more than once
        const SIMULTANEOUS_USE = 1 << 2;
    }
}

/// Primary or secondary command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    /// Submitted directly to a queue
    Primary,
    /// Executed from a primary buffer
    Secondary,
}

/// How the first subpass of a render pass gets its commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubpassContents {
    /// Recorded in the primary buffer
    Inline,
    /// Provided by secondary buffers
    SecondaryCommandBuffers,
}

/// Index element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    /// 16-bit indices
    U16,
    /// 32-bit indices
    U32,
}

/// Non-blocking fence query result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FenceStatus {
    /// The GPU finished the fenced work
    Signaled,
    /// Not signaled yet (includes a timed out wait)
    NotReady,
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Extent2D {
    /// Create an extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Square extent, used for shadow maps
    pub const fn square(size: u32) -> Self {
        Self { width: size, height: size }
    }
}

/// Attachment clear value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color
    Color([f32; 4]),
    /// Depth and stencil
    DepthStencil {
        /// Depth clear value
        depth: f32,
        /// Stencil clear value
        stencil: u32,
    },
}

/// Render pass instance the scene records into
#[derive(Debug, Clone, PartialEq)]
pub struct PassTarget {
    /// Render pass
    pub render_pass: RenderPassHandle,
    /// Framebuffer
    pub framebuffer: FramebufferHandle,
    /// Render area
    pub extent: Extent2D,
    /// One value per attachment
    pub clear_values: Vec<ClearValue>,
}

/// Render pass state a secondary command buffer continues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inheritance {
    /// Render pass the secondary buffer executes in
    pub render_pass: RenderPassHandle,
    /// Subpass index
    pub subpass: u32,
    /// Framebuffer, when known at record time
    pub framebuffer: Option<FramebufferHandle>,
}

/// Depth-only render target backing one shadow map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowTarget {
    /// Depth image, sampled by the main pass
    pub image: ImageHandle,
    /// Comparison sampler for the depth image
    pub sampler: SamplerHandle,
    /// Depth-only render pass
    pub render_pass: RenderPassHandle,
    /// Framebuffer wrapping the depth image
    pub framebuffer: FramebufferHandle,
    /// Resolution (square)
    pub size: u32,
}

/// Device limits the scene needs for buffer layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Required alignment of uniform buffer binding offsets
    pub min_uniform_buffer_offset_alignment: u64,
    /// Largest range a single uniform binding can cover
    pub max_uniform_buffer_range: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            max_uniform_buffer_range: 65536,
        }
    }
}

/// One queue submission
#[derive(Debug, Clone, Copy, Default)]
pub struct Submission<'a> {
    /// Command buffers executed in order
    pub command_buffers: &'a [CommandBufferHandle],
    /// Semaphores to wait on, with the stage that waits
    pub wait: &'a [(SemaphoreHandle, PipelineStages)],
    /// Semaphores signaled on completion
    pub signal: &'a [SemaphoreHandle],
    /// Fence signaled on completion
    pub fence: Option<FenceHandle>,
}

/// GPU services consumed by the scene
///
/// Implementations must be shareable across the recording workers. Command
/// buffers allocated from pool `i` are only ever recorded by one thread at a
/// time; the scene guarantees that by giving each worker job its own pool.
pub trait GpuBackend: Send + Sync {
    /// Limits relevant to uniform buffer layout
    fn limits(&self) -> DeviceLimits;

    /// Number of independent command pools available
    fn command_pool_count(&self) -> usize;

    // === Resources ===

    /// Create a host-visible, persistently mapped buffer
    fn create_buffer(&self, size: u64, usage: BufferUsage) -> RenderResult<BufferHandle>;

    /// Copy `data` into a mapped buffer at `offset`
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;

    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Create the depth image, sampler, render pass and framebuffer of a shadow map
    fn create_shadow_target(&self, size: u32) -> RenderResult<ShadowTarget>;

    /// Destroy a shadow target
    fn destroy_shadow_target(&self, target: &ShadowTarget);

    // === Synchronization ===

    /// Create a binary semaphore
    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    /// Create a fence
    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: FenceHandle);

    /// Wait up to `timeout_ns` for a fence
    fn wait_fence(&self, fence: FenceHandle, timeout_ns: u64) -> RenderResult<FenceStatus>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: FenceHandle) -> RenderResult<()>;

    // === Command buffers ===

    /// Allocate `count` command buffers from pool `pool`
    fn allocate_command_buffers(
        &self,
        pool: usize,
        level: CommandBufferLevel,
        count: u32,
    ) -> RenderResult<Vec<CommandBufferHandle>>;

    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: usize, buffers: &[CommandBufferHandle]);

    /// Start recording (implicitly resets the buffer)
    fn begin_command_buffer(
        &self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
        inheritance: Option<&Inheritance>,
    ) -> RenderResult<()>;

    /// Finish recording
    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> RenderResult<()>;

    /// Begin a render pass
    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBufferHandle,
        target: &PassTarget,
        contents: SubpassContents,
    );

    /// End the current render pass
    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle);

    /// Full-extent viewport with depth range `[0, 1]`
    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, extent: Extent2D);

    /// Full-extent scissor
    fn cmd_set_scissor(&self, cmd: CommandBufferHandle, extent: Extent2D);

    /// Dynamic depth bias
    fn cmd_set_depth_bias(&self, cmd: CommandBufferHandle, constant: f32, clamp: f32, slope: f32);

    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle);

    /// Bind graphics descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    );

    /// Bind vertex buffers
    fn cmd_bind_vertex_buffers(
        &self,
        cmd: CommandBufferHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
        offsets: &[u64],
    );

    /// Bind an index buffer
    fn cmd_bind_index_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64, index_type: IndexType);

    /// Push constants
    fn cmd_push_constants(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    );

    /// Indexed, instanced draw
    fn cmd_draw_indexed(
        &self,
        cmd: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    /// Non-indexed, instanced draw
    fn cmd_draw(&self, cmd: CommandBufferHandle, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);

    /// Inline buffer update (`data.len()` a multiple of 4, at most 65536 bytes)
    fn cmd_update_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Execute secondary command buffers
    fn cmd_execute_commands(&self, cmd: CommandBufferHandle, secondaries: &[CommandBufferHandle]);

    // === Queue ===

    /// Submit work to the graphics queue
    fn submit(&self, submission: &Submission<'_>) -> RenderResult<()>;
}

/// Largest chunk accepted by `cmd_update_buffer`
pub const MAX_INLINE_UPDATE_SIZE: usize = 65536;

/// Record a buffer update of any size as a series of inline updates
pub fn cmd_update_buffer_chunked(
    backend: &dyn GpuBackend,
    cmd: CommandBufferHandle,
    buffer: BufferHandle,
    offset: u64,
    data: &[u8],
) {
    for (i, chunk) in data.chunks(MAX_INLINE_UPDATE_SIZE).enumerate() {
        backend.cmd_update_buffer(cmd, buffer, offset + (i * MAX_INLINE_UPDATE_SIZE) as u64, chunk);
    }
}
