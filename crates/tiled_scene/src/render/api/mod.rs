//! Public rendering API
//!
//! The backend trait the scene is written against, and the handle and
//! descriptor types that cross it.

pub mod gpu_backend;

pub use gpu_backend::{
    cmd_update_buffer_chunked, BufferHandle, BufferUsage, ClearValue, CommandBufferHandle,
    CommandBufferLevel, CommandBufferUsage, DescriptorSetHandle, DeviceLimits, Extent2D,
    FenceHandle, FenceStatus, FramebufferHandle, GpuBackend, ImageHandle, IndexType, Inheritance,
    PassTarget, PipelineHandle, PipelineLayoutHandle, PipelineStages, RenderPassHandle,
    SamplerHandle, SemaphoreHandle, ShaderStages, ShadowTarget, Submission, SubpassContents,
    MAX_INLINE_UPDATE_SIZE,
};
