//! Vulkan backend
//!
//! Implements [`GpuBackend`](crate::render::GpuBackend) on top of a device the
//! host created. Scene handles carry the raw Vulkan handle values, so the
//! host converts its own render passes, pipelines and descriptor sets with
//! the `From` impls below and reads buffers back with [`VulkanBackend::buffer`].

mod backend;
mod memory;

pub use backend::{VulkanBackend, VulkanDevice};

use ash::vk;
use ash::vk::Handle;
use thiserror::Error;

use crate::render::{
    DescriptorSetHandle, FramebufferHandle, PipelineHandle, PipelineLayoutHandle, RenderError,
    RenderPassHandle,
};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id:#x}")]
    ResourceNotFound {
        /// Raw handle value
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl From<VulkanError> for RenderError {
    fn from(err: VulkanError) -> Self {
        match err {
            VulkanError::ResourceNotFound { id } => RenderError::InvalidHandle { kind: "vulkan resource", id },
            VulkanError::OutOfMemory { .. } | VulkanError::NoSuitableMemoryType => {
                RenderError::ResourceCreationFailed(err.to_string())
            }
            other => RenderError::BackendError(other.to_string()),
        }
    }
}

impl From<vk::RenderPass> for RenderPassHandle {
    fn from(render_pass: vk::RenderPass) -> Self {
        Self(render_pass.as_raw())
    }
}

impl From<vk::Framebuffer> for FramebufferHandle {
    fn from(framebuffer: vk::Framebuffer) -> Self {
        Self(framebuffer.as_raw())
    }
}

impl From<vk::Pipeline> for PipelineHandle {
    fn from(pipeline: vk::Pipeline) -> Self {
        Self(pipeline.as_raw())
    }
}

impl From<vk::PipelineLayout> for PipelineLayoutHandle {
    fn from(layout: vk::PipelineLayout) -> Self {
        Self(layout.as_raw())
    }
}

impl From<vk::DescriptorSet> for DescriptorSetHandle {
    fn from(set: vk::DescriptorSet) -> Self {
        Self(set.as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_map_to_render_errors() {
        let err: RenderError = VulkanError::NoSuitableMemoryType.into();
        assert!(matches!(err, RenderError::ResourceCreationFailed(_)));

        let err: RenderError = VulkanError::ResourceNotFound { id: 7 }.into();
        assert!(matches!(err, RenderError::InvalidHandle { id: 7, .. }));

        let err: RenderError = VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).into();
        assert!(matches!(err, RenderError::BackendError(_)));
    }

    #[test]
    fn test_handles_carry_raw_values() {
        let pass = vk::RenderPass::from_raw(0x1234);
        assert_eq!(RenderPassHandle::from(pass), RenderPassHandle(0x1234));
        let set = vk::DescriptorSet::from_raw(42);
        assert_eq!(DescriptorSetHandle::from(set).0, 42);
    }
}
