//! Backend implementations for the render module
//!
//! Vulkan through `ash`, and a headless recorder that needs no device.

pub mod headless;
/// Vulkan rendering backend implementation
pub mod vulkan;

pub use headless::{HeadlessBackend, RecordedCommand, SubmissionRecord};
pub use vulkan::{VulkanBackend, VulkanDevice, VulkanError, VulkanResult};
