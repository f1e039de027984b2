//! GPU seam of the tiled scene
//!
//! [`api`] defines the backend trait and handle types; [`backends`] holds
//! the Vulkan implementation and a headless recorder used by tests and
//! tools that run without a device.

pub mod api;
pub mod backends;

pub use api::*;

use thiserror::Error;

/// High-level rendering error types
///
/// Represents errors that can occur during rendering operations, abstracted
/// from specific graphics API error types. The backend errors are logged
/// where they happen and carried here as text.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Renderer initialization failed during setup
    #[error("Renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// A rendering operation failed during execution
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// Resource creation or management failed
    ///
    /// Occurs when GPU resources (buffers, depth targets, command buffers)
    /// cannot be created, typically due to memory constraints.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A handle did not name a live resource
    #[error("Invalid {kind} handle {id:#x}")]
    InvalidHandle {
        /// Resource kind
        kind: &'static str,
        /// Raw handle value
        id: u64,
    },

    /// Backend-specific error occurred
    #[error("Backend error: {0}")]
    BackendError(String),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
