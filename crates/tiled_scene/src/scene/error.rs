//! Scene error types

use thiserror::Error;

use crate::foundation::math::Vec3;
use crate::render::RenderError;
use crate::scene::ObjectKind;

/// Errors reported by the tiled scene
///
/// Configuration and capacity errors indicate authoring mistakes: the scene
/// stays consistent but the offending call has no effect. Callers are
/// expected to treat them as fatal.
#[derive(Error, Debug)]
pub enum SceneError {
    /// Scene parameters are inconsistent
    #[error("Invalid scene configuration: {0}")]
    InvalidConfig(String),

    /// An object was placed outside the declared world volume
    #[error("Position {position:?} lies outside the world volume")]
    OutOfBounds {
        /// The rejected position
        position: Vec3,
    },

    /// More objects were registered than the capacity fixed at prepare time
    #[error("Category '{category}' exceeds its {kind:?} capacity of {capacity} objects")]
    CapacityExceeded {
        /// Category name
        category: String,
        /// Static or dynamic storage
        kind: ObjectKind,
        /// Capacity computed by `prepare()`
        capacity: u32,
    },

    /// The referenced object does not exist
    #[error("Unknown object")]
    UnknownObject,

    /// The referenced category was never registered
    #[error("Unknown category '{0}'")]
    UnknownCategory(String),

    /// The referenced light does not exist
    #[error("Unknown light index {0}")]
    UnknownLight(usize),

    /// Shadows were requested for a light type that cannot cast them
    #[error("Light {0} cannot cast shadows (only spot and directional lights can)")]
    UnsupportedShadowLight(usize),

    /// A shadow specification failed validation
    #[error("Invalid shadow specification: {0}")]
    InvalidShadowSpec(String),

    /// The operation requires a different frame phase
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A recording job failed or panicked
    #[error("Command recording failed: {0}")]
    RecordingFailed(String),

    /// GPU backend failure
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Result type for scene operations
pub type SceneResult<T> = Result<T, SceneError>;
