//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Math types and projection helpers
//! - The worker pool used for parallel command recording
//! - Logging utilities

pub mod math;
pub mod worker_pool;
pub mod logging;
