//! RHI-specific error types.

use std::path::PathBuf;

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader blob could not be read from disk
    #[error("Failed to read shader {path}: {source}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Shader blob is malformed or was rejected
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Handle used after release or before creation
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Descriptor pool has no room for another set
    #[error("Descriptor pool exhausted ({max_sets} sets)")]
    DescriptorPoolExhausted { max_sets: u32 },

    /// A bounded GPU wait expired
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

impl RhiError {
    /// True for a bounded wait that expired.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RhiError::Timeout(_) | RhiError::VulkanError(ash::vk::Result::TIMEOUT)
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
