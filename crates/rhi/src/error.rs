use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RhiError {
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    #[error("No suitable GPU found")]
    NoSuitableGpu,

    #[error("Shader error: {0}")]
    ShaderError(String),

    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Caller passed something the RHI cannot work with.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RhiError {
    /// Result code of a failed Vulkan call, if that is what this is.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::VulkanError(code) => Some(*code),
            _ => None,
        }
    }
}

pub type RhiResult<T> = std::result::Result<T, RhiError>;
