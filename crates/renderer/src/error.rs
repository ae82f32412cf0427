//! Renderer error types.

use sim_rhi::{RhiError, vk};
use thiserror::Error;

/// Errors raised by the renderer.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Core(#[from] sim_core::Error),

    /// An effect index outside the registry was selected.
    #[error("Effect index {index} out of range (registry holds {len})")]
    EffectIndexOutOfRange { index: usize, len: usize },

    /// The egui renderer failed.
    #[error("UI overlay error: {0}")]
    Overlay(String),
}

impl From<vk::Result> for RendererError {
    fn from(result: vk::Result) -> Self {
        RendererError::Rhi(RhiError::from(result))
    }
}

impl RendererError {
    /// A failed GPU call. These are not recoverable: the caller logs the
    /// code and aborts.
    pub fn is_fatal_gpu(&self) -> bool {
        matches!(
            self,
            RendererError::Rhi(RhiError::VulkanError(_) | RhiError::AllocatorError(_))
        )
    }

    /// The raw result code, when the error carries one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            RendererError::Rhi(e) => e.vk_result(),
            _ => None,
        }
    }
}

/// Result type alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_failures_are_fatal() {
        let err = RendererError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(err.is_fatal_gpu());
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn test_range_error_is_not_gpu() {
        let err = RendererError::EffectIndexOutOfRange { index: 5, len: 2 };
        assert!(!err.is_fatal_gpu());
        assert_eq!(
            err.to_string(),
            "Effect index 5 out of range (registry holds 2)"
        );
    }

    #[test]
    fn test_setup_errors_are_not_gpu() {
        let err = RendererError::from(sim_core::Error::Window("no display".to_string()));
        assert!(!err.is_fatal_gpu());
        assert!(err.vk_result().is_none());
    }
}
