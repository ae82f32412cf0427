//! Frame loop and background effects.
//!
//! This crate drives the engine on top of `sim_rhi`:
//! - A ring of frame slots with per-slot sync objects and deletion queues
//! - Background compute effects drawn into an offscreen image
//! - Blit to the swapchain, with an optional egui overlay
//! - Swapchain rebuild on resize or out-of-date results

pub mod background;
pub mod engine;
mod error;
pub mod frame;
#[cfg(feature = "ui")]
pub mod overlay;
pub mod record;
pub mod swapchain_state;

pub use engine::Engine;
pub use error::{RendererError, RendererResult};

/// Number of frame slots; the CPU may record one frame ahead of the GPU.
pub const FRAME_OVERLAP: usize = 2;
