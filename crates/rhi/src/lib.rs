//! Thin ownership layer over `ash`.
//!
//! Every wrapper holds an `Arc<Device>` and destroys its handle on drop.
//! Resources that must outlive a single scope instead go through a
//! [`deletion::DeletionQueue`], flushed in reverse registration order.

mod error;

pub mod command;
pub mod deletion;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod immediate;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use ash::vk;
pub use error::{RhiError, RhiResult};
