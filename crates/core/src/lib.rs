//! Host-side pieces shared by every crate: configuration, errors,
//! logging setup and frame timing.

mod config;
mod error;
mod logging;
mod timer;

pub use config::{EngineConfig, SHADER_DIR_ENV};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FrameReport, Timer};
