use thiserror::Error;

/// Host-side failures: window system, configuration, files.
#[derive(Error, Debug)]
pub enum Error {
    /// A Vulkan failure reported outside the RHI layer (surface bridging).
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    #[error("Window error: {0}")]
    Window(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
