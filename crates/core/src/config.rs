//! Engine configuration.
//!
//! There is no CLI surface; defaults mirror the engine's fixed setup and a
//! couple of environment variables allow overriding asset locations.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Environment variable overriding [`EngineConfig::shader_dir`].
pub const SHADER_DIR_ENV: &str = "SIM_SHADER_DIR";

/// Static configuration consumed by the engine at init.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Name reported to the Vulkan driver.
    pub app_name: String,
    /// Title of the presentation window.
    pub window_title: String,
    /// Initial window width; also the draw-image width.
    pub window_width: u32,
    /// Initial window height; also the draw-image height.
    pub window_height: u32,
    /// Enables the Khronos validation layer and the debug messenger.
    pub enable_validation: bool,
    /// Directory holding the compiled compute shaders.
    pub shader_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "Real-Time Vulkan Simulation Engine".to_string(),
            window_title: "Vulkan Simulation Engine".to_string(),
            window_width: 1700,
            window_height: 900,
            enable_validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders/spirv"),
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(SHADER_DIR_ENV)
            && !dir.is_empty()
        {
            config.shader_dir = PathBuf::from(dir);
        }
        config
    }

    /// Checks the values the engine cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::Config(format!(
                "window extent must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        if self.app_name.is_empty() {
            return Err(Error::Config("application name must not be empty".to_string()));
        }
        if self.app_name.contains('\0') {
            return Err(Error::Config(
                "application name must not contain NUL bytes".to_string(),
            ));
        }
        Ok(())
    }

    /// Window extent as a `(width, height)` pair.
    #[inline]
    pub fn window_extent(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    /// Path of a compiled shader inside [`Self::shader_dir`].
    pub fn shader_path(&self, file_name: &str) -> PathBuf {
        self.shader_dir.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_setup() {
        let config = EngineConfig::default();
        assert_eq!(config.window_extent(), (1700, 900));
        assert_eq!(config.app_name, "Real-Time Vulkan Simulation Engine");
        assert_eq!(config.window_title, "Vulkan Simulation Engine");
        assert_eq!(config.enable_validation, cfg!(debug_assertions));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_extent() {
        let config = EngineConfig {
            window_height: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_app_name() {
        let empty = EngineConfig {
            app_name: String::new(),
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let nul = EngineConfig {
            app_name: "sim\0engine".to_string(),
            ..Default::default()
        };
        assert!(nul.validate().is_err());
    }

    #[test]
    fn test_shader_path_joins_dir() {
        let config = EngineConfig {
            shader_dir: PathBuf::from("assets/spv"),
            ..Default::default()
        };
        assert_eq!(
            config.shader_path("gradient.comp.spv"),
            PathBuf::from("assets/spv/gradient.comp.spv")
        );
    }
}
