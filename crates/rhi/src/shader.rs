//! SPIR-V shader modules.
//!
//! [`load_shader_module`] is the soft-failure path used for effects: a
//! missing or broken file is logged and the caller decides how to degrade.

use std::ffi::{CStr, CString};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        })
    }
}

/// A shader module plus the stage and entry point it is bound with.
///
/// Safe to drop once every pipeline built from it exists.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| RhiError::ShaderError(format!("cannot read {}: {e}", path.display())))?;
        debug!(%stage, path = %path.display(), "loading shader");
        Self::from_spirv_bytes(device, &bytes, stage, entry_point)
    }

    /// # Errors
    ///
    /// Fails on malformed SPIR-V, an entry point containing NUL, or a
    /// module creation error.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        let code = parse_spirv(bytes)?;
        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::ShaderError(format!("bad entry point: {e}")))?;

        let info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&info, None)? };

        Ok(Self {
            device,
            module,
            stage,
            entry_point,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_shader_module(self.module, None) };
    }
}

/// Loads `path` with entry point `main`, or logs and returns `None`.
pub fn load_shader_module(device: Arc<Device>, path: &Path, stage: ShaderStage) -> Option<Shader> {
    Shader::from_spirv_file(device, path, stage, "main")
        .inspect_err(|e| warn!("Error when building the {stage} shader {}: {e}", path.display()))
        .ok()
}

/// Reads SPIR-V words, checking alignment and the magic number.
pub fn parse_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    let code = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RhiError::ShaderError(format!("invalid SPIR-V: {e}")))?;

    match code.first().copied() {
        Some(SPIRV_MAGIC) => Ok(code),
        Some(word) => Err(RhiError::ShaderError(format!("bad SPIR-V magic {word:#010x}"))),
        None => Err(RhiError::ShaderError("empty SPIR-V module".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_compute_stage_flags() {
        assert_eq!(ShaderStage::Compute.to_vk_stage(), vk::ShaderStageFlags::COMPUTE);
        assert_eq!(ShaderStage::Compute.to_string(), "compute");
    }

    #[test]
    fn test_parse_spirv_accepts_module_header() {
        let code = parse_spirv(&as_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0])).unwrap();
        assert_eq!(code.len(), 5);
    }

    #[test]
    fn test_parse_spirv_rejects_misaligned() {
        let mut bytes = as_bytes(&[SPIRV_MAGIC]);
        bytes.push(0);
        assert!(matches!(parse_spirv(&bytes), Err(RhiError::ShaderError(_))));
    }

    #[test]
    fn test_parse_spirv_rejects_bad_magic_and_empty() {
        assert!(parse_spirv(&as_bytes(&[0xDEAD_BEEF, 0])).is_err());
        assert!(parse_spirv(&[]).is_err());
    }
}
