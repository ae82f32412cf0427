//! Pipeline layouts and compute pipelines.
//!
//! A compute [`Pipeline`] holds an `Arc` to the [`PipelineLayout`] it was
//! built against, so the layout always outlives every pipeline using it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sim_rhi::device::Device;
//! use sim_rhi::pipeline::{ComputePipelineBuilder, PipelineLayout};
//! use sim_rhi::shader::Shader;
//! use sim_rhi::vk;
//!
//! # fn example(device: Arc<Device>, shader: &Shader, set_layout: vk::DescriptorSetLayout)
//! #     -> Result<(), sim_rhi::RhiError> {
//! let range = vk::PushConstantRange::default()
//!     .stage_flags(vk::ShaderStageFlags::COMPUTE)
//!     .size(64);
//! let layout = Arc::new(PipelineLayout::new(device.clone(), &[set_layout], &[range])?);
//!
//! let pipeline = ComputePipelineBuilder::new()
//!     .shader(shader)
//!     .layout(layout)
//!     .build(device)?;
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};

/// Pipeline layout wrapper, destroyed on drop.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// # Errors
    ///
    /// Returns an error if pipeline layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} descriptor set layout(s) and {} push constant range(s)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Destroyed pipeline layout");
    }
}

/// Compute pipeline wrapper, destroyed on drop.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    layout: Arc<PipelineLayout>,
}

impl Pipeline {
    /// Builds a compute pipeline from `shader` with entry point taken from the shader.
    ///
    /// # Errors
    ///
    /// Returns an error if the shader is not a compute shader or pipeline
    /// creation fails.
    pub fn compute(device: Arc<Device>, layout: Arc<PipelineLayout>, shader: &Shader) -> RhiResult<Self> {
        ComputePipelineBuilder::new()
            .shader(shader)
            .layout(layout)
            .build(device)
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout this pipeline was built against.
    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::COMPUTE
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Compute pipeline destroyed");
    }
}

/// Builder for compute pipelines.
#[derive(Default)]
pub struct ComputePipelineBuilder<'a> {
    shader: Option<&'a Shader>,
    layout: Option<Arc<PipelineLayout>>,
}

impl<'a> ComputePipelineBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shader = Some(shader);
        self
    }

    pub fn layout(mut self, layout: Arc<PipelineLayout>) -> Self {
        self.layout = Some(layout);
        self
    }

    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] when the shader or layout is
    /// missing or the shader is not a compute shader, or the Vulkan error
    /// from pipeline creation.
    pub fn build(self, device: Arc<Device>) -> RhiResult<Pipeline> {
        let shader = self
            .shader
            .ok_or_else(|| RhiError::PipelineError("Compute shader is required".to_string()))?;
        let layout = self
            .layout
            .ok_or_else(|| RhiError::PipelineError("Pipeline layout is required".to_string()))?;

        if shader.stage() != ShaderStage::Compute {
            return Err(RhiError::PipelineError(format!(
                "Expected a compute shader, got {}",
                shader.stage()
            )));
        }

        let create_info = vk::ComputePipelineCreateInfo::default()
            .layout(layout.handle())
            .stage(shader.stage_create_info());

        let pipelines = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::PipelineError("No pipeline returned".to_string()))?;

        debug!("Compute pipeline created");

        Ok(Pipeline {
            device,
            pipeline,
            layout,
        })
    }
}
