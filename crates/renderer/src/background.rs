//! Background compute effects.
//!
//! Each effect is a compute shader that writes the whole draw image. The
//! shaders declare `local_size_x = 16, local_size_y = 16`; [`dispatch_size`]
//! must stay in step with that.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use tracing::{debug, info, warn};

use sim_core::EngineConfig;
use sim_rhi::command::CommandRecorder;
use sim_rhi::device::Device;
use sim_rhi::pipeline::{Pipeline, PipelineLayout};
use sim_rhi::shader::{ShaderStage, load_shader_module};
use sim_rhi::{RhiError, RhiResult};

use crate::error::{RendererError, RendererResult};

/// Workgroup edge length shared with the effect shaders.
pub const WORKGROUP_SIZE: u32 = 16;

pub const GRADIENT_SHADER: &str = "gradient.comp.spv";
pub const SKY_SHADER: &str = "sky.comp.spv";

/// Push-constant block shared by all effects: four free-form vec4s.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComputePushConstants {
    pub data1: Vec4,
    pub data2: Vec4,
    pub data3: Vec4,
    pub data4: Vec4,
}

impl ComputePushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn rows_mut(&mut self) -> [&mut Vec4; 4] {
        [&mut self.data1, &mut self.data2, &mut self.data3, &mut self.data4]
    }
}

/// Pipeline handles an effect dispatches with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineBinding {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl From<&Pipeline> for PipelineBinding {
    fn from(pipeline: &Pipeline) -> Self {
        Self {
            pipeline: pipeline.handle(),
            layout: pipeline.layout(),
        }
    }
}

/// A named effect and its editable payload.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputeEffect {
    pub name: String,
    /// `None` when the shader failed to load.
    pub binding: Option<PipelineBinding>,
    pub data: ComputePushConstants,
}

/// Ordered effects plus the index drawn this frame.
#[derive(Debug, Default)]
pub struct EffectRegistry {
    effects: Vec<ComputeEffect>,
    current: usize,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: ComputeEffect) {
        debug!("Registered background effect '{}'", effect.name);
        self.effects.push(effect);
    }

    /// # Errors
    ///
    /// Returns [`RendererError::EffectIndexOutOfRange`] and keeps the
    /// current selection when `index` is past the end.
    pub fn select(&mut self, index: usize) -> RendererResult<()> {
        if index >= self.effects.len() {
            return Err(RendererError::EffectIndexOutOfRange {
                index,
                len: self.effects.len(),
            });
        }
        self.current = index;
        Ok(())
    }

    pub fn selected(&self) -> Option<&ComputeEffect> {
        self.effects.get(self.current)
    }

    pub fn selected_mut(&mut self) -> Option<&mut ComputeEffect> {
        self.effects.get_mut(self.current)
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn get(&self, index: usize) -> Option<&ComputeEffect> {
        self.effects.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ComputeEffect> {
        self.effects.get_mut(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Workgroup counts covering `extent`.
pub fn dispatch_size(extent: vk::Extent2D) -> (u32, u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
        1,
    )
}

/// Fallback clear color, pulsing blue with a 120-frame period.
pub fn flash_clear_color(frame_number: u64) -> [f32; 4] {
    let flash = (frame_number as f32 / 120.0).sin().abs();
    [0.0, 0.0, flash, 1.0]
}

/// Records the background pass. The draw image must be in `GENERAL`.
pub fn record_background<R: CommandRecorder>(
    cmd: &mut R,
    effect: Option<&ComputeEffect>,
    draw_image: vk::Image,
    descriptor_set: vk::DescriptorSet,
    extent: vk::Extent2D,
    frame_number: u64,
) {
    match effect.and_then(|e| e.binding.map(|b| (e, b))) {
        Some((effect, binding)) => {
            cmd.bind_compute_pipeline(binding.pipeline);
            cmd.bind_compute_descriptor_set(binding.layout, descriptor_set);
            cmd.push_compute_constants(binding.layout, bytemuck::bytes_of(&effect.data));
            let (x, y, z) = dispatch_size(extent);
            cmd.dispatch(x, y, z);
        }
        None => {
            cmd.clear_color_image(
                draw_image,
                vk::ImageLayout::GENERAL,
                flash_clear_color(frame_number),
            );
        }
    }
}

/// The two built-in effects in registry order.
pub fn default_effects(
    gradient: Option<PipelineBinding>,
    sky: Option<PipelineBinding>,
) -> [ComputeEffect; 2] {
    [
        ComputeEffect {
            name: "gradient".to_string(),
            binding: gradient,
            data: ComputePushConstants {
                data1: Vec4::new(1.0, 0.0, 0.0, 1.0),
                data2: Vec4::new(0.0, 0.0, 1.0, 1.0),
                ..Default::default()
            },
        },
        ComputeEffect {
            name: "sky".to_string(),
            binding: sky,
            data: ComputePushConstants {
                data1: Vec4::new(0.1, 0.2, 0.4, 0.97),
                ..Default::default()
            },
        },
    ]
}

/// Owns the shared layout and every effect pipeline built from it.
pub struct BackgroundPipelines {
    // Pipelines hold their own Arc to the layout.
    pipelines: Vec<Pipeline>,
    layout: Arc<PipelineLayout>,
}

/// Decides what an unloadable effect shader means for startup. The overlay
/// build keeps running with the clear fallback so the effect can still be
/// switched away from; the minimal build has no such recovery.
fn missing_shader(file: &str) -> RhiResult<()> {
    if cfg!(feature = "ui") {
        Ok(())
    } else {
        Err(RhiError::ShaderError(format!("effect shader {file} failed to load")))
    }
}

impl BackgroundPipelines {
    /// Builds the layout, loads the effect shaders and fills a registry.
    ///
    /// With the `ui` feature a shader that fails to load leaves its effect
    /// without a pipeline; without it the failure is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if layout or pipeline creation fails, or a shader is
    /// missing in a build without the overlay.
    pub fn new(
        device: Arc<Device>,
        set_layout: vk::DescriptorSetLayout,
        config: &EngineConfig,
    ) -> RhiResult<(Self, EffectRegistry)> {
        let push_constant = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(ComputePushConstants::SIZE);
        let layout = Arc::new(PipelineLayout::new(
            device.clone(),
            &[set_layout],
            &[push_constant],
        )?);

        let mut pipelines = Vec::new();
        let mut build = |file: &str| -> RhiResult<Option<PipelineBinding>> {
            let path = config.shader_path(file);
            let Some(shader) = load_shader_module(device.clone(), &path, ShaderStage::Compute)
            else {
                return missing_shader(file).map(|()| None);
            };
            let pipeline = Pipeline::compute(device.clone(), layout.clone(), &shader)?;
            let binding = PipelineBinding::from(&pipeline);
            pipelines.push(pipeline);
            Ok(Some(binding))
        };

        let gradient = build(GRADIENT_SHADER)?;
        let sky = build(SKY_SHADER)?;

        let mut registry = EffectRegistry::new();
        for effect in default_effects(gradient, sky) {
            if effect.binding.is_none() {
                warn!("Effect '{}' has no pipeline, using the clear fallback", effect.name);
            }
            registry.push(effect);
        }

        info!(
            "Background effects ready: {} of {} pipelines built",
            pipelines.len(),
            registry.len()
        );

        Ok((Self { pipelines, layout }, registry))
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
