//! Descriptor set management for shader resource binding.
//!
//! - [`DescriptorLayoutBuilder`] collects bindings and builds a [`DescriptorSetLayout`]
//! - [`DescriptorAllocator`] owns one pool sized from [`PoolSizeRatio`]s
//! - free helpers fill `VkWriteDescriptorSet`s
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sim_rhi::descriptor::{DescriptorAllocator, DescriptorLayoutBuilder, PoolSizeRatio};
//! use sim_rhi::device::Device;
//! use sim_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), sim_rhi::RhiError> {
//! let layout = DescriptorLayoutBuilder::new()
//!     .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
//!     .build(device.clone(), vk::ShaderStageFlags::COMPUTE)?;
//!
//! let ratios = [PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0)];
//! let allocator = DescriptorAllocator::init_pool(device.clone(), 10, &ratios)?;
//! let _set = allocator.allocate(layout.handle())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Descriptor set layout, destroyed on drop.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a layout from explicit bindings.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Accumulates single-descriptor bindings; stage flags are applied at build time.
#[derive(Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1),
        );
        self
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Bindings with `stages` applied, as they will be passed to Vulkan.
    pub fn bindings(&self, stages: vk::ShaderStageFlags) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(|binding| binding.stage_flags(binding.stage_flags | stages))
            .collect()
    }

    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn build(&self, device: Arc<Device>, stages: vk::ShaderStageFlags) -> RhiResult<DescriptorSetLayout> {
        DescriptorSetLayout::new(device, &self.bindings(stages))
    }
}

/// Share of a pool reserved for one descriptor type, per set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub const fn new(ty: vk::DescriptorType, ratio: f32) -> Self {
        Self { ty, ratio }
    }
}

/// Pool sizes for `max_sets` sets: `ratio * max_sets` descriptors per type.
pub fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|ratio| {
            vk::DescriptorPoolSize::default()
                .ty(ratio.ty)
                .descriptor_count((ratio.ratio * max_sets as f32) as u32)
        })
        .collect()
}

/// A single descriptor pool plus set allocation from it.
///
/// The pool is destroyed on drop or by an explicit [`destroy_pool`](Self::destroy_pool).
pub struct DescriptorAllocator {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
}

impl DescriptorAllocator {
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn init_pool(
        device: Arc<Device>,
        max_sets: u32,
        ratios: &[PoolSizeRatio],
    ) -> RhiResult<Self> {
        let sizes = pool_sizes(max_sets, ratios);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: {} max sets, {} type(s)",
            max_sets,
            sizes.len()
        );

        Ok(Self { device, pool })
    }

    #[inline]
    pub fn pool(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Returns every set to the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn clear_descriptors(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    /// Destroys the pool and every set allocated from it. Safe to call twice.
    pub fn destroy_pool(&mut self) {
        if self.pool == vk::DescriptorPool::null() {
            return;
        }
        unsafe {
            self.device.handle().destroy_descriptor_pool(self.pool, None);
        }
        self.pool = vk::DescriptorPool::null();
        debug!("Destroyed descriptor pool");
    }

    /// Allocates one set with `layout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is exhausted or allocation fails.
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY.into())
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        self.destroy_pool();
    }
}

/// Writes `infos` into `set` at `binding` as storage images.
pub fn storage_image_write<'a>(
    set: vk::DescriptorSet,
    binding: u32,
    infos: &'a [vk::DescriptorImageInfo],
) -> vk::WriteDescriptorSet<'a> {
    vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
        .image_info(infos)
}

/// Applies descriptor writes.
pub fn update_descriptor_sets(device: &Device, writes: &[vk::WriteDescriptorSet<'_>]) {
    if writes.is_empty() {
        return;
    }

    unsafe {
        device.handle().update_descriptor_sets(writes, &[]);
    }

    debug!("Updated {} descriptor set(s)", writes.len());
}

/// Image info without a sampler, as used for storage images.
#[inline]
pub fn image_info(image_view: vk::ImageView, image_layout: vk::ImageLayout) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .image_layout(image_layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_layout_builder_applies_stages() {
        let builder = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .add_binding(1, vk::DescriptorType::UNIFORM_BUFFER);

        let bindings = builder.bindings(vk::ShaderStageFlags::COMPUTE);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(bindings[0].descriptor_count, 1);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_layout_builder_clear() {
        let mut builder = DescriptorLayoutBuilder::new().add_binding(0, vk::DescriptorType::SAMPLER);
        builder.clear();
        assert!(builder.bindings(vk::ShaderStageFlags::ALL).is_empty());
    }

    #[test]
    fn test_pool_sizes_scale_with_max_sets() {
        let ratios = [
            PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0),
            PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 0.5),
        ];
        let sizes = pool_sizes(10, &ratios);

        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 10);
        assert_eq!(sizes[1].descriptor_count, 5);
    }

    #[test]
    fn test_storage_image_write() {
        let infos = [image_info(
            vk::ImageView::from_raw(5),
            vk::ImageLayout::GENERAL,
        )];
        let set = vk::DescriptorSet::from_raw(3);
        let write = storage_image_write(set, 0, &infos);

        assert_eq!(write.dst_set, set);
        assert_eq!(write.dst_binding, 0);
        assert_eq!(write.descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(write.descriptor_count, 1);
    }

    #[test]
    fn test_image_info_has_no_sampler() {
        let info = image_info(vk::ImageView::null(), vk::ImageLayout::GENERAL);
        assert_eq!(info.sampler, vk::Sampler::null());
        assert_eq!(info.image_layout, vk::ImageLayout::GENERAL);
    }
}
