//! Deferred GPU resource destruction.
//!
//! A [`DeletionQueue`] records resources as they are created and destroys
//! them in reverse order when flushed. A resource that depends on another is
//! registered after its dependency, so it is always destroyed first.
//!
//! Two scopes exist in the engine: one global queue flushed once at shutdown
//! after the device is idle, and one queue per frame slot flushed each time
//! that slot's fence has signaled.

use std::any::Any;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use tracing::{error, trace};

use crate::device::Device;

/// A resource waiting to be destroyed.
pub enum Disposable {
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    /// Destroying the pool frees every set allocated from it.
    DescriptorPool(vk::DescriptorPool),
    ImageView(vk::ImageView),
    /// An image and its memory; the memory is freed after the image is gone.
    Image {
        image: vk::Image,
        allocation: Allocation,
    },
    Sampler(vk::Sampler),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
    CommandPool(vk::CommandPool),
    /// An RAII object whose `Drop` performs the destruction.
    Owned(Box<dyn Any>),
}

impl Disposable {
    /// Wraps an RAII object so it is dropped when the queue flushes.
    pub fn owned<T: 'static>(value: T) -> Self {
        Disposable::Owned(Box::new(value))
    }

    /// Destroys the resource.
    ///
    /// # Safety
    ///
    /// The GPU must no longer use the resource and the handle must come from `device`.
    pub unsafe fn destroy(self, device: &Device) {
        let handle = device.handle();
        unsafe {
            match self {
                Disposable::Pipeline(pipeline) => handle.destroy_pipeline(pipeline, None),
                Disposable::PipelineLayout(layout) => handle.destroy_pipeline_layout(layout, None),
                Disposable::DescriptorSetLayout(layout) => {
                    handle.destroy_descriptor_set_layout(layout, None)
                }
                Disposable::DescriptorPool(pool) => handle.destroy_descriptor_pool(pool, None),
                Disposable::ImageView(view) => handle.destroy_image_view(view, None),
                Disposable::Image { image, allocation } => {
                    handle.destroy_image(image, None);
                    match device.allocator().lock() {
                        Ok(mut allocator) => {
                            if let Err(e) = allocator.free(allocation) {
                                error!("Failed to free image allocation: {}", e);
                            }
                        }
                        Err(_) => error!("Allocator lock poisoned, leaking image allocation"),
                    }
                }
                Disposable::Sampler(sampler) => handle.destroy_sampler(sampler, None),
                Disposable::Fence(fence) => handle.destroy_fence(fence, None),
                Disposable::Semaphore(semaphore) => handle.destroy_semaphore(semaphore, None),
                Disposable::CommandPool(pool) => handle.destroy_command_pool(pool, None),
                Disposable::Owned(value) => drop(value),
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Disposable::Pipeline(_) => "pipeline",
            Disposable::PipelineLayout(_) => "pipeline layout",
            Disposable::DescriptorSetLayout(_) => "descriptor set layout",
            Disposable::DescriptorPool(_) => "descriptor pool",
            Disposable::ImageView(_) => "image view",
            Disposable::Image { .. } => "image",
            Disposable::Sampler(_) => "sampler",
            Disposable::Fence(_) => "fence",
            Disposable::Semaphore(_) => "semaphore",
            Disposable::CommandPool(_) => "command pool",
            Disposable::Owned(_) => "owned object",
        }
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

macro_rules! impl_from_handle {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Disposable {
                fn from(handle: $ty) -> Self {
                    Disposable::$variant(handle)
                }
            }
        )*
    };
}

impl_from_handle! {
    vk::Pipeline => Pipeline,
    vk::PipelineLayout => PipelineLayout,
    vk::DescriptorSetLayout => DescriptorSetLayout,
    vk::DescriptorPool => DescriptorPool,
    vk::ImageView => ImageView,
    vk::Sampler => Sampler,
    vk::Fence => Fence,
    vk::Semaphore => Semaphore,
    vk::CommandPool => CommandPool,
}

/// LIFO queue of pending destructions.
#[derive(Default)]
pub struct DeletionQueue {
    entries: Vec<Disposable>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource for later destruction.
    pub fn push(&mut self, resource: impl Into<Disposable>) {
        self.entries.push(resource.into());
    }

    /// Destroys everything in reverse registration order and empties the queue.
    ///
    /// # Safety
    ///
    /// Every queued resource must be idle on the GPU and owned by `device`.
    pub unsafe fn flush(&mut self, device: &Device) {
        if self.entries.is_empty() {
            return;
        }
        trace!("Flushing deletion queue ({} entries)", self.entries.len());
        self.flush_with(|resource| unsafe { resource.destroy(device) });
    }

    /// Runs `fill` against this queue. If it fails, everything queued so far
    /// is handed to `destroy` newest-first before the error is returned.
    pub fn fill_or_unwind<T, E>(
        &mut self,
        fill: impl FnOnce(&mut Self) -> Result<T, E>,
        destroy: impl FnMut(Disposable),
    ) -> Result<T, E> {
        let result = fill(self);
        if result.is_err() {
            self.flush_with(destroy);
        }
        result
    }

    /// Drains the queue newest-first, handing each entry to `destroy`.
    pub fn flush_with(&mut self, mut destroy: impl FnMut(Disposable)) {
        while let Some(resource) = self.entries.pop() {
            destroy(resource);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            error!(
                "Deletion queue dropped with {} unflushed entries: {:?}",
                self.entries.len(),
                self.entries
            );
            // Owned entries still clean up through Drop; raw handles leak.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Tracked {
        id: u32,
        log: Rc<RefCell<Vec<u32>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.borrow_mut().push(self.id);
        }
    }

    fn raw(resource: &Disposable) -> u64 {
        match resource {
            Disposable::ImageView(view) => view.as_raw(),
            Disposable::Pipeline(pipeline) => pipeline.as_raw(),
            Disposable::Fence(fence) => fence.as_raw(),
            _ => 0,
        }
    }

    #[test]
    fn test_flush_runs_in_reverse_order() {
        let mut queue = DeletionQueue::new();
        queue.push(vk::ImageView::from_raw(1));
        queue.push(vk::Pipeline::from_raw(2));
        queue.push(vk::Fence::from_raw(3));
        assert_eq!(queue.len(), 3);

        let mut order = Vec::new();
        queue.flush_with(|resource| order.push(raw(&resource)));

        assert_eq!(order, vec![3, 2, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let mut queue = DeletionQueue::new();
        let mut calls = 0;
        queue.flush_with(|_| calls += 1);
        queue.flush_with(|_| calls += 1);
        assert_eq!(calls, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_second_flush_does_not_repeat() {
        let mut queue = DeletionQueue::new();
        queue.push(vk::Semaphore::from_raw(9));

        let mut calls = 0;
        queue.flush_with(|_| calls += 1);
        queue.flush_with(|_| calls += 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_owned_entries_drop_newest_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeletionQueue::new();
        for id in 0..3 {
            queue.push(Disposable::owned(Tracked {
                id,
                log: log.clone(),
            }));
        }

        // Dropping each handed-out entry mirrors what `destroy` does for Owned.
        queue.flush_with(drop);

        assert_eq!(*log.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn test_interleaved_push_after_flush() {
        let mut queue = DeletionQueue::new();
        queue.push(vk::Fence::from_raw(1));
        queue.flush_with(drop);

        queue.push(vk::Fence::from_raw(2));
        queue.push(vk::Fence::from_raw(3));
        let mut order = Vec::new();
        queue.flush_with(|resource| order.push(raw(&resource)));
        assert_eq!(order, vec![3, 2]);
    }

    #[test]
    fn test_failed_fill_destroys_what_it_queued() {
        let mut queue = DeletionQueue::new();
        let mut order = Vec::new();

        let result: Result<(), &str> = queue.fill_or_unwind(
            |queue| {
                queue.push(vk::ImageView::from_raw(1));
                queue.push(vk::Pipeline::from_raw(2));
                Err("pipeline creation failed")
            },
            |resource| order.push(raw(&resource)),
        );

        assert_eq!(result, Err("pipeline creation failed"));
        assert_eq!(order, vec![2, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_successful_fill_keeps_entries() {
        let mut queue = DeletionQueue::new();
        let mut calls = 0;

        let result: Result<u32, ()> = queue.fill_or_unwind(
            |queue| {
                queue.push(vk::Fence::from_raw(4));
                Ok(7)
            },
            |_| calls += 1,
        );

        assert_eq!(result, Ok(7));
        assert_eq!(calls, 0);
        assert_eq!(queue.len(), 1);
        queue.flush_with(drop);
    }

    #[test]
    fn test_debug_names_kind() {
        let resource = Disposable::from(vk::DescriptorPool::null());
        assert_eq!(format!("{:?}", resource), "descriptor pool");
    }
}
