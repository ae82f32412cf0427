//! Frame slots and the per-frame draw sequence.
//!
//! The engine keeps [`FRAME_OVERLAP`] slots. Frame `n` always uses slot
//! `n % FRAME_OVERLAP`, so the CPU records frame `n + 1` while the GPU may
//! still be executing frame `n`. Each slot's fence is created signaled, so
//! the first wait on every slot returns immediately.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on render_fence   (previous use of this slot has finished)
//! 2. Flush the slot's deletion queue
//! 3. Reset render_fence
//! 4. Acquire swapchain image (signals image_available)
//! 5. Reset and record the command buffer
//! 6. Submit: wait image_available, signal render_finished + render_fence
//! 7. Present: wait render_finished
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use sim_rhi::command::{CommandBuffer, CommandPool, CommandRecorder};
use sim_rhi::deletion::DeletionQueue;
use sim_rhi::device::Device;
use sim_rhi::swapchain::Swapchain;
use sim_rhi::sync::{FOREVER, Fence, Semaphore};
use sim_rhi::{RhiError, RhiResult};

use crate::FRAME_OVERLAP;

/// Per-slot GPU objects.
pub struct FrameSlot {
    // The buffer is freed with its pool; keep it declared first.
    pub command_buffer: CommandBuffer,
    command_pool: CommandPool,
    pub image_available: Semaphore,
    pub render_finished: Semaphore,
    pub render_fence: Fence,
    /// Resources used by the frame last recorded in this slot.
    pub deletion_queue: DeletionQueue,
}

impl FrameSlot {
    /// # Errors
    ///
    /// Returns an error if any of the slot's objects cannot be created.
    pub fn new(device: Arc<Device>, queue_family: u32) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone(), queue_family)?;
        let command_buffer = CommandBuffer::new(device.clone(), &command_pool)?;

        Ok(Self {
            command_buffer,
            command_pool,
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            render_fence: Fence::new(device, true)?,
            deletion_queue: DeletionQueue::new(),
        })
    }

    /// Makes the fence signaled again if a frame was abandoned after the
    /// reset, so the next wait on this slot cannot block forever.
    ///
    /// # Errors
    ///
    /// Returns an error if the status query or fence creation fails.
    pub fn rearm_fence(&mut self, device: Arc<Device>) -> RhiResult<()> {
        if !self.render_fence.is_signaled()? {
            self.render_fence = Fence::new(device, true)?;
            debug!("Re-armed frame fence");
        }
        Ok(())
    }

    #[inline]
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool.handle()
    }
}

/// Fixed ring of [`FRAME_OVERLAP`] slots indexed by frame number.
pub struct FrameRing<S> {
    slots: Vec<S>,
}

impl<S> FrameRing<S> {
    /// Builds every slot with `make(slot_index)`.
    ///
    /// # Errors
    ///
    /// Returns the first error from `make`.
    pub fn new<E>(make: impl FnMut(usize) -> Result<S, E>) -> Result<Self, E> {
        let slots = (0..FRAME_OVERLAP).map(make).collect::<Result<Vec<_>, E>>()?;
        Ok(Self { slots })
    }

    /// Slot used by `frame_number`.
    #[inline]
    pub fn slot_index(&self, frame_number: u64) -> usize {
        (frame_number % self.slots.len() as u64) as usize
    }

    #[inline]
    pub fn current(&self, frame_number: u64) -> &S {
        &self.slots[self.slot_index(frame_number)]
    }

    #[inline]
    pub fn current_mut(&mut self, frame_number: u64) -> &mut S {
        let index = self.slot_index(frame_number);
        &mut self.slots[index]
    }

    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> &mut S {
        &mut self.slots[slot]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut S> {
        self.slots.iter_mut()
    }
}

/// Result of acquiring a swapchain image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

/// How a call to [`draw_frame`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The frame reached the screen but the swapchain must be rebuilt.
    PresentedStale,
    /// Acquire reported out-of-date; nothing was recorded or submitted.
    Skipped,
}

impl FrameOutcome {
    /// The frame counter advances only for frames that were submitted.
    pub fn advances_frame(self) -> bool {
        !matches!(self, FrameOutcome::Skipped)
    }

    pub fn swapchain_stale(self) -> bool {
        !matches!(self, FrameOutcome::Presented)
    }
}

/// GPU steps of one frame for one slot.
pub trait FrameBackend {
    type Recorder: CommandRecorder;
    type Error;

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), Self::Error>;
    fn flush_slot_deletions(&mut self, slot: usize);
    fn reset_slot_fence(&mut self, slot: usize) -> Result<(), Self::Error>;
    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, Self::Error>;
    /// Resets and begins the slot's command buffer.
    fn begin_recording(&mut self, slot: usize) -> Result<&mut Self::Recorder, Self::Error>;
    fn end_recording(&mut self, slot: usize) -> Result<(), Self::Error>;
    fn submit(&mut self, slot: usize) -> Result<(), Self::Error>;
    /// Returns true when the swapchain should be rebuilt.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<bool, Self::Error>;
}

/// Runs one frame on `slot` in the fixed order documented on this module.
///
/// `record` fills the command buffer for the acquired swapchain image.
///
/// # Errors
///
/// Any backend or recording error is returned as-is and the frame is
/// abandoned at that point.
pub fn draw_frame<B: FrameBackend>(
    backend: &mut B,
    slot: usize,
    record: impl FnOnce(&mut B::Recorder, u32) -> Result<(), B::Error>,
) -> Result<FrameOutcome, B::Error> {
    backend.wait_for_slot(slot)?;
    backend.flush_slot_deletions(slot);
    backend.reset_slot_fence(slot)?;

    let (image_index, acquire_suboptimal) = match backend.acquire_image(slot)? {
        Acquired::Image { index, suboptimal } => (index, suboptimal),
        Acquired::OutOfDate => {
            debug!("Swapchain out of date during acquire, skipping frame");
            return Ok(FrameOutcome::Skipped);
        }
    };

    let recorder = backend.begin_recording(slot)?;
    record(recorder, image_index)?;
    backend.end_recording(slot)?;

    backend.submit(slot)?;
    let present_stale = backend.present(slot, image_index)?;

    trace!("Frame presented on slot {} (image {})", slot, image_index);

    if acquire_suboptimal || present_stale {
        Ok(FrameOutcome::PresentedStale)
    } else {
        Ok(FrameOutcome::Presented)
    }
}

/// [`FrameBackend`] over the real device, swapchain and slots.
pub struct VulkanFrames<'a> {
    pub device: &'a Device,
    pub swapchain: &'a Swapchain,
    pub slots: &'a mut FrameRing<FrameSlot>,
}

impl FrameBackend for VulkanFrames<'_> {
    type Recorder = CommandBuffer;
    type Error = RhiError;

    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.slots.get_mut(slot).render_fence.wait(FOREVER)
    }

    fn flush_slot_deletions(&mut self, slot: usize) {
        // SAFETY: the slot's fence has signaled, so nothing queued here is in use.
        unsafe { self.slots.get_mut(slot).deletion_queue.flush(self.device) };
    }

    fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()> {
        self.slots.get_mut(slot).render_fence.reset()
    }

    fn acquire_image(&mut self, slot: usize) -> RhiResult<Acquired> {
        let semaphore = self.slots.get_mut(slot).image_available.handle();
        match self.swapchain.acquire_next_image(semaphore) {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn begin_recording(&mut self, slot: usize) -> RhiResult<&mut CommandBuffer> {
        let frame = self.slots.get_mut(slot);
        frame.command_buffer.reset()?;
        frame.command_buffer.begin()?;
        Ok(&mut frame.command_buffer)
    }

    fn end_recording(&mut self, slot: usize) -> RhiResult<()> {
        self.slots.get_mut(slot).command_buffer.end()
    }

    fn submit(&mut self, slot: usize) -> RhiResult<()> {
        let frame = self.slots.get_mut(slot);

        let command_infos = [frame.command_buffer.submit_info()];
        let wait_infos = [frame
            .image_available
            .submit_info(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signal_infos = [frame
            .render_finished
            .submit_info(vk::PipelineStageFlags2::ALL_GRAPHICS)];

        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&command_infos);

        unsafe {
            self.device
                .submit2_graphics(&[submit], frame.render_fence.handle())
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<bool> {
        let wait = self.slots.get_mut(slot).render_finished.handle();
        match self
            .swapchain
            .present(self.device.present_queue(), image_index, wait)
        {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    enum Event {
        Wait(usize),
        Flush(usize),
        ResetFence(usize),
        Acquire(usize),
        Begin(usize),
        Record(u32),
        End(usize),
        Submit(usize),
        Present(usize, u32),
    }

    type EventLog = Rc<RefCell<Vec<Event>>>;

    /// Records nothing but shares the backend's event log, so recording can
    /// be placed between the backend's own steps.
    struct LoggingRecorder {
        log: EventLog,
    }

    impl CommandRecorder for LoggingRecorder {
        fn transition_image(&mut self, _: vk::Image, _: vk::ImageLayout, _: vk::ImageLayout) {}
        fn copy_image_to_image(&mut self, _: vk::Image, _: vk::Image, _: vk::Extent2D, _: vk::Extent2D) {}
        fn clear_color_image(&mut self, _: vk::Image, _: vk::ImageLayout, _: [f32; 4]) {}
        fn bind_compute_pipeline(&mut self, _: vk::Pipeline) {}
        fn bind_compute_descriptor_set(&mut self, _: vk::PipelineLayout, _: vk::DescriptorSet) {}
        fn push_compute_constants(&mut self, _: vk::PipelineLayout, _: &[u8]) {}
        fn dispatch(&mut self, _: u32, _: u32, _: u32) {}
        fn begin_rendering(&mut self, _: vk::ImageView, _: vk::Extent2D) {}
        fn end_rendering(&mut self) {}
    }

    struct FakeBackend {
        log: EventLog,
        recorder: LoggingRecorder,
        acquire: Option<Acquired>,
        present_stale: bool,
        fail_submit: bool,
        next_image: u32,
    }

    impl Default for FakeBackend {
        fn default() -> Self {
            let log = EventLog::default();
            Self {
                recorder: LoggingRecorder { log: Rc::clone(&log) },
                log,
                acquire: None,
                present_stale: false,
                fail_submit: false,
                next_image: 0,
            }
        }
    }

    impl FakeBackend {
        fn events(&self) -> Vec<Event> {
            self.log.borrow().clone()
        }

        fn push(&self, event: Event) {
            self.log.borrow_mut().push(event);
        }
    }

    impl FrameBackend for FakeBackend {
        type Recorder = LoggingRecorder;
        type Error = &'static str;

        fn wait_for_slot(&mut self, slot: usize) -> Result<(), Self::Error> {
            self.push(Event::Wait(slot));
            Ok(())
        }
        fn flush_slot_deletions(&mut self, slot: usize) {
            self.push(Event::Flush(slot));
        }
        fn reset_slot_fence(&mut self, slot: usize) -> Result<(), Self::Error> {
            self.push(Event::ResetFence(slot));
            Ok(())
        }
        fn acquire_image(&mut self, slot: usize) -> Result<Acquired, Self::Error> {
            self.push(Event::Acquire(slot));
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            Ok(self.acquire.unwrap_or(Acquired::Image {
                index: image,
                suboptimal: false,
            }))
        }
        fn begin_recording(&mut self, slot: usize) -> Result<&mut LoggingRecorder, Self::Error> {
            self.push(Event::Begin(slot));
            Ok(&mut self.recorder)
        }
        fn end_recording(&mut self, slot: usize) -> Result<(), Self::Error> {
            self.push(Event::End(slot));
            Ok(())
        }
        fn submit(&mut self, slot: usize) -> Result<(), Self::Error> {
            self.push(Event::Submit(slot));
            if self.fail_submit {
                Err("ERROR_DEVICE_LOST")
            } else {
                Ok(())
            }
        }
        fn present(&mut self, slot: usize, image_index: u32) -> Result<bool, Self::Error> {
            self.push(Event::Present(slot, image_index));
            Ok(self.present_stale)
        }
    }

    fn run(backend: &mut FakeBackend, slot: usize) -> Result<FrameOutcome, &'static str> {
        draw_frame(backend, slot, |recorder, image| {
            recorder.log.borrow_mut().push(Event::Record(image));
            Ok(())
        })
    }

    #[test]
    fn test_draw_frame_order() {
        let mut backend = FakeBackend::default();
        let outcome = run(&mut backend, 1).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(
            backend.events(),
            vec![
                Event::Wait(1),
                Event::Flush(1),
                Event::ResetFence(1),
                Event::Acquire(1),
                Event::Begin(1),
                Event::Record(0),
                Event::End(1),
                Event::Submit(1),
                Event::Present(1, 0),
            ]
        );
    }

    #[test]
    fn test_wait_precedes_flush_and_reset() {
        let mut backend = FakeBackend::default();
        run(&mut backend, 0).unwrap();

        let events = backend.events();
        let pos = |e: Event| events.iter().position(|x| *x == e).unwrap();
        assert!(pos(Event::Wait(0)) < pos(Event::Flush(0)));
        assert!(pos(Event::Flush(0)) < pos(Event::ResetFence(0)));
        assert!(pos(Event::ResetFence(0)) < pos(Event::Submit(0)));
    }

    #[test]
    fn test_recording_happens_between_begin_and_end() {
        let mut backend = FakeBackend::default();
        run(&mut backend, 0).unwrap();

        let events = backend.events();
        let pos = |e: Event| events.iter().position(|x| *x == e).unwrap();
        assert!(pos(Event::Begin(0)) < pos(Event::Record(0)));
        assert!(pos(Event::Record(0)) < pos(Event::End(0)));
        assert!(pos(Event::End(0)) < pos(Event::Submit(0)));
    }

    #[test]
    fn test_recording_error_abandons_before_end() {
        let mut backend = FakeBackend::default();
        let result = draw_frame(&mut backend, 0, |_, _| Err("recording failed"));

        assert_eq!(result, Err("recording failed"));
        assert_eq!(backend.events().last(), Some(&Event::Begin(0)));
    }

    #[test]
    fn test_out_of_date_acquire_skips_frame() {
        let mut backend = FakeBackend {
            acquire: Some(Acquired::OutOfDate),
            ..Default::default()
        };
        let outcome = run(&mut backend, 0).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(!outcome.advances_frame());
        assert!(outcome.swapchain_stale());
        assert!(!backend.events().contains(&Event::Submit(0)));
        assert_eq!(backend.events().last(), Some(&Event::Acquire(0)));
    }

    #[test]
    fn test_suboptimal_acquire_still_presents() {
        let mut backend = FakeBackend {
            acquire: Some(Acquired::Image {
                index: 2,
                suboptimal: true,
            }),
            ..Default::default()
        };
        let outcome = run(&mut backend, 0).unwrap();

        assert_eq!(outcome, FrameOutcome::PresentedStale);
        assert!(outcome.advances_frame());
        assert!(backend.events().contains(&Event::Present(0, 2)));
    }

    #[test]
    fn test_stale_present_is_reported() {
        let mut backend = FakeBackend {
            present_stale: true,
            ..Default::default()
        };
        assert_eq!(run(&mut backend, 1).unwrap(), FrameOutcome::PresentedStale);
    }

    #[test]
    fn test_submit_failure_stops_before_present() {
        let mut backend = FakeBackend {
            fail_submit: true,
            ..Default::default()
        };
        assert_eq!(run(&mut backend, 0), Err("ERROR_DEVICE_LOST"));
        assert!(!backend.events().iter().any(|e| matches!(e, Event::Present(..))));
    }

    #[test]
    fn test_ring_slot_is_frame_mod_overlap() {
        let ring: FrameRing<usize> = FrameRing::new(|i| Ok::<_, ()>(i * 10)).unwrap();

        assert_eq!(ring.len(), FRAME_OVERLAP);
        for frame in 0..10u64 {
            let slot = ring.slot_index(frame);
            assert_eq!(slot, (frame % FRAME_OVERLAP as u64) as usize);
            assert_eq!(*ring.current(frame), slot * 10);
        }
    }

    #[test]
    fn test_ring_slots_alternate_between_frames() {
        let mut ring: FrameRing<Vec<u64>> = FrameRing::new(|_| Ok::<_, ()>(Vec::new())).unwrap();
        for frame in 0..6u64 {
            ring.current_mut(frame).push(frame);
        }
        assert_eq!(ring.current(0), &vec![0, 2, 4]);
        assert_eq!(ring.current(1), &vec![1, 3, 5]);
    }

    #[test]
    fn test_ring_construction_error_propagates() {
        let result: Result<FrameRing<u32>, &str> =
            FrameRing::new(|i| if i == 1 { Err("boom") } else { Ok(0) });
        assert_eq!(result.err(), Some("boom"));
    }
}
