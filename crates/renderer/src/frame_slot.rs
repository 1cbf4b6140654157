//! Per-frame resources rotating through the GPU.
//!
//! The engine keeps N [`FrameSlot`]s and uses slot `frame_number % N` for each frame,
//! so the CPU records frame K+1 while the GPU still executes frame K.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on fence              (previous use of this slot has finished)
//! 2. Flush ledger               (release what that frame used)
//! 3. Acquire swapchain image    (signals image_acquired)
//! 4. Reset fence, record commands into command_buffer
//! 5. Submit                     (waits image_acquired, signals render_complete + fence)
//! 6. Present                    (waits render_complete)
//! ```
//!
//! A slot's command buffer is only reset after step 1, so it is never touched while
//! its previous submission executes.

use std::time::Duration;

use tracing::{debug, info};

use ember_core::Error as CoreError;
use ember_rhi::command::{CommandBuffer, CommandPool};
use ember_rhi::sync::{Fence, Semaphore};
use ember_rhi::{DeviceRef, RhiResult};

use crate::error::{FrameError, FrameResult, FrameStage};
use crate::ledger::TeardownLedger;

/// Slot used for `frame_number` when `count` slots rotate.
#[inline]
pub fn slot_index(frame_number: u64, count: usize) -> usize {
    (frame_number % count as u64) as usize
}

/// Resources owned by one frame in flight.
pub struct FrameSlot {
    // The buffer is freed with its pool; it holds no resources of its own.
    command_buffer: CommandBuffer,
    command_pool: CommandPool,
    image_acquired: Semaphore,
    render_complete: Semaphore,
    fence: Fence,
    ledger: TeardownLedger,
}

impl FrameSlot {
    fn new(device: &DeviceRef) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone())?;
        let command_buffer = command_pool.allocate_command_buffer()?;
        let image_acquired = Semaphore::new(device.clone())?;
        let render_complete = Semaphore::new(device.clone())?;
        // Signaled, so the first wait on a fresh slot returns at once.
        let fence = Fence::new(device.clone(), true)?;

        Ok(Self {
            command_buffer,
            command_pool,
            image_acquired,
            render_complete,
            fence,
            ledger: TeardownLedger::new(),
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    /// Signaled by acquire, waited on by the submit.
    #[inline]
    pub fn image_acquired(&self) -> &Semaphore {
        &self.image_acquired
    }

    /// Signaled by the submit, waited on by present.
    #[inline]
    pub fn render_complete(&self) -> &Semaphore {
        &self.render_complete
    }

    #[inline]
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Cleanup for objects used by the frame currently recorded in this slot.
    #[inline]
    pub fn ledger(&self) -> &TeardownLedger {
        &self.ledger
    }

    #[inline]
    pub fn ledger_mut(&mut self) -> &mut TeardownLedger {
        &mut self.ledger
    }

    /// Blocks until the slot's previous submission has finished.
    pub(crate) fn wait(&self, timeout: Duration) -> FrameResult<()> {
        self.fence.wait(timeout).map_err(FrameError::fatal(FrameStage::Wait))
    }

    /// Releases what the slot's previous frame used. Only valid after [`wait`](Self::wait).
    pub(crate) fn reclaim(&mut self) -> usize {
        self.ledger.flush()
    }

    #[inline]
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }
}

/// Fixed set of frame slots, created once and reused for the whole session.
pub struct FrameSlots {
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    /// Creates `count` slots.
    ///
    /// # Errors
    ///
    /// Rejects `count == 0`; returns [`FrameError::Init`] if any object cannot be
    /// created. Objects created before the failure are released.
    pub fn init(device: &DeviceRef, count: usize) -> FrameResult<Self> {
        if count == 0 {
            return Err(CoreError::Config("at least one frame slot is required".into()).into());
        }

        let slots = (0..count)
            .map(|i| {
                let slot = FrameSlot::new(device)?;
                debug!("Created frame slot {}", i);
                Ok(slot)
            })
            .collect::<RhiResult<Vec<_>>>()
            .map_err(FrameError::init("frame slots"))?;

        info!("Frame slots created: {} in flight", count);
        Ok(Self { slots })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the slot that serves `frame_number`.
    #[inline]
    pub fn slot_index(&self, frame_number: u64) -> usize {
        slot_index(frame_number, self.slots.len())
    }

    #[inline]
    pub fn current(&self, frame_number: u64) -> &FrameSlot {
        &self.slots[self.slot_index(frame_number)]
    }

    #[inline]
    pub fn current_mut(&mut self, frame_number: u64) -> &mut FrameSlot {
        let index = self.slot_index(frame_number);
        &mut self.slots[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSlot> {
        self.slots.iter()
    }

    /// Flushes every slot's ledger, then destroys the slots' objects.
    ///
    /// The caller idles the device first.
    pub fn destroy(mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let flushed = slot.ledger.flush();
            debug!("Destroying frame slot {} ({} deferred action(s))", i, flushed);
        }
        self.slots.clear();
        info!("Frame slots destroyed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use ember_rhi::testing::FakeGpu;

    fn slots(count: usize) -> (Arc<FakeGpu>, FrameSlots) {
        let gpu = Arc::new(FakeGpu::new());
        let device: DeviceRef = gpu.clone();
        let slots = FrameSlots::init(&device, count).unwrap();
        (gpu, slots)
    }

    #[test]
    fn test_slot_index_wraps() {
        for count in 2..=4 {
            for frame in 0..64u64 {
                assert_eq!(
                    slot_index(frame, count),
                    slot_index(frame + count as u64, count)
                );
                assert!(slot_index(frame, count) < count);
            }
        }
        assert_eq!(slot_index(u64::MAX, 2), 1);
    }

    #[test]
    fn test_init_creates_independent_slots() {
        let (gpu, slots) = slots(2);
        assert_eq!(slots.len(), 2);
        // Pool, semaphore x2, fence per slot.
        assert_eq!(gpu.live_objects(), 8);

        let a = slots.current(0);
        let b = slots.current(1);
        assert_ne!(a.command_pool().handle(), b.command_pool().handle());
        assert_ne!(a.command_buffer().handle(), b.command_buffer().handle());
        assert_ne!(a.fence().handle(), b.fence().handle());
        assert_ne!(a.image_acquired().handle(), a.render_complete().handle());
        assert!(a.fence().is_signaled().unwrap());
        assert!(a.ledger().is_empty());
    }

    #[test]
    fn test_zero_slots_rejected() {
        let device: DeviceRef = Arc::new(FakeGpu::new());
        assert!(matches!(
            FrameSlots::init(&device, 0),
            Err(FrameError::Core(_))
        ));
    }

    #[test]
    fn test_current_follows_frame_number() {
        let (_gpu, slots) = slots(3);
        let fence_of = |frame| slots.current(frame).fence().handle();
        assert_eq!(fence_of(0), fence_of(3));
        assert_eq!(fence_of(1), fence_of(4));
        assert_ne!(fence_of(0), fence_of(1));
    }

    #[test]
    fn test_destroy_flushes_ledgers_then_releases() {
        let (gpu, mut slots) = slots(2);
        let flushed = Arc::new(AtomicUsize::new(0));
        for frame in 0..2 {
            let counter = flushed.clone();
            slots.current_mut(frame).ledger_mut().record(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        slots.destroy();
        assert_eq!(flushed.load(Ordering::SeqCst), 2);
        assert_eq!(gpu.live_objects(), 0);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn test_fresh_slot_wait_returns() {
        let (_gpu, slots) = slots(2);
        slots.current(0).wait(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn test_frame_slots_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameSlot>();
        assert_send::<FrameSlots>();
    }
}
