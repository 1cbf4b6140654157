//! Queue submission and presentation.
//!
//! The per-frame steps ([`acquire_image`], [`submit_frame`], [`present_frame`]) each
//! perform one protocol step for a [`FrameSlot`] and classify the outcome.
//! [`ImmediateSubmitter`] is the blocking side path for one-off GPU work such as
//! uploads, outside the frame loop.

use std::time::Duration;

use tracing::{debug, trace};

use ember_rhi::command::{CommandBuffer, CommandPool};
use ember_rhi::gpu::{QueueSubmit, SemaphoreSubmit};
use ember_rhi::swapchain::{AcquireOutcome, PresentOutcome, PresentSurface};
use ember_rhi::sync::Fence;
use ember_rhi::{DeviceRef, GpuDevice, RhiResult, vk};

use crate::error::{FrameError, FrameResult, FrameStage};
use crate::frame_slot::FrameSlot;

/// Requests the next swapchain image, signaling the slot's `image_acquired`.
///
/// # Errors
///
/// Everything except staleness is fatal, including a timeout.
pub fn acquire_image(
    surface: &mut dyn PresentSurface,
    slot: &FrameSlot,
    timeout: Duration,
) -> FrameResult<AcquireOutcome> {
    let outcome = surface
        .acquire_next_image(slot.image_acquired().handle(), timeout)
        .map_err(FrameError::fatal(FrameStage::Acquire))?;
    if outcome == AcquireOutcome::OutOfDate {
        debug!("Swapchain out of date during acquire");
    }
    Ok(outcome)
}

/// Submits the slot's command buffer.
///
/// The batch waits for `image_acquired` before color output, signals
/// `render_complete` once all graphics work is done, and signals the slot fence.
pub fn submit_frame(device: &dyn GpuDevice, slot: &FrameSlot) -> FrameResult<()> {
    let submit = QueueSubmit {
        command_buffer: slot.command_buffer().handle(),
        wait: Some(SemaphoreSubmit::new(
            slot.image_acquired().handle(),
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        )),
        signal: Some(SemaphoreSubmit::new(
            slot.render_complete().handle(),
            vk::PipelineStageFlags2::ALL_GRAPHICS,
        )),
        fence: slot.fence().handle(),
    };
    device
        .submit(&submit)
        .map_err(FrameError::fatal(FrameStage::Submit))
}

/// Queues `image_index` for presentation after `render_complete`.
///
/// Out-of-date and suboptimal are reported, not raised; the frame still counts.
pub fn present_frame(
    surface: &mut dyn PresentSurface,
    slot: &FrameSlot,
    image_index: u32,
) -> FrameResult<PresentOutcome> {
    let outcome = surface
        .present(image_index, slot.render_complete().handle())
        .map_err(FrameError::fatal(FrameStage::Present))?;
    if outcome.needs_rebuild() {
        debug!("Present reported {:?}, swapchain marked for rebuild", outcome);
    }
    Ok(outcome)
}

/// Blocking one-shot command submission with its own pool, buffer and fence.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use ember_renderer::ImmediateSubmitter;
/// # fn example(device: ember_rhi::DeviceRef) -> ember_renderer::FrameResult<()> {
/// let immediate = ImmediateSubmitter::new(device, Duration::from_secs(10))
///     .map_err(ember_renderer::FrameError::init("immediate submitter"))?;
/// immediate.submit(|cmd| cmd.dispatch(1, 1, 1))?;
/// # Ok(())
/// # }
/// ```
pub struct ImmediateSubmitter {
    device: DeviceRef,
    command_buffer: CommandBuffer,
    _command_pool: CommandPool,
    fence: Fence,
    timeout: Duration,
}

impl ImmediateSubmitter {
    /// # Errors
    ///
    /// Returns an error if the pool, buffer or fence cannot be created.
    pub fn new(device: DeviceRef, timeout: Duration) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone())?;
        let command_buffer = command_pool.allocate_command_buffer()?;
        let fence = Fence::new(device.clone(), true)?;
        debug!("Immediate submitter ready");

        Ok(Self {
            device,
            command_buffer,
            _command_pool: command_pool,
            fence,
            timeout,
        })
    }

    /// Records `record` into the dedicated buffer, submits it and blocks until the GPU
    /// has finished.
    ///
    /// # Errors
    ///
    /// Any failure, including the fence wait expiring, is
    /// [`FrameError::Fatal`] at [`FrameStage::Immediate`].
    pub fn submit<F>(&self, record: F) -> FrameResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        self.submit_inner(record)
            .map_err(FrameError::fatal(FrameStage::Immediate))
    }

    fn submit_inner<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        let cmd = &self.command_buffer;
        // The previous submit waited on the fence, so nothing here is in flight.
        self.fence.reset()?;
        cmd.reset()?;
        cmd.begin()?;
        record(cmd);
        cmd.end()?;

        self.device.submit(&QueueSubmit {
            command_buffer: cmd.handle(),
            wait: None,
            signal: None,
            fence: self.fence.handle(),
        })?;
        self.fence.wait(self.timeout)?;
        trace!("Immediate submit complete");
        Ok(())
    }
}
