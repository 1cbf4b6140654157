//! Engine session: owns every GPU object between [`Engine::init`] and
//! [`Engine::cleanup`] and drives one frame per [`Engine::draw_frame`].
//!
//! # Frame protocol
//!
//! 1. Wait on the slot fence (bounded, fatal on expiry) and flush the slot ledger
//! 2. Acquire a swapchain image; when out of date, rebuild and return without
//!    advancing the frame number
//! 3. Reset the fence, reset and record the slot's command buffer
//! 4. Submit, then present; a stale or suboptimal present marks the swapchain for
//!    rebuild before the next frame
//! 5. Advance the frame number
//!
//! Session objects live in one ledger flushed at shutdown, after every slot ledger.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use ember_core::EngineConfig;
use ember_rhi::command::CommandBuffer;
use ember_rhi::descriptor::{
    DescriptorAllocator, DescriptorLayoutBuilder, PoolSizeRatio, write_storage_image,
};
use ember_rhi::image::{AllocatedImage, ImageDesc};
use ember_rhi::swapchain::{AcquireOutcome, PresentSurface};
use ember_rhi::{DeviceRef, RhiError, vk};

use crate::effects::{BackgroundEffects, ComputeEffect};
use crate::error::{FrameError, FrameResult, FrameStage};
use crate::frame_slot::{FrameSlot, FrameSlots};
use crate::ledger::TeardownLedger;
use crate::overlay::{NoOverlay, OverlayCompositor};
use crate::pipelines::{TrianglePass, init_background_pipelines, init_triangle_pipeline};
use crate::record::{FramePasses, FrameTargets, draw_extent, record_frame};
use crate::submit::{ImmediateSubmitter, acquire_image, present_frame, submit_frame};

/// What one [`Engine::draw_frame`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and queued for presentation.
    Presented(FrameInfo),
    /// The swapchain was stale at acquire and has been rebuilt. Nothing was submitted
    /// and the frame number did not advance.
    SwapchainRebuilt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_number: u64,
    pub slot: usize,
    pub image_index: u32,
    /// Region of the draw image that was rendered and blitted.
    pub draw_extent: vk::Extent2D,
    /// The present reported the swapchain stale or suboptimal.
    pub rebuild_pending: bool,
}

/// Timeouts copied out of the config.
#[derive(Clone, Copy, Debug)]
struct Timeouts {
    frame: Duration,
    acquire: Duration,
}

// Field order is drop order for the RAII members; `cleanup` tears down explicitly.
struct Session {
    device: DeviceRef,
    slots: FrameSlots,
    immediate: ImmediateSubmitter,
    surface: Box<dyn PresentSurface>,
    ledger: TeardownLedger,
    draw_image: AllocatedImage,
    draw_image_set: vk::DescriptorSet,
    effects: BackgroundEffects,
    triangle: Option<TrianglePass>,
    overlay: Box<dyn OverlayCompositor>,
    timeouts: Timeouts,
    frame_number: u64,
    rebuild_requested: bool,
    requested_extent: Option<vk::Extent2D>,
}

/// Resources created through the session ledger.
struct SessionResources {
    draw_image: AllocatedImage,
    draw_image_set: vk::DescriptorSet,
    effects: BackgroundEffects,
    triangle: Option<TrianglePass>,
}

/// The frame-execution core for one window.
pub struct Engine {
    session: Option<Session>,
}

impl Engine {
    /// Brings up a session on `device`, presenting through `surface`.
    ///
    /// The surface is consumed: one surface backs at most one session. If any step
    /// fails, everything created so far is released before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`FrameError::Core`] for an invalid configuration
    /// - [`FrameError::Init`] when a required object cannot be created
    pub fn init<S>(config: &EngineConfig, device: DeviceRef, surface: S) -> FrameResult<Self>
    where
        S: PresentSurface + 'static,
    {
        config.validate()?;
        info!(
            "Initializing engine: draw image {}x{}, {} frame(s) in flight",
            config.window_width, config.window_height, config.frames_in_flight
        );

        let slots = FrameSlots::init(&device, config.frames_in_flight)?;
        let immediate = ImmediateSubmitter::new(device.clone(), config.immediate_timeout)
            .map_err(FrameError::init("immediate submitter"))?;

        let mut ledger = TeardownLedger::new();
        let resources = match create_resources(config, &device, surface.format(), &mut ledger) {
            Ok(resources) => resources,
            Err(e) => {
                error!("Engine initialization failed: {e}");
                let released = ledger.flush();
                debug!("Released {} partially created object(s)", released);
                slots.destroy();
                return Err(e);
            }
        };

        info!(
            "Engine initialized: {} swapchain image(s) at {}x{}",
            surface.image_count(),
            surface.extent().width,
            surface.extent().height
        );

        Ok(Self {
            session: Some(Session {
                device,
                slots,
                immediate,
                surface: Box::new(surface),
                ledger,
                draw_image: resources.draw_image,
                draw_image_set: resources.draw_image_set,
                effects: resources.effects,
                triangle: resources.triangle,
                overlay: Box::new(NoOverlay),
                timeouts: Timeouts {
                    frame: config.frame_timeout,
                    acquire: config.acquire_timeout,
                },
                frame_number: 0,
                rebuild_requested: false,
                requested_extent: None,
            }),
        })
    }

    /// Replaces the overlay compositor drawn on top of every frame.
    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayCompositor>) {
        if let Some(session) = self.session.as_mut() {
            session.overlay = overlay;
        }
    }

    /// Renders and presents one frame.
    ///
    /// # Errors
    ///
    /// [`FrameError::Fatal`] for a fence or acquire timeout, a lost device, or any other
    /// unrecoverable step; [`FrameError::NotInitialized`] after cleanup.
    pub fn draw_frame(&mut self) -> FrameResult<FrameOutcome> {
        self.session_mut()?.draw_frame()
    }

    /// Schedules a swapchain rebuild at `extent` before the next frame.
    ///
    /// Zero-area extents are ignored; a minimized window is handled by not drawing.
    pub fn request_resize(&mut self, extent: vk::Extent2D) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if extent.width == 0 || extent.height == 0 {
            debug!("Ignoring resize to {}x{}", extent.width, extent.height);
            return;
        }
        session.requested_extent = Some(extent);
        session.rebuild_requested = true;
    }

    /// Records and runs one-off GPU work, blocking until it completes.
    pub fn immediate_submit<F>(&self, record: F) -> FrameResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        self.session()?.immediate.submit(record)
    }

    /// Tears the session down. Safe to call more than once.
    ///
    /// The device is idled first; if that fails teardown still runs and the error is
    /// returned afterwards.
    pub fn cleanup(&mut self) -> FrameResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        info!(
            "Shutting down engine after {} frame(s)",
            session.frame_number
        );

        let idle = session.device.wait_idle();
        if let Err(e) = &idle {
            warn!("Device did not go idle before teardown: {e}");
        }

        session.slots.destroy();
        drop(session.immediate);
        let released = session.ledger.flush();
        debug!("Session ledger released {} object(s)", released);
        drop(session.surface);

        info!("Engine shut down");
        idle.map_err(FrameError::fatal(FrameStage::Shutdown))
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Number of frames presented so far; also the number of the next frame.
    pub fn frame_number(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.frame_number)
    }

    /// Slot the next frame will use.
    pub fn current_frame(&self) -> Option<&FrameSlot> {
        let session = self.session.as_ref()?;
        Some(session.slots.current(session.frame_number))
    }

    /// Mutable access to the next frame's slot, e.g. to defer releases into its ledger.
    pub fn current_frame_mut(&mut self) -> Option<&mut FrameSlot> {
        let session = self.session.as_mut()?;
        Some(session.slots.current_mut(session.frame_number))
    }

    pub fn frames_in_flight(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.slots.len())
    }

    pub fn effects(&self) -> Option<&BackgroundEffects> {
        self.session.as_ref().map(|s| &s.effects)
    }

    pub fn active_effect(&self) -> Option<&ComputeEffect> {
        self.session.as_ref()?.effects.active()
    }

    /// The selected effect, for editing its push constants in place.
    pub fn active_effect_mut(&mut self) -> Option<&mut ComputeEffect> {
        self.session.as_mut()?.effects.active_mut()
    }

    /// # Errors
    ///
    /// [`FrameError::NoSuchEffect`] when `index` is out of range; the selection is kept.
    pub fn select_effect(&mut self, index: usize) -> FrameResult<&ComputeEffect> {
        let effect = self.session_mut()?.effects.select(index)?;
        info!("Background effect: {}", effect.name);
        Ok(effect)
    }

    pub fn select_next_effect(&mut self) -> Option<&ComputeEffect> {
        let effect = self.session.as_mut()?.effects.select_next()?;
        info!("Background effect: {}", effect.name);
        Some(effect)
    }

    pub fn has_triangle_pass(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.triangle.is_some())
    }

    pub fn draw_image(&self) -> Option<&AllocatedImage> {
        self.session.as_ref().map(|s| &s.draw_image)
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.session.as_ref().map(|s| s.surface.extent())
    }

    fn session(&self) -> FrameResult<&Session> {
        self.session.as_ref().ok_or(FrameError::NotInitialized)
    }

    fn session_mut(&mut self) -> FrameResult<&mut Session> {
        self.session.as_mut().ok_or(FrameError::NotInitialized)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("Engine dropped without cleanup, tearing down now");
            if let Err(e) = self.cleanup() {
                error!("Teardown on drop failed: {e}");
            }
        }
    }
}

impl Session {
    fn draw_frame(&mut self) -> FrameResult<FrameOutcome> {
        if self.rebuild_requested {
            self.rebuild_swapchain()?;
        }

        let frame_number = self.frame_number;
        let slot_index = self.slots.slot_index(frame_number);
        let slot = self.slots.current_mut(frame_number);

        slot.wait(self.timeouts.frame)?;
        let reclaimed = slot.reclaim();
        if reclaimed > 0 {
            debug!("Frame {}: released {} deferred object(s)", frame_number, reclaimed);
        }

        let (image_index, suboptimal) =
            match acquire_image(self.surface.as_mut(), slot, self.timeouts.acquire)? {
                AcquireOutcome::Ready { index, suboptimal } => (index, suboptimal),
                AcquireOutcome::OutOfDate => {
                    self.rebuild_swapchain()?;
                    return Ok(FrameOutcome::SwapchainRebuilt);
                }
            };

        // Reset only once an image is held, so a failed acquire leaves the fence
        // signaled for the retry.
        slot.fence()
            .reset()
            .map_err(FrameError::fatal(FrameStage::Record))?;

        let swapchain_image = self.surface.image(image_index).ok_or_else(|| {
            FrameError::fatal(FrameStage::Acquire)(RhiError::InvalidHandle(format!(
                "swapchain image index {image_index} out of range"
            )))
        })?;
        let swapchain_extent = self.surface.extent();
        let targets = FrameTargets {
            draw_image: self.draw_image,
            draw_extent: draw_extent(self.draw_image.extent_2d(), swapchain_extent),
            swapchain_image,
            swapchain_extent,
        };

        let cmd = slot.command_buffer().clone();
        cmd.reset().map_err(FrameError::fatal(FrameStage::Record))?;
        cmd.begin().map_err(FrameError::fatal(FrameStage::Record))?;
        record_frame(
            &cmd,
            &targets,
            FramePasses {
                background: self.effects.active(),
                draw_image_set: self.draw_image_set,
                triangle: self.triangle.as_ref(),
                overlay: self.overlay.as_mut(),
            },
            slot.ledger_mut(),
            frame_number,
        );
        cmd.end().map_err(FrameError::fatal(FrameStage::Record))?;

        submit_frame(self.device.as_ref(), slot)?;
        let presented = present_frame(self.surface.as_mut(), slot, image_index)?;

        let rebuild_pending = suboptimal || presented.needs_rebuild();
        if rebuild_pending {
            self.rebuild_requested = true;
        }
        self.frame_number += 1;

        Ok(FrameOutcome::Presented(FrameInfo {
            frame_number,
            slot: slot_index,
            image_index,
            draw_extent: targets.draw_extent,
            rebuild_pending,
        }))
    }

    fn rebuild_swapchain(&mut self) -> FrameResult<()> {
        self.device
            .wait_idle()
            .map_err(FrameError::fatal(FrameStage::Rebuild))?;
        let extent = self
            .requested_extent
            .take()
            .unwrap_or_else(|| self.surface.extent());
        self.surface
            .recreate(extent)
            .map_err(FrameError::fatal(FrameStage::Rebuild))?;
        self.rebuild_requested = false;
        info!(
            "Swapchain rebuilt at {}x{} ({} image(s))",
            extent.width,
            extent.height,
            self.surface.image_count()
        );
        Ok(())
    }
}

/// Draw image, descriptors and pipelines. Every object is recorded in `ledger`.
fn create_resources(
    config: &EngineConfig,
    device: &DeviceRef,
    swapchain_format: vk::Format,
    ledger: &mut TeardownLedger,
) -> FrameResult<SessionResources> {
    let draw_image = device
        .create_image(&ImageDesc::draw_target(config.window_width, config.window_height))
        .map_err(FrameError::init("draw image"))?;
    {
        let device = device.clone();
        ledger.record(move || device.destroy_image(&draw_image));
    }
    debug!(
        "Draw image {:?}: {}x{} {:?}",
        draw_image.image, config.window_width, config.window_height, draw_image.format
    );

    let mut builder = DescriptorLayoutBuilder::new();
    builder.add_binding(0, vk::DescriptorType::STORAGE_IMAGE);
    let draw_image_layout = builder
        .build(device.as_ref(), vk::ShaderStageFlags::COMPUTE)
        .map_err(FrameError::init("draw image descriptor layout"))?;
    {
        let device = device.clone();
        ledger.record(move || device.destroy_descriptor_set_layout(draw_image_layout));
    }

    let mut allocator = DescriptorAllocator::init_pool(
        device.clone(),
        config.descriptor_max_sets,
        &[PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0)],
    )
    .map_err(FrameError::init("descriptor pool"))?;
    let draw_image_set = allocator.allocate(draw_image_layout);
    ledger.record(move || allocator.destroy_pool());
    let draw_image_set = draw_image_set.map_err(FrameError::init("draw image descriptor set"))?;
    write_storage_image(device.as_ref(), draw_image_set, 0, draw_image.view);

    let effects = init_background_pipelines(device, &config.shader_dir, draw_image_layout, ledger)?;
    let triangle = init_triangle_pipeline(device, &config.shader_dir, draw_image.format, ledger)?;
    debug!(
        "Presenting as {:?}; triangle pass {}",
        swapchain_format,
        if triangle.is_some() { "enabled" } else { "disabled" }
    );

    Ok(SessionResources {
        draw_image,
        draw_image_set,
        effects,
        triangle,
    })
}
