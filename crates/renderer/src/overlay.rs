//! Hook for UI drawn directly onto the swapchain image.
//!
//! The engine opens a rendering scope on the acquired swapchain image (contents
//! loaded, `COLOR_ATTACHMENT_OPTIMAL`) and hands it to the compositor once per frame.
//! Anything the compositor creates for this frame goes into the slot ledger, which is
//! flushed once the frame's fence has signaled.

use ember_rhi::command::CommandBuffer;
use ember_rhi::vk;

use crate::ledger::TeardownLedger;

/// What the compositor may touch while recording.
pub struct OverlayContext<'a> {
    pub command_buffer: &'a CommandBuffer,
    pub target_view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub frame_number: u64,
    /// Ledger of the frame slot being recorded.
    pub ledger: &'a mut TeardownLedger,
}

/// Records overlay draw commands into the frame.
pub trait OverlayCompositor: Send {
    fn compose(&mut self, ctx: &mut OverlayContext<'_>);
}

/// Draws nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOverlay;

impl OverlayCompositor for NoOverlay {
    fn compose(&mut self, _ctx: &mut OverlayContext<'_>) {}
}
