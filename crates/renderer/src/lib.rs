//! Frame-execution core.
//!
//! This crate drives the GPU one frame at a time:
//! - Frame slots rotating through the GPU, with per-slot deferred teardown
//! - Submit/present protocol and the blocking immediate-submit path
//! - Background compute effects, the triangle pass and overlay hook
//! - Session lifetime ([`Engine`]) and the window-driven [`RenderLoop`]

pub mod effects;
pub mod engine;
pub mod error;
pub mod frame_slot;
pub mod ledger;
pub mod overlay;
pub mod pipelines;
pub mod record;
pub mod render_loop;
pub mod submit;

pub use effects::{BackgroundEffects, ComputeEffect, ComputePushConstants};
pub use engine::{Engine, FrameInfo, FrameOutcome};
pub use error::{FrameError, FrameResult, FrameStage};
pub use frame_slot::{FrameSlot, FrameSlots};
pub use ledger::{TeardownAction, TeardownLedger};
pub use overlay::{NoOverlay, OverlayCompositor, OverlayContext};
pub use render_loop::{EventSource, LoopEvent, LoopStats, RenderLoop};
pub use submit::ImmediateSubmitter;
