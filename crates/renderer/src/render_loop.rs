//! Window-driven frame loop.
//!
//! Holds no GPU state of its own. Each iteration pumps window events, then either
//! draws a frame or, while the window is minimized, sleeps for the throttle interval.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use ember_core::{EngineConfig, Timer};
use ember_rhi::vk;

use crate::engine::{Engine, FrameOutcome};
use crate::error::FrameResult;

/// Interval between average frame time log lines.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Window events the loop reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopEvent {
    Quit,
    Minimized,
    Restored,
    Resized(vk::Extent2D),
}

/// Source of window events, pumped once per iteration.
///
/// The engine is passed along so input handlers can act on it (effect selection,
/// parameter edits) between frames.
pub trait EventSource {
    fn pump(&mut self, engine: &mut Engine, events: &mut Vec<LoopEvent>);
}

/// Counters reported when the loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub frames_presented: u64,
    pub swapchain_rebuilds: u64,
    pub minimized_iterations: u64,
}

pub struct RenderLoop {
    throttle: Duration,
    minimized: bool,
    timer: Timer,
}

impl RenderLoop {
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            minimized: false,
            timer: Timer::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.minimized_throttle)
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Runs until `events` reports [`LoopEvent::Quit`].
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Engine::draw_frame`]. The engine is left for the
    /// caller to clean up.
    pub fn run(&mut self, engine: &mut Engine, events: &mut dyn EventSource) -> FrameResult<LoopStats> {
        let mut stats = LoopStats::default();
        let mut pending = Vec::new();
        self.timer.reset();
        info!("Render loop started");

        loop {
            events.pump(engine, &mut pending);
            let mut quit = false;
            for event in pending.drain(..) {
                match event {
                    LoopEvent::Quit => quit = true,
                    LoopEvent::Minimized => {
                        debug!("Window minimized, rendering paused");
                        self.minimized = true;
                    }
                    LoopEvent::Restored => {
                        debug!("Window restored, rendering resumed");
                        self.minimized = false;
                    }
                    LoopEvent::Resized(extent) => engine.request_resize(extent),
                }
            }
            if quit {
                break;
            }

            stats.iterations += 1;
            if self.minimized {
                stats.minimized_iterations += 1;
                thread::sleep(self.throttle);
                continue;
            }

            match engine.draw_frame() {
                Ok(FrameOutcome::Presented(_)) => stats.frames_presented += 1,
                Ok(FrameOutcome::SwapchainRebuilt) => stats.swapchain_rebuilds += 1,
                Err(e) => {
                    error!("Render loop stopped: {e}");
                    return Err(e);
                }
            }

            if let Some(average) = self.timer.frame_finished(REPORT_INTERVAL) {
                info!(
                    "Frame time: {:.2} ms ({:.0} fps)",
                    average.as_secs_f64() * 1000.0,
                    1.0 / average.as_secs_f64().max(f64::EPSILON)
                );
            }
        }

        info!(
            "Render loop finished: {} frame(s), {} rebuild(s)",
            stats.frames_presented, stats.swapchain_rebuilds
        );
        Ok(stats)
    }
}

impl Default for RenderLoop {
    fn default() -> Self {
        Self::new(EngineConfig::default().minimized_throttle)
    }
}
