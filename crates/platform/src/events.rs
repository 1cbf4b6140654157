//! winit event loop pumped from the render loop.
//!
//! The render loop owns the thread, so the event loop is driven in pull mode through
//! `pump_app_events` rather than `run_app`.

use std::time::Duration;

use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::WindowId;

use ember_core::{EngineConfig, Error, Result};
use ember_renderer::{Engine, EventSource, LoopEvent};
use ember_rhi::vk;

use crate::input::InputState;
use crate::window::Window;

/// Pumps allowed for the platform to deliver `resumed` and open the window.
const STARTUP_PUMPS: u32 = 100;

/// Called after every pump with the input gathered since the previous one.
pub type InputHandler = Box<dyn FnMut(&InputState, &mut Engine)>;

/// Owns the event loop and the window, and feeds window events to the render loop.
pub struct Platform {
    event_loop: EventLoop<()>,
    state: PlatformState,
    input_handler: Option<InputHandler>,
}

impl Platform {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;
        Ok(Self {
            event_loop,
            state: PlatformState {
                title: config.title.clone(),
                width: config.window_width,
                height: config.window_height,
                window: None,
                window_error: None,
                input: InputState::new(),
                pending: Vec::new(),
                minimized: false,
            },
            input_handler: None,
        })
    }

    /// Pumps the event loop until the window exists.
    ///
    /// # Errors
    /// Returns the window creation error, or [`Error::Window`] if the event loop exits
    /// or never resumes.
    pub fn open_window(&mut self) -> Result<&Window> {
        for _ in 0..STARTUP_PUMPS {
            if self.state.window.is_some() {
                break;
            }
            let status = self
                .event_loop
                .pump_app_events(Some(Duration::from_millis(10)), &mut self.state);
            if let Some(e) = self.state.window_error.take() {
                return Err(e);
            }
            if let PumpStatus::Exit(code) = status {
                return Err(Error::Window(format!(
                    "event loop exited with code {code} before the window opened"
                )));
            }
        }
        self.state
            .window
            .as_ref()
            .ok_or_else(|| Error::Window("window was never created".into()))
    }

    pub fn set_input_handler(&mut self, handler: impl FnMut(&InputState, &mut Engine) + 'static) {
        self.input_handler = Some(Box::new(handler));
    }
}

impl EventSource for Platform {
    fn pump(&mut self, engine: &mut Engine, events: &mut Vec<LoopEvent>) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
        if let PumpStatus::Exit(code) = status {
            debug!("Event loop exited with code {}", code);
            self.state.pending.push(LoopEvent::Quit);
        }

        if let Some(handler) = self.input_handler.as_mut() {
            handler(&self.state.input, engine);
        }
        self.state.input.begin_frame();
        events.append(&mut self.state.pending);
    }
}

struct PlatformState {
    title: String,
    width: u32,
    height: u32,
    window: Option<Window>,
    window_error: Option<Error>,
    input: InputState,
    pending: Vec<LoopEvent>,
    minimized: bool,
}

impl ApplicationHandler for PlatformState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.window_error.is_some() {
            return;
        }
        match Window::new(event_loop, self.width, self.height, &self.title) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                error!("Failed to create window: {}", e);
                self.window_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.pending.push(LoopEvent::Quit);
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                let events = resize_events(&mut self.minimized, size.width, size.height);
                self.pending.extend(events);
            }
            WindowEvent::KeyboardInput { event, .. } => self.input.on_key_event(&event),
            WindowEvent::Focused(false) => self.input.release_all(),
            _ => {}
        }
    }
}

/// Loop events implied by a new drawable size.
///
/// A zero-area size minimizes; the first non-zero size after that restores.
fn resize_events(minimized: &mut bool, width: u32, height: u32) -> Vec<LoopEvent> {
    if width == 0 || height == 0 {
        if *minimized {
            return Vec::new();
        }
        *minimized = true;
        return vec![LoopEvent::Minimized];
    }

    let mut events = Vec::with_capacity(2);
    if *minimized {
        *minimized = false;
        events.push(LoopEvent::Restored);
    }
    events.push(LoopEvent::Resized(vk::Extent2D { width, height }));
    events
}
