//! Window management using winit.
//!
//! This module provides window creation and brings up the Vulkan backend for it.

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use ember_core::{EngineConfig, Error, Result};
use ember_rhi::vk;
use ember_rhi::vulkan::{ContextDesc, VulkanContext};

/// A window wrapper that tracks its drawable size and creates the Vulkan context
/// presenting into it.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    /// Create a new window with the given dimensions and title.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", width, height);

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Current drawable size as a Vulkan extent.
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// A zero-area window cannot be presented to.
    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Update the stored dimensions (call this when handling resize events).
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Bring up instance, device and swapchain for this window.
    ///
    /// The window must outlive the returned context's swapchain.
    ///
    /// # Errors
    /// Returns [`Error::Window`] if the raw handles are unavailable, and
    /// [`Error::Vulkan`] if any backend step fails.
    pub fn create_context(&self, config: &EngineConfig) -> Result<VulkanContext> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        let desc = ContextDesc {
            extent: self.extent(),
            enable_validation: config.enable_validation,
            present_mode: vk::PresentModeKHR::FIFO,
        };

        let context = VulkanContext::new(display_handle.as_raw(), window_handle.as_raw(), &desc)
            .map_err(|e| Error::Vulkan(format!("Failed to initialize Vulkan: {}", e)))?;

        tracing::info!("Vulkan context created for window");
        Ok(context)
    }
}
