//! Vulkan backend.
//!
//! [`VulkanContext::new`] brings up everything needed to render into a window:
//! instance, surface, GPU selection, logical device and swapchain.

mod device;
mod instance;
mod physical_device;
mod surface;
mod swapchain;

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::info;

pub use device::VulkanDevice;
pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, select_physical_device};
pub use surface::Surface;
pub use swapchain::{SwapchainSupport, VulkanSwapchain};

use crate::error::RhiResult;
use crate::swapchain::PresentSurface;

/// Options for bringing up the backend.
#[derive(Clone, Copy, Debug)]
pub struct ContextDesc {
    pub extent: vk::Extent2D,
    pub enable_validation: bool,
    /// Used when the surface supports it; FIFO otherwise.
    pub present_mode: vk::PresentModeKHR,
}

/// A device and a swapchain for one window.
pub struct VulkanContext {
    pub device: Arc<VulkanDevice>,
    pub swapchain: VulkanSwapchain,
}

impl VulkanContext {
    /// Initializes Vulkan for the window identified by `display` and `window`.
    ///
    /// The window must stay alive until the returned swapchain is dropped.
    ///
    /// # Errors
    ///
    /// Fails when no GPU supports Vulkan 1.3 with presentation to this surface, or
    /// any creation step is rejected.
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        desc: &ContextDesc,
    ) -> RhiResult<Self> {
        let instance = Arc::new(Instance::new(display, desc.enable_validation)?);
        let surface = Surface::new(instance.clone(), display, window)?;
        let physical = select_physical_device(instance.handle(), &surface)?;
        let device = Arc::new(VulkanDevice::new(instance, physical)?);
        let swapchain =
            VulkanSwapchain::new(device.clone(), surface, desc.extent, desc.present_mode)?;

        info!(
            "Vulkan context ready on '{}' ({}x{})",
            device.physical().device_name(),
            swapchain.extent().width,
            swapchain.extent().height
        );
        Ok(Self { device, swapchain })
    }
}
