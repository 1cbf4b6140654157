//! Window surface.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::vulkan::instance::Instance;

/// Owned `VkSurfaceKHR`. Keeps its instance alive.
///
/// The window the surface was created from must outlive it.
pub struct Surface {
    instance: Arc<Instance>,
    loader: ash::khr::surface::Instance,
    handle: vk::SurfaceKHR,
}

impl Surface {
    /// # Errors
    ///
    /// Returns [`RhiError::SurfaceError`] if the platform rejects the handles.
    pub fn new(
        instance: Arc<Instance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RhiResult<Self> {
        // SAFETY: the handles come from a live window that outlives the surface.
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)
        }
        .map_err(|e| RhiError::SurfaceError(format!("Failed to create Vulkan surface: {e}")))?;

        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        info!("Vulkan surface created");

        Ok(Self {
            instance,
            loader,
            handle,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for surface capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
        debug!("Vulkan surface destroyed");
    }
}
