//! `VkSwapchainKHR` behind the [`PresentSurface`] contract.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::{
    AcquireOutcome, PresentOutcome, PresentSurface, SwapchainImage, choose_extent,
    choose_present_mode, choose_surface_format, determine_image_count,
};
use crate::vulkan::device::VulkanDevice;
use crate::vulkan::surface::Surface;

/// Surface capabilities, formats and present modes for one GPU.
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(physical_device: vk::PhysicalDevice, surface: &Surface) -> RhiResult<Self> {
        let loader = surface.loader();
        let handle = surface.handle();
        let capabilities =
            unsafe { loader.get_physical_device_surface_capabilities(physical_device, handle)? };
        let formats =
            unsafe { loader.get_physical_device_surface_formats(physical_device, handle)? };
        let present_modes =
            unsafe { loader.get_physical_device_surface_present_modes(physical_device, handle)? };

        debug!(
            "Swapchain support: {} formats, {} present modes, min {} images",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count
        );
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Swapchain images are rendered to by blit, so they carry `TRANSFER_DST` as well as
/// `COLOR_ATTACHMENT` for overlays drawn straight onto them.
const IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Presentable images for one window surface.
pub struct VulkanSwapchain {
    device: Arc<VulkanDevice>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<SwapchainImage>,
    format: vk::Format,
    extent: vk::Extent2D,
    preferred_present_mode: vk::PresentModeKHR,
    // Declared last: the surface must outlive the swapchain built on it.
    surface: Surface,
}

impl VulkanSwapchain {
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the surface offers no formats, or the
    /// Vulkan error if creation fails.
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: Surface,
        extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> RhiResult<Self> {
        let loader =
            ash::khr::swapchain::Device::new(device.instance().handle(), device.handle());
        let mut swapchain = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent,
            preferred_present_mode,
            surface,
        };
        swapchain.build(extent)?;
        Ok(swapchain)
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Creates a swapchain for `requested`, retiring the current one if present.
    fn build(&mut self, requested: vk::Extent2D) -> RhiResult<()> {
        let support = SwapchainSupport::query(self.device.physical().device, &self.surface)?;
        let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
            RhiError::SwapchainError("surface reports no supported formats".into())
        })?;
        let present_mode =
            choose_present_mode(&support.present_modes, self.preferred_present_mode);
        let extent = choose_extent(&support.capabilities, requested);
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(IMAGE_USAGE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };

        self.destroy_images();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.format = surface_format.format;
        self.extent = extent;

        let images = unsafe { self.loader.get_swapchain_images(swapchain)? };
        for image in images {
            let view =
                self.device
                    .create_image_view(image, self.format, vk::ImageAspectFlags::COLOR)?;
            self.images.push(SwapchainImage { image, view });
        }
        info!("Swapchain created with {} images", self.images.len());
        Ok(())
    }

    fn destroy_images(&mut self) {
        for image in self.images.drain(..) {
            unsafe { self.device.handle().destroy_image_view(image.view, None) };
        }
    }
}

impl PresentSurface for VulkanSwapchain {
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, signal, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Ready { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                Err(RhiError::Timeout("swapchain image"))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn present(&mut self, index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [index];
        let wait_semaphores = [wait];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.device.queue();
        match unsafe { self.loader.queue_present(*queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn image(&self, index: u32) -> Option<SwapchainImage> {
        self.images.get(index as usize).copied()
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        info!(
            "Recreating swapchain for {}x{}",
            extent.width, extent.height
        );
        self.build(extent)
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        self.destroy_images();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
        } else {
            warn!("Swapchain dropped before it was created");
        }
        debug!("Swapchain destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_image_usage() {
        assert!(IMAGE_USAGE.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(IMAGE_USAGE.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(!IMAGE_USAGE.contains(vk::ImageUsageFlags::STORAGE));
    }

    #[test]
    fn test_swapchain_is_present_surface() {
        fn assert_surface<T: PresentSurface>() {}
        assert_surface::<VulkanSwapchain>();
    }
}
