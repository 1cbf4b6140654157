//! Presentation surface contract and swapchain selection policy.
//!
//! [`PresentSurface`] is what the frame loop sees of a swapchain: acquire an image,
//! present it, rebuild when the window changes. The Vulkan implementation lives in
//! [`crate::vulkan::VulkanSwapchain`].
//!
//! The `choose_*` functions are the pure part of swapchain creation and are shared by
//! every backend.

use std::time::Duration;

use ash::vk;
use tracing::{debug, warn};

use crate::error::RhiResult;

/// Result of asking the surface for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available. `suboptimal` means it can be used but the swapchain no
    /// longer matches the surface exactly.
    Ready { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be rebuilt. The wait
    /// semaphore was not signaled.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be rebuilt before the next frame.
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// One presentable image and its color view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// Presentation engine for one window.
pub trait PresentSurface: Send {
    /// Requests the next image, signaling `signal` once it is ready for rendering.
    ///
    /// # Errors
    ///
    /// Staleness is reported through [`AcquireOutcome::OutOfDate`]; every other failure,
    /// including a timeout, is an error.
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome>;

    /// Queues image `index` for presentation once `wait` is signaled.
    fn present(&mut self, index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome>;

    fn image(&self, index: u32) -> Option<SwapchainImage>;

    fn image_count(&self) -> u32;

    fn extent(&self) -> vk::Extent2D;

    fn format(&self) -> vk::Format;

    /// Rebuilds the swapchain for `extent`. The caller guarantees no frame still uses
    /// the old images.
    fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<()>;
}

/// Format the renderer blits into. Prefers `B8G8R8A8_UNORM` in sRGB non-linear space,
/// otherwise takes the first format the surface offers.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        debug!("Selected surface format B8G8R8A8_UNORM / SRGB_NONLINEAR");
        return Some(format);
    }

    let first = formats.first().copied();
    if let Some(format) = first {
        warn!("Using first available surface format: {:?}", format.format);
    }
    first
}

/// Uses `preferred` when the surface supports it, FIFO otherwise. FIFO is always
/// available.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        debug!("Selected present mode {:?}", preferred);
        return preferred;
    }
    debug!("Present mode {:?} unavailable, using FIFO", preferred);
    vk::PresentModeKHR::FIFO
}

/// Uses the surface's current extent when it is defined, otherwise clamps the
/// requested size to the surface limits.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more image than the minimum, capped by the maximum when there is one.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_unorm() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let selected = choose_surface_format(&[format(vk::Format::R8G8B8A8_UNORM)]).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let clamp = |width, height| {
            let e = choose_extent(&capabilities, vk::Extent2D { width, height });
            (e.width, e.height)
        };
        assert_eq!(clamp(3000, 3000), (2000, 2000));
        assert_eq!(clamp(50, 50), (100, 100));
        assert_eq!(clamp(1700, 900), (1700, 900));
    }

    #[test]
    fn test_determine_image_count() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 2);

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unlimited), 3);
    }

    #[test]
    fn test_present_outcome_needs_rebuild() {
        assert!(!PresentOutcome::Presented.needs_rebuild());
        assert!(PresentOutcome::Suboptimal.needs_rebuild());
        assert!(PresentOutcome::OutOfDate.needs_rebuild());
    }
}
