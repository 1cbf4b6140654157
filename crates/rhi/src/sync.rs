//! Synchronization primitives.
//!
//! - [`Semaphore`] orders work between queue operations on the GPU.
//! - [`Fence`] lets the CPU observe completion of submitted work.
//!
//! Both are owned wrappers that destroy their handle on drop. Dropping either while
//! the GPU still references it is undefined behavior, so owners idle the device first.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ember_rhi::DeviceRef;
//! use ember_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: DeviceRef) -> Result<(), ember_rhi::RhiError> {
//! let image_acquired = Semaphore::new(device.clone())?;
//! let frame_done = Fence::new(device.clone(), true)?;
//!
//! frame_done.wait(Duration::from_secs(1))?;
//! frame_done.reset()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::DeviceRef;

/// GPU-side binary semaphore.
pub struct Semaphore {
    device: DeviceRef,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: DeviceRef) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        debug!("Created semaphore {:?}", semaphore);
        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
        debug!("Destroyed semaphore {:?}", self.semaphore);
    }
}

/// CPU-waitable completion gate.
pub struct Fence {
    device: DeviceRef,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The device seam
    /// * `signaled` - Create the fence signaled, so the first wait on it returns at once.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: DeviceRef, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;
        debug!(
            "Created fence {:?} ({})",
            fence,
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`](crate::RhiError::Timeout) if `timeout` expires first,
    /// or the device error if the wait itself fails.
    pub fn wait(&self, timeout: Duration) -> RhiResult<()> {
        self.device.wait_for_fence(self.fence, timeout)
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence)
    }

    /// Non-blocking status query.
    ///
    /// # Errors
    ///
    /// Returns the device error, e.g. `ERROR_DEVICE_LOST`.
    pub fn is_signaled(&self) -> RhiResult<bool> {
        self.device.fence_signaled(self.fence)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
        debug!("Destroyed fence {:?}", self.fence);
    }
}
