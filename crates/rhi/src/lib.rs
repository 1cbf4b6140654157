//! Render hardware interface for ember.
//!
//! Everything above this crate talks to the GPU through [`GpuDevice`] and
//! [`swapchain::PresentSurface`]. The production implementations live in [`vulkan`];
//! with the `testing` feature, [`testing`] provides an in-process simulated GPU that
//! enforces the same fence and semaphore rules.
//!
//! Building blocks on top of the seam:
//! - [`sync`]: owned fences and semaphores
//! - [`command`]: command pools and recording helpers
//! - [`descriptor`]: layout builder and the bounded descriptor allocator
//! - [`pipeline`]: graphics pipeline builder and compute pipeline descriptions
//! - [`shader`]: SPIR-V loading
//! - [`image`]: device-local images

mod error;

pub mod command;
pub mod descriptor;
pub mod gpu;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{RhiError, RhiResult};
pub use gpu::{DeviceRef, GpuDevice};

// Re-export ash types that users might need
pub use ash::vk;
