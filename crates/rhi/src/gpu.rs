//! The device seam every higher layer talks through.
//!
//! [`GpuDevice`] is the logical execution context: a device, its graphics queue and a
//! memory allocator. The Vulkan implementation lives in [`crate::vulkan`]; a simulated
//! implementation for tests lives in `crate::testing`.
//!
//! Handles are plain `ash` handles. Ownership rules follow Vulkan: whoever created an
//! object destroys it, after the GPU has stopped using it.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::error::RhiResult;
use crate::image::{AllocatedImage, ImageDesc};
use crate::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc};

/// Shared handle to a device implementation.
pub type DeviceRef = Arc<dyn GpuDevice>;

/// A semaphore together with the pipeline stage it is waited on or signaled at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreSubmit {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags2,
}

impl SemaphoreSubmit {
    pub fn new(semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2) -> Self {
        Self { semaphore, stage }
    }
}

/// A single batched submission to the graphics queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSubmit {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<SemaphoreSubmit>,
    pub signal: Option<SemaphoreSubmit>,
    /// Fence signaled when the batch completes. May be null.
    pub fence: vk::Fence,
}

/// Parameters for a storage or sampled image descriptor write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub view: vk::ImageView,
    pub layout: vk::ImageLayout,
}

/// One recorded command.
///
/// Command recording goes through a single entry point so every backend interprets
/// the same small vocabulary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GpuCommand<'a> {
    /// Full-image layout transition with a conservative barrier.
    TransitionImage {
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &'a [vk::DescriptorSet],
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &'a [u8],
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    /// Open a dynamic rendering scope with one color attachment in
    /// `COLOR_ATTACHMENT_OPTIMAL`. `clear` of `None` loads existing contents.
    BeginRendering {
        color_view: vk::ImageView,
        extent: vk::Extent2D,
        clear: Option<[f32; 4]>,
    },
    EndRendering,
    /// Viewport covering `extent` from the origin, depth range 0..1.
    SetViewport {
        extent: vk::Extent2D,
    },
    /// Scissor covering `extent` from the origin.
    SetScissor {
        extent: vk::Extent2D,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    /// Scaled copy of the whole `src_extent` region onto the whole `dst_extent` region.
    /// `src` must be in `TRANSFER_SRC_OPTIMAL` and `dst` in `TRANSFER_DST_OPTIMAL`.
    BlitImage {
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    },
}

/// Logical execution context: device, graphics queue and memory allocator.
pub trait GpuDevice: Send + Sync {
    /// Human readable adapter name for logs.
    fn name(&self) -> &str;

    // Synchronization

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Block until `fence` is signaled. Returns `RhiError::Timeout` once `timeout` expires.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> RhiResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool>;
    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Commands

    /// Create a pool on the graphics queue family whose buffers can be reset individually.
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool>;
    /// Destroy a pool together with every buffer allocated from it.
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer>;
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;
    /// Begin recording for a single submission.
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;
    fn record(&self, cmd: vk::CommandBuffer, command: GpuCommand<'_>);
    fn submit(&self, submit: &QueueSubmit) -> RhiResult<()>;
    fn wait_idle(&self) -> RhiResult<()>;

    // Descriptors

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool>;
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet>;
    fn update_image_descriptor(&self, write: &ImageDescriptorWrite);

    // Shaders and pipelines

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<vk::Pipeline>;
    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> RhiResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Images

    /// Create a 2D image in device-local memory together with a full view.
    fn create_image(&self, desc: &ImageDesc) -> RhiResult<AllocatedImage>;
    fn destroy_image(&self, image: &AllocatedImage);
}
