//! Command pools and command buffer recording.
//!
//! - [`CommandPool`] owns a pool on the graphics queue family whose buffers can be
//!   reset individually.
//! - [`CommandBuffer`] is a thin recording handle. Every helper forwards one
//!   [`GpuCommand`] to the device, so the same recording code drives the Vulkan backend
//!   and the simulated one.
//!
//! # Example
//!
//! ```no_run
//! use ember_rhi::DeviceRef;
//! use ember_rhi::command::CommandPool;
//!
//! # fn example(device: DeviceRef) -> Result<(), ember_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone())?;
//! let cmd = pool.allocate_command_buffer()?;
//!
//! cmd.begin()?;
//! cmd.dispatch(4, 4, 1);
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::{DeviceRef, GpuCommand};

/// Command pool on the graphics queue family, created with `RESET_COMMAND_BUFFER`.
pub struct CommandPool {
    device: DeviceRef,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// # Errors
    ///
    /// Returns an error if command pool creation fails.
    pub fn new(device: DeviceRef) -> RhiResult<Self> {
        let pool = device.create_command_pool()?;
        debug!("Created command pool {:?}", pool);
        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates one primary command buffer. The buffer is freed with the pool.
    pub fn allocate_command_buffer(&self) -> RhiResult<CommandBuffer> {
        let buffer = self.device.allocate_command_buffer(self.pool)?;
        Ok(CommandBuffer {
            device: self.device.clone(),
            buffer,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
        debug!("Destroyed command pool {:?}", self.pool);
    }
}

/// Recording handle for a primary command buffer.
///
/// Does not own the underlying buffer; it is released when its [`CommandPool`] is
/// destroyed.
#[derive(Clone)]
pub struct CommandBuffer {
    device: DeviceRef,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins one-time-submit recording.
    pub fn begin(&self) -> RhiResult<()> {
        self.device.begin_command_buffer(self.buffer)
    }

    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }

    /// Returns the buffer to the initial state. It must not be pending execution.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_command_buffer(self.buffer)
    }

    #[inline]
    fn record(&self, command: GpuCommand<'_>) {
        self.device.record(self.buffer, command);
    }

    // Barriers and transfers

    /// Moves the whole image from `old_layout` to `new_layout`.
    pub fn transition_image(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.record(GpuCommand::TransitionImage {
            image,
            old_layout,
            new_layout,
        });
    }

    /// Scaled copy of `src` (in `TRANSFER_SRC_OPTIMAL`) onto `dst` (in
    /// `TRANSFER_DST_OPTIMAL`), linear filtered.
    pub fn blit_image(
        &self,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        self.record(GpuCommand::BlitImage {
            src,
            dst,
            src_extent,
            dst_extent,
        });
    }

    // Pipeline state

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.record(GpuCommand::BindPipeline {
            bind_point,
            pipeline,
        });
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(GpuCommand::BindDescriptorSets {
            bind_point,
            layout,
            first_set,
            sets,
        });
    }

    /// Pushes a plain-old-data value at offset 0.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        value: &T,
    ) {
        self.push_constants_bytes(layout, stages, 0, bytemuck::bytes_of(value));
    }

    pub fn push_constants_bytes(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(GpuCommand::PushConstants {
            layout,
            stages,
            offset,
            data,
        });
    }

    // Work

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        self.record(GpuCommand::Dispatch { x, y, z });
    }

    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.record(GpuCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    // Dynamic rendering

    /// Opens a rendering scope on one color attachment. `clear` of `None` keeps the
    /// existing contents.
    pub fn begin_rendering(
        &self,
        color_view: vk::ImageView,
        extent: vk::Extent2D,
        clear: Option<[f32; 4]>,
    ) {
        self.record(GpuCommand::BeginRendering {
            color_view,
            extent,
            clear,
        });
    }

    pub fn end_rendering(&self) {
        self.record(GpuCommand::EndRendering);
    }

    pub fn set_viewport(&self, extent: vk::Extent2D) {
        self.record(GpuCommand::SetViewport { extent });
    }

    pub fn set_scissor(&self, extent: vk::Extent2D) {
        self.record(GpuCommand::SetScissor { extent });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{FakeGpu, RecordedCommand};

    #[test]
    fn test_command_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
    }

    #[test]
    fn test_commands_reach_device_in_order() {
        let gpu = Arc::new(FakeGpu::new());
        let pool = CommandPool::new(gpu.clone()).unwrap();
        let cmd = pool.allocate_command_buffer().unwrap();

        cmd.begin().unwrap();
        cmd.transition_image(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        cmd.push_constants(
            vk::PipelineLayout::null(),
            vk::ShaderStageFlags::COMPUTE,
            &[1.0f32, 2.0, 3.0, 4.0],
        );
        cmd.dispatch(2, 3, 1);
        cmd.end().unwrap();

        let recorded = gpu.commands(cmd.handle());
        assert_eq!(recorded.len(), 3);
        assert!(matches!(
            recorded[0],
            RecordedCommand::TransitionImage {
                new_layout: vk::ImageLayout::GENERAL,
                ..
            }
        ));
        assert!(matches!(&recorded[1], RecordedCommand::PushConstants { data, .. } if data.len() == 16));
        assert_eq!(recorded[2], RecordedCommand::Dispatch { x: 2, y: 3, z: 1 });
    }

    #[test]
    fn test_pool_drop_releases_handle() {
        let gpu = Arc::new(FakeGpu::new());
        {
            let pool = CommandPool::new(gpu.clone()).unwrap();
            let _cmd = pool.allocate_command_buffer().unwrap();
            assert_eq!(gpu.live_objects(), 1);
        }
        assert_eq!(gpu.live_objects(), 0);
    }
}
