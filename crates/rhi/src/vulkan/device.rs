//! Logical device, graphics queue and memory allocator.
//!
//! [`VulkanDevice`] is the production implementation of [`GpuDevice`]. Every call maps
//! to one or a few `ash` calls; recording uses synchronization2 barriers and dynamic
//! rendering, both core in Vulkan 1.3.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::gpu::{GpuCommand, GpuDevice, ImageDescriptorWrite, QueueSubmit};
use crate::image::{AllocatedImage, ImageDesc, aspect_for_layout};
use crate::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc};
use crate::vulkan::instance::Instance;
use crate::vulkan::physical_device::PhysicalDeviceInfo;

const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

const SHADER_ENTRY: &std::ffi::CStr = c"main";

/// Vulkan logical device with one queue that renders, computes, transfers and presents.
pub struct VulkanDevice {
    instance: Arc<Instance>,
    device: ash::Device,
    physical: PhysicalDeviceInfo,
    /// Queue access must be externally synchronized.
    queue: Mutex<vk::Queue>,
    /// Taken in `Drop` so the allocator is gone before the device.
    allocator: Mutex<Option<Allocator>>,
    image_allocations: Mutex<HashMap<vk::Image, Allocation>>,
}

impl VulkanDevice {
    /// Creates the logical device with dynamic rendering and synchronization2 enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization fails.
    pub fn new(instance: Arc<Instance>, physical: PhysicalDeviceInfo) -> RhiResult<Self> {
        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(physical.queue_family)
            .queue_priorities(&queue_priorities)];

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };
        info!(
            "Logical device created on '{}' with {} extension(s)",
            physical.device_name(),
            DEVICE_EXTENSIONS.len()
        );

        let queue = unsafe { device.get_device_queue(physical.queue_family, 0) };
        debug!("Queue retrieved from family {}", physical.queue_family);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };
        info!("GPU memory allocator initialized");

        Ok(Self {
            instance,
            device,
            physical,
            queue: Mutex::new(queue),
            allocator: Mutex::new(Some(allocator)),
            image_allocations: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Locks the queue for a submit or present.
    pub fn queue(&self) -> MutexGuard<'_, vk::Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an image view over the whole of a 2D image.
    pub fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource_range(aspect));
        Ok(unsafe { self.device.create_image_view(&create_info, None)? })
    }

    fn allocator(&self) -> MutexGuard<'_, Option<Allocator>> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_transition(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .image(image)
            .subresource_range(subresource_range(aspect_for_layout(new_layout)));
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    fn record_blit(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        let layers = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        let region = vk::ImageBlit2::default()
            .src_subresource(layers)
            .src_offsets([vk::Offset3D::default(), far_corner(src_extent)])
            .dst_subresource(layers)
            .dst_offsets([vk::Offset3D::default(), far_corner(dst_extent)]);
        let regions = [region];
        let blit = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(vk::Filter::LINEAR)
            .regions(&regions);
        unsafe { self.device.cmd_blit_image2(cmd, &blit) };
    }

    fn record_begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        color_view: vk::ImageView,
        extent: vk::Extent2D,
        clear: Option<[f32; 4]>,
    ) {
        let mut attachment = vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .store_op(vk::AttachmentStoreOp::STORE);
        attachment = match clear {
            Some(color) => attachment
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                }),
            None => attachment.load_op(vk::AttachmentLoadOp::LOAD),
        };
        let attachments = [attachment];
        let rendering = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(&attachments);
        unsafe { self.device.cmd_begin_rendering(cmd, &rendering) };
    }
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &str {
        self.physical.device_name()
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&create_info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> RhiResult<()> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout("fence")),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        Ok(unsafe { self.device.get_fence_status(fence)? })
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&create_info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.physical.queue_family);
        Ok(unsafe { self.device.create_command_pool(&create_info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info)? };
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("no command buffer allocated".into()))
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(cmd)? };
        Ok(())
    }

    fn record(&self, cmd: vk::CommandBuffer, command: GpuCommand<'_>) {
        match command {
            GpuCommand::TransitionImage {
                image,
                old_layout,
                new_layout,
            } => self.record_transition(cmd, image, old_layout, new_layout),
            GpuCommand::BindPipeline {
                bind_point,
                pipeline,
            } => unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) },
            GpuCommand::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets,
            } => unsafe {
                self.device
                    .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[])
            },
            GpuCommand::PushConstants {
                layout,
                stages,
                offset,
                data,
            } => unsafe {
                self.device
                    .cmd_push_constants(cmd, layout, stages, offset, data)
            },
            GpuCommand::Dispatch { x, y, z } => unsafe { self.device.cmd_dispatch(cmd, x, y, z) },
            GpuCommand::BeginRendering {
                color_view,
                extent,
                clear,
            } => self.record_begin_rendering(cmd, color_view, extent, clear),
            GpuCommand::EndRendering => unsafe { self.device.cmd_end_rendering(cmd) },
            GpuCommand::SetViewport { extent } => {
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) };
            }
            GpuCommand::SetScissor { extent } => {
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                };
                unsafe { self.device.cmd_set_scissor(cmd, 0, &[scissor]) };
            }
            GpuCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                self.device.cmd_draw(
                    cmd,
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                )
            },
            GpuCommand::BlitImage {
                src,
                dst,
                src_extent,
                dst_extent,
            } => self.record_blit(cmd, src, dst, src_extent, dst_extent),
        }
    }

    fn submit(&self, submit: &QueueSubmit) -> RhiResult<()> {
        let command_buffers =
            [vk::CommandBufferSubmitInfo::default().command_buffer(submit.command_buffer)];
        let waits: Vec<vk::SemaphoreSubmitInfo> = submit
            .wait
            .iter()
            .map(|wait| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(wait.semaphore)
                    .stage_mask(wait.stage)
                    .value(1)
            })
            .collect();
        let signals: Vec<vk::SemaphoreSubmitInfo> = submit
            .signal
            .iter()
            .map(|signal| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(signal.semaphore)
                    .stage_mask(signal.stage)
                    .value(1)
            })
            .collect();

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffers)
            .wait_semaphore_infos(&waits)
            .signal_semaphore_infos(&signals);

        let queue = self.queue();
        unsafe {
            self.device
                .queue_submit2(*queue, &[submit_info], submit.fence)?
        };
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        // Holding the queue keeps other threads from submitting mid-wait.
        let _queue = self.queue();
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        Ok(unsafe { self.device.create_descriptor_set_layout(&create_info, None)? })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        Ok(unsafe { self.device.create_descriptor_pool(&create_info, None)? })
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?
        };
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info)? };
        sets.into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("no descriptor set allocated".into()))
    }

    fn update_image_descriptor(&self, write: &ImageDescriptorWrite) {
        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(write.view)
            .image_layout(write.layout)];
        let writes = [vk::WriteDescriptorSet::default()
            .dst_set(write.set)
            .dst_binding(write.binding)
            .descriptor_type(write.descriptor_type)
            .image_info(&image_info)];
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        Ok(unsafe { self.device.create_shader_module(&create_info, None)? })
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        Ok(unsafe { self.device.create_pipeline_layout(&create_info, None)? })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<vk::Pipeline> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_shader)
                .name(SHADER_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment_shader)
                .name(SHADER_ENTRY),
        ];

        // Geometry comes from push constants and storage buffers, never vertex input.
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology.to_vk())
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(desc.polygon_mode.to_vk())
            .line_width(desc.line_width)
            .cull_mode(desc.cull_mode.to_vk())
            .front_face(desc.front_face.to_vk());
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(desc.rasterization_samples)
            .sample_shading_enable(false)
            .min_sample_shading(desc.min_sample_shading);
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test_enable)
            .depth_write_enable(desc.depth_write_enable)
            .depth_compare_op(desc.depth_compare_op.to_vk())
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(desc.color_write_mask)];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments);
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&desc.dynamic_states);

        let color_formats = [desc.color_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(desc.depth_format);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::PipelineError("driver returned no graphics pipeline".into()))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> RhiResult<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(desc.shader)
            .name(SHADER_ENTRY);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .layout(desc.layout)
            .stage(stage);

        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::PipelineError("driver returned no compute pipeline".into()))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<AllocatedImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = self.allocator();
            let Some(allocator) = allocator.as_mut() else {
                unsafe { self.device.destroy_image(image, None) };
                return Err(RhiError::InvalidHandle("allocator already released".into()));
            };
            match allocator.allocate(&AllocationCreateDesc {
                name: "image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(e.into());
                }
            }
        };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        let view = bound
            .map_err(RhiError::from)
            .and_then(|()| self.create_image_view(image, desc.format, desc.aspect));
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                if let Some(allocator) = self.allocator().as_mut()
                    && let Err(free_err) = allocator.free(allocation)
                {
                    warn!("Failed to free image memory after error: {free_err}");
                }
                return Err(e);
            }
        };

        self.image_allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(image, allocation);

        debug!(
            "Created image {:?} {}x{} {:?}",
            image, desc.extent.width, desc.extent.height, desc.format
        );
        Ok(AllocatedImage {
            image,
            view,
            extent: desc.extent,
            format: desc.format,
        })
    }

    fn destroy_image(&self, image: &AllocatedImage) {
        unsafe {
            self.device.destroy_image_view(image.view, None);
            self.device.destroy_image(image.image, None);
        }

        let allocation = self
            .image_allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&image.image);
        match (allocation, self.allocator().as_mut()) {
            (Some(allocation), Some(allocator)) => {
                if let Err(e) = allocator.free(allocation) {
                    error!("Failed to free memory of image {:?}: {e}", image.image);
                }
            }
            (None, _) => warn!("Destroyed image {:?} with no tracked allocation", image.image),
            (Some(_), None) => warn!("Allocator released before image {:?}", image.image),
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
        }

        let leaked = self
            .image_allocations
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect::<Vec<_>>();
        let mut allocator = self
            .allocator
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if !leaked.is_empty() {
            warn!("{} image allocation(s) still live at device drop", leaked.len());
            if let Some(allocator) = allocator.as_mut() {
                for (_, allocation) in leaked {
                    let _ = allocator.free(allocation);
                }
            }
        }
        // The allocator must go before the device it allocates from.
        drop(allocator);

        unsafe { self.device.destroy_device(None) };
        info!("Logical device destroyed");
    }
}

// SAFETY: ash::Device is Send + Sync; the queue and allocator are behind mutexes and
// the remaining fields are plain handles and properties.
unsafe impl Send for VulkanDevice {}
unsafe impl Sync for VulkanDevice {}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

fn far_corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: i32::try_from(extent.width).unwrap_or(i32::MAX),
        y: i32::try_from(extent.height).unwrap_or(i32::MAX),
        z: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
    }

    #[test]
    fn test_far_corner() {
        let corner = far_corner(vk::Extent2D {
            width: 1700,
            height: 900,
        });
        assert_eq!((corner.x, corner.y, corner.z), (1700, 900, 1));
    }

    #[test]
    fn test_subresource_range_covers_whole_image() {
        let range = subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.base_mip_level, 0);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
    }
}
