//! In-process simulated GPU.
//!
//! [`FakeGpu`] implements [`GpuDevice`] and hands out [`FakeSwapchain`]s implementing
//! [`PresentSurface`]. It runs no shaders. It keeps the bookkeeping a driver would:
//! handle lifetimes, command streams, fence and semaphore state, descriptor pool
//! capacity. It also checks the usage rules the frame loop has to honor and collects
//! every breach in [`FakeGpu::violations`].
//!
//! Submitted work completes after a configurable delay, or never when the device is
//! told to hang.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ash::vk;
use ash::vk::Handle;

use crate::error::{RhiError, RhiResult};
use crate::gpu::{GpuCommand, GpuDevice, ImageDescriptorWrite, QueueSubmit, SemaphoreSubmit};
use crate::image::{AllocatedImage, ImageDesc};
use crate::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc};
use crate::swapchain::{AcquireOutcome, PresentOutcome, PresentSurface, SwapchainImage};

/// Images in every fake swapchain.
pub const FAKE_SWAPCHAIN_IMAGES: u32 = 3;

/// Owned copy of a [`GpuCommand`].
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
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
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    BeginRendering {
        color_view: vk::ImageView,
        extent: vk::Extent2D,
        clear: Option<[f32; 4]>,
    },
    EndRendering,
    SetViewport {
        extent: vk::Extent2D,
    },
    SetScissor {
        extent: vk::Extent2D,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    BlitImage {
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    },
}

impl From<GpuCommand<'_>> for RecordedCommand {
    fn from(command: GpuCommand<'_>) -> Self {
        match command {
            GpuCommand::TransitionImage {
                image,
                old_layout,
                new_layout,
            } => RecordedCommand::TransitionImage {
                image,
                old_layout,
                new_layout,
            },
            GpuCommand::BindPipeline {
                bind_point,
                pipeline,
            } => RecordedCommand::BindPipeline {
                bind_point,
                pipeline,
            },
            GpuCommand::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets,
            } => RecordedCommand::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets: sets.to_vec(),
            },
            GpuCommand::PushConstants {
                layout,
                stages,
                offset,
                data,
            } => RecordedCommand::PushConstants {
                layout,
                stages,
                offset,
                data: data.to_vec(),
            },
            GpuCommand::Dispatch { x, y, z } => RecordedCommand::Dispatch { x, y, z },
            GpuCommand::BeginRendering {
                color_view,
                extent,
                clear,
            } => RecordedCommand::BeginRendering {
                color_view,
                extent,
                clear,
            },
            GpuCommand::EndRendering => RecordedCommand::EndRendering,
            GpuCommand::SetViewport { extent } => RecordedCommand::SetViewport { extent },
            GpuCommand::SetScissor { extent } => RecordedCommand::SetScissor { extent },
            GpuCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => RecordedCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
            GpuCommand::BlitImage {
                src,
                dst,
                src_extent,
                dst_extent,
            } => RecordedCommand::BlitImage {
                src,
                dst,
                src_extent,
                dst_extent,
            },
        }
    }
}

/// Externally visible device and presentation calls, in call order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuEvent {
    Acquire { index: u32 },
    AcquireOutOfDate,
    Submit {
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
    },
    Present { index: u32 },
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    WaitIdle,
    RecreateSwapchain { extent: vk::Extent2D },
}

/// A queue submission and the commands it carried.
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<SemaphoreSubmit>,
    pub signal: Option<SemaphoreSubmit>,
    pub fence: vk::Fence,
    pub commands: Vec<RecordedCommand>,
}

#[derive(Clone, Copy, Debug)]
enum Completion {
    At(Instant),
    Never,
}

impl Completion {
    fn done(self, now: Instant) -> bool {
        matches!(self, Completion::At(t) if t <= now)
    }
}

#[derive(Default)]
struct FenceState {
    signaled: bool,
    pending: Option<Completion>,
}

impl FenceState {
    fn complete(&mut self, now: Instant) -> bool {
        if let Some(pending) = self.pending
            && pending.done(now)
        {
            self.signaled = true;
            self.pending = None;
        }
        self.signaled
    }
}

struct CommandBufferState {
    pool: vk::CommandPool,
    recording: bool,
    commands: Vec<RecordedCommand>,
    in_flight: Option<Completion>,
}

impl CommandBufferState {
    fn busy(&self, now: Instant) -> bool {
        self.in_flight.is_some_and(|c| !c.done(now))
    }
}

struct PoolState {
    max_sets: u32,
    limit: Option<usize>,
    sets: Vec<vk::DescriptorSet>,
}

enum PipelineRecord {
    Graphics(GraphicsPipelineDesc),
    Compute(ComputePipelineDesc),
}

#[derive(Default)]
struct FakeState {
    next_handle: u64,
    live: HashSet<u64>,
    fences: HashMap<vk::Fence, FenceState>,
    semaphores: HashMap<vk::Semaphore, bool>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferState>,
    descriptor_pools: HashMap<vk::DescriptorPool, PoolState>,
    set_layouts: HashMap<vk::DescriptorSetLayout, Vec<(u32, vk::DescriptorType, vk::ShaderStageFlags)>>,
    last_set_layout: Vec<(u32, vk::DescriptorType, vk::ShaderStageFlags)>,
    descriptor_writes: Vec<ImageDescriptorWrite>,
    pipelines: HashMap<vk::Pipeline, PipelineRecord>,
    images: HashMap<vk::Image, ImageDesc>,
    new_pool_limit: Option<usize>,
    completion_delay: Duration,
    hang: bool,
    acquire_out_of_date: u32,
    acquire_suboptimal: u32,
    acquire_stalls: u32,
    acquire_error: Option<vk::Result>,
    submit_error: Option<vk::Result>,
    present_out_of_date: u32,
    present_error: Option<vk::Result>,
    events: Vec<GpuEvent>,
    submissions: Vec<Submission>,
    violations: Vec<String>,
}

impl FakeState {
    fn mint<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn mint_tracked<H: Handle + Copy>(&mut self) -> H {
        let handle: H = self.mint();
        self.live.insert(handle.as_raw());
        handle
    }

    fn release<H: Handle + std::fmt::Debug + Copy>(&mut self, handle: H, kind: &str) {
        if !self.live.remove(&handle.as_raw()) {
            self.violation(format!("{kind} {handle:?} destroyed twice or never created"));
        }
    }

    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore, by: &str) {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => {
                self.violation(format!("{by} signals {semaphore:?} which is already signaled"));
            }
            Some(signaled) => *signaled = true,
            None => self.violation(format!("{by} signals unknown semaphore {semaphore:?}")),
        }
    }

    fn consume_semaphore(&mut self, semaphore: vk::Semaphore, by: &str) {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => *signaled = false,
            Some(_) => self.violation(format!("{by} waits on {semaphore:?} with no signal pending")),
            None => self.violation(format!("{by} waits on unknown semaphore {semaphore:?}")),
        }
    }

    fn check_idle(&mut self, cmd: vk::CommandBuffer, action: &str) {
        let now = Instant::now();
        let busy = self
            .command_buffers
            .get(&cmd)
            .is_some_and(|state| state.busy(now));
        if busy {
            self.violation(format!("{action} of {cmd:?} while its submission is in flight"));
        }
    }
}

/// Simulated device. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct FakeGpu {
    state: Arc<Mutex<FakeState>>,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time between a submission and its fence signaling.
    pub fn set_completion_delay(&self, delay: Duration) {
        self.lock().completion_delay = delay;
    }

    /// Submissions made while hanging never complete.
    pub fn set_hang(&self, hang: bool) {
        self.lock().hang = hang;
    }

    /// The next `count` acquires on any swapchain report out-of-date.
    pub fn fail_next_acquires(&self, count: u32) {
        self.lock().acquire_out_of_date = count;
    }

    /// The next `count` presents report out-of-date.
    pub fn fail_next_presents(&self, count: u32) {
        self.lock().present_out_of_date = count;
    }

    /// The next `count` acquires succeed but report the swapchain suboptimal.
    pub fn suboptimal_next_acquires(&self, count: u32) {
        self.lock().acquire_suboptimal = count;
    }

    /// The next `count` acquires block for their full timeout and then time out.
    pub fn stall_next_acquires(&self, count: u32) {
        self.lock().acquire_stalls = count;
    }

    /// The next acquire fails with `result`.
    pub fn error_next_acquire(&self, result: vk::Result) {
        self.lock().acquire_error = Some(result);
    }

    /// The next queue submission fails with `result`.
    pub fn error_next_submit(&self, result: vk::Result) {
        self.lock().submit_error = Some(result);
    }

    /// The next present fails with `result`.
    pub fn error_next_present(&self, result: vk::Result) {
        self.lock().present_error = Some(result);
    }

    /// Creates a swapchain with [`FAKE_SWAPCHAIN_IMAGES`] images sharing this device.
    pub fn create_swapchain(&self, extent: vk::Extent2D) -> FakeSwapchain {
        let images = self.mint_swapchain_images();
        FakeSwapchain {
            gpu: self.clone(),
            images,
            extent,
            next: 0,
        }
    }

    fn mint_swapchain_images(&self) -> Vec<SwapchainImage> {
        let mut state = self.lock();
        (0..FAKE_SWAPCHAIN_IMAGES)
            .map(|_| SwapchainImage {
                image: state.mint(),
                view: state.mint(),
            })
            .collect()
    }

    /// Objects created and not yet destroyed. Command buffers and descriptor sets are
    /// owned by their pools and not counted.
    pub fn live_objects(&self) -> usize {
        self.lock().live.len()
    }

    pub fn events(&self) -> Vec<GpuEvent> {
        self.lock().events.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    /// Commands recorded into `cmd` since it was last begun or reset.
    pub fn commands(&self, cmd: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.lock()
            .command_buffers
            .get(&cmd)
            .map(|state| state.commands.clone())
            .unwrap_or_default()
    }

    pub fn pipeline_desc(&self, pipeline: vk::Pipeline) -> Option<GraphicsPipelineDesc> {
        match self.lock().pipelines.get(&pipeline) {
            Some(PipelineRecord::Graphics(desc)) => Some(desc.clone()),
            _ => None,
        }
    }

    pub fn compute_pipeline_desc(&self, pipeline: vk::Pipeline) -> Option<ComputePipelineDesc> {
        match self.lock().pipelines.get(&pipeline) {
            Some(PipelineRecord::Compute(desc)) => Some(*desc),
            _ => None,
        }
    }

    /// `(binding, type, stages)` of the most recently created set layout.
    pub fn last_set_layout_bindings(&self) -> Vec<(u32, vk::DescriptorType, vk::ShaderStageFlags)> {
        self.lock().last_set_layout.clone()
    }

    pub fn live_descriptor_sets(&self, pool: vk::DescriptorPool) -> usize {
        self.lock()
            .descriptor_pools
            .get(&pool)
            .map_or(0, |pool| pool.sets.len())
    }

    /// Makes the driver report `ERROR_OUT_OF_POOL_MEMORY` once `sets` sets are live,
    /// even if `max_sets` would allow more.
    pub fn limit_descriptor_pool(&self, pool: vk::DescriptorPool, sets: usize) {
        if let Some(pool) = self.lock().descriptor_pools.get_mut(&pool) {
            pool.limit = Some(sets);
        }
    }

    /// Caps the number of sets every descriptor pool created from now on can hold.
    pub fn limit_new_descriptor_pools(&self, sets: usize) {
        self.lock().new_pool_limit = Some(sets);
    }

    pub fn descriptor_writes(&self) -> Vec<ImageDescriptorWrite> {
        self.lock().descriptor_writes.clone()
    }

    /// Descriptions of images that are currently alive.
    pub fn live_images(&self) -> Vec<ImageDesc> {
        self.lock().images.values().copied().collect()
    }
}

impl GpuDevice for FakeGpu {
    fn name(&self) -> &str {
        "FakeGpu"
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.lock();
        let fence = state.mint_tracked();
        state.fences.insert(
            fence,
            FenceState {
                signaled,
                pending: None,
            },
        );
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.lock();
        state.fences.remove(&fence);
        state.release(fence, "fence");
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> RhiResult<()> {
        let start = Instant::now();
        let pending = {
            let mut state = self.lock();
            state.events.push(GpuEvent::WaitFence(fence));
            let Some(fence_state) = state.fences.get_mut(&fence) else {
                return Err(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN));
            };
            if fence_state.complete(start) {
                return Ok(());
            }
            fence_state.pending
        };

        match pending {
            Some(Completion::At(at)) if at <= start + timeout => {
                std::thread::sleep(at.saturating_duration_since(Instant::now()));
                let mut state = self.lock();
                if let Some(fence_state) = state.fences.get_mut(&fence) {
                    fence_state.complete(at);
                }
                Ok(())
            }
            // Nothing queued will ever signal it.
            None => Err(RhiError::Timeout("fence")),
            Some(_) => {
                std::thread::sleep(timeout);
                Err(RhiError::Timeout("fence"))
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.lock();
        state.events.push(GpuEvent::ResetFence(fence));
        let now = Instant::now();
        let in_flight = match state.fences.get_mut(&fence) {
            Some(fence_state) => {
                let in_flight = !fence_state.complete(now) && fence_state.pending.is_some();
                fence_state.signaled = false;
                fence_state.pending = None;
                in_flight
            }
            None => return Err(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN)),
        };
        if in_flight {
            state.violation(format!("reset of in-flight fence {fence:?}"));
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        let mut state = self.lock();
        state
            .fences
            .get_mut(&fence)
            .map(|fence_state| fence_state.complete(Instant::now()))
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN))
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let mut state = self.lock();
        let semaphore = state.mint_tracked();
        state.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.lock();
        state.semaphores.remove(&semaphore);
        state.release(semaphore, "semaphore");
    }

    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        Ok(self.lock().mint_tracked())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.lock();
        let now = Instant::now();
        let busy = state
            .command_buffers
            .values()
            .any(|cmd| cmd.pool == pool && cmd.busy(now));
        if busy {
            state.violation(format!("command pool {pool:?} destroyed with work in flight"));
        }
        state.command_buffers.retain(|_, cmd| cmd.pool != pool);
        state.release(pool, "command pool");
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let mut state = self.lock();
        let cmd = state.mint();
        state.command_buffers.insert(
            cmd,
            CommandBufferState {
                pool,
                recording: false,
                commands: Vec::new(),
                in_flight: None,
            },
        );
        Ok(cmd)
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.lock();
        state.events.push(GpuEvent::ResetCommandBuffer(cmd));
        state.check_idle(cmd, "reset");
        let cmd_state = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN))?;
        cmd_state.recording = false;
        cmd_state.commands.clear();
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.lock();
        state.events.push(GpuEvent::BeginCommandBuffer(cmd));
        state.check_idle(cmd, "begin");
        let cmd_state = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN))?;
        cmd_state.recording = true;
        cmd_state.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.lock();
        let cmd_state = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN))?;
        if !cmd_state.recording {
            state.violation(format!("end of {cmd:?} which is not recording"));
            return Err(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN));
        }
        cmd_state.recording = false;
        Ok(())
    }

    fn record(&self, cmd: vk::CommandBuffer, command: GpuCommand<'_>) {
        let mut state = self.lock();
        match state.command_buffers.get_mut(&cmd) {
            Some(cmd_state) if cmd_state.recording => cmd_state.commands.push(command.into()),
            _ => state.violation(format!("{command:?} recorded into {cmd:?} outside begin/end")),
        }
    }

    fn submit(&self, submit: &QueueSubmit) -> RhiResult<()> {
        let mut state = self.lock();
        if let Some(result) = state.submit_error.take() {
            return Err(RhiError::VulkanError(result));
        }
        let now = Instant::now();
        let completion = if state.hang {
            Completion::Never
        } else {
            Completion::At(now + state.completion_delay)
        };

        state.events.push(GpuEvent::Submit {
            command_buffer: submit.command_buffer,
            fence: submit.fence,
        });

        if let Some(wait) = submit.wait {
            state.consume_semaphore(wait.semaphore, "submit");
        }
        if let Some(signal) = submit.signal {
            state.signal_semaphore(signal.semaphore, "submit");
        }

        let commands = match state.command_buffers.get_mut(&submit.command_buffer) {
            Some(cmd_state) if !cmd_state.recording => {
                cmd_state.in_flight = Some(completion);
                cmd_state.commands.clone()
            }
            Some(_) => {
                state.violation(format!("submit of {:?} while recording", submit.command_buffer));
                Vec::new()
            }
            None => return Err(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN)),
        };

        if submit.fence != vk::Fence::null() {
            let fence_busy = match state.fences.get_mut(&submit.fence) {
                Some(fence_state) => {
                    let busy = fence_state.signaled || fence_state.pending.is_some();
                    fence_state.signaled = false;
                    fence_state.pending = Some(completion);
                    busy
                }
                None => return Err(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN)),
            };
            if fence_busy {
                state.violation(format!("submit with fence {:?} not reset", submit.fence));
            }
        }

        state.submissions.push(Submission {
            command_buffer: submit.command_buffer,
            wait: submit.wait,
            signal: submit.signal,
            fence: submit.fence,
            commands,
        });
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.lock();
        state.events.push(GpuEvent::WaitIdle);
        if state.hang {
            return Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
        }
        let now = Instant::now();
        for fence in state.fences.values_mut() {
            if fence.pending.take().is_some() {
                fence.signaled = true;
            }
        }
        for cmd in state.command_buffers.values_mut() {
            if cmd.in_flight.is_some() {
                cmd.in_flight = Some(Completion::At(now));
            }
        }
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let mut state = self.lock();
        let layout = state.mint_tracked();
        let summary: Vec<_> = bindings
            .iter()
            .map(|b| (b.binding, b.descriptor_type, b.stage_flags))
            .collect();
        state.last_set_layout = summary.clone();
        state.set_layouts.insert(layout, summary);
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        let mut state = self.lock();
        state.set_layouts.remove(&layout);
        state.release(layout, "descriptor set layout");
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let mut state = self.lock();
        let pool = state.mint_tracked();
        let limit = state.new_pool_limit;
        state.descriptor_pools.insert(
            pool,
            PoolState {
                max_sets,
                limit,
                sets: Vec::new(),
            },
        );
        Ok(pool)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        let mut state = self.lock();
        let pool = state
            .descriptor_pools
            .get_mut(&pool)
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN))?;
        pool.sets.clear();
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.lock();
        state.descriptor_pools.remove(&pool);
        state.release(pool, "descriptor pool");
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let mut state = self.lock();
        if !state.set_layouts.contains_key(&layout) {
            state.violation(format!("allocation with unknown set layout {layout:?}"));
        }
        let set = state.mint();
        let pool = state
            .descriptor_pools
            .get_mut(&pool)
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_UNKNOWN))?;
        let capacity = pool.limit.unwrap_or(pool.max_sets as usize);
        if pool.sets.len() >= capacity {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        pool.sets.push(set);
        Ok(set)
    }

    fn update_image_descriptor(&self, write: &ImageDescriptorWrite) {
        self.lock().descriptor_writes.push(*write);
    }

    fn create_shader_module(&self, _code: &[u32]) -> RhiResult<vk::ShaderModule> {
        Ok(self.lock().mint_tracked())
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.lock().release(module, "shader module");
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout> {
        Ok(self.lock().mint_tracked())
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.lock().release(layout, "pipeline layout");
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<vk::Pipeline> {
        let mut state = self.lock();
        let pipeline = state.mint_tracked();
        state
            .pipelines
            .insert(pipeline, PipelineRecord::Graphics(desc.clone()));
        Ok(pipeline)
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> RhiResult<vk::Pipeline> {
        let mut state = self.lock();
        let pipeline = state.mint_tracked();
        state.pipelines.insert(pipeline, PipelineRecord::Compute(*desc));
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut state = self.lock();
        state.pipelines.remove(&pipeline);
        state.release(pipeline, "pipeline");
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<AllocatedImage> {
        let mut state = self.lock();
        let image = state.mint_tracked();
        let view = state.mint();
        state.images.insert(image, *desc);
        Ok(AllocatedImage {
            image,
            view,
            extent: desc.extent,
            format: desc.format,
        })
    }

    fn destroy_image(&self, image: &AllocatedImage) {
        let mut state = self.lock();
        state.images.remove(&image.image);
        state.release(image.image, "image");
    }
}

/// Simulated swapchain driven by its [`FakeGpu`].
pub struct FakeSwapchain {
    gpu: FakeGpu,
    images: Vec<SwapchainImage>,
    extent: vk::Extent2D,
    next: u32,
}

impl PresentSurface for FakeSwapchain {
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let stalled = {
            let mut state = self.gpu.lock();
            let stalled = state.acquire_stalls > 0;
            state.acquire_stalls = state.acquire_stalls.saturating_sub(1);
            stalled
        };
        if stalled {
            std::thread::sleep(timeout);
            return Err(RhiError::Timeout("swapchain image"));
        }

        let mut state = self.gpu.lock();
        if let Some(result) = state.acquire_error.take() {
            return Err(RhiError::VulkanError(result));
        }
        if state.acquire_out_of_date > 0 {
            state.acquire_out_of_date -= 1;
            state.events.push(GpuEvent::AcquireOutOfDate);
            return Ok(AcquireOutcome::OutOfDate);
        }

        let suboptimal = state.acquire_suboptimal > 0;
        state.acquire_suboptimal = state.acquire_suboptimal.saturating_sub(1);
        let index = self.next;
        self.next = (self.next + 1) % self.images.len() as u32;
        state.signal_semaphore(signal, "acquire");
        state.events.push(GpuEvent::Acquire { index });
        Ok(AcquireOutcome::Ready { index, suboptimal })
    }

    fn present(&mut self, index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome> {
        let mut state = self.gpu.lock();
        if let Some(result) = state.present_error.take() {
            return Err(RhiError::VulkanError(result));
        }
        state.consume_semaphore(wait, "present");
        state.events.push(GpuEvent::Present { index });
        if state.present_out_of_date > 0 {
            state.present_out_of_date -= 1;
            return Ok(PresentOutcome::OutOfDate);
        }
        Ok(PresentOutcome::Presented)
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
        vk::Format::B8G8R8A8_UNORM
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.gpu
            .lock()
            .events
            .push(GpuEvent::RecreateSwapchain { extent });
        self.images = self.gpu.mint_swapchain_images();
        self.extent = extent;
        self.next = 0;
        Ok(())
    }
}
