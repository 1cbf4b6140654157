//! Frame protocol tests against the simulated device.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ember_core::EngineConfig;
use ember_renderer::{
    Engine, FrameError, FrameInfo, FrameOutcome, FrameStage, OverlayCompositor, OverlayContext,
};
use ember_rhi::testing::{FakeGpu, GpuEvent, RecordedCommand};
use ember_rhi::{RhiError, vk};

const SHADERS: [&str; 4] = [
    "gradient_color.comp.spv",
    "sky.comp.spv",
    "colored_triangle.vert.spv",
    "colored_triangle.frag.spv",
];
const SPIRV_STUB: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0, 0, 0, 0];

fn shader_dir() -> PathBuf {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let dir = std::env::temp_dir().join(format!(
        "ember-frame-protocol-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    for name in SHADERS {
        std::fs::write(dir.join(name), SPIRV_STUB).unwrap();
    }
    dir
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

fn config() -> EngineConfig {
    EngineConfig {
        window_width: 320,
        window_height: 240,
        frame_timeout: Duration::from_millis(200),
        shader_dir: shader_dir(),
        ..EngineConfig::default()
    }
}

fn start(config: &EngineConfig) -> (Arc<FakeGpu>, Engine) {
    let gpu = Arc::new(FakeGpu::new());
    let surface = gpu.create_swapchain(extent(320, 240));
    let engine = Engine::init(config, gpu.clone(), surface).unwrap();
    (gpu, engine)
}

fn presented(outcome: FrameOutcome) -> FrameInfo {
    match outcome {
        FrameOutcome::Presented(info) => info,
        other => panic!("expected a presented frame, got {other:?}"),
    }
}

/// Records the frame number into the slot ledger; the action logs it when run.
struct FrameReleaseLog {
    released: Arc<Mutex<Vec<u64>>>,
}

impl OverlayCompositor for FrameReleaseLog {
    fn compose(&mut self, ctx: &mut OverlayContext<'_>) {
        let released = self.released.clone();
        let frame = ctx.frame_number;
        ctx.ledger.record(move || released.lock().unwrap().push(frame));
    }
}

#[test]
fn test_five_frames_rotate_two_slots() {
    let (gpu, mut engine) = start(&config());
    assert!(engine.has_triangle_pass());
    assert_eq!(engine.effects().unwrap().names(), vec!["gradient", "sky"]);

    let mut slots = Vec::new();
    for expected in 0..5 {
        let info = presented(engine.draw_frame().unwrap());
        assert_eq!(info.frame_number, expected);
        slots.push(info.slot);
    }
    assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    assert_eq!(engine.frame_number(), 5);

    let submissions = gpu.submissions();
    assert_eq!(submissions.len(), 5);
    for (i, submission) in submissions.iter().enumerate() {
        assert_eq!(
            submission.command_buffer,
            submissions[i % 2].command_buffer,
            "frame {i} must reuse its slot's command buffer"
        );
        let wait = submission.wait.unwrap();
        let signal = submission.signal.unwrap();
        assert_eq!(wait.stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(signal.stage, vk::PipelineStageFlags2::ALL_GRAPHICS);
        assert_ne!(wait.semaphore, signal.semaphore);
    }
    assert_ne!(submissions[0].command_buffer, submissions[1].command_buffer);
    assert_ne!(submissions[0].fence, submissions[1].fence);

    engine.cleanup().unwrap();
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    assert_eq!(gpu.live_objects(), 0);
}

#[test]
fn test_first_frame_follows_protocol_order() {
    let (gpu, mut engine) = start(&config());
    let before = gpu.events().len();
    engine.draw_frame().unwrap();

    let fence = gpu.submissions()[0].fence;
    let cmd = gpu.submissions()[0].command_buffer;
    let events = gpu.events()[before..].to_vec();
    assert_eq!(
        events,
        vec![
            GpuEvent::WaitFence(fence),
            GpuEvent::Acquire { index: 0 },
            GpuEvent::ResetFence(fence),
            GpuEvent::ResetCommandBuffer(cmd),
            GpuEvent::BeginCommandBuffer(cmd),
            GpuEvent::Submit {
                command_buffer: cmd,
                fence
            },
            GpuEvent::Present { index: 0 },
        ]
    );
    engine.cleanup().unwrap();
}

#[test]
fn test_slot_ledger_flushed_when_slot_comes_around() {
    let (gpu, mut engine) = start(&config());
    let released = Arc::new(Mutex::new(Vec::new()));
    engine.set_overlay(Box::new(FrameReleaseLog {
        released: released.clone(),
    }));

    engine.draw_frame().unwrap();
    engine.draw_frame().unwrap();
    assert!(released.lock().unwrap().is_empty());

    engine.draw_frame().unwrap();
    assert_eq!(*released.lock().unwrap(), vec![0]);

    engine.draw_frame().unwrap();
    engine.draw_frame().unwrap();
    assert_eq!(*released.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(engine.current_frame().unwrap().ledger().len(), 1);

    engine.cleanup().unwrap();
    let mut all = released.lock().unwrap().clone();
    all.sort_unstable();
    assert_eq!(all, vec![0, 1, 2, 3, 4]);
    assert!(gpu.violations().is_empty());
}

#[test]
fn test_slow_gpu_paces_cpu_without_hazards() {
    let (gpu, mut engine) = start(&config());
    gpu.set_completion_delay(Duration::from_millis(15));

    let started = Instant::now();
    for _ in 0..6 {
        engine.draw_frame().unwrap();
    }
    // Frame 4 cannot start before frame 2 completes, which cannot start before frame 0.
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());

    engine.cleanup().unwrap();
}

#[test]
fn test_three_slots_rotate() {
    let config = EngineConfig {
        frames_in_flight: 3,
        ..config()
    };
    let (gpu, mut engine) = start(&config);
    gpu.set_completion_delay(Duration::from_millis(5));

    let slots: Vec<_> = (0..7)
        .map(|_| presented(engine.draw_frame().unwrap()).slot)
        .collect();
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(engine.frames_in_flight(), 3);
    assert!(gpu.violations().is_empty());
    engine.cleanup().unwrap();
}

#[test]
fn test_hung_fence_is_fatal() {
    let config = EngineConfig {
        frame_timeout: Duration::from_millis(30),
        ..config()
    };
    let (gpu, mut engine) = start(&config);
    gpu.set_hang(true);

    engine.draw_frame().unwrap();
    engine.draw_frame().unwrap();
    let err = engine.draw_frame().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        FrameError::Fatal {
            stage: FrameStage::Wait,
            source: RhiError::Timeout(_),
        }
    ));
    assert_eq!(engine.frame_number(), 2);

    // Teardown still runs when the device cannot go idle.
    assert!(engine.cleanup().is_err());
    assert!(!engine.is_initialized());
}

fn fatal_stage(err: FrameError) -> (FrameStage, RhiError) {
    match err {
        FrameError::Fatal { stage, source } => (stage, source),
        other => panic!("expected a fatal frame error, got {other:?}"),
    }
}

#[test]
fn test_acquire_timeout_is_fatal() {
    let config = EngineConfig {
        acquire_timeout: Duration::from_millis(20),
        ..config()
    };
    let (gpu, mut engine) = start(&config);
    gpu.stall_next_acquires(1);

    let started = Instant::now();
    let (stage, source) = fatal_stage(engine.draw_frame().unwrap_err());
    assert_eq!(stage, FrameStage::Acquire);
    assert!(source.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(engine.frame_number(), 0);
    assert!(gpu.submissions().is_empty());

    engine.cleanup().unwrap();
    assert_eq!(gpu.live_objects(), 0);
}

#[test]
fn test_acquire_error_is_fatal() {
    let (gpu, mut engine) = start(&config());
    gpu.error_next_acquire(vk::Result::ERROR_SURFACE_LOST_KHR);

    let (stage, source) = fatal_stage(engine.draw_frame().unwrap_err());
    assert_eq!(stage, FrameStage::Acquire);
    assert!(matches!(
        source,
        RhiError::VulkanError(vk::Result::ERROR_SURFACE_LOST_KHR)
    ));
    assert!(gpu.submissions().is_empty());
    engine.cleanup().unwrap();
}

#[test]
fn test_submit_error_is_fatal() {
    let (gpu, mut engine) = start(&config());
    presented(engine.draw_frame().unwrap());
    gpu.error_next_submit(vk::Result::ERROR_DEVICE_LOST);

    let (stage, source) = fatal_stage(engine.draw_frame().unwrap_err());
    assert_eq!(stage, FrameStage::Submit);
    assert!(matches!(
        source,
        RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
    ));
    assert_eq!(engine.frame_number(), 1);
    assert_eq!(gpu.submissions().len(), 1);

    engine.cleanup().unwrap();
    assert_eq!(gpu.live_objects(), 0);
}

#[test]
fn test_present_error_is_fatal() {
    let (gpu, mut engine) = start(&config());
    gpu.error_next_present(vk::Result::ERROR_DEVICE_LOST);

    let (stage, _) = fatal_stage(engine.draw_frame().unwrap_err());
    assert_eq!(stage, FrameStage::Present);
    // The work was submitted but the frame does not count.
    assert_eq!(gpu.submissions().len(), 1);
    assert_eq!(engine.frame_number(), 0);
    assert!(
        !gpu.events()
            .iter()
            .any(|e| matches!(e, GpuEvent::Present { .. }))
    );
    engine.cleanup().unwrap();
}

#[test]
fn test_suboptimal_acquire_presents_then_rebuilds() {
    let (gpu, mut engine) = start(&config());
    gpu.suboptimal_next_acquires(1);

    let info = presented(engine.draw_frame().unwrap());
    assert_eq!(info.frame_number, 0);
    assert!(info.rebuild_pending);
    assert_eq!(gpu.submissions().len(), 1);
    assert!(
        !gpu.events()
            .iter()
            .any(|e| matches!(e, GpuEvent::RecreateSwapchain { .. }))
    );

    let before = gpu.events().len();
    let info = presented(engine.draw_frame().unwrap());
    assert_eq!(info.frame_number, 1);
    assert!(!info.rebuild_pending);
    let events = gpu.events()[before..].to_vec();
    let rebuilt = events
        .iter()
        .position(|e| matches!(e, GpuEvent::RecreateSwapchain { .. }))
        .unwrap();
    let acquired = events
        .iter()
        .position(|e| matches!(e, GpuEvent::Acquire { .. }))
        .unwrap();
    assert!(rebuilt < acquired);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    engine.cleanup().unwrap();
}

#[test]
fn test_stale_acquire_rebuilds_and_retries_same_frame() {
    let (gpu, mut engine) = start(&config());
    gpu.fail_next_acquires(1);

    assert_eq!(engine.draw_frame().unwrap(), FrameOutcome::SwapchainRebuilt);
    assert_eq!(engine.frame_number(), 0);
    assert!(gpu.submissions().is_empty());

    let info = presented(engine.draw_frame().unwrap());
    assert_eq!((info.frame_number, info.slot), (0, 0));

    let events = gpu.events();
    let rebuilt = events
        .iter()
        .position(|e| matches!(e, GpuEvent::RecreateSwapchain { .. }))
        .unwrap();
    let idle = events.iter().position(|e| *e == GpuEvent::WaitIdle).unwrap();
    assert!(idle < rebuilt);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    engine.cleanup().unwrap();
}

#[test]
fn test_stale_present_still_counts_and_rebuilds_next() {
    let (gpu, mut engine) = start(&config());
    gpu.fail_next_presents(1);

    let info = presented(engine.draw_frame().unwrap());
    assert!(info.rebuild_pending);
    assert_eq!(engine.frame_number(), 1);

    let before = gpu.events().len();
    let info = presented(engine.draw_frame().unwrap());
    assert_eq!(info.frame_number, 1);
    assert!(!info.rebuild_pending);

    let events = gpu.events()[before..].to_vec();
    let rebuilt = events
        .iter()
        .position(|e| matches!(e, GpuEvent::RecreateSwapchain { .. }))
        .unwrap();
    let acquired = events
        .iter()
        .position(|e| matches!(e, GpuEvent::Acquire { .. }))
        .unwrap();
    assert!(rebuilt < acquired);
    engine.cleanup().unwrap();
}

#[test]
fn test_background_effect_selection_and_edit() {
    let (gpu, mut engine) = start(&config());

    engine.draw_frame().unwrap();
    let gradient = engine.active_effect().unwrap().pipeline;

    engine.select_effect(1).unwrap();
    engine.active_effect_mut().unwrap().data.data1.x = 0.5;
    engine.draw_frame().unwrap();
    let sky = engine.active_effect().unwrap().clone();
    assert_ne!(gradient, sky.pipeline);

    assert!(matches!(
        engine.select_effect(9),
        Err(FrameError::NoSuchEffect { index: 9, count: 2 })
    ));
    assert_eq!(engine.active_effect().unwrap().name, "sky");

    let submissions = gpu.submissions();
    let bound = |i: usize| {
        submissions[i]
            .commands
            .iter()
            .find_map(|c| match c {
                RecordedCommand::BindPipeline {
                    bind_point: vk::PipelineBindPoint::COMPUTE,
                    pipeline,
                } => Some(*pipeline),
                _ => None,
            })
            .unwrap()
    };
    assert_eq!(bound(0), gradient);
    assert_eq!(bound(1), sky.pipeline);

    let pushed = submissions[1]
        .commands
        .iter()
        .find_map(|c| match c {
            RecordedCommand::PushConstants { data, .. } => Some(data.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(pushed, bytemuck::bytes_of(&sky.data).to_vec());
    assert_eq!(&pushed[0..4], &0.5f32.to_le_bytes());

    let dispatch = submissions[1]
        .commands
        .iter()
        .find(|c| matches!(c, RecordedCommand::Dispatch { .. }))
        .unwrap();
    assert_eq!(dispatch, &RecordedCommand::Dispatch { x: 20, y: 15, z: 1 });
    engine.cleanup().unwrap();
}

#[test]
fn test_immediate_submit_blocks_outside_frames() {
    let (gpu, mut engine) = start(&config());
    gpu.set_completion_delay(Duration::from_millis(10));

    let started = Instant::now();
    engine
        .immediate_submit(|cmd| cmd.dispatch(1, 1, 1))
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(10));

    engine.draw_frame().unwrap();
    engine.immediate_submit(|cmd| cmd.dispatch(2, 1, 1)).unwrap();
    assert_eq!(gpu.submissions().len(), 3);
    assert!(gpu.violations().is_empty());
    engine.cleanup().unwrap();
}
