//! Render loop behavior with scripted window events.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ember_core::EngineConfig;
use ember_renderer::{Engine, EventSource, FrameError, LoopEvent, LoopStats, RenderLoop};
use ember_rhi::testing::{FakeGpu, GpuEvent};
use ember_rhi::vk;

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

fn start(config: &EngineConfig) -> (Arc<FakeGpu>, Engine) {
    let gpu = Arc::new(FakeGpu::new());
    let surface = gpu.create_swapchain(extent(128, 96));
    let engine = Engine::init(config, gpu.clone(), surface).unwrap();
    (gpu, engine)
}

fn config() -> EngineConfig {
    EngineConfig {
        window_width: 128,
        window_height: 96,
        frame_timeout: Duration::from_millis(30),
        minimized_throttle: Duration::from_millis(10),
        shader_dir: std::env::temp_dir().join("ember-render-loop-no-shaders"),
        ..EngineConfig::default()
    }
}

/// Hands out one batch of events per pump, then quits.
struct Script {
    batches: VecDeque<Vec<LoopEvent>>,
    pumps: u32,
}

impl Script {
    fn new(batches: Vec<Vec<LoopEvent>>) -> Self {
        Self {
            batches: batches.into(),
            pumps: 0,
        }
    }
}

impl EventSource for Script {
    fn pump(&mut self, _engine: &mut Engine, events: &mut Vec<LoopEvent>) {
        self.pumps += 1;
        match self.batches.pop_front() {
            Some(batch) => events.extend(batch),
            None => events.push(LoopEvent::Quit),
        }
    }
}

#[test]
fn test_loop_runs_until_quit() {
    let config = config();
    let (gpu, mut engine) = start(&config);
    let mut script = Script::new(vec![vec![]; 4]);

    let stats = RenderLoop::from_config(&config)
        .run(&mut engine, &mut script)
        .unwrap();
    assert_eq!(
        stats,
        LoopStats {
            iterations: 4,
            frames_presented: 4,
            swapchain_rebuilds: 0,
            minimized_iterations: 0,
        }
    );
    assert_eq!(script.pumps, 5);
    assert_eq!(engine.frame_number(), 4);
    engine.cleanup().unwrap();
    assert!(gpu.violations().is_empty());
}

#[test]
fn test_minimized_window_is_throttled_not_drawn() {
    let config = config();
    let (gpu, mut engine) = start(&config);
    let mut script = Script::new(vec![
        vec![],
        vec![LoopEvent::Minimized],
        vec![],
        vec![],
        vec![LoopEvent::Restored],
        vec![],
    ]);

    let started = Instant::now();
    let mut render_loop = RenderLoop::from_config(&config);
    let stats = render_loop.run(&mut engine, &mut script).unwrap();

    assert_eq!(stats.iterations, 6);
    assert_eq!(stats.minimized_iterations, 3);
    assert_eq!(stats.frames_presented, 3);
    assert!(!render_loop.is_minimized());
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(gpu.submissions().len(), 3);
    engine.cleanup().unwrap();
}

#[test]
fn test_resize_event_rebuilds_swapchain() {
    let config = config();
    let (gpu, mut engine) = start(&config);
    let mut script = Script::new(vec![
        vec![],
        vec![LoopEvent::Resized(extent(0, 0))],
        vec![LoopEvent::Resized(extent(200, 150))],
    ]);

    let stats = RenderLoop::from_config(&config)
        .run(&mut engine, &mut script)
        .unwrap();
    assert_eq!(stats.frames_presented, 3);
    assert_eq!(engine.swapchain_extent(), Some(extent(200, 150)));

    let rebuilds: Vec<_> = gpu
        .events()
        .into_iter()
        .filter(|e| matches!(e, GpuEvent::RecreateSwapchain { .. }))
        .collect();
    assert_eq!(
        rebuilds,
        vec![GpuEvent::RecreateSwapchain {
            extent: extent(200, 150)
        }]
    );
    engine.cleanup().unwrap();
}

#[test]
fn test_stale_acquire_counts_as_rebuild() {
    let config = config();
    let (gpu, mut engine) = start(&config);
    gpu.fail_next_acquires(1);
    let mut script = Script::new(vec![vec![]; 3]);

    let stats = RenderLoop::from_config(&config)
        .run(&mut engine, &mut script)
        .unwrap();
    assert_eq!(stats.swapchain_rebuilds, 1);
    assert_eq!(stats.frames_presented, 2);
    assert_eq!(engine.frame_number(), 2);
    engine.cleanup().unwrap();
}

#[test]
fn test_fatal_error_stops_loop() {
    let config = config();
    let (gpu, mut engine) = start(&config);
    gpu.set_hang(true);
    let mut script = Script::new(vec![vec![]; 10]);

    let err = RenderLoop::from_config(&config)
        .run(&mut engine, &mut script)
        .unwrap_err();
    assert!(matches!(err, FrameError::Fatal { .. }));
    // Two fresh slots, then the wait on frame 0's fence expires.
    assert_eq!(script.pumps, 3);
    assert!(engine.cleanup().is_err());
}

#[test]
fn test_event_source_can_drive_engine() {
    struct NextEffect(u32);

    impl EventSource for NextEffect {
        fn pump(&mut self, engine: &mut Engine, events: &mut Vec<LoopEvent>) {
            if self.0 == 0 {
                events.push(LoopEvent::Quit);
                return;
            }
            self.0 -= 1;
            assert!(engine.select_next_effect().is_none());
            assert!(engine.active_effect().is_none());
        }
    }

    let config = config();
    let (_gpu, mut engine) = start(&config);
    let stats = RenderLoop::default()
        .run(&mut engine, &mut NextEffect(2))
        .unwrap();
    assert_eq!(stats.frames_presented, 2);
    engine.cleanup().unwrap();
}
