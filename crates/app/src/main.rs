//! ember - main entry point.
//!
//! Opens a window, brings up Vulkan and runs the frame loop until the window closes
//! or a fatal GPU error occurs.

mod controls;

use anyhow::{Context, Result};
use tracing::{error, info};

use ember_core::EngineConfig;
use ember_platform::Platform;
use ember_renderer::{Engine, RenderLoop};
use ember_rhi::DeviceRef;

use crate::controls::EffectControls;

fn main() -> Result<()> {
    ember_core::init_logging();
    info!("Starting ember");

    let config = EngineConfig::from_env().context("invalid configuration")?;
    info!(
        "Shader directory: {}, validation: {}",
        config.shader_dir.display(),
        config.enable_validation
    );

    let mut platform = Platform::new(&config)?;
    let context = platform
        .open_window()?
        .create_context(&config)
        .context("failed to initialize Vulkan")?;
    let device: DeviceRef = context.device;
    let mut engine =
        Engine::init(&config, device, context.swapchain).context("failed to initialize engine")?;

    let mut controls = EffectControls::new();
    platform.set_input_handler(move |input, engine| controls.apply(input, engine));

    info!("Initialization complete, entering main loop");
    let result = RenderLoop::from_config(&config).run(&mut engine, &mut platform);
    if let Err(e) = &result {
        error!("Render loop failed: {}", e);
    }

    // The swapchain must go before the window it presents to.
    let teardown = engine.cleanup();
    drop(engine);
    drop(platform);

    let stats = result.context("render loop failed")?;
    teardown.context("teardown failed")?;
    info!(
        "Exited cleanly after {} frame(s) ({} swapchain rebuild(s))",
        stats.frames_presented, stats.swapchain_rebuilds
    );
    Ok(())
}
