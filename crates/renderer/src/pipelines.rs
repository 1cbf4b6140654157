//! Session pipelines: background compute effects and the triangle pass.
//!
//! Missing or malformed shader blobs are not fatal. The affected effect or pass is
//! dropped with a warning and the frame protocol runs without it. Failures creating a
//! layout or a pipeline from valid shaders abort startup.
//!
//! Every object created here is released through the session ledger.

use std::path::Path;

use tracing::{info, warn};

use ember_rhi::pipeline::{
    ComputePipelineDesc, CullMode, FrontFace, PipelineBuilder, PolygonMode, PrimitiveTopology,
    create_pipeline_layout,
};
use ember_rhi::shader::ShaderModule;
use ember_rhi::{DeviceRef, vk};

use crate::effects::{BackgroundEffects, ComputeEffect, ComputePushConstants, builtin_effects};
use crate::error::{FrameError, FrameResult};
use crate::ledger::TeardownLedger;

/// Blob names of the triangle pass.
pub const TRIANGLE_VERTEX_SHADER: &str = "colored_triangle.vert.spv";
pub const TRIANGLE_FRAGMENT_SHADER: &str = "colored_triangle.frag.spv";

/// Graphics pipeline drawing one hard-coded triangle over the background.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrianglePass {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Builds the background effects against the draw image layout.
///
/// Effects whose shader cannot be loaded are skipped. An empty result means the
/// background pass is skipped every frame.
pub fn init_background_pipelines(
    device: &DeviceRef,
    shader_dir: &Path,
    draw_image_layout: vk::DescriptorSetLayout,
    ledger: &mut TeardownLedger,
) -> FrameResult<BackgroundEffects> {
    let push_constants = [vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .offset(0)
        .size(ComputePushConstants::SIZE)];

    let layout = create_pipeline_layout(device.as_ref(), &[draw_image_layout], &push_constants)
        .map_err(FrameError::init("compute pipeline layout"))?;
    {
        let device = device.clone();
        ledger.record(move || device.destroy_pipeline_layout(layout));
    }

    let mut effects = Vec::new();
    for def in builtin_effects() {
        let path = shader_dir.join(def.shader);
        let shader = match ShaderModule::load(device.clone(), &path) {
            Ok(shader) => shader,
            Err(e) => {
                warn!("Background effect '{}' disabled: {e}", def.name);
                continue;
            }
        };

        let pipeline = device
            .create_compute_pipeline(&ComputePipelineDesc {
                layout,
                shader: shader.handle(),
            })
            .map_err(FrameError::init("compute pipeline"))?;
        {
            let device = device.clone();
            ledger.record(move || device.destroy_pipeline(pipeline));
        }

        effects.push(ComputeEffect {
            name: def.name.to_string(),
            pipeline,
            layout,
            data: def.data,
        });
    }

    let effects = BackgroundEffects::new(effects);
    if effects.is_empty() {
        warn!("No background effect could be loaded; the background pass is skipped");
    } else {
        info!("Background effects: {:?}", effects.names());
    }
    Ok(effects)
}

/// Builds the triangle pass for `color_format`, or `None` when its shaders are missing.
pub fn init_triangle_pipeline(
    device: &DeviceRef,
    shader_dir: &Path,
    color_format: vk::Format,
    ledger: &mut TeardownLedger,
) -> FrameResult<Option<TrianglePass>> {
    let load = |name: &str| ShaderModule::load(device.clone(), &shader_dir.join(name));
    let (vertex, fragment) = match (load(TRIANGLE_VERTEX_SHADER), load(TRIANGLE_FRAGMENT_SHADER)) {
        (Ok(vertex), Ok(fragment)) => (vertex, fragment),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Triangle pass disabled: {e}");
            return Ok(None);
        }
    };

    let layout = create_pipeline_layout(device.as_ref(), &[], &[])
        .map_err(FrameError::init("triangle pipeline layout"))?;
    {
        let device = device.clone();
        ledger.record(move || device.destroy_pipeline_layout(layout));
    }

    let mut builder = PipelineBuilder::new();
    builder.set_shaders(vertex.handle(), fragment.handle());
    builder.set_input_topology(PrimitiveTopology::TriangleList);
    builder.set_polygon_mode(PolygonMode::Fill);
    builder.set_cull_mode(CullMode::None, FrontFace::Clockwise);
    builder.set_multisampling_none();
    builder.disable_blending();
    builder.disable_depthtest();
    builder.set_color_attachment_format(color_format);
    builder.set_depth_format(vk::Format::UNDEFINED);
    builder.set_layout(layout);

    let pipeline = builder
        .build(device.as_ref())
        .map_err(FrameError::init("triangle pipeline"))?;
    {
        let device = device.clone();
        ledger.record(move || device.destroy_pipeline(pipeline));
    }

    info!("Triangle pass ready");
    Ok(Some(TrianglePass { pipeline, layout }))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use ember_rhi::GpuDevice;
    use ember_rhi::testing::FakeGpu;

    const SPIRV_STUB: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0, 0, 0, 0];

    fn shader_dir(files: &[&str]) -> PathBuf {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let dir = std::env::temp_dir().join(format!(
            "ember-pipelines-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        for file in files {
            std::fs::write(dir.join(file), SPIRV_STUB).unwrap();
        }
        dir
    }

    fn draw_layout(gpu: &FakeGpu) -> vk::DescriptorSetLayout {
        gpu.create_descriptor_set_layout(&[]).unwrap()
    }

    #[test]
    fn test_background_effects_from_complete_dir() {
        let gpu = Arc::new(FakeGpu::new());
        let device: DeviceRef = gpu.clone();
        let dir = shader_dir(&["gradient_color.comp.spv", "sky.comp.spv"]);
        let mut ledger = TeardownLedger::new();

        let effects =
            init_background_pipelines(&device, &dir, draw_layout(&gpu), &mut ledger).unwrap();
        assert_eq!(effects.names(), vec!["gradient", "sky"]);
        let layouts: Vec<_> = effects.iter().map(|e| e.layout).collect();
        assert_eq!(layouts[0], layouts[1]);
        // Layout + two pipelines.
        assert_eq!(ledger.len(), 3);

        ledger.flush();
        // Only the descriptor set layout created by the test remains.
        assert_eq!(gpu.live_objects(), 1);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn test_missing_effect_shader_is_skipped() {
        let gpu = Arc::new(FakeGpu::new());
        let device: DeviceRef = gpu.clone();
        let dir = shader_dir(&["sky.comp.spv"]);
        let mut ledger = TeardownLedger::new();

        let effects =
            init_background_pipelines(&device, &dir, draw_layout(&gpu), &mut ledger).unwrap();
        assert_eq!(effects.names(), vec!["sky"]);
        assert_eq!(effects.active().unwrap().data.data1.w, 0.97);
        ledger.flush();
    }

    #[test]
    fn test_no_effect_shaders_yields_empty_list() {
        let gpu = Arc::new(FakeGpu::new());
        let device: DeviceRef = gpu.clone();
        let dir = shader_dir(&[]);
        let mut ledger = TeardownLedger::new();

        let effects =
            init_background_pipelines(&device, &dir, draw_layout(&gpu), &mut ledger).unwrap();
        assert!(effects.is_empty());
        ledger.flush();
    }

    #[test]
    fn test_triangle_pipeline_state() {
        let gpu = Arc::new(FakeGpu::new());
        let device: DeviceRef = gpu.clone();
        let dir = shader_dir(&[TRIANGLE_VERTEX_SHADER, TRIANGLE_FRAGMENT_SHADER]);
        let mut ledger = TeardownLedger::new();

        let pass = init_triangle_pipeline(
            &device,
            &dir,
            vk::Format::R16G16B16A16_SFLOAT,
            &mut ledger,
        )
        .unwrap()
        .unwrap();

        let desc = gpu.pipeline_desc(pass.pipeline).unwrap();
        assert_eq!(desc.topology, PrimitiveTopology::TriangleList);
        assert_eq!(desc.cull_mode, CullMode::None);
        assert_eq!(desc.front_face, FrontFace::Clockwise);
        assert_eq!(desc.color_format, vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(desc.depth_format, vk::Format::UNDEFINED);
        assert!(!desc.depth_test_enable);
        assert_eq!(desc.color_write_mask, vk::ColorComponentFlags::RGBA);
        assert_eq!(desc.layout, pass.layout);

        ledger.flush();
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn test_triangle_missing_shader_disables_pass() {
        let gpu = Arc::new(FakeGpu::new());
        let device: DeviceRef = gpu.clone();
        let dir = shader_dir(&[TRIANGLE_VERTEX_SHADER]);
        let mut ledger = TeardownLedger::new();

        let pass =
            init_triangle_pipeline(&device, &dir, vk::Format::R16G16B16A16_SFLOAT, &mut ledger)
                .unwrap();
        assert!(pass.is_none());
        assert!(ledger.is_empty());
        assert_eq!(gpu.live_objects(), 0);
    }
}
