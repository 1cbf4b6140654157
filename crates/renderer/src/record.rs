//! Command recording for one frame.

use ember_rhi::command::CommandBuffer;
use ember_rhi::image::AllocatedImage;
use ember_rhi::swapchain::SwapchainImage;
use ember_rhi::vk;

use crate::effects::ComputeEffect;
use crate::ledger::TeardownLedger;
use crate::overlay::{OverlayCompositor, OverlayContext};
use crate::pipelines::TrianglePass;

/// Workgroup edge of the background compute shaders.
pub const WORKGROUP_SIZE: u32 = 16;

/// Images a frame renders through.
#[derive(Clone, Copy, Debug)]
pub struct FrameTargets {
    pub draw_image: AllocatedImage,
    /// Region of the draw image that is rendered and blitted.
    pub draw_extent: vk::Extent2D,
    pub swapchain_image: SwapchainImage,
    pub swapchain_extent: vk::Extent2D,
}

/// Passes recorded into a frame. `None` skips the pass.
pub struct FramePasses<'a> {
    pub background: Option<&'a ComputeEffect>,
    pub draw_image_set: vk::DescriptorSet,
    pub triangle: Option<&'a TrianglePass>,
    pub overlay: &'a mut dyn OverlayCompositor,
}

/// Rendered extent: the part of the draw image that fits the swapchain.
pub fn draw_extent(draw_image: vk::Extent2D, swapchain: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: draw_image.width.min(swapchain.width),
        height: draw_image.height.min(swapchain.height),
    }
}

/// Workgroups covering `extent`.
pub fn dispatch_size(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// Records background, geometry, blit and overlay into `cmd`, which is recording.
///
/// Leaves the swapchain image in `PRESENT_SRC_KHR`.
pub fn record_frame(
    cmd: &CommandBuffer,
    targets: &FrameTargets,
    passes: FramePasses<'_>,
    ledger: &mut TeardownLedger,
    frame_number: u64,
) {
    let draw = targets.draw_image.image;
    let swapchain = targets.swapchain_image.image;

    cmd.transition_image(draw, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);
    if let Some(effect) = passes.background {
        record_background(cmd, effect, passes.draw_image_set, targets.draw_extent);
    }

    cmd.transition_image(
        draw,
        vk::ImageLayout::GENERAL,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );
    if let Some(triangle) = passes.triangle {
        record_geometry(cmd, triangle, targets.draw_image.view, targets.draw_extent);
    }

    cmd.transition_image(
        draw,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );
    cmd.transition_image(
        swapchain,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );
    cmd.blit_image(
        draw,
        swapchain,
        targets.draw_extent,
        targets.swapchain_extent,
    );

    cmd.transition_image(
        swapchain,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );
    cmd.begin_rendering(targets.swapchain_image.view, targets.swapchain_extent, None);
    passes.overlay.compose(&mut OverlayContext {
        command_buffer: cmd,
        target_view: targets.swapchain_image.view,
        extent: targets.swapchain_extent,
        frame_number,
        ledger,
    });
    cmd.end_rendering();

    cmd.transition_image(
        swapchain,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );
}

fn record_background(
    cmd: &CommandBuffer,
    effect: &ComputeEffect,
    draw_image_set: vk::DescriptorSet,
    extent: vk::Extent2D,
) {
    cmd.bind_pipeline(vk::PipelineBindPoint::COMPUTE, effect.pipeline);
    cmd.bind_descriptor_sets(
        vk::PipelineBindPoint::COMPUTE,
        effect.layout,
        0,
        &[draw_image_set],
    );
    cmd.push_constants(effect.layout, vk::ShaderStageFlags::COMPUTE, &effect.data);
    let (x, y) = dispatch_size(extent);
    cmd.dispatch(x, y, 1);
}

fn record_geometry(
    cmd: &CommandBuffer,
    triangle: &TrianglePass,
    target: vk::ImageView,
    extent: vk::Extent2D,
) {
    cmd.begin_rendering(target, extent, None);
    cmd.set_viewport(extent);
    cmd.set_scissor(extent);
    cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, triangle.pipeline);
    cmd.draw(3, 1, 0, 0);
    cmd.end_rendering();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_rhi::image::ImageDesc;
    use ember_rhi::testing::{FakeGpu, RecordedCommand};
    use ember_rhi::vk::Handle;
    use ember_rhi::DeviceRef;

    use super::*;
    use crate::effects::ComputePushConstants;
    use crate::overlay::NoOverlay;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_draw_extent_is_the_overlap() {
        assert_eq!(draw_extent(extent(1700, 900), extent(800, 600)), extent(800, 600));
        assert_eq!(draw_extent(extent(1700, 900), extent(1920, 600)), extent(1700, 600));
    }

    #[test]
    fn test_dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(extent(1700, 900)), (107, 57));
        assert_eq!(dispatch_size(extent(16, 32)), (1, 2));
        assert_eq!(dispatch_size(extent(1, 1)), (1, 1));
    }

    struct CountingOverlay(u32);

    impl OverlayCompositor for CountingOverlay {
        fn compose(&mut self, ctx: &mut OverlayContext<'_>) {
            self.0 += 1;
            ctx.command_buffer.draw(6, 1, 0, 0);
            ctx.ledger.record(|| {});
        }
    }

    fn setup() -> (Arc<FakeGpu>, ember_rhi::command::CommandPool, FrameTargets) {
        let gpu = Arc::new(FakeGpu::new());
        let device: DeviceRef = gpu.clone();
        let pool = ember_rhi::command::CommandPool::new(device.clone()).unwrap();
        let draw_image = device.create_image(&ImageDesc::draw_target(64, 64)).unwrap();
        let targets = FrameTargets {
            draw_image,
            draw_extent: extent(64, 48),
            swapchain_image: SwapchainImage {
                image: vk::Image::from_raw(900),
                view: vk::ImageView::from_raw(901),
            },
            swapchain_extent: extent(64, 48),
        };
        (gpu, pool, targets)
    }

    #[test]
    fn test_full_frame_order() {
        let (gpu, pool, targets) = setup();
        let cmd = pool.allocate_command_buffer().unwrap();
        let effect = ComputeEffect {
            name: "gradient".into(),
            pipeline: vk::Pipeline::from_raw(500),
            layout: vk::PipelineLayout::from_raw(501),
            data: ComputePushConstants::default(),
        };
        let triangle = TrianglePass {
            pipeline: vk::Pipeline::from_raw(600),
            layout: vk::PipelineLayout::from_raw(601),
        };
        let mut overlay = CountingOverlay(0);
        let mut ledger = TeardownLedger::new();

        cmd.begin().unwrap();
        record_frame(
            &cmd,
            &targets,
            FramePasses {
                background: Some(&effect),
                draw_image_set: vk::DescriptorSet::from_raw(700),
                triangle: Some(&triangle),
                overlay: &mut overlay,
            },
            &mut ledger,
            0,
        );
        cmd.end().unwrap();

        let draw = targets.draw_image.image;
        let swap = targets.swapchain_image.image;
        let transition = |image, old_layout, new_layout| RecordedCommand::TransitionImage {
            image,
            old_layout,
            new_layout,
        };
        let expected = vec![
            transition(draw, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL),
            RecordedCommand::BindPipeline {
                bind_point: vk::PipelineBindPoint::COMPUTE,
                pipeline: effect.pipeline,
            },
            RecordedCommand::BindDescriptorSets {
                bind_point: vk::PipelineBindPoint::COMPUTE,
                layout: effect.layout,
                first_set: 0,
                sets: vec![vk::DescriptorSet::from_raw(700)],
            },
            RecordedCommand::PushConstants {
                layout: effect.layout,
                stages: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                data: vec![0; 64],
            },
            RecordedCommand::Dispatch { x: 4, y: 3, z: 1 },
            transition(
                draw,
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            RecordedCommand::BeginRendering {
                color_view: targets.draw_image.view,
                extent: targets.draw_extent,
                clear: None,
            },
            RecordedCommand::SetViewport {
                extent: targets.draw_extent,
            },
            RecordedCommand::SetScissor {
                extent: targets.draw_extent,
            },
            RecordedCommand::BindPipeline {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                pipeline: triangle.pipeline,
            },
            RecordedCommand::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
            RecordedCommand::EndRendering,
            transition(
                draw,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
            transition(
                swap,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            RecordedCommand::BlitImage {
                src: draw,
                dst: swap,
                src_extent: targets.draw_extent,
                dst_extent: targets.swapchain_extent,
            },
            transition(
                swap,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            RecordedCommand::BeginRendering {
                color_view: targets.swapchain_image.view,
                extent: targets.swapchain_extent,
                clear: None,
            },
            RecordedCommand::Draw {
                vertex_count: 6,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
            RecordedCommand::EndRendering,
            transition(
                swap,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        ];
        assert_eq!(gpu.commands(cmd.handle()), expected);
        assert_eq!(overlay.0, 1);
        assert_eq!(ledger.len(), 1);
        ledger.flush();
    }

    #[test]
    fn test_missing_passes_keep_layout_chain() {
        let (gpu, pool, targets) = setup();
        let cmd = pool.allocate_command_buffer().unwrap();
        let mut overlay = NoOverlay;
        let mut ledger = TeardownLedger::new();

        cmd.begin().unwrap();
        record_frame(
            &cmd,
            &targets,
            FramePasses {
                background: None,
                draw_image_set: vk::DescriptorSet::null(),
                triangle: None,
                overlay: &mut overlay,
            },
            &mut ledger,
            7,
        );
        cmd.end().unwrap();

        let commands = gpu.commands(cmd.handle());
        assert!(!commands.iter().any(|c| matches!(
            c,
            RecordedCommand::Dispatch { .. } | RecordedCommand::Draw { .. }
        )));
        let layouts: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::TransitionImage { new_layout, .. } => Some(*new_layout),
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ]
        );
        assert!(
            commands
                .iter()
                .any(|c| matches!(c, RecordedCommand::BlitImage { .. }))
        );
    }
}
