//! Graphics and compute pipeline state.
//!
//! - [`PipelineBuilder`] accumulates fixed-function and shader-stage state for a
//!   dynamic-rendering graphics pipeline and turns it into a [`GraphicsPipelineDesc`].
//! - [`ComputePipelineDesc`] describes a single-stage compute pipeline.
//! - [`create_pipeline_layout`] builds the layout both kinds bind against.
//!
//! The builder is plain data. It can be reused: `clear`, set state, `build`, repeat.
//! Every build produces an independent pipeline object owned by the caller.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use ember_rhi::DeviceRef;
//! use ember_rhi::pipeline::{CullMode, FrontFace, PipelineBuilder, PolygonMode, PrimitiveTopology};
//!
//! # fn example(device: DeviceRef, vert: vk::ShaderModule, frag: vk::ShaderModule,
//! #            layout: vk::PipelineLayout) -> Result<(), ember_rhi::RhiError> {
//! let mut builder = PipelineBuilder::new();
//! builder.set_shaders(vert, frag);
//! builder.set_input_topology(PrimitiveTopology::TriangleList);
//! builder.set_polygon_mode(PolygonMode::Fill);
//! builder.set_cull_mode(CullMode::None, FrontFace::Clockwise);
//! builder.set_multisampling_none();
//! builder.disable_blending();
//! builder.disable_depthtest();
//! builder.set_color_attachment_format(vk::Format::R16G16B16A16_SFLOAT);
//! builder.set_layout(layout);
//!
//! let pipeline = builder.build(device.as_ref())?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, error};

use crate::error::{RhiError, RhiResult};
use crate::gpu::GpuDevice;

/// Creates a pipeline layout from descriptor set layouts and push constant ranges.
///
/// # Errors
///
/// Returns the device error if layout creation fails.
pub fn create_pipeline_layout(
    device: &dyn GpuDevice,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> RhiResult<vk::PipelineLayout> {
    let layout = device.create_pipeline_layout(set_layouts, push_constant_ranges)?;
    debug!(
        "Created pipeline layout {:?} with {} set layout(s) and {} push constant range(s)",
        layout,
        set_layouts.len(),
        push_constant_ranges.len()
    );
    Ok(layout)
}

/// Primitive topology for input assembly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    LineList,
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

impl PolygonMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    #[default]
    None,
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Front face winding order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Depth comparison. `Never` is the placeholder while the depth test is off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    #[default]
    Never,
    LessOrEqual,
    GreaterOrEqual,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        }
    }
}

/// Fully validated graphics pipeline state, ready for a device to compile.
///
/// Vertex input is always empty (vertices are generated or pulled in the shader), and
/// there is exactly one viewport, one scissor and one color attachment.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub topology: PrimitiveTopology,
    pub polygon_mode: PolygonMode,
    pub line_width: f32,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub rasterization_samples: vk::SampleCountFlags,
    pub min_sample_shading: f32,
    /// Blending is always off; this is the only color output state.
    pub color_write_mask: vk::ColorComponentFlags,
    pub color_format: vk::Format,
    /// `UNDEFINED` when the pipeline renders without depth.
    pub depth_format: vk::Format,
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareOp,
    pub layout: vk::PipelineLayout,
    pub dynamic_states: Vec<vk::DynamicState>,
}

/// Single-stage compute pipeline. The entry point is always `main`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub layout: vk::PipelineLayout,
    pub shader: vk::ShaderModule,
}

/// Reusable accumulator for graphics pipeline state.
///
/// Setters mutate one category in place. [`clear`](Self::clear) restores the defaults:
/// no shaders, triangle list, fill, no culling, a single sample, all channels masked off,
/// no depth and no layout.
#[derive(Clone, Debug)]
pub struct PipelineBuilder {
    shaders: Option<(vk::ShaderModule, vk::ShaderModule)>,
    topology: PrimitiveTopology,
    polygon_mode: PolygonMode,
    line_width: f32,
    cull_mode: CullMode,
    front_face: FrontFace,
    rasterization_samples: vk::SampleCountFlags,
    min_sample_shading: f32,
    color_write_mask: vk::ColorComponentFlags,
    color_format: Option<vk::Format>,
    depth_format: vk::Format,
    depth_test_enable: bool,
    depth_write_enable: bool,
    depth_compare_op: CompareOp,
    layout: Option<vk::PipelineLayout>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            shaders: None,
            topology: PrimitiveTopology::TriangleList,
            polygon_mode: PolygonMode::Fill,
            line_width: 1.0,
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: 1.0,
            color_write_mask: vk::ColorComponentFlags::empty(),
            color_format: None,
            depth_format: vk::Format::UNDEFINED,
            depth_test_enable: false,
            depth_write_enable: false,
            depth_compare_op: CompareOp::Never,
            layout: None,
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets every field to its default.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Replaces both shader stages.
    pub fn set_shaders(&mut self, vertex: vk::ShaderModule, fragment: vk::ShaderModule) {
        self.shaders = Some((vertex, fragment));
    }

    /// Sets the topology. Primitive restart is always off.
    pub fn set_input_topology(&mut self, topology: PrimitiveTopology) {
        self.topology = topology;
    }

    pub fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.polygon_mode = mode;
        self.line_width = 1.0;
    }

    pub fn set_cull_mode(&mut self, cull_mode: CullMode, front_face: FrontFace) {
        self.cull_mode = cull_mode;
        self.front_face = front_face;
    }

    /// One sample per pixel, no sample shading, no alpha-to-coverage.
    pub fn set_multisampling_none(&mut self) {
        self.rasterization_samples = vk::SampleCountFlags::TYPE_1;
        self.min_sample_shading = 1.0;
    }

    /// Blending off, all channels written.
    pub fn disable_blending(&mut self) {
        self.color_write_mask = vk::ColorComponentFlags::RGBA;
    }

    pub fn set_color_attachment_format(&mut self, format: vk::Format) {
        self.color_format = Some(format);
    }

    pub fn set_depth_format(&mut self, format: vk::Format) {
        self.depth_format = format;
    }

    pub fn disable_depthtest(&mut self) {
        self.depth_test_enable = false;
        self.depth_write_enable = false;
        self.depth_compare_op = CompareOp::Never;
    }

    pub fn enable_depthtest(&mut self, depth_write_enable: bool, op: CompareOp) {
        self.depth_test_enable = true;
        self.depth_write_enable = depth_write_enable;
        self.depth_compare_op = op;
    }

    pub fn set_layout(&mut self, layout: vk::PipelineLayout) {
        self.layout = Some(layout);
    }

    /// Validates the accumulated state and freezes it into a description.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] naming the first missing piece of state.
    pub fn describe(&self) -> RhiResult<GraphicsPipelineDesc> {
        let (vertex_shader, fragment_shader) = self
            .shaders
            .ok_or_else(|| RhiError::PipelineError("vertex and fragment shaders are required".into()))?;
        let color_format = self
            .color_format
            .filter(|format| *format != vk::Format::UNDEFINED)
            .ok_or_else(|| RhiError::PipelineError("color attachment format is required".into()))?;
        let layout = self
            .layout
            .ok_or_else(|| RhiError::PipelineError("pipeline layout is required".into()))?;

        Ok(GraphicsPipelineDesc {
            vertex_shader,
            fragment_shader,
            topology: self.topology,
            polygon_mode: self.polygon_mode,
            line_width: self.line_width,
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            rasterization_samples: self.rasterization_samples,
            min_sample_shading: self.min_sample_shading,
            color_write_mask: self.color_write_mask,
            color_format,
            depth_format: self.depth_format,
            depth_test_enable: self.depth_test_enable,
            depth_write_enable: self.depth_write_enable,
            depth_compare_op: self.depth_compare_op,
            layout,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        })
    }

    /// Builds a graphics pipeline from the current state.
    ///
    /// The builder is left untouched, so calling `build` again yields a second,
    /// independent pipeline.
    ///
    /// # Errors
    ///
    /// Incomplete state or a device failure is logged and returned; no pipeline is
    /// created in that case.
    pub fn build(&self, device: &dyn GpuDevice) -> RhiResult<vk::Pipeline> {
        let desc = self.describe().inspect_err(|e| {
            error!("Failed to create graphics pipeline: {e}");
        })?;

        let pipeline = device.create_graphics_pipeline(&desc).inspect_err(|e| {
            error!("Failed to create graphics pipeline: {e}");
        })?;

        debug!(
            "Created graphics pipeline {:?} ({:?}, {:?}, color {:?})",
            pipeline, desc.topology, desc.polygon_mode, desc.color_format
        );
        Ok(pipeline)
    }
}
