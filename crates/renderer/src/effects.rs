//! Background compute effects.
//!
//! Each effect is a compute pipeline that fills the draw image. All effects share one
//! pipeline layout: the draw image as a storage image at set 0, binding 0, and four
//! `vec4` parameters in a push-constant block.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

use ember_rhi::vk;

use crate::error::{FrameError, FrameResult};

/// Push-constant block shared by every background effect.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComputePushConstants {
    pub data1: Vec4,
    pub data2: Vec4,
    pub data3: Vec4,
    pub data4: Vec4,
}

impl ComputePushConstants {
    /// Size of the block as declared in the pipeline layout.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    /// Mutable access to parameter `index` (0-based), for in-place editing.
    pub fn param_mut(&mut self, index: usize) -> Option<&mut Vec4> {
        match index {
            0 => Some(&mut self.data1),
            1 => Some(&mut self.data2),
            2 => Some(&mut self.data3),
            3 => Some(&mut self.data4),
            _ => None,
        }
    }
}

/// A background effect ready to dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputeEffect {
    pub name: String,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub data: ComputePushConstants,
}

/// Static description of a built-in effect.
#[derive(Clone, Copy, Debug)]
pub struct EffectDef {
    pub name: &'static str,
    /// SPIR-V blob name, resolved against the shader directory.
    pub shader: &'static str,
    pub data: ComputePushConstants,
}

/// Effects built at startup, in selection order.
pub fn builtin_effects() -> [EffectDef; 2] {
    [
        EffectDef {
            name: "gradient",
            shader: "gradient_color.comp.spv",
            data: ComputePushConstants {
                data1: Vec4::new(1.0, 0.0, 0.0, 1.0),
                data2: Vec4::new(0.0, 0.0, 1.0, 1.0),
                ..Default::default()
            },
        },
        EffectDef {
            name: "sky",
            shader: "sky.comp.spv",
            data: ComputePushConstants {
                data1: Vec4::new(0.1, 0.2, 0.4, 0.97),
                ..Default::default()
            },
        },
    ]
}

/// Session-lifetime list of effects with one selected.
///
/// Pipelines are owned by the session ledger; this list only references them.
#[derive(Clone, Debug, Default)]
pub struct BackgroundEffects {
    effects: Vec<ComputeEffect>,
    active: usize,
}

impl BackgroundEffects {
    pub fn new(effects: Vec<ComputeEffect>) -> Self {
        Self { effects, active: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Index of the selected effect. Meaningless when the list is empty.
    #[inline]
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> Option<&ComputeEffect> {
        self.effects.get(self.active)
    }

    pub fn active_mut(&mut self) -> Option<&mut ComputeEffect> {
        self.effects.get_mut(self.active)
    }

    /// Makes effect `index` the one dispatched from the next frame on.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NoSuchEffect`] and keeps the selection when out of range.
    pub fn select(&mut self, index: usize) -> FrameResult<&ComputeEffect> {
        let count = self.effects.len();
        let effect = self
            .effects
            .get(index)
            .ok_or(FrameError::NoSuchEffect { index, count })?;
        self.active = index;
        Ok(effect)
    }

    /// Selects the effect after the active one, wrapping around.
    pub fn select_next(&mut self) -> Option<&ComputeEffect> {
        if self.effects.is_empty() {
            return None;
        }
        self.active = (self.active + 1) % self.effects.len();
        self.effects.get(self.active)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComputeEffect> {
        self.effects.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.effects.iter().map(|e| e.name.as_str()).collect()
    }
}
