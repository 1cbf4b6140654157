//! Descriptor set layouts and pool-backed descriptor set allocation.
//!
//! - [`DescriptorLayoutBuilder`] accumulates bindings and builds a set layout.
//! - [`DescriptorAllocator`] owns one pool sized from per-type ratios and hands out
//!   sets until the pool is full. It never grows; callers that need more capacity
//!   create another allocator.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use ember_rhi::DeviceRef;
//! use ember_rhi::descriptor::{DescriptorAllocator, DescriptorLayoutBuilder, PoolSizeRatio};
//!
//! # fn example(device: DeviceRef) -> Result<(), ember_rhi::RhiError> {
//! let mut builder = DescriptorLayoutBuilder::new();
//! builder.add_binding(0, vk::DescriptorType::STORAGE_IMAGE);
//! let layout = builder.build(device.as_ref(), vk::ShaderStageFlags::COMPUTE)?;
//!
//! let ratios = [PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0)];
//! let mut allocator = DescriptorAllocator::init_pool(device.clone(), 10, &ratios)?;
//! let set = allocator.allocate(layout)?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, warn};

use crate::error::{RhiError, RhiResult};
use crate::gpu::{DeviceRef, GpuDevice, ImageDescriptorWrite};

/// Accumulates descriptor bindings for one set layout.
#[derive(Debug, Default, Clone)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single-descriptor binding. Stage flags are filled in by [`build`](Self::build).
    pub fn add_binding(&mut self, binding: u32, descriptor_type: vk::DescriptorType) -> &mut Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1),
        );
        self
    }

    /// Removes every binding added so far.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }

    /// Creates the layout, making every binding visible to `shader_stages`.
    ///
    /// # Errors
    ///
    /// Returns the device error if layout creation fails.
    pub fn build(
        &self,
        device: &dyn GpuDevice,
        shader_stages: vk::ShaderStageFlags,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let bindings: Vec<_> = self
            .bindings
            .iter()
            .map(|binding| binding.stage_flags(binding.stage_flags | shader_stages))
            .collect();

        let layout = device.create_descriptor_set_layout(&bindings)?;
        debug!(
            "Created descriptor set layout {:?} with {} binding(s)",
            layout,
            bindings.len()
        );
        Ok(layout)
    }
}

/// Share of a pool's capacity reserved for one descriptor type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSizeRatio {
    pub descriptor_type: vk::DescriptorType,
    /// Descriptors of this type per set.
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub fn new(descriptor_type: vk::DescriptorType, ratio: f32) -> Self {
        Self {
            descriptor_type,
            ratio,
        }
    }
}

/// Pool sizes for `max_sets` sets. Types whose share rounds to zero are left out.
pub fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .filter_map(|ratio| {
            let count = (ratio.ratio * max_sets as f32).ceil();
            (count >= 1.0).then(|| {
                vk::DescriptorPoolSize::default()
                    .ty(ratio.descriptor_type)
                    .descriptor_count(count as u32)
            })
        })
        .collect()
}

/// A single fixed-capacity descriptor pool.
///
/// Teardown is explicit: call [`destroy_pool`](Self::destroy_pool) once the GPU no
/// longer uses any set from this pool.
pub struct DescriptorAllocator {
    device: DeviceRef,
    pool: vk::DescriptorPool,
    max_sets: u32,
    allocated: u32,
}

impl DescriptorAllocator {
    /// Creates a pool holding up to `max_sets` sets, with `ratio × max_sets` descriptors
    /// of each listed type.
    ///
    /// # Errors
    ///
    /// Returns the device error if the pool cannot be created. The engine treats this
    /// as a fatal startup error.
    pub fn init_pool(device: DeviceRef, max_sets: u32, ratios: &[PoolSizeRatio]) -> RhiResult<Self> {
        let sizes = pool_sizes(max_sets, ratios);
        let pool = device.create_descriptor_pool(max_sets, &sizes)?;

        debug!(
            "Created descriptor pool {:?}: max_sets={}, pool_sizes={}",
            pool,
            max_sets,
            sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
            allocated: 0,
        })
    }

    /// Allocates one set with the given layout.
    ///
    /// # Errors
    ///
    /// - [`RhiError::DescriptorPoolExhausted`] once `max_sets` sets are live, or when the
    ///   driver reports the pool out of memory
    /// - [`RhiError::InvalidHandle`] after [`destroy_pool`](Self::destroy_pool)
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        if self.pool == vk::DescriptorPool::null() {
            return Err(RhiError::InvalidHandle(
                "descriptor pool already destroyed".to_string(),
            ));
        }
        if self.allocated >= self.max_sets {
            return Err(RhiError::DescriptorPoolExhausted {
                max_sets: self.max_sets,
            });
        }

        let set = self
            .device
            .allocate_descriptor_set(self.pool, layout)
            .map_err(|e| match e {
                RhiError::VulkanError(
                    vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL,
                ) => RhiError::DescriptorPoolExhausted {
                    max_sets: self.max_sets,
                },
                other => other,
            })?;

        self.allocated += 1;
        Ok(set)
    }

    /// Returns every set to the pool. Sets issued earlier become invalid.
    pub fn clear_descriptors(&mut self) -> RhiResult<()> {
        if self.pool != vk::DescriptorPool::null() {
            self.device.reset_descriptor_pool(self.pool)?;
            debug!("Reset descriptor pool {:?}", self.pool);
        }
        self.allocated = 0;
        Ok(())
    }

    /// Destroys the pool and every set it issued. Calling it again does nothing.
    pub fn destroy_pool(&mut self) {
        if self.pool == vk::DescriptorPool::null() {
            return;
        }
        self.device.destroy_descriptor_pool(self.pool);
        debug!("Destroyed descriptor pool {:?}", self.pool);
        self.pool = vk::DescriptorPool::null();
        self.allocated = 0;
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Number of sets currently issued.
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        if self.pool != vk::DescriptorPool::null() {
            warn!(
                "Descriptor pool {:?} dropped without destroy_pool; handle leaked",
                self.pool
            );
        }
    }
}

/// Points binding `binding` of `set` at a storage image in `GENERAL` layout.
pub fn write_storage_image(
    device: &dyn GpuDevice,
    set: vk::DescriptorSet,
    binding: u32,
    view: vk::ImageView,
) {
    device.update_image_descriptor(&ImageDescriptorWrite {
        set,
        binding,
        descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
        view,
        layout: vk::ImageLayout::GENERAL,
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::FakeGpu;

    fn storage_layout(gpu: &FakeGpu) -> vk::DescriptorSetLayout {
        let mut builder = DescriptorLayoutBuilder::new();
        builder.add_binding(0, vk::DescriptorType::STORAGE_IMAGE);
        builder.build(gpu, vk::ShaderStageFlags::COMPUTE).unwrap()
    }

    #[test]
    fn test_layout_builder_applies_stages() {
        let gpu = FakeGpu::new();
        let mut builder = DescriptorLayoutBuilder::new();
        builder
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .add_binding(1, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(builder.bindings().len(), 2);
        assert!(builder.bindings()[0].stage_flags.is_empty());

        builder.build(&gpu, vk::ShaderStageFlags::COMPUTE).unwrap();
        let created = gpu.last_set_layout_bindings();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|(_, _, stages)| *stages == vk::ShaderStageFlags::COMPUTE));
        assert_eq!(created[1].1, vk::DescriptorType::UNIFORM_BUFFER);

        builder.clear();
        assert!(builder.bindings().is_empty());
    }

    #[test]
    fn test_pool_sizes_from_ratios() {
        let sizes = pool_sizes(
            10,
            &[
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0),
                PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 0.25),
                PoolSizeRatio::new(vk::DescriptorType::SAMPLER, 0.0),
            ],
        );
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 10);
        assert_eq!(sizes[1].descriptor_count, 3);
    }

    #[test]
    fn test_pool_exhaustion_fails_cleanly() {
        let gpu = Arc::new(FakeGpu::new());
        let layout = storage_layout(&gpu);
        let ratios = [PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0)];
        let mut allocator = DescriptorAllocator::init_pool(gpu.clone(), 3, &ratios).unwrap();

        let sets: Vec<_> = (0..3).map(|_| allocator.allocate(layout).unwrap()).collect();
        assert_eq!(allocator.allocated(), 3);

        let err = allocator.allocate(layout).unwrap_err();
        assert!(matches!(err, RhiError::DescriptorPoolExhausted { max_sets: 3 }));
        assert_eq!(allocator.allocated(), 3);
        // earlier sets are still distinct and untouched
        assert_eq!(gpu.live_descriptor_sets(allocator.handle()), sets.len());

        allocator.clear_descriptors().unwrap();
        assert!(allocator.allocate(layout).is_ok());

        allocator.destroy_pool();
        allocator.destroy_pool();
        assert!(matches!(
            allocator.allocate(layout),
            Err(RhiError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_driver_out_of_pool_memory_maps_to_exhausted() {
        let gpu = Arc::new(FakeGpu::new());
        let layout = storage_layout(&gpu);
        let mut allocator = DescriptorAllocator::init_pool(gpu.clone(), 4, &[]).unwrap();
        gpu.limit_descriptor_pool(allocator.handle(), 1);

        allocator.allocate(layout).unwrap();
        assert!(matches!(
            allocator.allocate(layout),
            Err(RhiError::DescriptorPoolExhausted { .. })
        ));
        allocator.destroy_pool();
    }

    #[test]
    fn test_write_storage_image() {
        let gpu = Arc::new(FakeGpu::new());
        let layout = storage_layout(&gpu);
        let mut allocator = DescriptorAllocator::init_pool(gpu.clone(), 1, &[]).unwrap();
        let set = allocator.allocate(layout).unwrap();

        write_storage_image(gpu.as_ref(), set, 0, vk::ImageView::null());
        let writes = gpu.descriptor_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].set, set);
        assert_eq!(writes[0].layout, vk::ImageLayout::GENERAL);
        assert_eq!(writes[0].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        allocator.destroy_pool();
    }
}
