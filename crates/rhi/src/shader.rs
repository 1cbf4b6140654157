//! Shader module loading.
//!
//! Shaders arrive as pre-compiled SPIR-V blobs on disk. Loading validates the blob
//! shape, converts it to 32-bit words and hands it to the device.
//!
//! A failed load is not fatal for the engine: callers log the error and fall back to
//! running without the pipeline that needed the shader.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use ember_rhi::DeviceRef;
//! use ember_rhi::shader::ShaderModule;
//!
//! # fn example(device: DeviceRef) {
//! match ShaderModule::load(device, Path::new("shaders/sky.comp.spv")) {
//!     Ok(module) => { /* build a pipeline with module.handle() */ }
//!     Err(e) => tracing::warn!("sky effect disabled: {e}"),
//! }
//! # }
//! ```

use std::path::{Path, PathBuf};

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::gpu::DeviceRef;

/// Size of a SPIR-V word in bytes.
const SPIRV_WORD: usize = 4;

/// Owned shader module, destroyed on drop.
///
/// Pipelines keep no reference to their shader modules after creation, so a module
/// can be dropped as soon as the pipelines that use it are built.
pub struct ShaderModule {
    device: DeviceRef,
    module: vk::ShaderModule,
    path: PathBuf,
}

impl ShaderModule {
    /// Reads a SPIR-V blob from `path` and creates a shader module from it.
    ///
    /// # Errors
    ///
    /// - [`RhiError::ShaderIo`] if the file cannot be read
    /// - [`RhiError::ShaderError`] if the blob is empty or not word aligned
    /// - the device error if module creation is rejected
    pub fn load(device: DeviceRef, path: &Path) -> RhiResult<Self> {
        let bytes = std::fs::read(path).map_err(|source| RhiError::ShaderIo {
            path: path.to_path_buf(),
            source,
        })?;
        let module = Self::from_bytes(device, &bytes, path)?;
        debug!("Loaded shader module {:?} from {}", module.module, path.display());
        Ok(module)
    }

    /// Creates a shader module from an in-memory SPIR-V blob. `origin` is only used in
    /// diagnostics.
    pub fn from_bytes(device: DeviceRef, bytes: &[u8], origin: &Path) -> RhiResult<Self> {
        let code = spirv_words(bytes)
            .map_err(|e| RhiError::ShaderError(format!("{}: {e}", origin.display())))?;
        let module = device.create_shader_module(&code)?;
        Ok(Self {
            device,
            module,
            path: origin.to_path_buf(),
        })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Path the module was loaded from.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.device.destroy_shader_module(self.module);
        debug!("Destroyed shader module {}", self.path.display());
    }
}

/// Loads a shader module from disk. Shorthand for [`ShaderModule::load`].
pub fn load_shader_module(device: DeviceRef, path: &Path) -> RhiResult<ShaderModule> {
    ShaderModule::load(device, path)
}

/// Converts a SPIR-V byte blob into little-endian 32-bit words.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, String> {
    if bytes.is_empty() {
        return Err("SPIR-V blob is empty".to_string());
    }
    if !bytes.len().is_multiple_of(SPIRV_WORD) {
        return Err(format!(
            "SPIR-V code must be {SPIRV_WORD}-byte aligned, got {} bytes",
            bytes.len()
        ));
    }

    Ok(bytes
        .chunks_exact(SPIRV_WORD)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
