//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

const ENV_SHADER_DIR: &str = "EMBER_SHADER_DIR";
const ENV_VALIDATION: &str = "EMBER_VALIDATION";
const ENV_FRAMES_IN_FLIGHT: &str = "EMBER_FRAMES_IN_FLIGHT";

/// Static configuration consumed by the engine at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Window title.
    pub title: String,
    /// Initial window width in pixels. Also the draw image width.
    pub window_width: u32,
    /// Initial window height in pixels. Also the draw image height.
    pub window_height: u32,
    /// Number of frame slots rotating through the GPU.
    pub frames_in_flight: usize,
    /// Bound on the per-frame fence wait. Exceeding it is fatal.
    pub frame_timeout: Duration,
    /// Bound on swapchain image acquisition.
    pub acquire_timeout: Duration,
    /// Bound on the blocking immediate-submit path.
    pub immediate_timeout: Duration,
    /// Sleep interval while the window is minimized.
    pub minimized_throttle: Duration,
    /// Directory holding the pre-compiled SPIR-V blobs.
    pub shader_dir: PathBuf,
    /// Enable the Khronos validation layer when available.
    pub enable_validation: bool,
    /// Capacity of the session descriptor pool, in sets.
    pub descriptor_max_sets: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "ember".to_string(),
            window_width: 1700,
            window_height: 900,
            frames_in_flight: 2,
            frame_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(1),
            immediate_timeout: Duration::from_secs(10),
            minimized_throttle: Duration::from_millis(100),
            shader_dir: PathBuf::from("shaders"),
            enable_validation: cfg!(debug_assertions),
            descriptor_max_sets: 10,
        }
    }
}

impl EngineConfig {
    /// Build the default configuration with process environment overrides applied.
    ///
    /// Recognized variables: `EMBER_SHADER_DIR`, `EMBER_VALIDATION` and
    /// `EMBER_FRAMES_IN_FLIGHT`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable cannot be parsed or the result fails
    /// [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_SHADER_DIR) {
            config.shader_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_VALIDATION) {
            config.enable_validation = parse_flag(ENV_VALIDATION, &value)?;
        }
        if let Some(value) = lookup(ENV_FRAMES_IN_FLIGHT) {
            config.frames_in_flight = value.trim().parse().map_err(|_| {
                Error::Config(format!("{ENV_FRAMES_IN_FLIGHT}: expected an integer, got {value:?}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".into()));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::Config(format!(
                "window extent must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        if self.descriptor_max_sets == 0 {
            return Err(Error::Config("descriptor_max_sets must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(Error::Config(format!("{key}: expected a boolean, got {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!((config.window_width, config.window_height), (1700, 900));
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.frame_timeout, Duration::from_secs(1));
        assert_eq!(config.minimized_throttle, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lookup_overrides() {
        let config = EngineConfig::from_lookup(|key| match key {
            "EMBER_SHADER_DIR" => Some("/opt/spv".to_string()),
            "EMBER_VALIDATION" => Some("off".to_string()),
            "EMBER_FRAMES_IN_FLIGHT" => Some("3".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.shader_dir, PathBuf::from("/opt/spv"));
        assert!(!config.enable_validation);
        assert_eq!(config.frames_in_flight, 3);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let bad_flag = EngineConfig::from_lookup(|key| {
            (key == "EMBER_VALIDATION").then(|| "maybe".to_string())
        });
        assert!(matches!(bad_flag, Err(Error::Config(_))));

        let zero_frames = EngineConfig::from_lookup(|key| {
            (key == "EMBER_FRAMES_IN_FLIGHT").then(|| "0".to_string())
        });
        assert!(matches!(zero_frames, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_extent() {
        let config = EngineConfig {
            window_height: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
