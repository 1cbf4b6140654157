//! Renderer error types.

use std::fmt;

use ember_rhi::RhiError;
use thiserror::Error;

/// Step of the frame protocol an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStage {
    Wait,
    Acquire,
    Record,
    Submit,
    Present,
    Rebuild,
    Immediate,
    Shutdown,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::Wait => "fence wait",
            FrameStage::Acquire => "image acquire",
            FrameStage::Record => "command recording",
            FrameStage::Submit => "queue submit",
            FrameStage::Present => "present",
            FrameStage::Rebuild => "swapchain rebuild",
            FrameStage::Immediate => "immediate submit",
            FrameStage::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Errors raised while bringing up or driving the engine.
#[derive(Error, Debug)]
pub enum FrameError {
    /// A required object could not be created during [`Engine::init`](crate::Engine::init).
    #[error("Initialization failed while creating {what}: {source}")]
    Init {
        what: &'static str,
        #[source]
        source: RhiError,
    },

    /// Unrecoverable error in steady state. The loop stops and the session is torn down.
    #[error("Fatal error during {stage}: {source}")]
    Fatal {
        stage: FrameStage,
        #[source]
        source: RhiError,
    },

    /// The engine was used after cleanup.
    #[error("Engine is not initialized")]
    NotInitialized,

    /// Effect selection out of range.
    #[error("No background effect at index {index} ({count} loaded)")]
    NoSuchEffect { index: usize, count: usize },

    /// Configuration or platform error.
    #[error(transparent)]
    Core(#[from] ember_core::Error),
}

impl FrameError {
    /// Adapter for `map_err` on startup calls.
    pub fn init(what: &'static str) -> impl FnOnce(RhiError) -> Self {
        move |source| FrameError::Init { what, source }
    }

    /// Adapter for `map_err` on steady-state calls.
    pub fn fatal(stage: FrameStage) -> impl FnOnce(RhiError) -> Self {
        move |source| FrameError::Fatal { stage, source }
    }

    /// True for errors that end the render loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Fatal { .. } | FrameError::NotInitialized)
    }
}

/// Result type alias for renderer operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_message_names_stage() {
        let err = FrameError::fatal(FrameStage::Wait)(RhiError::Timeout("fence"));
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Fatal error during fence wait: Timed out waiting for fence"
        );
    }

    #[test]
    fn test_init_is_not_fatal_for_the_loop() {
        let err = FrameError::init("descriptor pool")(RhiError::DescriptorPoolExhausted {
            max_sets: 10,
        });
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("descriptor pool"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FrameError>();
    }
}
