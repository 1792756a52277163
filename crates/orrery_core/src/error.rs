//! # Transform Pipeline Error Types
//!
//! Every failure the transform pipeline can report. All of them are
//! returned synchronously to the caller; nothing here is retried internally.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::layout::{BindingMode, ShaderVariant};

/// Errors that can occur while packing, synchronizing or binding transforms.
#[derive(Error, Debug)]
pub enum TransformError {
    /// A write did not fit into the reserved capacity.
    #[error("{mode} capacity exceeded: requested {requested}, capacity {capacity}")]
    CapacityExceeded {
        /// Region kind that overflowed.
        mode: BindingMode,
        /// Number of entries the write needed.
        requested: usize,
        /// Number of entries available.
        capacity: usize,
    },

    /// The next slot in the ring is still read by the GPU.
    #[error("frame slot {slot} is still in flight")]
    NoSlotAvailable {
        /// Ring index of the busy slot.
        slot: usize,
    },

    /// Blocking acquisition gave up waiting on the slot's fence.
    #[error("timed out after {waited:?} waiting for frame slot {slot}")]
    SlotAcquireTimeout {
        /// Ring index of the busy slot.
        slot: usize,
        /// How long the acquisition waited.
        waited: Duration,
    },

    /// The pipeline supplied for a draw was compiled from the other shader.
    #[error("binding mismatch: draw needs {expected:?}, pipeline is {found:?}")]
    BindingMismatch {
        /// Variant the draw's binding mode requires.
        expected: ShaderVariant,
        /// Variant of the supplied pipeline, `None` if no pipeline was given.
        found: Option<ShaderVariant>,
    },

    /// A slot is already being recorded.
    #[error("a frame is already being recorded")]
    FrameInProgress,

    /// An operation needs a frame that has not been begun.
    #[error("no frame is being recorded")]
    NoActiveFrame,

    /// A slot handle was used for a transition its state does not allow.
    #[error("frame slot {slot} (frame {frame}) is not in a state that allows this")]
    InvalidSlotState {
        /// Ring index.
        slot: usize,
        /// Frame number carried by the handle.
        frame: u64,
    },

    /// A draw was recorded before the slot's staging was uploaded.
    #[error("frame slot {0} was not flushed before drawing")]
    SlotNotFlushed(usize),

    /// Mesh id not present in the registry.
    #[error("unknown mesh: {0}")]
    UnknownMesh(u64),

    /// The registry already holds the configured maximum of meshes.
    #[error("mesh limit reached: {0}")]
    MeshLimitReached(usize),

    /// The GPU device was lost or reported an uncaptured error.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for transform pipeline operations.
pub type TransformResult<T> = Result<T, TransformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message() {
        let err = TransformError::CapacityExceeded {
            mode: BindingMode::Instanced,
            requested: 9,
            capacity: 8,
        };
        assert_eq!(
            err.to_string(),
            "instanced capacity exceeded: requested 9, capacity 8"
        );
    }

    #[test]
    fn test_config_error_converts() {
        let err: TransformError = ConfigError::Invalid("frames_in_flight = 0".into()).into();
        assert!(matches!(err, TransformError::Config(_)));
    }
}
