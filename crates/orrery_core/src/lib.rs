//! # ORRERY Core
//!
//! GPU-independent half of the instance transform pipeline:
//! - Column-major 4x4 transform composition
//! - The fixed binding/attribute contract of the two transform shaders
//! - The frame-in-flight slot ring and its fences
//! - Error taxonomy and TOML configuration
//!
//! ## Architecture Rules
//!
//! 1. **No GPU types** - everything here runs without a device
//! 2. **Fixed ring** - K frame slots, never a growable queue
//! 3. **One writer** - at most one slot is `Recording` at a time
//!
//! ## Example
//!
//! ```rust,ignore
//! use orrery_core::{math, AcquirePolicy, Fence, FrameRing};
//!
//! let mut ring = FrameRing::new(2, AcquirePolicy::NonBlocking);
//! let slot = ring.acquire_slot_for_writing()?;
//! let mvp = math::compose(&model, &view, &proj);
//! ring.submit(slot, Fence::new())?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod layout;
pub mod math;
pub mod sync;

pub use config::{AcquireConfig, AcquireMode, ConfigError, PipelineConfig};
pub use error::{TransformError, TransformResult};
pub use layout::{BindingKind, BindingMode, BindingSlot, ShaderVariant};
pub use math::{Mat4, IDENTITY};
pub use sync::{AcquirePolicy, Fence, FrameRing, FrameSlot, SlotState};
