//! # ORRERY Rendering
//!
//! Host side of the instance transform pipeline. Gets per-object transforms
//! to the vertex shader either one uniform block per draw (Legacy) or as a
//! model-matrix array indexed by the GPU instance index (Instanced).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     TransformPipeline                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  submit_* → selector::select → TransformBufferManager.write   │
//! │                                   ↓ flush                      │
//! │  record → binder::bind_and_draw → DrawPass (set 0 + draw)     │
//! │                                   ↓                            │
//! │  end_frame → completion fence → FrameRing.submit              │
//! └──────────────────────────────────────────────────────────────┘
//!              │ GpuBackend
//!              ├── WgpuBackend     (device + queue)
//!              └── HeadlessBackend (in-memory, for tests and tools)
//! ```
//!
//! ## Invariants
//!
//! - Instance `i` of an instanced draw reads `model[i]`, `i` counted from 0
//! - A slot's buffers are never written while its frame is in flight
//! - Writes never grow buffers; only `ensure_capacity` does

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod backend;
pub mod binder;
pub mod mesh;
pub mod pipeline;
pub mod selector;
pub mod transforms;

pub use backend::{
    BackendLimits, BufferUsage, DrawPass, GpuBackend, HeadlessBackend, HeadlessPass,
    HeadlessPipeline, WgpuBackend,
};
pub use binder::{bind_and_draw, ActivePipeline, PipelineSet};
pub use mesh::{Mesh, MeshId, MeshRegistry};
pub use pipeline::{FrameStats, TransformPipeline};
pub use selector::{select, DrawPlan, Selector};
pub use transforms::{
    ObjectTransform, Region, TransformBufferManager, TransformData, Vertex, ViewProjection,
};
