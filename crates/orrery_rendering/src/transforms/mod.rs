//! # Transform Buffers
//!
//! Per frame slot, CPU staging plus the GPU buffers both binding modes read:
//!
//! ```text
//!           ┌─────────── slot k ────────────────────────────────┐
//! write ──▶ │ staging: objects | models | view_proj blocks      │
//!           │          │ flush (one write_buffer per buffer)    │
//!           │          ▼                                        │
//!           │ legacy uniform   instance storage   vp uniform    │ ──▶ bind groups
//!           └───────────────────────────────────────────────────┘
//! ```

mod data;
pub mod layout;
mod manager;
mod staging;

pub use data::{ObjectTransform, Vertex, ViewProjection, MODEL_MATRIX_SIZE};
pub use layout::BufferLayout;
pub use manager::{DynamicOffsets, Region, TransformBufferManager, TransformData};
