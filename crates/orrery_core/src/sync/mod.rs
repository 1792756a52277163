//! # Frame-in-Flight Synchronization
//!
//! ## The Problem
//!
//! ```text
//! CPU:  record frame N+1 ── writes transform region R
//! GPU:  still executing frame N ── reads transform region R
//!
//! Shared region: the GPU draws with half-written matrices
//! ```
//!
//! ## The Solution: A Ring of K Slots
//!
//! ```text
//! frame:   0   1   2   3   4 ...
//! slot:    0   1   0   1   0 ...      (K = 2)
//!
//! Idle ──acquire──▶ Recording ──submit──▶ Submitted ──fence──▶ Retired ──▶ Idle
//!   ▲                   │
//!   └─────abandon───────┘
//! ```
//!
//! Every slot owns its own transform regions. A slot is writable only once
//! the fence of the frame that last used it has signaled. When fences
//! complete out of order, a frame whose usual slot is still busy takes
//! another idle one.

mod fence;
mod frame_ring;

pub use fence::Fence;
pub use frame_ring::{AcquirePolicy, FrameRing, FrameSlot, SlotState};
