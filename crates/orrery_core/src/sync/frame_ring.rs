//! # Frame Ring
//!
//! Fixed arena of K frame slots. Frame `n` prefers slot `n % K`; when the
//! GPU still reads that slot, any other idle slot is taken instead. Only
//! when every slot is in flight does acquisition wait on the preferred
//! slot's fence or fail, depending on the [`AcquirePolicy`]. The ring never
//! grows.

use std::time::{Duration, Instant};

use crate::error::{TransformError, TransformResult};
use crate::sync::Fence;

/// Lifecycle of one frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Free for the CPU to write.
    Idle,
    /// The CPU is filling the slot for the current frame.
    Recording,
    /// Handed to the GPU; read-only until its fence signals.
    Submitted,
    /// The GPU finished with it; about to return to `Idle`.
    Retired,
}

/// Handle to the slot acquired for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameSlot {
    index: usize,
    frame: u64,
}

impl FrameSlot {
    /// Ring index, `0..K`.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    /// Monotonic frame number the slot was acquired for.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> u64 {
        self.frame
    }
}

/// What acquisition does when the next slot is still in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquirePolicy {
    /// Fail with `NoSlotAvailable` right away.
    NonBlocking,
    /// Wait on the slot's fence, giving up after `timeout`.
    Blocking {
        /// Longest wait.
        timeout: Duration,
    },
}

#[derive(Debug)]
struct SlotEntry {
    state: SlotState,
    frame: u64,
    fence: Option<Fence>,
}

/// Tracks which of the K frame slots the CPU may write.
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<SlotEntry>,
    next_frame: u64,
    recording: Option<usize>,
    policy: AcquirePolicy,
}

impl FrameRing {
    /// Creates a ring of `frames_in_flight` idle slots.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    #[must_use]
    pub fn new(frames_in_flight: usize, policy: AcquirePolicy) -> Self {
        assert!(frames_in_flight > 0, "a frame ring needs at least one slot");
        let slots = (0..frames_in_flight)
            .map(|_| SlotEntry {
                state: SlotState::Idle,
                frame: 0,
                fence: None,
            })
            .collect();
        Self {
            slots,
            next_frame: 0,
            recording: None,
            policy,
        }
    }

    /// Number of slots (K).
    #[inline]
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Frame number the next acquisition will get.
    #[inline]
    #[must_use]
    pub fn next_frame(&self) -> u64 {
        self.next_frame
    }

    /// Current acquisition policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> AcquirePolicy {
        self.policy
    }

    /// Replaces the acquisition policy.
    pub fn set_policy(&mut self, policy: AcquirePolicy) {
        self.policy = policy;
    }

    /// State of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= K`.
    #[inline]
    #[must_use]
    pub fn state(&self, index: usize) -> SlotState {
        self.slots[index].state
    }

    /// Frame number slot `index` was last acquired for.
    ///
    /// # Panics
    ///
    /// Panics if `index >= K`.
    #[inline]
    #[must_use]
    pub fn slot_frame(&self, index: usize) -> u64 {
        self.slots[index].frame
    }

    /// The slot currently being recorded, if any.
    #[must_use]
    pub fn current(&self) -> Option<FrameSlot> {
        self.recording.map(|index| FrameSlot {
            index,
            frame: self.slots[index].frame,
        })
    }

    /// Number of slots submitted and not yet retired.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Submitted)
            .count()
    }

    /// Acquires a slot for the next frame.
    ///
    /// Takes slot `frame % K` when it is free, otherwise any idle slot.
    /// When every slot is in flight, waits on the preferred slot's fence
    /// under the blocking policy.
    ///
    /// # Errors
    ///
    /// - [`TransformError::FrameInProgress`] if a slot is already recording.
    /// - [`TransformError::NoSlotAvailable`] under the non-blocking policy.
    /// - [`TransformError::SlotAcquireTimeout`] if the blocking wait expires.
    pub fn acquire_slot_for_writing(&mut self) -> TransformResult<FrameSlot> {
        self.acquire_slot_with(Fence::wait_timeout)
    }

    /// Acquires the next slot using `wait` for the blocking case.
    ///
    /// `wait` receives the busy slot's fence and the remaining timeout and
    /// returns whether the fence signaled. A GPU backend uses this to keep
    /// polling its device while the CPU waits.
    ///
    /// # Errors
    ///
    /// As [`Self::acquire_slot_for_writing`].
    pub fn acquire_slot_with<W>(&mut self, wait: W) -> TransformResult<FrameSlot>
    where
        W: FnOnce(&Fence, Duration) -> bool,
    {
        if self.recording.is_some() {
            return Err(TransformError::FrameInProgress);
        }

        self.poll_retirements();

        let len = self.slots.len() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let preferred = (self.next_frame % len) as usize;

        let index = if self.slots[preferred].state != SlotState::Submitted {
            preferred
        } else if let Some(index) = self.idle_slot(preferred) {
            tracing::trace!(preferred, slot = index, "Preferred slot busy, using idle slot");
            index
        } else {
            match self.policy {
                AcquirePolicy::NonBlocking => {
                    tracing::trace!(slot = preferred, "Every frame slot busy");
                    return Err(TransformError::NoSlotAvailable { slot: preferred });
                }
                AcquirePolicy::Blocking { timeout } => {
                    let started = Instant::now();
                    let signaled = self.slots[preferred]
                        .fence
                        .as_ref()
                        .map_or(true, |fence| wait(fence, timeout));
                    self.poll_retirements();

                    if signaled && self.slots[preferred].state != SlotState::Submitted {
                        preferred
                    } else if let Some(index) = self.idle_slot(preferred) {
                        index
                    } else {
                        let waited = started.elapsed();
                        tracing::warn!(slot = preferred, ?waited, "Timed out waiting for frame slot");
                        return Err(TransformError::SlotAcquireTimeout {
                            slot: preferred,
                            waited,
                        });
                    }
                }
            }
        };

        let frame = self.next_frame;
        let entry = &mut self.slots[index];
        entry.state = SlotState::Recording;
        entry.frame = frame;
        entry.fence = None;
        self.next_frame += 1;
        self.recording = Some(index);

        tracing::trace!(slot = index, frame, "Slot Idle -> Recording");
        Ok(FrameSlot { index, frame })
    }

    /// Hands the recorded slot to the GPU.
    ///
    /// # Errors
    ///
    /// [`TransformError::InvalidSlotState`] if `slot` is not the slot being
    /// recorded.
    pub fn submit(&mut self, slot: FrameSlot, fence: Fence) -> TransformResult<()> {
        self.check_recording(slot)?;
        let entry = &mut self.slots[slot.index];
        entry.state = SlotState::Submitted;
        entry.fence = Some(fence);
        self.recording = None;

        tracing::trace!(slot = slot.index, frame = slot.frame, "Slot Recording -> Submitted");
        Ok(())
    }

    /// Drops a recording without submitting it.
    ///
    /// The slot returns to `Idle` without any GPU wait and its frame number
    /// is handed to the next acquisition.
    ///
    /// # Errors
    ///
    /// [`TransformError::InvalidSlotState`] if `slot` is not the slot being
    /// recorded.
    pub fn abandon(&mut self, slot: FrameSlot) -> TransformResult<()> {
        self.check_recording(slot)?;
        self.slots[slot.index].state = SlotState::Idle;
        self.recording = None;
        if slot.frame + 1 == self.next_frame {
            self.next_frame = slot.frame;
        }

        tracing::warn!(slot = slot.index, frame = slot.frame, "Frame abandoned");
        Ok(())
    }

    /// Retires every submitted slot whose fence has signaled.
    ///
    /// Returns the number of slots retired by this call.
    pub fn poll_retirements(&mut self) -> usize {
        let mut retired = 0;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            if entry.state != SlotState::Submitted {
                continue;
            }
            if entry.fence.as_ref().map_or(true, Fence::is_signaled) {
                entry.state = SlotState::Retired;
                tracing::trace!(slot = index, frame = entry.frame, "Slot Submitted -> Retired");
                entry.fence = None;
                entry.state = SlotState::Idle;
                retired += 1;
            }
        }
        retired
    }

    /// Returns whether the GPU is done with `frame` and every frame before it.
    #[must_use]
    pub fn is_frame_retired(&self, frame: u64) -> bool {
        !self
            .slots
            .iter()
            .any(|s| s.state == SlotState::Submitted && s.frame <= frame)
    }

    /// Returns whether `slot` still reads the frame the handle was issued for.
    #[must_use]
    pub fn is_current(&self, slot: FrameSlot) -> bool {
        self.recording == Some(slot.index) && self.slots[slot.index].frame == slot.frame
    }

    /// First idle slot after `from`, wrapping around.
    fn idle_slot(&self, from: usize) -> Option<usize> {
        let len = self.slots.len();
        (1..len)
            .map(|offset| (from + offset) % len)
            .find(|&index| self.slots[index].state == SlotState::Idle)
    }

    fn check_recording(&self, slot: FrameSlot) -> TransformResult<()> {
        if slot.index < self.slots.len() && self.is_current(slot) {
            Ok(())
        } else {
            Err(TransformError::InvalidSlotState {
                slot: slot.index,
                frame: slot.frame,
            })
        }
    }
}
