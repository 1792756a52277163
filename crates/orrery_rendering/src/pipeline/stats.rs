//! Per-frame transform statistics.

use crate::transforms::Region;

/// Statistics of one prepared frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number.
    pub frame: u64,
    /// Ring slot the frame was recorded in.
    pub slot: usize,
    /// Number of draw calls.
    pub draw_calls: u32,
    /// Draws bound through the legacy uniform block.
    pub legacy_draws: u32,
    /// Draws bound through the instance array.
    pub instanced_draws: u32,
    /// Objects drawn, legacy and instanced.
    pub instances: u32,
    /// Transform bytes uploaded by the flush.
    pub bytes_uploaded: u64,
}

impl FrameStats {
    /// Accounts for one written region.
    pub(crate) fn record(&mut self, region: &Region) {
        let count = match *region {
            Region::Legacy { count, .. } => {
                let count = u32::try_from(count).unwrap_or(u32::MAX);
                self.legacy_draws += count;
                self.draw_calls += count;
                count
            }
            Region::Instanced { count, .. } => {
                let count = u32::try_from(count).unwrap_or(u32::MAX);
                if count > 0 {
                    self.instanced_draws += 1;
                    self.draw_calls += 1;
                }
                count
            }
        };
        self.instances += count;
    }

    /// Draw calls avoided by instancing.
    #[must_use]
    pub fn draw_calls_saved(&self) -> u32 {
        self.instances.saturating_sub(self.draw_calls)
    }

    /// Average objects per draw call.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn objects_per_draw(&self) -> f32 {
        if self.draw_calls > 0 {
            self.instances as f32 / self.draw_calls as f32
        } else {
            0.0
        }
    }

    /// Returns true if nothing was drawn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.draw_calls == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_regions() {
        let mut stats = FrameStats::default();
        stats.record(&Region::Legacy { first: 0, count: 2 });
        stats.record(&Region::Instanced { first: 0, count: 6, block: 0 });
        stats.record(&Region::Instanced { first: 8, count: 0, block: 1 });

        assert_eq!(stats.draw_calls, 3);
        assert_eq!(stats.legacy_draws, 2);
        assert_eq!(stats.instanced_draws, 1);
        assert_eq!(stats.instances, 8);
        assert_eq!(stats.draw_calls_saved(), 5);
        assert!((stats.objects_per_draw() - 8.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty() {
        let stats = FrameStats::default();
        assert!(stats.is_empty());
        assert!(stats.objects_per_draw().abs() < f32::EPSILON);
    }
}
