//! Region recycling, eviction and termination bookkeeping.

use log::warn;

use super::state::{DetectorState, EdgeTouch, Lifecycle, RegionId};
use crate::pixel_flags::PixelFlag;

impl DetectorState {
    /// Return a region's blocks and id to the free stacks.
    ///
    /// Its pixels revert to [`PixelFlag::PossibleObject`]. Tracking entries
    /// are left alone; use [`DetectorState::evict_largest`] for regions that
    /// may still be referenced by the tracking row.
    pub fn restack(&mut self, id: RegionId) {
        let Some(region) = self.regions.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        let mut cursor = Some(region.head);
        while let Some(block) = cursor {
            let pixel = self.blocks[block.0].pixel;
            cursor = self.blocks[block.0].next;
            self.blocks[block.0].next = None;
            self.free_blocks.push(block);
            self.set_flag(pixel.x, pixel.y, PixelFlag::PossibleObject);
        }
        self.free_regions.push(id);
    }

    /// Drop the live region with the most pixels.
    ///
    /// Ties go to the lowest id. Any tracking entries that refer to it are
    /// cleared so later rows start fresh regions instead.
    ///
    /// # Returns
    /// The evicted id, or `None` if nothing was live
    pub fn evict_largest(&mut self) -> Option<RegionId> {
        let (index, count) = self
            .regions
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (i, r.count)))
            .fold(None, |best: Option<(usize, usize)>, (i, c)| match best {
                Some((_, bc)) if bc >= c => best,
                _ => Some((i, c)),
            })?;
        let id = RegionId(index);

        warn!(
            "evicting region {} with {} pixels to relieve pool pressure ({} free regions, {} free blocks)",
            index,
            count,
            self.free_regions.len(),
            self.free_blocks.len()
        );
        self.restack(id);
        self.tracking
            .iter_mut()
            .filter(|t| **t == Some(id))
            .for_each(|t| *t = None);
        self.evictions += 1;
        Some(id)
    }

    /// Free space after a row has been scanned.
    ///
    /// One region goes if fewer than a row's worth of blocks remain. If more
    /// than three quarters of the region slots are in use, three eighths of
    /// the capacity is evicted largest-first.
    pub fn relieve_pressure(&mut self) {
        if self.free_blocks.len() < self.width {
            self.evict_largest();
        }
        self.relieve_region_pressure();
    }

    /// Region-slot half of [`DetectorState::relieve_pressure`], also applied
    /// by the cluster scan before it opens a region.
    pub(super) fn relieve_region_pressure(&mut self) {
        let capacity = self.regions.len();
        if self.live_count() > capacity * 3 / 4 {
            for _ in 0..(capacity * 3 / 8).max(1) {
                if self.evict_largest().is_none() {
                    break;
                }
            }
        }
    }

    /// Compare every live region against its last snapshot.
    ///
    /// Regions that gained no pixels since the previous call become
    /// [`Lifecycle::Terminated`]; the rest record their current count.
    ///
    /// # Returns
    /// Ids of the regions that terminated on this call, in slot order
    pub fn advance_lifecycles(&mut self) -> Vec<RegionId> {
        let mut terminated = Vec::new();
        for (i, slot) in self.regions.iter_mut().enumerate() {
            let Some(region) = slot.as_mut() else {
                continue;
            };
            match region.lifecycle {
                Lifecycle::Growing { last_count } if last_count == region.count => {
                    region.lifecycle = Lifecycle::Terminated;
                    terminated.push(RegionId(i));
                }
                Lifecycle::Growing { .. } => {
                    region.lifecycle = Lifecycle::Growing {
                        last_count: region.count,
                    };
                }
                Lifecycle::Terminated => terminated.push(RegionId(i)),
            }
        }
        terminated
    }

    /// Terminate everything that is still live after the final row.
    ///
    /// Regions that gained pixels on `last_row` are marked as touching the
    /// last image row, mirroring how first-row regions are handled.
    pub fn finish_image(&mut self, last_row: usize) -> Vec<RegionId> {
        for region in self.regions.iter_mut().flatten() {
            if region.last_row >= last_row {
                region.touch.insert(EdgeTouch::LAST_ROW);
            }
            region.lifecycle = Lifecycle::Terminated;
        }
        self.tracking.iter_mut().for_each(|t| *t = None);
        self.live_ids()
    }

    /// Whether a terminated region qualifies for measurement.
    pub fn is_measurable(&self, id: RegionId, min_pixels: usize) -> bool {
        self.region(id).is_some_and(|r| {
            r.count >= min_pixels && r.touch.is_clear() && r.bad < r.count / 2
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::PixelSample;
    use super::*;
    use ndarray::Array2;

    fn px(x: usize, y: usize) -> PixelSample {
        PixelSample {
            x,
            y,
            z: 5.0,
            zsm: 5.0,
        }
    }

    #[test]
    fn test_restack_returns_storage_and_resets_flags() {
        let flags = Array2::from_elem((6, 10), PixelFlag::Clean);
        let mut state = DetectorState::new(10, 6, 40, Some(flags));
        let id = state.open_region(px(2, 2), false).unwrap();
        state.append_pixel(id, px(3, 2), false);
        let mut buf = Vec::new();
        state.extract_into(id, &mut buf);
        assert_eq!(state.free_block_count(), 38);

        state.restack(id);
        assert_eq!(state.free_block_count(), 40);
        assert_eq!(state.live_count(), 0);
        let flags = state.flags().unwrap();
        assert_eq!(flags[[2, 2]], PixelFlag::PossibleObject);
        assert_eq!(flags[[2, 3]], PixelFlag::PossibleObject);
    }

    #[test]
    fn test_evict_largest_clears_tracking() {
        let mut state = DetectorState::new(10, 6, 40, None);
        let small = state.open_region(px(0, 2), false).unwrap();
        let big = state.open_region(px(4, 2), false).unwrap();
        state.append_pixel(big, px(5, 2), false);
        state.tracking[1] = Some(small);
        state.tracking[5] = Some(big);
        state.tracking[6] = Some(big);

        assert_eq!(state.evict_largest(), Some(big));
        assert_eq!(state.eviction_count(), 1);
        assert!(state.tracked(4).is_none());
        assert!(state.tracked(5).is_none());
        assert_eq!(state.tracked(0), Some(small));
        assert!(state.region(small).is_some());
    }

    #[test]
    fn test_region_terminates_after_one_idle_row() {
        let mut state = DetectorState::new(10, 6, 40, None);
        let id = state.open_region(px(4, 2), false).unwrap();
        assert!(state.advance_lifecycles().is_empty());
        state.append_pixel(id, px(4, 3), false);
        assert!(state.advance_lifecycles().is_empty());
        assert_eq!(state.advance_lifecycles(), vec![id]);
        assert_eq!(
            state.region(id).unwrap().lifecycle(),
            Lifecycle::Terminated
        );
    }

    #[test]
    fn test_region_pressure_evicts_three_eighths() {
        let mut state = DetectorState::new(32, 6, 200, None);
        assert_eq!(state.region_capacity(), 16);
        for i in 0..13 {
            state.open_region(px(2 * i % 32, 2), false).unwrap();
        }
        state.relieve_pressure();
        assert_eq!(state.live_count(), 13 - 6);
    }

    #[test]
    fn test_finish_image_marks_last_row() {
        let mut state = DetectorState::new(10, 6, 40, None);
        let early = state.open_region(px(1, 1), false).unwrap();
        let late = state.open_region(px(6, 3), false).unwrap();
        state.append_pixel(late, px(6, 4), false);
        let ids = state.finish_image(4);
        assert_eq!(ids, vec![early, late]);
        assert!(state.region(early).unwrap().touch().is_clear());
        assert!(state
            .region(late)
            .unwrap()
            .touch()
            .contains(EdgeTouch::LAST_ROW));
        assert!(!state.is_measurable(late, 1));
        assert!(state.is_measurable(early, 1));
    }
}
