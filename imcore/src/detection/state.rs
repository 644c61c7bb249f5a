//! Arena-backed storage for regions that are still being grown.
//!
//! Regions and the pixel blocks that make up their chains live in two
//! fixed-capacity pools addressed by [`RegionId`] and [`BlockId`]. Free ids are
//! kept on LIFO stacks so recently released storage is reused first. A
//! tracking row maps every column to the region that owned the pixel directly
//! above it, which is all the row scanner needs to decide whether a pixel
//! continues, starts or joins regions.

use ndarray::Array2;

use crate::pixel_flags::PixelFlag;

/// One detected pixel.
///
/// Coordinates are zero-based array indices (`x` = column, `y` = row).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelSample {
    /// Column index
    pub x: usize,
    /// Row index
    pub y: usize,
    /// Background-subtracted intensity
    pub z: f64,
    /// Smoothed intensity, clipped at the saturation level
    pub zsm: f64,
}

/// Handle to a region slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub(super) usize);

impl RegionId {
    /// Slot index in the region pool
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a pixel block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockId(pub(super) usize);

/// Image edges a region has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeTouch(u8);

impl EdgeTouch {
    /// Touches nothing
    pub const NONE: Self = Self(0);
    /// Has a pixel in the first row
    pub const FIRST_ROW: Self = Self(1);
    /// Has a pixel in the first column
    pub const LEFT: Self = Self(2);
    /// Has a pixel in the last column
    pub const RIGHT: Self = Self(4);
    /// Was still growing when the last row was scanned
    pub const LAST_ROW: Self = Self(8);

    /// True when no edge bit is set
    pub fn is_clear(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for EdgeTouch {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Growth state of a live region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Pixel count recorded at the last termination check
    Growing { last_count: usize },
    /// Did not grow during the last row; ready to be measured or recycled
    Terminated,
}

/// A live connected region.
#[derive(Debug, Clone)]
pub struct Region {
    pub(super) head: BlockId,
    pub(super) tail: BlockId,
    pub(super) count: usize,
    pub(super) bad: usize,
    pub(super) touch: EdgeTouch,
    pub(super) lifecycle: Lifecycle,
    pub(super) last_row: usize,
}

impl Region {
    /// Number of pixels in the region
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of flagged pixels in the region
    pub fn bad(&self) -> usize {
        self.bad
    }

    /// Edges the region has reached
    pub fn touch(&self) -> EdgeTouch {
        self.touch
    }

    /// Current growth state
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Highest row index that contributed a pixel
    pub fn last_row(&self) -> usize {
        self.last_row
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Block {
    pub(super) pixel: PixelSample,
    pub(super) next: Option<BlockId>,
}

/// Detector state for one scan.
///
/// Owns the region and block pools, the tracking row and, for the main image
/// scan, the pixel flag map that records which pixels belong to live regions.
#[derive(Debug)]
pub struct DetectorState {
    pub(super) width: usize,
    pub(super) height: usize,
    pub(super) regions: Vec<Option<Region>>,
    pub(super) free_regions: Vec<RegionId>,
    pub(super) blocks: Vec<Block>,
    pub(super) free_blocks: Vec<BlockId>,
    /// `tracking[i + 1]` is the region owning column `i` on the previous
    /// pixel row; `tracking[0]` is a permanent empty sentinel.
    pub(super) tracking: Vec<Option<RegionId>>,
    pub(super) flags: Option<Array2<PixelFlag>>,
    pub(super) evictions: usize,
}

impl DetectorState {
    /// Create a detector for an image of the given shape.
    ///
    /// # Arguments
    /// * `width` - Image columns; sets the tracking row length and a region
    ///   capacity of `width / 2`
    /// * `height` - Image rows
    /// * `block_capacity` - Number of pixel blocks in the pool
    /// * `flags` - Pixel flag map to maintain, or `None` for sub-scans
    pub fn new(
        width: usize,
        height: usize,
        block_capacity: usize,
        flags: Option<Array2<PixelFlag>>,
    ) -> Self {
        let region_capacity = (width / 2).max(2);
        let mut state = Self {
            width,
            height,
            regions: vec![None; region_capacity],
            free_regions: Vec::with_capacity(region_capacity),
            blocks: vec![Block::default(); block_capacity],
            free_blocks: Vec::with_capacity(block_capacity),
            tracking: vec![None; width + 1],
            flags,
            evictions: 0,
        };
        state.reinit();
        state
    }

    /// Forget every region and return all storage to the free stacks.
    ///
    /// The flag map is left as it is.
    pub fn reinit(&mut self) {
        self.regions.iter_mut().for_each(|r| *r = None);
        self.free_regions.clear();
        self.free_regions
            .extend((0..self.regions.len()).rev().map(RegionId));
        self.free_blocks.clear();
        self.free_blocks
            .extend((0..self.blocks.len()).rev().map(BlockId));
        self.tracking.iter_mut().for_each(|t| *t = None);
    }

    /// Image columns
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image rows
    pub fn height(&self) -> usize {
        self.height
    }

    /// Total region slots
    pub fn region_capacity(&self) -> usize {
        self.regions.len()
    }

    /// Region slots currently available
    pub fn free_region_count(&self) -> usize {
        self.free_regions.len()
    }

    /// Pixel blocks currently available
    pub fn free_block_count(&self) -> usize {
        self.free_blocks.len()
    }

    /// Region slots in use
    pub fn live_count(&self) -> usize {
        self.regions.len() - self.free_regions.len()
    }

    /// Number of regions dropped to relieve pool pressure so far
    pub fn eviction_count(&self) -> usize {
        self.evictions
    }

    /// Look up a live region
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0).and_then(|r| r.as_ref())
    }

    /// Ids of all live regions in slot order
    pub fn live_ids(&self) -> Vec<RegionId> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_some())
            .map(|(i, _)| RegionId(i))
            .collect()
    }

    /// Pixel flag map, if this state maintains one
    pub fn flags(&self) -> Option<&Array2<PixelFlag>> {
        self.flags.as_ref()
    }

    /// Give up ownership of the flag map
    pub fn into_flags(self) -> Option<Array2<PixelFlag>> {
        self.flags
    }

    /// Region that owned `column` on the previous pixel row
    pub fn tracked(&self, column: usize) -> Option<RegionId> {
        self.tracking.get(column + 1).copied().flatten()
    }

    /// Move a pixel between object states. Bad pixels are left as they are.
    pub(super) fn set_flag(&mut self, x: usize, y: usize, flag: PixelFlag) {
        if let Some(flags) = self.flags.as_mut() {
            let current = &mut flags[[y, x]];
            if !current.is_bad() {
                *current = flag;
            }
        }
    }

    pub(super) fn flag_at(&self, x: usize, y: usize) -> Option<PixelFlag> {
        self.flags.as_ref().map(|f| f[[y, x]])
    }

    /// Walk the block chain of a region.
    pub fn pixels(&self, id: RegionId) -> ChainIter<'_> {
        ChainIter {
            state: self,
            next: self.region(id).map(|r| r.head),
        }
    }

    /// Start a new region holding one pixel.
    ///
    /// Returns `None` when either pool is exhausted.
    pub(super) fn open_region(&mut self, pixel: PixelSample, bad: bool) -> Option<RegionId> {
        if self.free_regions.is_empty() || self.free_blocks.is_empty() {
            return None;
        }
        let id = self.free_regions.pop()?;
        let block = self.free_blocks.pop()?;
        self.blocks[block.0] = Block { pixel, next: None };
        let touch = if pixel.y == 0 {
            EdgeTouch::FIRST_ROW
        } else {
            EdgeTouch::NONE
        };
        self.regions[id.0] = Some(Region {
            head: block,
            tail: block,
            count: 1,
            bad: usize::from(bad),
            touch,
            lifecycle: Lifecycle::Growing { last_count: 0 },
            last_row: pixel.y,
        });
        Some(id)
    }

    /// Append a pixel to the tail of a region's chain.
    ///
    /// Returns `false` if the block pool is exhausted or the region is not live.
    pub(super) fn append_pixel(&mut self, id: RegionId, pixel: PixelSample, bad: bool) -> bool {
        let Some(tail) = self.region(id).map(|r| r.tail) else {
            return false;
        };
        let Some(block) = self.free_blocks.pop() else {
            return false;
        };
        self.blocks[block.0] = Block { pixel, next: None };
        self.blocks[tail.0].next = Some(block);
        if let Some(region) = self.regions[id.0].as_mut() {
            region.tail = block;
            region.count += 1;
            region.bad += usize::from(bad);
            region.last_row = region.last_row.max(pixel.y);
        }
        true
    }

    /// Join two live regions.
    ///
    /// The region with more pixels survives (the lower id on a tie) and the
    /// other chain is spliced onto its tail. Tracking entries pointing at the
    /// absorbed region are redirected by walking only the absorbed chain.
    ///
    /// # Returns
    /// The surviving id, or `None` if either id is not live.
    pub(super) fn merge(&mut self, a: RegionId, b: RegionId) -> Option<RegionId> {
        if a == b {
            return self.region(a).map(|_| a);
        }
        let count_a = self.region(a)?.count;
        let count_b = self.region(b)?.count;
        let (survivor, absorbed) = if count_a > count_b || (count_a == count_b && a < b) {
            (a, b)
        } else {
            (b, a)
        };

        let gone = self.regions[absorbed.0].take()?;
        let mut cursor = Some(gone.head);
        while let Some(block) = cursor {
            let column = self.blocks[block.0].pixel.x;
            if self.tracking[column + 1] == Some(absorbed) {
                self.tracking[column + 1] = Some(survivor);
            }
            cursor = self.blocks[block.0].next;
        }

        let tail = self.region(survivor)?.tail;
        self.blocks[tail.0].next = Some(gone.head);
        if let Some(region) = self.regions[survivor.0].as_mut() {
            region.tail = gone.tail;
            region.count += gone.count;
            region.bad += gone.bad;
            region.touch.insert(gone.touch);
            region.last_row = region.last_row.max(gone.last_row);
        }
        self.free_regions.push(absorbed);
        Some(survivor)
    }

    /// Copy a region's pixels into `buffer` and mark them as the object
    /// being measured.
    ///
    /// The buffer is cleared first and only ever grows, so one buffer can be
    /// reused for the whole run.
    pub fn extract_into(&mut self, id: RegionId, buffer: &mut Vec<PixelSample>) {
        buffer.clear();
        let mut cursor = self.region(id).map(|r| r.head);
        while let Some(block) = cursor {
            let pixel = self.blocks[block.0].pixel;
            buffer.push(pixel);
            cursor = self.blocks[block.0].next;
        }
        for p in buffer.iter() {
            self.set_flag(p.x, p.y, PixelFlag::ObjectPixel);
        }
    }
}

/// Iterator over the pixels of one region chain.
pub struct ChainIter<'a> {
    state: &'a DetectorState,
    next: Option<BlockId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a PixelSample;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        let entry = &self.state.blocks[block.0];
        self.next = entry.next;
        Some(&entry.pixel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(x: usize, y: usize) -> PixelSample {
        PixelSample {
            x,
            y,
            z: 1.0,
            zsm: 1.0,
        }
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = DetectorState::new(10, 8, 100, None);
        assert_eq!(state.region_capacity(), 5);
        assert_eq!(state.free_region_count(), 5);
        assert_eq!(state.free_block_count(), 100);
        assert_eq!(state.live_count(), 0);
        assert!((0..10).all(|c| state.tracked(c).is_none()));
    }

    #[test]
    fn test_ids_are_reused_lifo() {
        let mut state = DetectorState::new(10, 8, 100, None);
        let a = state.open_region(px(1, 1), false).unwrap();
        let b = state.open_region(px(5, 1), false).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        let survivor = state.merge(a, b).unwrap();
        assert_eq!(survivor, a);
        let c = state.open_region(px(7, 2), false).unwrap();
        assert_eq!(c, b);
    }

    #[test]
    fn test_larger_region_survives_merge() {
        let mut state = DetectorState::new(10, 8, 100, None);
        let small = state.open_region(px(0, 3), false).unwrap();
        let big = state.open_region(px(4, 3), false).unwrap();
        assert!(state.append_pixel(big, px(5, 3), true));
        state.tracking[1] = Some(small);
        state.tracking[5] = Some(big);
        state.tracking[6] = Some(big);

        let survivor = state.merge(small, big).unwrap();
        assert_eq!(survivor, big);
        assert!(state.region(small).is_none());
        let region = state.region(big).unwrap();
        assert_eq!(region.count(), 3);
        assert_eq!(region.bad(), 1);
        assert_eq!(state.tracked(0), Some(big));

        let xs: Vec<usize> = state.pixels(big).map(|p| p.x).collect();
        assert_eq!(xs, vec![4, 5, 0]);
    }

    #[test]
    fn test_first_row_sets_touch() {
        let mut state = DetectorState::new(10, 8, 100, None);
        let id = state.open_region(px(3, 0), false).unwrap();
        assert!(state.region(id).unwrap().touch().contains(EdgeTouch::FIRST_ROW));
        let other = state.open_region(px(3, 2), false).unwrap();
        assert!(state.region(other).unwrap().touch().is_clear());
    }

    #[test]
    fn test_exhausted_pools_refuse() {
        let mut state = DetectorState::new(4, 4, 2, None);
        let a = state.open_region(px(0, 1), false).unwrap();
        assert!(state.append_pixel(a, px(1, 1), false));
        assert!(!state.append_pixel(a, px(2, 1), false));
        assert!(state.open_region(px(3, 1), false).is_none());
    }

    #[test]
    fn test_extract_marks_object_pixels() {
        let flags = Array2::from_elem((4, 6), PixelFlag::PossibleObject);
        let mut state = DetectorState::new(6, 4, 50, Some(flags));
        let id = state.open_region(px(2, 1), false).unwrap();
        state.append_pixel(id, px(3, 1), false);
        let mut buf = Vec::new();
        state.extract_into(id, &mut buf);
        assert_eq!(buf.len(), 2);
        let flags = state.flags().unwrap();
        assert_eq!(flags[[1, 2]], PixelFlag::ObjectPixel);
        assert_eq!(flags[[1, 3]], PixelFlag::ObjectPixel);
        assert_eq!(flags[[1, 4]], PixelFlag::PossibleObject);
    }

    #[test]
    fn test_masked_pixels_keep_their_flag() {
        let mut flags = Array2::from_elem((4, 6), PixelFlag::Clean);
        flags[[1, 3]] = PixelFlag::Masked;
        let mut state = DetectorState::new(6, 4, 50, Some(flags));
        let id = state.open_region(px(2, 1), false).unwrap();
        state.append_pixel(id, px(3, 1), true);
        state.set_flag(3, 1, PixelFlag::PossibleObject);
        let mut buf = Vec::new();
        state.extract_into(id, &mut buf);
        assert_eq!(state.region(id).unwrap().bad(), 1);
        let flags = state.flags().unwrap();
        assert_eq!(flags[[1, 2]], PixelFlag::ObjectPixel);
        assert_eq!(flags[[1, 3]], PixelFlag::Masked);
    }
}
