//! Bitmap physical frame allocator.
//!
//! One bit per 4 KiB frame, packed into 32-bit words (`1` = used). Frame 0 is
//! reserved at construction and never handed out, so a zero physical address
//! always means "none".
//!
//! Allocation is first-fit over the words: skip all-ones words, take the
//! first clear bit. The lowest free index always wins, which keeps allocation
//! order reproducible.

use alloc::vec;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};
use kernel_vmem::FrameAlloc;
use log::{trace, warn};

const BITS: u32 = u32::BITS;

pub struct BitmapFrameAlloc {
    words: &'static mut [u32],
    total: u32,
    used: u32,
}

impl BitmapFrameAlloc {
    /// Manage frames `0..total` using `words` as the bitmap.
    ///
    /// Everything starts free except frame 0. Bits past `total` are set so
    /// the word scan never yields them.
    ///
    /// # Panics
    /// If `words` is too small for `total` frames.
    pub fn new(words: &'static mut [u32], total: u32) -> Self {
        assert!(
            words.len() as u64 * u64::from(BITS) >= u64::from(total),
            "bitmap of {} words cannot track {total} frames",
            words.len()
        );
        words.fill(0);
        let mut this = Self {
            words,
            total,
            used: 0,
        };
        for idx in total..(this.words.len() as u32 * BITS) {
            this.set(idx);
        }
        if total > 0 {
            this.mark_used(PhysicalFrame::from_index(0));
        }
        this
    }

    /// Allocate bitmap storage on the heap of a hosted build.
    #[must_use]
    pub fn with_capacity(total: u32) -> Self {
        let words = vec![0u32; total.div_ceil(BITS) as usize].leak();
        Self::new(words, total)
    }

    #[inline]
    const fn split(idx: u32) -> (usize, u32) {
        ((idx / BITS) as usize, 1 << (idx % BITS))
    }

    #[inline]
    fn bit(&self, idx: u32) -> bool {
        let (w, m) = Self::split(idx);
        self.words[w] & m != 0
    }

    #[inline]
    fn set(&mut self, idx: u32) {
        let (w, m) = Self::split(idx);
        self.words[w] |= m;
    }

    #[inline]
    fn clear(&mut self, idx: u32) {
        let (w, m) = Self::split(idx);
        self.words[w] &= !m;
    }

    /// Lowest free frame, or `None` when memory is exhausted.
    pub fn alloc_frame(&mut self) -> Option<PhysicalFrame> {
        let (w, word) = self
            .words
            .iter()
            .copied()
            .enumerate()
            .find(|&(_, word)| word != u32::MAX)?;
        let idx = w as u32 * BITS + word.trailing_ones();
        debug_assert!(idx < self.total);
        self.set(idx);
        self.used += 1;
        trace!("Allocated frame {idx}");
        Some(PhysicalFrame::from_index(idx))
    }

    /// Lowest run of `n` contiguous free frames.
    pub fn alloc_frames(&mut self, n: u32) -> Option<PhysicalFrame> {
        match n {
            0 => return None,
            1 => return self.alloc_frame(),
            _ => {}
        }
        let mut start: u32 = 1;
        while start.checked_add(n)? <= self.total {
            match (start..start + n).find(|&i| self.bit(i)) {
                Some(busy) => start = busy + 1,
                None => {
                    for i in start..start + n {
                        self.set(i);
                    }
                    self.used += n;
                    trace!("Allocated frames {start}..{}", start + n);
                    return Some(PhysicalFrame::from_index(start));
                }
            }
        }
        None
    }

    /// Return a frame to the pool.
    ///
    /// Freeing a frame that is not allocated is a caller bug: it trips a
    /// debug assertion and is ignored in release builds.
    pub fn free_frame(&mut self, frame: PhysicalFrame) {
        let idx = frame.index();
        let allocated = idx != 0 && idx < self.total && self.bit(idx);
        debug_assert!(allocated, "double or foreign free of frame {idx}");
        if !allocated {
            warn!("Ignoring free of frame {idx}: not allocated");
            return;
        }
        self.clear(idx);
        self.used -= 1;
        trace!("Freed frame {idx}");
    }

    /// Free `n` frames starting at `base`.
    pub fn free_frames(&mut self, base: PhysicalFrame, n: u32) {
        for i in 0..n {
            self.free_frame(base.offset_by(i));
        }
    }

    /// Reserve a frame (boot image, firmware, MMIO). Idempotent.
    pub fn mark_used(&mut self, frame: PhysicalFrame) {
        let idx = frame.index();
        if idx < self.total && !self.bit(idx) {
            self.set(idx);
            self.used += 1;
        }
    }

    /// Reserve every frame touching `start..end`.
    pub fn mark_range_used(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        if end <= start {
            return;
        }
        let first = start.frame().index();
        let last = PhysicalAddress::new(end.as_u32() - 1).frame().index();
        for idx in first..=last {
            self.mark_used(PhysicalFrame::from_index(idx));
        }
    }

    #[must_use]
    pub fn is_used(&self, frame: PhysicalFrame) -> bool {
        frame.index() >= self.total || self.bit(frame.index())
    }

    #[must_use]
    pub const fn free_count(&self) -> u32 {
        self.total - self.used
    }

    #[must_use]
    pub const fn used_count(&self) -> u32 {
        self.used
    }

    #[must_use]
    pub const fn total_count(&self) -> u32 {
        self.total
    }
}

impl FrameAlloc for BitmapFrameAlloc {
    fn alloc_frame(&mut self) -> Option<PhysicalFrame> {
        Self::alloc_frame(self)
    }

    fn free_frame(&mut self, frame: PhysicalFrame) {
        Self::free_frame(self, frame);
    }
}

impl core::fmt::Debug for BitmapFrameAlloc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BitmapFrameAlloc")
            .field("total", &self.total)
            .field("used", &self.used)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_zero_is_reserved() {
        let mut a = BitmapFrameAlloc::with_capacity(8);
        assert_eq!(a.used_count(), 1);
        assert_eq!(a.alloc_frame().map(PhysicalFrame::index), Some(1));
    }

    #[test]
    fn tail_bits_are_never_returned() {
        let mut a = BitmapFrameAlloc::with_capacity(33);
        let got: Vec<_> = core::iter::from_fn(|| a.alloc_frame()).map(PhysicalFrame::index).collect();
        assert_eq!(got, (1..33).collect::<Vec<_>>());
        assert_eq!(a.free_count(), 0);
    }

    #[test]
    fn contiguous_run_skips_busy_frames() {
        let mut a = BitmapFrameAlloc::with_capacity(16);
        a.mark_used(PhysicalFrame::from_index(3));
        let run = a.alloc_frames(3).unwrap();
        assert_eq!(run.index(), 4);
        assert!(a.alloc_frames(13).is_none());
        assert_eq!(a.alloc_frames(2).map(PhysicalFrame::index), Some(1));
    }

    #[test]
    fn mark_range_used_covers_partial_frames() {
        let mut a = BitmapFrameAlloc::with_capacity(16);
        a.mark_range_used(PhysicalAddress::new(0x1800), PhysicalAddress::new(0x3001));
        for idx in 1..=3 {
            assert!(a.is_used(PhysicalFrame::from_index(idx)));
        }
        assert!(!a.is_used(PhysicalFrame::from_index(4)));
        assert_eq!(a.used_count(), 4);
    }

    #[test]
    #[should_panic(expected = "double or foreign free")]
    fn double_free_asserts_in_debug() {
        let mut a = BitmapFrameAlloc::with_capacity(4);
        let f = a.alloc_frame().unwrap();
        a.free_frame(f);
        a.free_frame(f);
    }
}
