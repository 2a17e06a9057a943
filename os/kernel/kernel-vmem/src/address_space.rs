//! # Address Space (i386, directory-rooted)
//!
//! Strongly-typed helpers to build and manipulate a single virtual address
//! space: one [`PageDirectory`] frame plus the page tables it links.
//!
//! ## Highlights
//!
//! - [`AddressSpace::bootstrap`] builds the kernel's own space.
//! - [`AddressSpace::create`] builds a process space that shares the kernel
//!   half (directory slots `768..1023`) and installs the recursive slot.
//! - [`AddressSpace::map`] installs one 4 KiB mapping, allocating and zeroing
//!   a page table on demand.
//! - [`AddressSpace::unmap`] clears one mapping and invalidates its TLB entry.
//! - [`AddressSpace::translate`] walks the tables in software.
//! - [`AddressSpace::destroy`] releases every frame the space owns.
//!
//! ## Ownership
//!
//! A page table linked below the kernel half belongs to exactly one space
//! and lives until that space is destroyed; tables are never released while
//! the space is alive. Kernel-half tables are shared, so everything the
//! kernel will ever map there must exist before the first process space is
//! cloned (see [`AddressSpace::preallocate_tables`]).
//!
//! ## Safety
//!
//! The `PhysMapper` passed to every method must yield writable references
//! to table frames. Methods never hold a table reference across a call that
//! could hand out another one for the same frame.

use crate::page_table::{PageDirectory, PageTable, PdEntry, PdIndex, PtEntry, PtIndex, split_indices};
use crate::{FrameAlloc, Mmu, PageEntryBits, PageFlags, PhysMapper, zero_frame};
use core::mem::MaybeUninit;
use kernel_info::memory::{ENTRIES_PER_TABLE, KERNEL_DIRECTORY_START, RECURSIVE_SLOT};
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress, VirtualPage, align_down,
};
use log::{debug, trace};

/// Failure of a mapping operation.
#[derive(Debug, thiserror::Error, Copy, Clone, Eq, PartialEq)]
pub enum MapError {
    /// No frame was left for a page table or the directory.
    #[error("out of physical frames")]
    OutOfFrames,
    /// The address has no present leaf entry.
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
    /// The virtual address is not page aligned.
    #[error("{0} is not page aligned")]
    Misaligned(VirtualAddress),
    /// The address falls into the recursive directory slot.
    #[error("{0} lies in the recursive page-table window")]
    Reserved(VirtualAddress),
}

/// Handle to a single, concrete address space.
///
/// Plain data: the directory frame. Who may destroy it is decided by the
/// owner (a process record, or the kernel for its own space).
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    directory: PhysicalFrame,
}

impl AddressSpace {
    /// Wrap an existing, already initialised directory frame.
    #[inline]
    #[must_use]
    pub const fn from_directory(directory: PhysicalFrame) -> Self {
        Self { directory }
    }

    /// Build the kernel's address space: an empty directory whose recursive
    /// slot points at itself.
    ///
    /// # Errors
    /// [`MapError::OutOfFrames`] if no frame is available for the directory.
    pub fn bootstrap<M: PhysMapper, A: FrameAlloc + ?Sized>(
        mapper: &M,
        alloc: &mut A,
    ) -> Result<Self, MapError> {
        let space = Self::new_directory(mapper, alloc)?;
        debug!("Kernel address space at directory {}", space.directory);
        Ok(space)
    }

    /// Build a process address space: zeroed directory, kernel half cloned
    /// from `kernel`, recursive slot installed.
    ///
    /// # Errors
    /// [`MapError::OutOfFrames`] if no frame is available for the directory.
    pub fn create<M: PhysMapper, A: FrameAlloc + ?Sized>(
        mapper: &M,
        alloc: &mut A,
        kernel: &Self,
    ) -> Result<Self, MapError> {
        let space = Self::new_directory(mapper, alloc)?;
        let mut shared = 0usize;
        for i in KERNEL_DIRECTORY_START..RECURSIVE_SLOT {
            let idx = PdIndex::new(i as u16);
            let entry = kernel.directory_mut(mapper).get(idx);
            if entry.is_present() {
                shared += 1;
            }
            space.directory_mut(mapper).set(idx, entry);
        }
        debug!(
            "Created address space at directory {} sharing {shared} kernel tables",
            space.directory
        );
        Ok(space)
    }

    fn new_directory<M: PhysMapper, A: FrameAlloc + ?Sized>(
        mapper: &M,
        alloc: &mut A,
    ) -> Result<Self, MapError> {
        let directory = alloc.alloc_frame().ok_or(MapError::OutOfFrames)?;
        debug_assert!(directory.base().is_frame_aligned());
        zero_frame(mapper, directory);
        let space = Self { directory };
        space.directory_mut(mapper).set(
            PdIndex::new(RECURSIVE_SLOT as u16),
            PdEntry::make_table(directory, PageFlags::KERNEL_RW),
        );
        Ok(space)
    }

    /// Physical frame of the page directory.
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> PhysicalFrame {
        self.directory
    }

    /// Install this space as the active one.
    #[inline]
    pub fn activate<U: Mmu + ?Sized>(&self, mmu: &U) {
        trace!("Switching to directory {}", self.directory);
        mmu.load_directory(self.directory);
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn directory_mut<'a, M: PhysMapper>(&self, mapper: &'a M) -> &'a mut PageDirectory {
        // SAFETY: the directory frame is owned by this space.
        unsafe { mapper.phys_to_mut::<PageDirectory>(self.directory.base()) }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn table_mut<'a, M: PhysMapper>(mapper: &'a M, table: PhysicalFrame) -> &'a mut PageTable {
        // SAFETY: `table` was read from a present PDE of this space.
        unsafe { mapper.phys_to_mut::<PageTable>(table.base()) }
    }

    fn check(va: VirtualAddress) -> Result<(PdIndex, PtIndex), MapError> {
        if !va.is_page_aligned() {
            return Err(MapError::Misaligned(va));
        }
        let (pd, pt) = split_indices(va);
        if pd.is_recursive() {
            return Err(MapError::Reserved(va));
        }
        Ok((pd, pt))
    }

    /// Return the page table covering `pd`, allocating a zeroed one if the
    /// directory entry is absent. A user mapping also grants user access on
    /// the directory entry.
    fn ensure_table<M: PhysMapper, A: FrameAlloc + ?Sized>(
        &self,
        mapper: &M,
        alloc: &mut A,
        pd: PdIndex,
        flags: PageFlags,
    ) -> Result<PhysicalFrame, MapError> {
        let dir = self.directory_mut(mapper);
        let entry = dir.get(pd);
        if let Some(table) = entry.table() {
            if flags.contains(PageFlags::USER) && !entry.bits().user_access() {
                dir.set(pd, entry.with_user());
            }
            return Ok(table);
        }

        let table = alloc.alloc_frame().ok_or(MapError::OutOfFrames)?;
        zero_frame(mapper, table);
        let link = PageFlags::KERNEL_RW | (flags & PageFlags::USER);
        self.directory_mut(mapper)
            .set(pd, PdEntry::make_table(table, link));
        debug!(
            "Allocated page table {table} for directory slot {}",
            pd.as_usize()
        );
        Ok(table)
    }

    /// Map the page at `va` to `frame` with exactly `flags`.
    ///
    /// If `va` was already mapped the entry is replaced; invalidating a
    /// replaced translation of the active space is up to the caller.
    ///
    /// # Errors
    /// - [`MapError::Misaligned`] if `va` is not page aligned.
    /// - [`MapError::Reserved`] if `va` lies in the recursive window.
    /// - [`MapError::OutOfFrames`] if a needed page table cannot be allocated;
    ///   nothing is installed in that case.
    pub fn map<M: PhysMapper, A: FrameAlloc + ?Sized>(
        &self,
        mapper: &M,
        alloc: &mut A,
        va: VirtualAddress,
        frame: PhysicalFrame,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let (pd, pt) = Self::check(va)?;
        let table = self.ensure_table(mapper, alloc, pd, flags)?;
        let leaf = PtEntry::make_4k(frame, PageEntryBits::from_flags(flags));
        Self::table_mut(mapper, table).set(pt, leaf);
        trace!("Mapped {va} -> {frame} ({flags:?})");
        Ok(())
    }

    /// Clear the mapping of the page at `va` and invalidate its translation.
    ///
    /// Returns the frame that was mapped; releasing it is up to the caller.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if there is no present leaf for `va`.
    pub fn unmap<M: PhysMapper, U: Mmu + ?Sized>(
        &self,
        mapper: &M,
        mmu: &U,
        va: VirtualAddress,
    ) -> Result<PhysicalFrame, MapError> {
        let (pd, pt) = Self::check(va)?;
        let table = self
            .directory_mut(mapper)
            .get(pd)
            .table()
            .ok_or(MapError::NotMapped(va))?;
        let tbl = Self::table_mut(mapper, table);
        let (frame, _) = tbl.get(pt).frame().ok_or(MapError::NotMapped(va))?;
        tbl.set(pt, PtEntry::zero());
        mmu.invalidate_page(VirtualPage::containing(va));
        trace!("Unmapped {va} (was {frame})");
        Ok(frame)
    }

    fn leaf<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Option<PtEntry> {
        let (pd, pt) = split_indices(va);
        let table = self.directory_mut(mapper).get(pd).table()?;
        let e = Self::table_mut(mapper, table).get(pt);
        e.is_present().then_some(e)
    }

    /// Translate `va` to a physical address if mapped.
    ///
    /// Addresses inside the recursive window resolve like any other: the
    /// directory doubles as the page table for that slot.
    #[must_use]
    pub fn translate<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (frame, _) = self.leaf(mapper, va)?.frame()?;
        Some(frame.base() + va.page_offset())
    }

    /// Whether a page table covers the directory slot of `va`.
    #[must_use]
    pub fn has_table<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> bool {
        let (pd, _) = split_indices(va);
        self.directory_mut(mapper).get(pd).is_present()
    }

    /// Permission flags of the mapping at `va`.
    #[must_use]
    pub fn flags<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Option<PageFlags> {
        self.leaf(mapper, va).map(|e| e.bits().flags())
    }

    /// Make sure a page table exists for every directory slot overlapping
    /// `start..end`, so spaces cloned afterwards see mappings added there.
    ///
    /// # Errors
    /// [`MapError::OutOfFrames`] if a table cannot be allocated.
    pub fn preallocate_tables<M: PhysMapper, A: FrameAlloc + ?Sized>(
        &self,
        mapper: &M,
        alloc: &mut A,
        start: VirtualAddress,
        end: VirtualAddress,
    ) -> Result<usize, MapError> {
        let table_span = PAGE_SIZE * ENTRIES_PER_TABLE as u32;
        let mut created = 0;
        let mut va = VirtualAddress::new(align_down(start.as_u32(), table_span));
        while va < end {
            let pd = PdIndex::from(va);
            if pd.is_recursive() {
                return Err(MapError::Reserved(va));
            }
            if !self.directory_mut(mapper).get(pd).is_present() {
                self.ensure_table(mapper, alloc, pd, PageFlags::KERNEL_RW)?;
                created += 1;
            }
            match va.checked_add(table_span) {
                Some(next) => va = next,
                None => break,
            }
        }
        Ok(created)
    }

    /// Copy `bytes` into this space starting at `va`, page by page.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] at the first unmapped page; bytes before it
    /// have been written.
    pub fn copy_in<M: PhysMapper>(
        &self,
        mapper: &M,
        va: VirtualAddress,
        bytes: &[u8],
    ) -> Result<(), MapError> {
        self.for_each_chunk(mapper, va, bytes.len(), |page, offset, range| {
            page[range.clone()].copy_from_slice(&bytes[offset..offset + range.len()]);
        })
    }

    /// Copy bytes out of this space starting at `va`.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] at the first unmapped page.
    pub fn copy_out<M: PhysMapper>(
        &self,
        mapper: &M,
        va: VirtualAddress,
        out: &mut [u8],
    ) -> Result<(), MapError> {
        let len = out.len();
        self.for_each_chunk(mapper, va, len, |page, offset, range| {
            out[offset..offset + range.len()].copy_from_slice(&page[range]);
        })
    }

    /// Fill `len` bytes at `va` with `value`.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] at the first unmapped page.
    pub fn fill<M: PhysMapper>(
        &self,
        mapper: &M,
        va: VirtualAddress,
        value: u8,
        len: usize,
    ) -> Result<(), MapError> {
        self.for_each_chunk(mapper, va, len, |page, _, range| page[range].fill(value))
    }

    /// Read a plain-data value from `va`.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if any byte of the value is unmapped.
    pub fn read<T: Copy, M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Result<T, MapError> {
        let mut value = MaybeUninit::<T>::uninit();
        // SAFETY: the buffer covers exactly the storage of `value`.
        let buf = unsafe {
            core::slice::from_raw_parts_mut(value.as_mut_ptr().cast::<u8>(), size_of::<T>())
        };
        self.copy_out(mapper, va, buf)?;
        // SAFETY: every byte was written; `T: Copy` is used for plain data only.
        Ok(unsafe { value.assume_init() })
    }

    /// Write a plain-data value to `va`.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if any byte of the value is unmapped.
    pub fn write<T: Copy, M: PhysMapper>(
        &self,
        mapper: &M,
        va: VirtualAddress,
        value: &T,
    ) -> Result<(), MapError> {
        // SAFETY: reading the bytes of a `Copy` value.
        let bytes = unsafe {
            core::slice::from_raw_parts(core::ptr::from_ref(value).cast::<u8>(), size_of::<T>())
        };
        self.copy_in(mapper, va, bytes)
    }

    fn for_each_chunk<M: PhysMapper>(
        &self,
        mapper: &M,
        va: VirtualAddress,
        len: usize,
        mut f: impl FnMut(&mut [u8; PAGE_SIZE as usize], usize, core::ops::Range<usize>),
    ) -> Result<(), MapError> {
        let mut done = 0usize;
        while done < len {
            let at = va + done as u32;
            let pa = self
                .translate(mapper, at)
                .ok_or(MapError::NotMapped(at))?;
            let start = pa.frame_offset() as usize;
            let n = (PAGE_SIZE as usize - start).min(len - done);
            // SAFETY: `pa` is a mapped frame; the reference lives only for `f`.
            let page = unsafe { mapper.phys_to_mut::<[u8; PAGE_SIZE as usize]>(pa.frame().base()) };
            f(page, done, start..start + n);
            done += n;
        }
        Ok(())
    }

    /// Release every frame this space owns: the leaf frames still mapped
    /// below the kernel half, the page tables there, and the directory.
    ///
    /// The kernel half is shared and left untouched. The space must not be
    /// active.
    pub fn destroy<M: PhysMapper, A: FrameAlloc + ?Sized>(self, mapper: &M, alloc: &mut A) {
        let mut leaves = 0usize;
        let mut tables = 0usize;
        let owned: alloc::vec::Vec<_> = self.directory_mut(mapper).user_tables().collect();
        for (_, table) in owned {
            let tbl = Self::table_mut(mapper, table);
            for i in 0..ENTRIES_PER_TABLE {
                let idx = PtIndex::new(i as u16);
                if let Some((frame, _)) = tbl.get(idx).frame() {
                    alloc.free_frame(frame);
                    leaves += 1;
                }
            }
            alloc.free_frame(table);
            tables += 1;
        }
        alloc.free_frame(self.directory);
        debug!(
            "Destroyed address space {}: {tables} tables, {leaves} leftover pages",
            self.directory
        );
    }
}
