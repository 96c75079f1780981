#![allow(dead_code)]

use kernel_page_alloc::{ManagedRange, PAGE_SIZE, PageAllocator, PhysMapper, PhysicalAddress};
use std::ptr::{self, NonNull};

#[repr(C, align(4096))]
#[derive(Clone, Copy)]
struct Frame([u8; PAGE_SIZE]);

/// Host memory standing in for the managed physical pages.
///
/// Physical page `first_page + i * PAGE_SIZE` lives in frame `i`. Anything
/// outside the arena trips an assertion instead of scribbling over the heap.
pub struct ArenaMapper {
    base: PhysicalAddress,
    frames: NonNull<Frame>,
    len: usize,
}

// Safety: the arena is plain memory; the allocator serializes all writes.
unsafe impl Send for ArenaMapper {}
unsafe impl Sync for ArenaMapper {}

impl ArenaMapper {
    /// An arena backing every page of `range`, pre-filled with `0xAA`.
    pub fn covering(range: &ManagedRange) -> Self {
        let frames: Box<[Frame]> = vec![Frame([0xAA; PAGE_SIZE]); range.page_count()].into_boxed_slice();
        let len = frames.len();
        let frames = NonNull::new(Box::into_raw(frames).cast::<Frame>()).unwrap();
        Self {
            base: range.first_page(),
            frames,
            len,
        }
    }

    /// Snapshot of a page's content.
    pub fn page_bytes(&self, page: PhysicalAddress) -> Vec<u8> {
        let mut out = vec![0; PAGE_SIZE];
        unsafe { ptr::copy_nonoverlapping(self.phys_to_ptr(page), out.as_mut_ptr(), PAGE_SIZE) };
        out
    }
}

impl Drop for ArenaMapper {
    fn drop(&mut self) {
        let slice = ptr::slice_from_raw_parts_mut(self.frames.as_ptr(), self.len);
        drop(unsafe { Box::from_raw(slice) });
    }
}

impl PhysMapper for ArenaMapper {
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let offset = pa
            .as_u64()
            .checked_sub(self.base.as_u64())
            .and_then(|o| usize::try_from(o).ok())
            .expect("address below the arena");
        assert!(offset < self.len * PAGE_SIZE, "{pa} beyond the arena");
        unsafe { self.frames.as_ptr().cast::<u8>().add(offset) }
    }
}

pub fn pa(v: u64) -> PhysicalAddress {
    PhysicalAddress::new(v)
}

pub fn range(kernel_end: u64, phys_top: u64) -> ManagedRange {
    ManagedRange::new(pa(kernel_end), pa(phys_top)).unwrap()
}

/// An allocator over `[kernel_end, phys_top)`, not yet initialized.
pub fn allocator(range: ManagedRange, ref_counts: &mut [u32]) -> PageAllocator<'_, ArenaMapper> {
    let mapper = ArenaMapper::covering(&range);
    unsafe { PageAllocator::new(range, mapper, ref_counts) }.unwrap()
}

/// A freshly initialized allocator.
pub fn booted(range: ManagedRange, ref_counts: &mut [u32]) -> PageAllocator<'_, ArenaMapper> {
    let pages = allocator(range, ref_counts);
    pages.init();
    pages
}
