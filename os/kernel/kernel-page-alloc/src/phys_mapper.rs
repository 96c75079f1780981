//! # Physical Memory Access
//!
//! The allocator never dereferences a physical address directly. Scrubbing a
//! freed page and threading the free list through it both go through a
//! [`PhysMapper`], which turns a physical address into a pointer the current
//! code can write through.
//!
//! ## Why is this needed?
//! - Rust code can only dereference virtual addresses, not physical ones.
//! - The mapping strategy differs between the kernel (higher-half direct
//!   map), early boot (identity) and host tests (a heap arena), so the trait
//!   abstracts over it.
//!
//! ## Example
//! ```rust
//! use kernel_page_alloc::PhysicalAddress;
//! use kernel_page_alloc::phys_mapper::{HhdmPhysMapper, PhysMapper};
//!
//! let mapper = HhdmPhysMapper::identity();
//! let mut page = [0u8; 64];
//! let pa = PhysicalAddress::new(page.as_mut_ptr() as u64);
//! unsafe { mapper.fill(pa, 0x01, page.len()) };
//! assert!(page.iter().all(|&b| b == 0x01));
//! ```

use crate::addresses::PhysicalAddress;
use core::ptr;

/// Default base of the higher-half direct map.
///
/// Anything mapped at `HHDM_BASE + pa` lets the kernel access physical memory
/// via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Converts physical addresses of managed pages into writable pointers.
pub trait PhysMapper {
    /// Pointer through which the byte at `pa` can be read and written.
    ///
    /// # Safety
    /// `pa` must be covered by the mapping, and the returned pointer must only
    /// be used for memory the caller is entitled to touch.
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// Overwrite `len` bytes starting at `pa` with `byte`.
    ///
    /// # Safety
    /// `[pa, pa + len)` must be mapped, writable and not referenced by anyone
    /// else for the duration of the call.
    unsafe fn fill(&self, pa: PhysicalAddress, byte: u8, len: usize) {
        unsafe { ptr::write_bytes(self.phys_to_ptr(pa), byte, len) }
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        unsafe { (**self).phys_to_ptr(pa) }
    }

    unsafe fn fill(&self, pa: PhysicalAddress, byte: u8, len: usize) {
        unsafe { (**self).fill(pa, byte, len) }
    }
}

/// [`PhysMapper`] for kernels with a direct map of all physical memory at a
/// fixed virtual offset.
///
/// # Safety
/// - The direct map must be present and cover the referenced physical range.
/// - The returned pointer must only be used for valid, mapped, and writable memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HhdmPhysMapper {
    offset: u64,
}

impl Default for HhdmPhysMapper {
    fn default() -> Self {
        Self::new(HHDM_BASE)
    }
}

impl HhdmPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Physical memory is accessible at its own address (early boot, or
    /// hosted tests).
    #[must_use]
    pub const fn identity() -> Self {
        Self::new(0)
    }
}

impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        self.offset.wrapping_add(pa.as_u64()) as *mut u8
    }
}
