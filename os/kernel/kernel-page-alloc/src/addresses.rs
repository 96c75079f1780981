//! # Physical addresses and the page unit

use core::fmt;
use core::ops::Add;

/// Size of every page handed out by the allocator, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// log2([`PAGE_SIZE`]).
pub const PAGE_SHIFT: u32 = 12;

pub(crate) const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
};

/// Physical memory address.
///
/// A page is identified purely by its base address; there is no
/// materialized page object.
///
/// ```rust
/// # use kernel_page_alloc::PhysicalAddress;
/// let pa = PhysicalAddress::new(0x2001);
/// assert!(!pa.is_page_aligned());
/// assert_eq!(pa.align_down().as_u64(), 0x2000);
/// assert_eq!(pa.checked_align_up().unwrap().as_u64(), 0x3000);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Byte offset of this address within its page.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE_U64 - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Base of the page containing this address.
    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE_U64 - 1))
    }

    /// Base of the first page starting at or after this address, or `None`
    /// if that page lies beyond the 64-bit address space.
    #[inline]
    #[must_use]
    pub const fn checked_align_up(self) -> Option<Self> {
        match self.0.checked_add(PAGE_SIZE_U64 - 1) {
            Some(v) => Some(Self(v & !(PAGE_SIZE_U64 - 1))),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalAddress> for u64 {
    #[inline]
    fn from(pa: PhysicalAddress) -> Self {
        pa.0
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        let pa = PhysicalAddress::new(0x4000);
        assert!(pa.is_page_aligned());
        assert_eq!(pa.align_down(), pa);
        assert_eq!(pa.checked_align_up(), Some(pa));

        let pa = PhysicalAddress::new(0x4FFF);
        assert_eq!(pa.page_offset(), 0xFFF);
        assert_eq!(pa.align_down().as_u64(), 0x4000);
        assert_eq!(pa.checked_align_up().map(u64::from), Some(0x5000));
    }

    #[test]
    fn align_up_overflow() {
        assert_eq!(PhysicalAddress::new(u64::MAX).checked_align_up(), None);
        assert_eq!(PhysicalAddress::new(u64::MAX).checked_add(1), None);
    }

    #[test]
    fn formatting() {
        let pa = PhysicalAddress::new(0x4000);
        assert_eq!(format!("{pa}"), "0x4000");
        assert_eq!(format!("{pa:?}"), "PA(0x0000000000004000)");
    }
}
