//! # Managed Range
//!
//! The boot code hands the allocator two bounds: `kernel_end`, the first
//! address after the loaded kernel image, and `phys_top`, the exclusive upper
//! end of the physical memory the allocator may use. Only **full** pages in
//! between are managed:
//!
//! ```text
//! kernel_end      first_page                          end    phys_top
//!     │  (partial)    │ page 0 │ page 1 │ ... │ page K-1 │ (partial) │
//! ```
//!
//! Page indices are relative to `first_page`, so per-page metadata is sized
//! to the `K` managed pages rather than the whole physical address space.

use crate::addresses::{PAGE_SHIFT, PAGE_SIZE_U64, PhysicalAddress};

/// Error returned when the boot-provided bounds cannot describe a range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("phys_top {phys_top} lies below kernel_end {kernel_end}")]
    Inverted {
        kernel_end: PhysicalAddress,
        phys_top: PhysicalAddress,
    },
    #[error("kernel_end {0} cannot be rounded up to a page boundary")]
    Overflow(PhysicalAddress),
    /// Only reachable where `usize` is 32 bits wide.
    #[error("{0} pages do not fit the address width of this machine")]
    TooLarge(u64),
    #[error("reference-count table holds {provided} entries but {needed} pages are managed")]
    TableTooSmall { needed: usize, provided: usize },
}

/// Why an address is not a managed page.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageAddressError {
    #[error("{0} is not page aligned")]
    Unaligned(PhysicalAddress),
    #[error("{addr} lies below the managed range starting at {start}")]
    BelowRange {
        addr: PhysicalAddress,
        start: PhysicalAddress,
    },
    #[error("{addr} lies at or above the managed range ending at {end}")]
    AboveRange {
        addr: PhysicalAddress,
        end: PhysicalAddress,
    },
}

/// The validated set of pages an allocator manages.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ManagedRange {
    kernel_end: PhysicalAddress,
    phys_top: PhysicalAddress,
    first_page: PhysicalAddress,
    page_count: usize,
}

impl ManagedRange {
    /// Derive the managed pages from the boot-provided bounds.
    ///
    /// A range too small to hold a single full page is valid and simply
    /// manages nothing.
    ///
    /// # Errors
    /// - [`RangeError::Inverted`] if `phys_top < kernel_end`.
    /// - [`RangeError::Overflow`] if `kernel_end` has no page boundary above it.
    /// - [`RangeError::TooLarge`] if the page count does not fit a `usize`.
    pub fn new(
        kernel_end: PhysicalAddress,
        phys_top: PhysicalAddress,
    ) -> Result<Self, RangeError> {
        if phys_top < kernel_end {
            return Err(RangeError::Inverted {
                kernel_end,
                phys_top,
            });
        }
        let first_page = kernel_end
            .checked_align_up()
            .ok_or(RangeError::Overflow(kernel_end))?;

        let pages = phys_top.as_u64().saturating_sub(first_page.as_u64()) >> PAGE_SHIFT;
        let page_count = usize::try_from(pages).map_err(|_| RangeError::TooLarge(pages))?;

        Ok(Self {
            kernel_end,
            phys_top,
            first_page,
            page_count,
        })
    }

    #[inline]
    #[must_use]
    pub const fn kernel_end(&self) -> PhysicalAddress {
        self.kernel_end
    }

    #[inline]
    #[must_use]
    pub const fn phys_top(&self) -> PhysicalAddress {
        self.phys_top
    }

    /// Base of the lowest managed page.
    #[inline]
    #[must_use]
    pub const fn first_page(&self) -> PhysicalAddress {
        self.first_page
    }

    /// Exclusive end of the managed pages; never above `phys_top`.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.first_page.as_u64() + ((self.page_count as u64) << PAGE_SHIFT))
    }

    /// Number of managed pages, `K`.
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        self.page_count
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.page_count == 0
    }

    #[must_use]
    pub fn contains(&self, addr: PhysicalAddress) -> bool {
        self.index_of(addr).is_ok()
    }

    /// Index of the managed page starting at `addr`.
    ///
    /// # Errors
    /// Returns a [`PageAddressError`] unless `addr` is page aligned and lies
    /// in `[first_page, end)`.
    pub fn index_of(&self, addr: PhysicalAddress) -> Result<usize, PageAddressError> {
        if !addr.is_page_aligned() {
            return Err(PageAddressError::Unaligned(addr));
        }
        if addr < self.first_page {
            return Err(PageAddressError::BelowRange {
                addr,
                start: self.first_page,
            });
        }
        let end = self.end();
        if addr >= end {
            return Err(PageAddressError::AboveRange { addr, end });
        }
        // Bounded by page_count, which is a usize.
        #[allow(clippy::cast_possible_truncation)]
        let index = ((addr.as_u64() - self.first_page.as_u64()) >> PAGE_SHIFT) as usize;
        Ok(index)
    }

    /// Base address of the managed page with the given index.
    ///
    /// # Panics
    /// If `index` is not below [`page_count`](Self::page_count).
    #[must_use]
    pub fn address_of(&self, index: usize) -> PhysicalAddress {
        assert!(
            index < self.page_count,
            "page index {index} outside of {} managed pages",
            self.page_count
        );
        self.first_page + ((index as u64) << PAGE_SHIFT)
    }

    /// Every managed page, lowest address first.
    #[must_use]
    pub fn pages(&self) -> impl DoubleEndedIterator<Item = PhysicalAddress> + ExactSizeIterator {
        let first = self.first_page;
        (0..self.page_count).map(move |i| first + (i as u64) * PAGE_SIZE_U64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    fn range(kernel_end: u64, phys_top: u64) -> ManagedRange {
        ManagedRange::new(pa(kernel_end), pa(phys_top)).unwrap()
    }

    #[test]
    fn aligned_bounds_keep_every_page() {
        let r = range(0x2000, 0x6000);
        assert_eq!(r.first_page().as_u64(), 0x2000);
        assert_eq!(r.end().as_u64(), 0x6000);
        assert_eq!(r.page_count(), 4);
        let pages: Vec<u64> = r.pages().map(u64::from).collect();
        assert_eq!(pages, [0x2000, 0x3000, 0x4000, 0x5000]);
    }

    #[test]
    fn partial_pages_are_dropped_at_both_ends() {
        let r = range(0x3001, 0x5FFF);
        assert_eq!(r.first_page().as_u64(), 0x4000);
        assert_eq!(r.end().as_u64(), 0x5000);
        assert_eq!(r.page_count(), 1);
    }

    #[test]
    fn tiny_range_is_empty() {
        let r = range(0x3001, 0x3800);
        assert!(r.is_empty());
        assert_eq!(r.pages().count(), 0);

        let r = range(0x3000, 0x3000);
        assert!(r.is_empty());
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = ManagedRange::new(pa(0x6000), pa(0x2000)).unwrap_err();
        assert!(matches!(err, RangeError::Inverted { .. }));
    }

    #[test]
    fn unroundable_kernel_end_is_rejected() {
        let err = ManagedRange::new(pa(u64::MAX), pa(u64::MAX))
            .unwrap_err();
        assert_eq!(err, RangeError::Overflow(pa(u64::MAX)));
    }

    #[test]
    fn index_of_validates_addresses() {
        let r = range(0x2000, 0x6000);
        assert_eq!(r.index_of(pa(0x2000)), Ok(0));
        assert_eq!(r.index_of(pa(0x5000)), Ok(3));
        assert_eq!(
            r.index_of(pa(0x2010)),
            Err(PageAddressError::Unaligned(pa(0x2010)))
        );
        assert!(matches!(
            r.index_of(pa(0x1000)),
            Err(PageAddressError::BelowRange { .. })
        ));
        assert!(matches!(
            r.index_of(pa(0x6000)),
            Err(PageAddressError::AboveRange { .. })
        ));
    }

    #[test]
    fn trailing_partial_page_is_not_managed() {
        let r = range(0x2000, 0x4800);
        assert_eq!(r.page_count(), 2);
        assert!(r.contains(pa(0x3000)));
        assert!(!r.contains(pa(0x4000)));
    }

    #[test]
    fn address_of_inverts_index_of() {
        let r = range(0x10_0000, 0x20_0000);
        for (i, pa) in r.pages().enumerate() {
            assert_eq!(r.address_of(i), pa);
            assert_eq!(r.index_of(pa), Ok(i));
        }
    }

    #[test]
    #[should_panic(expected = "outside of")]
    fn address_of_rejects_out_of_range_index() {
        let _ = range(0x2000, 0x3000).address_of(1);
    }

    #[test]
    fn error_messages_name_the_addresses() {
        let err = PageAddressError::BelowRange {
            addr: pa(0x1000),
            start: pa(0x2000),
        };
        assert_eq!(
            err.to_string(),
            "0x1000 lies below the managed range starting at 0x2000"
        );
    }
}
