//! # Page Allocator
//!
//! Hands out 4 KiB physical pages and tracks how many owners hold each one.
//!
//! All state (free list, free-page counter, reference counts) sits behind a
//! single lock named `kmem`. Every operation validates its argument first,
//! then takes the lock for O(1) work.
//!
//! ## Page lifecycle
//!
//! ```text
//!            allocate()                 adjust_reference_count(+)
//!   Free ───────────────▶ Owned(1) ─────────────────────────────▶ Owned(n+1)
//!    ▲                       │  ▲                                      │
//!    │   release() or        │  └──────────────────────────────────────┘
//!    │   adjust(−) at 1      │       release() or adjust(−) at n > 1
//!    └───────────────────────┘
//! ```
//!
//! A page's reference count is zero **exactly** when it is on the free list:
//! dropping the last reference through either [`PageAllocator::release`] or
//! [`PageAllocator::adjust_reference_count`] reclaims the page.
//!
//! ## Contract violations
//!
//! Passing an address that is not a managed page, dropping a reference that
//! does not exist, or sharing a free page means the kernel is already
//! corrupted. These halt via `panic!`. Running out of pages is not an error:
//! [`PageAllocator::allocate`] returns `None`.

use crate::addresses::{PAGE_SIZE, PhysicalAddress};
use crate::free_list::FreeList;
use crate::phys_mapper::PhysMapper;
use crate::range::{ManagedRange, PageAddressError, RangeError};
use kernel_sync::{Mutex, RawLock, RawSpin};
use log::{info, trace, warn};

/// Byte written over every page as it is freed, to catch dangling references.
pub const JUNK_FILL: u8 = 0x01;

/// Name of the allocator lock, as it shows up in diagnostics.
const LOCK_NAME: &str = "kmem";

/// Inconsistency found by [`PageAllocator::audit`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("free list links to {page}, which is not a managed page: {source}")]
    BadLink {
        page: PhysicalAddress,
        #[source]
        source: PageAddressError,
    },
    #[error("page {page} is on the free list with reference count {count}")]
    OwnedPageOnFreeList { page: PhysicalAddress, count: u32 },
    #[error("free-page counter says {counter} but the free list holds at least {walked}")]
    CounterMismatch { counter: usize, walked: usize },
    #[error("{unreferenced} pages have no owner but only {free} are on the free list")]
    LeakedPages { unreferenced: usize, free: usize },
}

struct AllocatorState<'t> {
    free_list: FreeList,
    free_pages: usize,
    /// One entry per managed page, indexed relative to the first page.
    ref_counts: &'t mut [u32],
    initialized: bool,
}

impl AllocatorState<'_> {
    fn ensure_initialized(&self, op: &str) {
        assert!(self.initialized, "{op}: page allocator used before init");
    }

    /// Scrub `page` and push it onto the free list.
    ///
    /// # Safety
    /// `page` must be a managed page mapped by `mapper` that has no owner and
    /// is not already on the free list.
    unsafe fn reclaim<M: PhysMapper>(&mut self, mapper: &M, page: PhysicalAddress) {
        unsafe {
            mapper.fill(page, JUNK_FILL, PAGE_SIZE);
            self.free_list.push(mapper, page);
        }
        self.free_pages += 1;
    }

    /// Drop one reference held on an owned page, reclaiming it at zero.
    ///
    /// # Safety
    /// As for [`reclaim`](Self::reclaim), minus the ownership requirement;
    /// the reference count at `index` must be at least 1.
    unsafe fn put<M: PhysMapper>(&mut self, mapper: &M, index: usize, page: PhysicalAddress) {
        let count = self.ref_counts[index] - 1;
        self.ref_counts[index] = count;
        if count == 0 {
            unsafe { self.reclaim(mapper, page) };
            trace!("page {page} freed");
        }
    }
}

/// The physical page allocator.
///
/// Created once by the boot code and passed by reference to every subsystem
/// that needs pages. Independent instances over disjoint memory are fine.
///
/// ```rust
/// use kernel_page_alloc::{ManagedRange, PageAllocator, PhysicalAddress, PAGE_SIZE};
/// use kernel_page_alloc::phys_mapper::HhdmPhysMapper;
///
/// #[repr(C, align(4096))]
/// struct Ram([u8; 4 * PAGE_SIZE]);
///
/// let mut ram = Box::new(Ram([0; 4 * PAGE_SIZE]));
/// let base = ram.0.as_mut_ptr() as u64;
/// let range = ManagedRange::new(
///     PhysicalAddress::new(base),
///     PhysicalAddress::new(base + 4 * PAGE_SIZE as u64),
/// )?;
/// let mut ref_counts = [0u32; 4];
///
/// // SAFETY: `ram` backs the whole range and outlives the allocator.
/// let pages = unsafe {
///     PageAllocator::new(range, HhdmPhysMapper::identity(), &mut ref_counts)?
/// };
/// pages.init();
/// assert_eq!(pages.free_page_count(), 4);
///
/// let page = pages.allocate().expect("a free page");
/// assert_eq!(pages.reference_count(page), 1);
/// pages.release(page);
/// assert_eq!(pages.free_page_count(), 4);
/// # drop(pages);
/// # drop(ram);
/// # Ok::<(), kernel_page_alloc::RangeError>(())
/// ```
pub struct PageAllocator<'t, M, R = RawSpin> {
    range: ManagedRange,
    mapper: M,
    state: Mutex<AllocatorState<'t>, R>,
}

impl<'t, M: PhysMapper> PageAllocator<'t, M, RawSpin> {
    /// Create an allocator over `range` guarded by a spin lock.
    ///
    /// The allocator holds no pages until [`init`](Self::init) runs.
    ///
    /// # Errors
    /// [`RangeError::TableTooSmall`] if `ref_counts` has fewer entries than
    /// `range` has pages. Surplus entries are left untouched.
    ///
    /// # Safety
    /// `mapper` must map every page of `range` to writable memory that nobody
    /// else touches until the allocator hands the page out.
    pub unsafe fn new(
        range: ManagedRange,
        mapper: M,
        ref_counts: &'t mut [u32],
    ) -> Result<Self, RangeError> {
        unsafe { Self::with_raw_lock(range, mapper, ref_counts, RawSpin::new()) }
    }
}

impl<'t, M: PhysMapper, R: RawLock> PageAllocator<'t, M, R> {
    /// Like [`new`](PageAllocator::new) but with a caller-chosen raw lock.
    ///
    /// # Errors
    /// As for [`new`](PageAllocator::new).
    ///
    /// # Safety
    /// As for [`new`](PageAllocator::new).
    pub unsafe fn with_raw_lock(
        range: ManagedRange,
        mapper: M,
        ref_counts: &'t mut [u32],
        raw: R,
    ) -> Result<Self, RangeError> {
        let needed = range.page_count();
        if ref_counts.len() < needed {
            return Err(RangeError::TableTooSmall {
                needed,
                provided: ref_counts.len(),
            });
        }
        let (ref_counts, _) = ref_counts.split_at_mut(needed);

        Ok(Self {
            range,
            mapper,
            state: Mutex::from_raw(
                LOCK_NAME,
                raw,
                AllocatorState {
                    free_list: FreeList::new(),
                    free_pages: 0,
                    ref_counts,
                    initialized: false,
                },
            ),
        })
    }

    /// Seed every managed page into the free list.
    ///
    /// Each page is junk-filled and pushed through the same path that frees
    /// pages later on, so afterwards every page is free with reference count
    /// zero and the highest page sits at the head of the list.
    ///
    /// # Panics
    /// If the allocator was already initialized.
    pub fn init(&self) {
        self.state.with_lock(|state| {
            assert!(!state.initialized, "init: page allocator initialized twice");
            state.free_list.clear();
            state.free_pages = 0;
            state.ref_counts.fill(0);
            state.initialized = true;
        });

        for page in self.range.pages() {
            // SAFETY: the page is managed, mapped per `new`, and unowned.
            self.state
                .with_lock(|state| unsafe { state.reclaim(&self.mapper, page) });
        }

        info!(
            "page allocator: {} pages of {} bytes free in [{}, {}) (kernel_end {}, phys_top {})",
            self.range.page_count(),
            PAGE_SIZE,
            self.range.first_page(),
            self.range.end(),
            self.range.kernel_end(),
            self.range.phys_top(),
        );
    }

    /// Take one page off the free list.
    ///
    /// Returns `None` when no page is free; that is a normal outcome the
    /// caller has to handle. On success the page has reference count 1. Its
    /// content is junk apart from the first bytes, which held the list link.
    ///
    /// # Panics
    /// If called before [`init`](Self::init), or if the free list turns out
    /// to be corrupted.
    #[must_use]
    pub fn allocate(&self) -> Option<PhysicalAddress> {
        let mut state = self.state.lock();
        state.ensure_initialized("allocate");

        if state.free_list.is_empty() {
            drop(state);
            warn!("allocate: out of physical pages");
            return None;
        }

        // SAFETY: only managed, mapped pages are ever pushed.
        let page = unsafe { state.free_list.pop(&self.mapper) }?;
        let index = match self.range.index_of(page) {
            Ok(index) => index,
            Err(err) => panic!("allocate: free list corrupted: {err}"),
        };
        state.ref_counts[index] = 1;
        state.free_pages -= 1;
        drop(state);

        trace!("page {page} allocated");
        Some(page)
    }

    /// [`allocate`](Self::allocate) a page and clear it.
    ///
    /// # Panics
    /// As for [`allocate`](Self::allocate).
    #[must_use]
    pub fn allocate_zeroed(&self) -> Option<PhysicalAddress> {
        let page = self.allocate()?;
        // SAFETY: the page was just handed to us alone.
        unsafe { self.mapper.fill(page, 0, PAGE_SIZE) };
        Some(page)
    }

    /// Drop one reference to `page`; the last one returns it to the free list.
    ///
    /// When the count reaches zero the page is junk-filled and becomes the
    /// next page [`allocate`](Self::allocate) returns. Releasing a page that
    /// is already free changes nothing and is logged.
    ///
    /// # Panics
    /// If `page` is not a managed page (unaligned or outside the range), or
    /// if called before [`init`](Self::init).
    pub fn release(&self, page: PhysicalAddress) {
        let index = self.checked_index("release", page);

        let mut state = self.state.lock();
        state.ensure_initialized("release");
        if state.ref_counts[index] == 0 {
            drop(state);
            warn!("release: page {page} is already free");
            return;
        }
        // SAFETY: the page is managed and has at least one reference.
        unsafe { state.put(&self.mapper, index, page) };
    }

    /// Number of free pages at the time of the call.
    ///
    /// Other contexts may change it right after; never treat it as a
    /// reservation.
    #[must_use]
    pub fn free_page_count(&self) -> usize {
        self.state.with_lock(|state| state.free_pages)
    }

    /// Record that an owner of `page` was added (`increase`) or dropped.
    ///
    /// Dropping the last owner reclaims the page exactly like
    /// [`release`](Self::release) does, so callers never need a separate
    /// release after a decrement.
    ///
    /// # Panics
    /// - If `page` is not a managed page, or before [`init`](Self::init).
    /// - On `increase` for a free page (it has no owner to share with) or a
    ///   count that would overflow.
    /// - On a decrement of a page without owners.
    pub fn adjust_reference_count(&self, page: PhysicalAddress, increase: bool) {
        let index = self.checked_index("adjust_reference_count", page);

        let mut state = self.state.lock();
        state.ensure_initialized("adjust_reference_count");
        let count = state.ref_counts[index];

        if increase {
            assert!(count != 0, "adjust_reference_count: page {page} is free");
            let Some(count) = count.checked_add(1) else {
                panic!("adjust_reference_count: reference count overflow on page {page}");
            };
            state.ref_counts[index] = count;
        } else {
            assert!(
                count != 0,
                "adjust_reference_count: reference count underflow on page {page}"
            );
            // SAFETY: the page is managed and has at least one reference.
            unsafe { state.put(&self.mapper, index, page) };
        }
    }

    /// Current number of owners of `page`; zero means free.
    ///
    /// # Panics
    /// If `page` is not a managed page.
    #[must_use]
    pub fn reference_count(&self, page: PhysicalAddress) -> u32 {
        let index = self.checked_index("reference_count", page);
        self.state.with_lock(|state| state.ref_counts[index])
    }

    /// Number of managed pages, free or not.
    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.range.page_count()
    }

    #[must_use]
    pub const fn range(&self) -> &ManagedRange {
        &self.range
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.with_lock(|state| state.initialized)
    }

    /// Walk the whole free list and cross-check it against the counter and
    /// the reference counts. Returns the number of free pages.
    ///
    /// Holds the lock for O(K) work; meant for tests and debug shells only.
    ///
    /// # Errors
    /// The first [`AuditError`] found.
    pub fn audit(&self) -> Result<usize, AuditError> {
        let state = self.state.lock();
        let counter = state.free_pages;

        let mut walked = 0usize;
        let mut cursor = state.free_list.head();
        while let Some(page) = cursor {
            walked += 1;
            if walked > counter {
                // Also stops on a cycle.
                return Err(AuditError::CounterMismatch { counter, walked });
            }
            let index = self
                .range
                .index_of(page)
                .map_err(|source| AuditError::BadLink { page, source })?;
            let count = state.ref_counts[index];
            if count != 0 {
                return Err(AuditError::OwnedPageOnFreeList { page, count });
            }
            // SAFETY: `page` was validated as a managed page on the list.
            cursor = unsafe { state.free_list.next_of(&self.mapper, page) };
        }
        if walked != counter {
            return Err(AuditError::CounterMismatch { counter, walked });
        }

        let unreferenced = state.ref_counts.iter().filter(|&&c| c == 0).count();
        if unreferenced != walked {
            return Err(AuditError::LeakedPages {
                unreferenced,
                free: walked,
            });
        }
        Ok(walked)
    }

    fn checked_index(&self, op: &str, page: PhysicalAddress) -> usize {
        match self.range.index_of(page) {
            Ok(index) => index,
            Err(err) => panic!("{op}: {err}"),
        }
    }
}
