use crate::addresses::PhysicalAddress;
use crate::phys_mapper::PhysMapper;
use core::ptr;

/// Terminates the list. Never page aligned, so physical page 0 stays usable.
const NIL: u64 = u64::MAX;

/// Link stored at the beginning of every **free** page.
///
/// A free page in memory has the following layout:
///
/// ```text
/// +------------------+---------------------------------+
/// | FreePage (link)  |   junk fill (PAGE_SIZE - 8)     |
/// +------------------+---------------------------------+
/// ^ page base
/// ```
///
/// The link holds the **physical** address of the next free page so the
/// list survives any change of the mapping used to reach it.
#[repr(C)]
struct FreePage {
    next: u64,
}

/// An intrusive LIFO stack of free pages.
///
/// No node is ever allocated: a page's own storage carries its link while the
/// page is free.
///
/// # Invariants
/// - Every linked page is page aligned and mapped by the mapper passed to the
///   methods.
/// - No page appears twice.
pub(crate) struct FreeList {
    head: u64,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: NIL }
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// The page the next [`pop`](Self::pop) returns.
    #[inline]
    pub(crate) const fn head(&self) -> Option<PhysicalAddress> {
        decode(self.head)
    }

    /// Forget every linked page without touching their memory.
    pub(crate) const fn clear(&mut self) {
        self.head = NIL;
    }

    /// Link `page` in as the new head.
    ///
    /// # Safety
    /// - `page` must be page aligned, mapped by `mapper`, and exclusively owned
    ///   by the list from now on.
    /// - `page` must not already be on the list.
    pub(crate) unsafe fn push<M: PhysMapper>(&mut self, mapper: &M, page: PhysicalAddress) {
        debug_assert!(page.is_page_aligned());
        let node = unsafe { mapper.phys_to_ptr(page) }.cast::<FreePage>();
        unsafe { ptr::write(node, FreePage { next: self.head }) };
        self.head = page.as_u64();
    }

    /// Unlink and return the head page.
    ///
    /// # Safety
    /// The list invariants must hold for `mapper`.
    pub(crate) unsafe fn pop<M: PhysMapper>(&mut self, mapper: &M) -> Option<PhysicalAddress> {
        let page = self.head()?;
        self.head = unsafe { read_link(mapper, page) };
        Some(page)
    }

    /// The page linked after `page`.
    ///
    /// # Safety
    /// `page` must currently be on this list and the invariants must hold.
    pub(crate) unsafe fn next_of<M: PhysMapper>(
        &self,
        mapper: &M,
        page: PhysicalAddress,
    ) -> Option<PhysicalAddress> {
        decode(unsafe { read_link(mapper, page) })
    }
}

#[inline]
const fn decode(link: u64) -> Option<PhysicalAddress> {
    if link == NIL {
        None
    } else {
        Some(PhysicalAddress::new(link))
    }
}

unsafe fn read_link<M: PhysMapper>(mapper: &M, page: PhysicalAddress) -> u64 {
    let node = unsafe { mapper.phys_to_ptr(page) }.cast::<FreePage>();
    unsafe { ptr::read(node) }.next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::PAGE_SIZE;
    use core::cell::UnsafeCell;

    #[repr(C, align(4096))]
    struct Frame([u8; PAGE_SIZE]);

    /// Three pages of host memory posing as physical pages 0, 1 and 2.
    struct Arena(UnsafeCell<[Frame; 3]>);

    impl Arena {
        fn new() -> Self {
            Self(UnsafeCell::new([
                Frame([0; PAGE_SIZE]),
                Frame([0; PAGE_SIZE]),
                Frame([0; PAGE_SIZE]),
            ]))
        }
    }

    impl PhysMapper for Arena {
        unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
            let offset = usize::try_from(pa.as_u64()).unwrap();
            assert!(offset < 3 * PAGE_SIZE);
            unsafe { self.0.get().cast::<u8>().add(offset) }
        }
    }

    fn page(i: u64) -> PhysicalAddress {
        PhysicalAddress::new(i * PAGE_SIZE as u64)
    }

    #[test]
    fn pops_in_reverse_push_order() {
        let arena = Arena::new();
        let mut list = FreeList::new();
        assert!(list.is_empty());

        unsafe {
            list.push(&arena, page(0));
            list.push(&arena, page(1));
            list.push(&arena, page(2));
        }
        assert_eq!(list.head(), Some(page(2)));

        unsafe {
            assert_eq!(list.pop(&arena), Some(page(2)));
            assert_eq!(list.pop(&arena), Some(page(1)));
            assert_eq!(list.pop(&arena), Some(page(0)));
            assert_eq!(list.pop(&arena), None);
        }
        assert!(list.is_empty());
    }

    #[test]
    fn page_zero_is_a_valid_node() {
        let arena = Arena::new();
        let mut list = FreeList::new();
        unsafe { list.push(&arena, page(0)) };
        assert!(!list.is_empty());
        assert_eq!(unsafe { list.next_of(&arena, page(0)) }, None);
        assert_eq!(unsafe { list.pop(&arena) }, Some(page(0)));
    }

    #[test]
    fn links_live_inside_the_pages() {
        let arena = Arena::new();
        let mut list = FreeList::new();
        unsafe {
            list.push(&arena, page(1));
            list.push(&arena, page(2));
        }

        let frames = unsafe { &*arena.0.get() };
        let link = u64::from_ne_bytes(frames[2].0[..8].try_into().unwrap());
        assert_eq!(link, page(1).as_u64());
        assert_eq!(unsafe { list.next_of(&arena, page(2)) }, Some(page(1)));
    }

    #[test]
    fn clear_forgets_pages() {
        let arena = Arena::new();
        let mut list = FreeList::new();
        unsafe { list.push(&arena, page(1)) };
        list.clear();
        assert_eq!(unsafe { list.pop(&arena) }, None);
    }
}
