//! # Kernel Physical Page Allocator
//!
//! Manages the 4 KiB physical pages between the end of the loaded kernel
//! image and the top of usable physical memory, and hands them out to the
//! rest of the kernel: page tables, kernel stacks, pipe buffers. Each page
//! carries a reference count so that several owners can share it, e.g. for
//! copy-on-write.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  PageAllocator                      │
//! │    • allocate / release / adjust_reference_count    │
//! │    • one `kmem` lock around all state               │
//! └─────────────────┬──────────────────┬────────────────┘
//!                   │                  │
//! ┌─────────────────▼───────┐  ┌───────▼────────────────┐
//! │     FreeList            │  │  reference counts      │
//! │  • intrusive LIFO stack │  │  • one u32 per page    │
//! │  • links inside pages   │  │  • lent by boot code   │
//! └─────────────────┬───────┘  └────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                  PhysMapper                         │
//! │    • physical address → writable pointer            │
//! │    • page fill (junk on free, zero on request)      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Managed range ([`range`])
//!
//! Turns the boot-provided `kernel_end` / `phys_top` bounds into the set of
//! full pages the allocator owns, and validates every page address passed in.
//!
//! ### Physical mapper ([`phys_mapper`])
//!
//! The allocator reuses free pages as list storage, so it must be able to
//! write to them. [`PhysMapper`] abstracts how physical memory is reached;
//! [`HhdmPhysMapper`] covers higher-half direct maps and identity mapping.
//!
//! ### Page allocator ([`page_alloc`])
//!
//! The allocator object itself. There is no global instance: the kernel
//! creates one at boot and passes `&PageAllocator` around.
//!
//! ## Usage Patterns
//!
//! ```rust,no_run
//! use kernel_page_alloc::{ManagedRange, PageAllocator, PhysicalAddress};
//! use kernel_page_alloc::phys_mapper::HhdmPhysMapper;
//!
//! static mut REF_COUNTS: [u32; 32 * 1024] = [0; 32 * 1024];
//!
//! # fn boot(kernel_end: u64, phys_top: u64) -> Result<(), kernel_page_alloc::RangeError> {
//! let range = ManagedRange::new(PhysicalAddress::new(kernel_end), PhysicalAddress::new(phys_top))?;
//! let pages = unsafe {
//!     PageAllocator::new(range, HhdmPhysMapper::default(), &mut *(&raw mut REF_COUNTS))?
//! };
//! pages.init();
//!
//! if let Some(stack) = pages.allocate_zeroed() {
//!     // Share the page, then drop both owners again.
//!     pages.adjust_reference_count(stack, true);
//!     pages.release(stack);
//!     pages.release(stack);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Model
//!
//! * **Contract violations** (misaligned or unmanaged addresses, reference
//!   count underflow) `panic!`; the kernel's panic handler halts.
//! * **Exhaustion** is reported as `None` from
//!   [`allocate`](PageAllocator::allocate).

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod addresses;
mod free_list;
pub mod page_alloc;
pub mod phys_mapper;
pub mod range;

pub use addresses::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
pub use page_alloc::{AuditError, JUNK_FILL, PageAllocator};
pub use phys_mapper::{HhdmPhysMapper, PhysMapper};
pub use range::{ManagedRange, PageAddressError, RangeError};
