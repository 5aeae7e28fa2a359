//! Paged virtual memory for a single address space.
//!
//! Segments describe what may exist; pages are only materialized when an
//! address inside a segment is first written or executed. Reads of an
//! untouched page are served from a transient zero page without allocating.

mod memory_page;
mod segment;
mod virtual_memory;

use thiserror::Error;
use types::Address;

pub use memory_page::{HeapBlock, MemoryPage, BLOCK_ALIGN};
pub use segment::Segment;
pub use virtual_memory::VirtualMemory;

pub use types::{AccessMode, Layout, Protection};

pub const PAGE_SIZE: usize = Layout::PAGE_SIZE;

/// The permission an access needs from the page it touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl Access {
    pub fn permitted_by(self, protection: Protection) -> bool {
        match self {
            Access::Read => protection.can_read(),
            Access::Write => protection.can_write(),
            Access::Execute => protection.can_execute(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VirtualMemoryError {
    #[error("segmentation fault at 0x{0:016x}")]
    SegmentationFault(Address),
    #[error("page fault at 0x{0:016x}")]
    PageFault(Address),
    #[error("a segment named {0:?} is already mapped")]
    MemorySegmentNameCollision(String),
    #[error("0x{0:016x} is not a valid page address")]
    InvalidMemoryPageAddress(Address),
    #[error("free of 0x{0:016x}, which is not the start of an allocated block")]
    FreeNotAllocatedPointer(Address),
    #[error("realloc of 0x{0:016x}, which is not the start of an allocated block")]
    ReallocNotAllocatedPointer(Address),
    #[error("0x{0:016x} overlaps an allocated block")]
    AllocAlreadyAllocatedSpace(Address),
    #[error("no heap page has room for {0} bytes")]
    NotEnoughSpaceWithinPage(usize),
}

impl VirtualMemoryError {
    /// Faulting address, when the error carries one.
    pub fn fault_address(&self) -> Option<Address> {
        match self {
            VirtualMemoryError::SegmentationFault(address)
            | VirtualMemoryError::PageFault(address)
            | VirtualMemoryError::InvalidMemoryPageAddress(address) => Some(*address),
            _ => None,
        }
    }
}
