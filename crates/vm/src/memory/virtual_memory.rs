use std::collections::BTreeMap;

use types::address::{is_page_aligned, page_align_down};
use types::{AccessMode, Address, Layout, Protection};

use super::{Access, MemoryPage, Segment, VirtualMemoryError, PAGE_SIZE};

type Result<T> = std::result::Result<T, VirtualMemoryError>;

/// Segment table plus the sparse set of materialized pages, both keyed by
/// start address.
#[derive(Debug, Default, Clone)]
pub struct VirtualMemory {
    segments: BTreeMap<Address, Segment>,
    pages: BTreeMap<Address, MemoryPage>,
}

impl VirtualMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `segment` into the address space.
    ///
    /// User callers may only map inside the user band. Names are unique and
    /// ranges never overlap. Bounds must be page aligned.
    pub fn map(&mut self, segment: Segment, mode: AccessMode) -> Result<()> {
        if !is_page_aligned(segment.start) || !is_page_aligned(segment.size) || segment.size == 0 {
            return Err(VirtualMemoryError::InvalidMemoryPageAddress(segment.start));
        }
        if segment.end().is_none()
            || (!mode.is_kernel() && !AccessMode::User.contains_range(segment.start, segment.size))
        {
            return Err(VirtualMemoryError::SegmentationFault(segment.start));
        }
        if self.segment(&segment.name).is_some() {
            return Err(VirtualMemoryError::MemorySegmentNameCollision(segment.name));
        }
        if self.segments.values().any(|existing| existing.overlaps(&segment)) {
            return Err(VirtualMemoryError::SegmentationFault(segment.start));
        }
        log::debug!(
            "map {} 0x{:016x}..0x{:016x} {}",
            segment.name,
            segment.start,
            segment.start + segment.size,
            segment.protection
        );
        self.segments.insert(segment.start, segment);
        Ok(())
    }

    /// Detach the page that starts exactly at `page_address`.
    pub fn unmap(&mut self, page_address: Address) -> Result<MemoryPage> {
        self.pages
            .remove(&page_address)
            .ok_or(VirtualMemoryError::PageFault(page_address))
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.values().find(|segment| segment.name == name)
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    /// Segment whose range covers `address`.
    pub fn segment_at(&self, address: Address) -> Option<&Segment> {
        self.segments
            .range(..=address)
            .next_back()
            .map(|(_, segment)| segment)
            .filter(|segment| segment.contains(address))
    }

    pub fn page(&self, page_address: Address) -> Option<&MemoryPage> {
        self.pages.get(&page_address)
    }

    pub fn is_materialized(&self, address: Address) -> bool {
        self.pages.contains_key(&page_align_down(address))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Read `count` bytes at `address`. The range must stay within one page.
    pub fn read(&self, address: Address, count: usize, mode: AccessMode) -> Result<Vec<u8>> {
        let offset = self.check_access(address, count, mode)?;
        match self.pages.get(&page_align_down(address)) {
            Some(page) => {
                if !Access::Read.permitted_by(page.protection()) {
                    return Err(VirtualMemoryError::SegmentationFault(address));
                }
                Ok(page.bytes(offset, count).to_vec())
            }
            None => {
                let segment = self
                    .segment_at(address)
                    .ok_or(VirtualMemoryError::SegmentationFault(address))?;
                if !Access::Read.permitted_by(segment.protection) {
                    return Err(VirtualMemoryError::SegmentationFault(address));
                }
                // Untouched page: answer from a transient zero page.
                Ok(vec![0u8; count])
            }
        }
    }

    /// Write `bytes` at `address`. The range must stay within one page.
    pub fn write(&mut self, address: Address, bytes: &[u8], mode: AccessMode) -> Result<()> {
        let offset = self.check_access(address, bytes.len(), mode)?;
        let page = self.resolve(address, Access::Write)?;
        page.bytes_mut(offset, bytes.len()).copy_from_slice(bytes);
        Ok(())
    }

    /// Fetch the 4-byte instruction word at `address`.
    pub fn fetch(&mut self, address: Address, mode: AccessMode) -> Result<u32> {
        let size = Layout::INSTRUCTION_SIZE as usize;
        let offset = self.check_access(address, size, mode)?;
        let page = self.resolve(address, Access::Execute)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(page.bytes(offset, size));
        Ok(u32::from_le_bytes(word))
    }

    /// Copy `bytes` into mapped memory ignoring page protection. Used by the
    /// loader to fill read-only segments; may cross page boundaries.
    pub fn populate(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let mut written = 0usize;
        while written < bytes.len() {
            let cursor = address
                .checked_add(written as u64)
                .ok_or(VirtualMemoryError::SegmentationFault(address))?;
            let page_start = page_align_down(cursor);
            let offset = (cursor - page_start) as usize;
            let chunk = (PAGE_SIZE - offset).min(bytes.len() - written);
            let protection = self
                .segment_at(cursor)
                .map(|segment| segment.protection)
                .ok_or(VirtualMemoryError::SegmentationFault(cursor))?;
            let page = self
                .pages
                .entry(page_start)
                .or_insert_with(|| MemoryPage::new(page_start, protection));
            page.bytes_mut(offset, chunk)
                .copy_from_slice(&bytes[written..written + chunk]);
            written += chunk;
        }
        Ok(())
    }

    /// Allocate `size` bytes from the first page of the "Heap" segment that
    /// has a large enough gap. The heap never grows.
    pub fn alloc(&mut self, size: usize) -> Result<Address> {
        let heap = self
            .segment(Layout::HEAP_SEGMENT)
            .cloned()
            .ok_or(VirtualMemoryError::NotEnoughSpaceWithinPage(size))?;
        let mut page_start = heap.start;
        while heap.contains(page_start) {
            let page = self
                .pages
                .entry(page_start)
                .or_insert_with(|| MemoryPage::new(page_start, heap.protection));
            if let Some(offset) = page.find_gap(size) {
                page.allocate(offset, size);
                return Ok(page_start + offset as u64);
            }
            page_start += PAGE_SIZE as u64;
        }
        Err(VirtualMemoryError::NotEnoughSpaceWithinPage(size))
    }

    /// Allocate exactly `[address, address + size)` inside the heap.
    pub fn alloc_at(&mut self, address: Address, size: usize) -> Result<Address> {
        let heap = self
            .segment(Layout::HEAP_SEGMENT)
            .cloned()
            .filter(|heap| heap.contains(address))
            .ok_or(VirtualMemoryError::SegmentationFault(address))?;
        let page_start = page_align_down(address);
        let offset = (address - page_start) as usize;
        if size == 0 || offset + size > PAGE_SIZE {
            return Err(VirtualMemoryError::PageFault(address));
        }
        let page = self
            .pages
            .entry(page_start)
            .or_insert_with(|| MemoryPage::new(page_start, heap.protection));
        if page.reserve(offset, size) {
            Ok(address)
        } else {
            Err(VirtualMemoryError::AllocAlreadyAllocatedSpace(address))
        }
    }

    pub fn free(&mut self, address: Address) -> Result<()> {
        let page_start = page_align_down(address);
        self.pages
            .get_mut(&page_start)
            .and_then(|page| page.release((address - page_start) as usize))
            .map(|_| ())
            .ok_or(VirtualMemoryError::FreeNotAllocatedPointer(address))
    }

    /// Move the block at `address` into a new block of `size` bytes.
    pub fn realloc(&mut self, address: Address, size: usize) -> Result<Address> {
        let page_start = page_align_down(address);
        let offset = (address - page_start) as usize;
        let old_size = self
            .pages
            .get(&page_start)
            .and_then(|page| page.allocated_size(offset))
            .ok_or(VirtualMemoryError::ReallocNotAllocatedPointer(address))?;
        let contents = self
            .pages
            .get(&page_start)
            .map(|page| page.bytes(offset, old_size.min(size)).to_vec())
            .unwrap_or_default();
        let new_address = self.alloc(size)?;
        self.populate(new_address, &contents)?;
        self.free(address)?;
        Ok(new_address)
    }

    /// Validate mode and single-page span; returns the in-page offset.
    fn check_access(&self, address: Address, count: usize, mode: AccessMode) -> Result<usize> {
        if !mode.contains(address) {
            return Err(VirtualMemoryError::SegmentationFault(address));
        }
        let offset = (address - page_align_down(address)) as usize;
        if offset.checked_add(count).is_none_or(|end| end > PAGE_SIZE) {
            return Err(VirtualMemoryError::PageFault(address));
        }
        Ok(offset)
    }

    /// Page for a write or execute access, materializing it from its segment
    /// when needed. Nothing is created if the segment denies the access.
    fn resolve(&mut self, address: Address, access: Access) -> Result<&mut MemoryPage> {
        let page_start = page_align_down(address);
        if !self.pages.contains_key(&page_start) {
            let protection: Protection = self
                .segment_at(address)
                .map(|segment| segment.protection)
                .ok_or(VirtualMemoryError::SegmentationFault(address))?;
            if !access.permitted_by(protection) {
                return Err(VirtualMemoryError::SegmentationFault(address));
            }
            log::trace!("materialize page 0x{:016x} {}", page_start, protection);
            self.pages
                .insert(page_start, MemoryPage::new(page_start, protection));
        }
        let page = self
            .pages
            .get_mut(&page_start)
            .ok_or(VirtualMemoryError::PageFault(page_start))?;
        if !access.permitted_by(page.protection()) {
            return Err(VirtualMemoryError::SegmentationFault(address));
        }
        Ok(page)
    }
}
