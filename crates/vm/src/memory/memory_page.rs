use std::collections::BTreeMap;

use types::{Address, Layout, Protection};

/// Heap allocations are rounded to this granularity.
pub const BLOCK_ALIGN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapBlock {
    pub size: usize,
    pub allocated: bool,
}

/// One materialized 4 KiB page.
///
/// Besides its bytes a page carries the sub-page allocation records of the
/// heap, keyed by offset. Freed records are kept as free entries and never
/// merged with their neighbours.
#[derive(Clone)]
pub struct MemoryPage {
    start: Address,
    protection: Protection,
    data: Box<[u8]>,
    blocks: BTreeMap<usize, HeapBlock>,
}

impl std::fmt::Debug for MemoryPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPage")
            .field("start", &format_args!("0x{:016x}", self.start))
            .field("protection", &self.protection)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

impl MemoryPage {
    pub fn new(start: Address, protection: Protection) -> Self {
        Self {
            start,
            protection,
            data: vec![0u8; Layout::PAGE_SIZE].into_boxed_slice(),
            blocks: BTreeMap::new(),
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn bytes(&self, offset: usize, count: usize) -> &[u8] {
        &self.data[offset..offset + count]
    }

    pub fn bytes_mut(&mut self, offset: usize, count: usize) -> &mut [u8] {
        &mut self.data[offset..offset + count]
    }

    pub fn blocks(&self) -> impl Iterator<Item = (usize, &HeapBlock)> {
        self.blocks.iter().map(|(offset, block)| (*offset, block))
    }

    /// Size of the live block starting at `offset`, if any.
    pub fn allocated_size(&self, offset: usize) -> Option<usize> {
        self.blocks
            .get(&offset)
            .filter(|block| block.allocated)
            .map(|block| block.size)
    }

    /// First offset able to hold `size` bytes: either a single free entry
    /// that is large enough or untracked space between/after entries.
    pub fn find_gap(&self, size: usize) -> Option<usize> {
        let size = round_block(size)?;
        let mut cursor = 0usize;
        for (&offset, block) in &self.blocks {
            if offset >= cursor && offset - cursor >= size {
                return Some(cursor);
            }
            if !block.allocated && block.size >= size {
                return Some(offset);
            }
            cursor = align_block(offset + block.size);
        }
        if cursor <= Layout::PAGE_SIZE && Layout::PAGE_SIZE - cursor >= size {
            Some(cursor)
        } else {
            None
        }
    }

    /// Record an allocation of `size` bytes at `offset`, which must come from
    /// [`MemoryPage::find_gap`].
    pub fn allocate(&mut self, offset: usize, size: usize) {
        let size = match round_block(size) {
            Some(size) => size,
            None => return,
        };
        if let Some(free) = self.blocks.get(&offset).copied() {
            if free.size > size {
                self.blocks.insert(
                    offset + size,
                    HeapBlock {
                        size: free.size - size,
                        allocated: false,
                    },
                );
            }
        }
        self.blocks.insert(
            offset,
            HeapBlock {
                size,
                allocated: true,
            },
        );
    }

    /// Reserve `[offset, offset + size)` exactly. Returns `false` if any live
    /// block overlaps the range. Free entries inside the range are trimmed.
    pub fn reserve(&mut self, offset: usize, size: usize) -> bool {
        let Some(size) = round_block(size) else {
            return false;
        };
        let end = offset + size;
        if end > Layout::PAGE_SIZE {
            return false;
        }
        let overlapping: Vec<(usize, HeapBlock)> = self
            .blocks
            .iter()
            .filter(|(start, block)| **start < end && offset < **start + block.size)
            .map(|(start, block)| (*start, *block))
            .collect();
        if overlapping.iter().any(|(_, block)| block.allocated) {
            return false;
        }
        for (start, block) in overlapping {
            self.blocks.remove(&start);
            if start < offset {
                self.blocks.insert(
                    start,
                    HeapBlock {
                        size: offset - start,
                        allocated: false,
                    },
                );
            }
            let block_end = start + block.size;
            if block_end > end {
                self.blocks.insert(
                    end,
                    HeapBlock {
                        size: block_end - end,
                        allocated: false,
                    },
                );
            }
        }
        self.blocks.insert(
            offset,
            HeapBlock {
                size,
                allocated: true,
            },
        );
        true
    }

    /// Mark the live block at `offset` as free. Returns its size.
    pub fn release(&mut self, offset: usize) -> Option<usize> {
        let block = self.blocks.get_mut(&offset)?;
        if !block.allocated {
            return None;
        }
        block.allocated = false;
        Some(block.size)
    }
}

fn round_block(size: usize) -> Option<usize> {
    if size == 0 || size > Layout::PAGE_SIZE {
        return None;
    }
    Some(align_block(size))
}

fn align_block(value: usize) -> usize {
    (value + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> MemoryPage {
        MemoryPage::new(0x1000, Protection::rw())
    }

    #[test]
    fn gaps_are_first_fit() {
        let mut page = page();
        let a = page.find_gap(16).unwrap();
        page.allocate(a, 16);
        let b = page.find_gap(16).unwrap();
        page.allocate(b, 16);
        assert_eq!((a, b), (0, 16));
    }

    #[test]
    fn freed_neighbours_are_not_merged() {
        let mut page = page();
        for _ in 0..3 {
            let off = page.find_gap(16).unwrap();
            page.allocate(off, 16);
        }
        page.release(0).unwrap();
        page.release(16).unwrap();
        // 32 bytes do not fit in either 16-byte free entry, so the request
        // lands after the last block.
        assert_eq!(page.find_gap(32), Some(48));
        // A 16-byte request reuses the first free entry.
        assert_eq!(page.find_gap(16), Some(0));
    }

    #[test]
    fn oversized_requests_have_no_gap() {
        let page = page();
        assert_eq!(page.find_gap(0), None);
        assert_eq!(page.find_gap(Layout::PAGE_SIZE + 1), None);
        assert_eq!(page.find_gap(Layout::PAGE_SIZE), Some(0));
    }

    #[test]
    fn reserve_splits_free_entries() {
        let mut page = page();
        let off = page.find_gap(64).unwrap();
        page.allocate(off, 64);
        page.release(off);
        assert!(page.reserve(16, 16));
        let blocks: Vec<_> = page.blocks().map(|(o, b)| (o, b.size, b.allocated)).collect();
        assert_eq!(blocks, vec![(0, 16, false), (16, 16, true), (32, 32, false)]);
        assert!(!page.reserve(24, 8));
    }
}
