use types::{Address, Protection};

/// A named, protection-tagged address range mapped into a [`VirtualMemory`].
///
/// [`VirtualMemory`]: super::VirtualMemory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub start: Address,
    pub size: u64,
    pub protection: Protection,
}

impl Segment {
    pub fn new(name: impl Into<String>, start: Address, size: u64, protection: Protection) -> Self {
        Self {
            name: name.into(),
            start,
            size,
            protection,
        }
    }

    /// Exclusive end address, or `None` if the range wraps the address space.
    pub fn end(&self) -> Option<Address> {
        self.start.checked_add(self.size)
    }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && address - self.start < self.size
    }

    pub fn overlaps(&self, other: &Segment) -> bool {
        match (self.end(), other.end()) {
            (Some(a_end), Some(b_end)) => self.start < b_end && other.start < a_end,
            _ => true,
        }
    }
}
