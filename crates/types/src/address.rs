use crate::layout::Layout;

/// A 64-bit virtual address.
pub type Address = u64;

/// Privilege level an access is performed with.
///
/// User accesses are confined to the user band. Kernel accesses may touch
/// the whole address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    User,
    Kernel,
}

impl AccessMode {
    pub fn contains(self, address: Address) -> bool {
        match self {
            AccessMode::User => address < Layout::USER_SPACE_END,
            AccessMode::Kernel => true,
        }
    }

    /// True if `[start, start + len)` lies entirely inside this mode's range.
    pub fn contains_range(self, start: Address, len: u64) -> bool {
        if len == 0 {
            return self.contains(start);
        }
        match start.checked_add(len - 1) {
            Some(last) => self.contains(start) && self.contains(last),
            None => false,
        }
    }

    pub fn is_kernel(self) -> bool {
        matches!(self, AccessMode::Kernel)
    }
}

/// Round `address` down to the start of its page.
pub const fn page_align_down(address: Address) -> Address {
    address & !(Layout::PAGE_SIZE as u64 - 1)
}

/// Round `value` up to the next page boundary, or `None` on overflow.
pub const fn page_align_up(value: u64) -> Option<u64> {
    let mask = Layout::PAGE_SIZE as u64 - 1;
    match value.checked_add(mask) {
        Some(v) => Some(v & !mask),
        None => None,
    }
}

pub const fn is_page_aligned(value: u64) -> bool {
    value & (Layout::PAGE_SIZE as u64 - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_range_excludes_kernel_band() {
        assert!(AccessMode::User.contains(0));
        assert!(AccessMode::User.contains(Layout::USER_SPACE_END - 1));
        assert!(!AccessMode::User.contains(Layout::USER_SPACE_END));
        assert!(!AccessMode::User.contains(Layout::KERNEL_SPACE_START));
        assert!(AccessMode::Kernel.contains(Layout::KERNEL_SPACE_START));
    }

    #[test]
    fn range_checks_last_byte() {
        let end = Layout::USER_SPACE_END;
        assert!(AccessMode::User.contains_range(end - 0x1000, 0x1000));
        assert!(!AccessMode::User.contains_range(end - 0x1000, 0x1001));
        assert!(!AccessMode::Kernel.contains_range(u64::MAX, 2));
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(page_align_down(0x1fff), 0x1000);
        assert_eq!(page_align_up(0x1001), Some(0x2000));
        assert_eq!(page_align_up(0x2000), Some(0x2000));
        assert_eq!(page_align_up(u64::MAX), None);
        assert!(is_page_aligned(0x10000000));
    }
}
