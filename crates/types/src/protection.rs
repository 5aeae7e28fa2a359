use bitflags::bitflags;

bitflags! {
    /// Segment and page protection. Bit values match the Mach-O `vm_prot_t`
    /// encoding used by `initprot`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Protection: u32 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

impl Protection {
    pub const fn rw() -> Self {
        Self::READ.union(Self::WRITE)
    }

    pub const fn rx() -> Self {
        Self::READ.union(Self::EXECUTE)
    }

    pub const fn rwx() -> Self {
        Self::all()
    }

    /// Decode the low three bits of a raw `initprot` field; other bits are ignored.
    pub const fn from_vm_prot(raw: u32) -> Self {
        Self::from_bits_truncate(raw & 0b111)
    }

    pub fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_execute(self) -> bool {
        self.contains(Self::EXECUTE)
    }
}

impl core::fmt::Display for Protection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let r = if self.can_read() { 'r' } else { '-' };
        let w = if self.can_write() { 'w' } else { '-' };
        let x = if self.can_execute() { 'x' } else { '-' };
        write!(f, "{}{}{}", r, w, x)
    }
}
