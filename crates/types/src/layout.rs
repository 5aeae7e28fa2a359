/// Address-space layout of an emulated process.
pub struct Layout;

impl Layout {
    pub const PAGE_SIZE: usize = 4096;
    pub const PAGE_SHIFT: u32 = 12;

    /// User space is `[0, 2^47)`.
    pub const USER_SPACE_END: u64 = 1 << 47;
    /// Start of the reserved high kernel band.
    pub const KERNEL_SPACE_START: u64 = 0xFFFF_8000_0000_0000;

    /// Every instruction is one 32-bit word.
    pub const INSTRUCTION_SIZE: u64 = 4;

    /// Upper bound on NUL-terminated strings read out of guest memory.
    pub const MAX_C_STRING_LEN: usize = 4096;

    pub const STACK_SEGMENT: &'static str = "Stack";
    pub const HEAP_SEGMENT: &'static str = "Heap";
}
