/// The typed form of the ARM64 instruction subset the sandbox executes.
///
/// Register fields hold the raw 5-bit register numbers from the encoding.
/// Whether 31 means the zero register or the stack pointer depends on the
/// instruction and is resolved at execution time. `sf` selects the 64-bit
/// (X) or 32-bit (W) form. Branch and ADR offsets are byte offsets relative
/// to the instruction's own address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Move wide with zero: rd = imm16 << shift
    Movz { rd: u8, imm16: u16, shift: u8, sf: bool },
    /// Move wide with NOT: rd = !(imm16 << shift)
    Movn { rd: u8, imm16: u16, shift: u8, sf: bool },
    /// Move wide with keep: replaces one 16-bit lane of rd
    Movk { rd: u8, imm16: u16, shift: u8, sf: bool },

    /// rd = rn + (imm12 << (shift12 ? 12 : 0)), optionally setting NZCV
    AddImm { rd: u8, rn: u8, imm12: u16, shift12: bool, sf: bool, set_flags: bool },
    /// rd = rn - (imm12 << (shift12 ? 12 : 0)), optionally setting NZCV
    SubImm { rd: u8, rn: u8, imm12: u16, shift12: bool, sf: bool, set_flags: bool },
    /// rd = rn + (rm << lsl)
    AddReg { rd: u8, rn: u8, rm: u8, lsl: u8, sf: bool, set_flags: bool },
    /// rd = rn - (rm << lsl)
    SubReg { rd: u8, rn: u8, rm: u8, lsl: u8, sf: bool, set_flags: bool },
    /// Bitwise rd = rn op (rm << lsl)
    Logical { op: LogicalOp, rd: u8, rn: u8, rm: u8, lsl: u8, sf: bool },

    /// rd = address of this instruction + offset
    Adr { rd: u8, offset: i64 },

    B { offset: i64 },
    /// Branch with link: x30 = next instruction
    Bl { offset: i64 },
    BCond { cond: Condition, offset: i64 },
    Cbz { rt: u8, offset: i64, sf: bool },
    Cbnz { rt: u8, offset: i64, sf: bool },
    Br { rn: u8 },
    Blr { rn: u8 },
    Ret { rn: u8 },

    /// Load rt from [rn + offset], zero-extending narrower widths
    Ldr { rt: u8, rn: u8, offset: u64, width: MemWidth },
    /// Store the low `width` bytes of rt to [rn + offset]
    Str { rt: u8, rn: u8, offset: u64, width: MemWidth },

    /// Supervisor call. The immediate is carried but ignored by the trap.
    Svc { imm16: u16 },
    Nop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Orr,
    Eor,
    /// AND that sets N and Z and clears C and V
    Ands,
}

/// Access width of a load or store. The discriminant is the `size` field of
/// the encoding, so the byte count is `1 << size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemWidth {
    Byte = 0,
    Half = 1,
    Word = 2,
    Double = 3,
}

impl MemWidth {
    pub fn bytes(self) -> usize {
        1 << (self as usize)
    }

    pub fn from_size(size: u32) -> Self {
        match size & 0b11 {
            0 => MemWidth::Byte,
            1 => MemWidth::Half,
            2 => MemWidth::Word,
            _ => MemWidth::Double,
        }
    }
}

/// Condition codes for `B.cond`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Eq = 0,
    Ne = 1,
    Cs = 2,
    Cc = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
    Al = 14,
    Nv = 15,
}

impl Condition {
    pub fn from_bits(bits: u32) -> Self {
        use Condition::*;
        const TABLE: [Condition; 16] = [Eq, Ne, Cs, Cc, Mi, Pl, Vs, Vc, Hi, Ls, Ge, Lt, Gt, Le, Al, Nv];
        TABLE[(bits & 0xF) as usize]
    }

    pub fn holds(self, flags: &crate::flags::ConditionFlags) -> bool {
        let (n, z, c, v) = (flags.negative, flags.zero, flags.carry, flags.overflow);
        match self {
            Condition::Eq => z,
            Condition::Ne => !z,
            Condition::Cs => c,
            Condition::Cc => !c,
            Condition::Mi => n,
            Condition::Pl => !n,
            Condition::Vs => v,
            Condition::Vc => !v,
            Condition::Hi => c && !z,
            Condition::Ls => !(c && !z),
            Condition::Ge => n == v,
            Condition::Lt => n != v,
            Condition::Gt => !z && n == v,
            Condition::Le => !(!z && n == v),
            Condition::Al | Condition::Nv => true,
        }
    }

    fn mnemonic(self) -> &'static str {
        const NAMES: [&str; 16] = [
            "eq", "ne", "cs", "cc", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le", "al", "nv",
        ];
        NAMES[self as usize]
    }
}

fn reg_name(n: u8, sf: bool, sp: bool) -> String {
    match (n, sf, sp) {
        (31, true, true) => "sp".to_string(),
        (31, false, true) => "wsp".to_string(),
        (31, true, false) => "xzr".to_string(),
        (31, false, false) => "wzr".to_string(),
        (n, true, _) => format!("x{}", n),
        (n, false, _) => format!("w{}", n),
    }
}

impl Instruction {
    /// Assembly-like rendering for traces and the debugger.
    pub fn pretty_print(&self) -> String {
        match *self {
            Instruction::Movz { rd, imm16, shift, sf } => {
                format!("movz {}, #0x{:x}, lsl #{}", reg_name(rd, sf, false), imm16, shift)
            }
            Instruction::Movn { rd, imm16, shift, sf } => {
                format!("movn {}, #0x{:x}, lsl #{}", reg_name(rd, sf, false), imm16, shift)
            }
            Instruction::Movk { rd, imm16, shift, sf } => {
                format!("movk {}, #0x{:x}, lsl #{}", reg_name(rd, sf, false), imm16, shift)
            }
            Instruction::AddImm { rd, rn, imm12, shift12, sf, set_flags } => format!(
                "{} {}, {}, #0x{:x}{}",
                if set_flags { "adds" } else { "add" },
                reg_name(rd, sf, !set_flags),
                reg_name(rn, sf, true),
                imm12,
                if shift12 { ", lsl #12" } else { "" }
            ),
            Instruction::SubImm { rd, rn, imm12, shift12, sf, set_flags } => format!(
                "{} {}, {}, #0x{:x}{}",
                if set_flags { "subs" } else { "sub" },
                reg_name(rd, sf, !set_flags),
                reg_name(rn, sf, true),
                imm12,
                if shift12 { ", lsl #12" } else { "" }
            ),
            Instruction::AddReg { rd, rn, rm, lsl, sf, set_flags } => format!(
                "{} {}, {}, {}, lsl #{}",
                if set_flags { "adds" } else { "add" },
                reg_name(rd, sf, false),
                reg_name(rn, sf, false),
                reg_name(rm, sf, false),
                lsl
            ),
            Instruction::SubReg { rd, rn, rm, lsl, sf, set_flags } => format!(
                "{} {}, {}, {}, lsl #{}",
                if set_flags { "subs" } else { "sub" },
                reg_name(rd, sf, false),
                reg_name(rn, sf, false),
                reg_name(rm, sf, false),
                lsl
            ),
            Instruction::Logical { op, rd, rn, rm, lsl, sf } => {
                let name = match op {
                    LogicalOp::And => "and",
                    LogicalOp::Orr => "orr",
                    LogicalOp::Eor => "eor",
                    LogicalOp::Ands => "ands",
                };
                format!(
                    "{} {}, {}, {}, lsl #{}",
                    name,
                    reg_name(rd, sf, false),
                    reg_name(rn, sf, false),
                    reg_name(rm, sf, false),
                    lsl
                )
            }
            Instruction::Adr { rd, offset } => format!("adr {}, #{}", reg_name(rd, true, false), offset),
            Instruction::B { offset } => format!("b #{}", offset),
            Instruction::Bl { offset } => format!("bl #{}", offset),
            Instruction::BCond { cond, offset } => format!("b.{} #{}", cond.mnemonic(), offset),
            Instruction::Cbz { rt, offset, sf } => format!("cbz {}, #{}", reg_name(rt, sf, false), offset),
            Instruction::Cbnz { rt, offset, sf } => format!("cbnz {}, #{}", reg_name(rt, sf, false), offset),
            Instruction::Br { rn } => format!("br {}", reg_name(rn, true, false)),
            Instruction::Blr { rn } => format!("blr {}", reg_name(rn, true, false)),
            Instruction::Ret { rn } => format!("ret {}", reg_name(rn, true, false)),
            Instruction::Ldr { rt, rn, offset, width } => format!(
                "{} {}, [{}, #{}]",
                mem_mnemonic("ldr", width),
                reg_name(rt, width == MemWidth::Double, false),
                reg_name(rn, true, true),
                offset
            ),
            Instruction::Str { rt, rn, offset, width } => format!(
                "{} {}, [{}, #{}]",
                mem_mnemonic("str", width),
                reg_name(rt, width == MemWidth::Double, false),
                reg_name(rn, true, true),
                offset
            ),
            Instruction::Svc { imm16 } => format!("svc #0x{:x}", imm16),
            Instruction::Nop => "nop".to_string(),
        }
    }
}

fn mem_mnemonic(base: &str, width: MemWidth) -> String {
    match width {
        MemWidth::Byte => format!("{}b", base),
        MemWidth::Half => format!("{}h", base),
        MemWidth::Word | MemWidth::Double => base.to_string(),
    }
}
