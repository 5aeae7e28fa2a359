use types::Address;

use crate::flags::{ConditionFlags, Flag};
use crate::registers::{Register, RegisterFile};

/// Architectural state of one hardware thread.
///
/// EDUCATIONAL: the instruction pointer is kept apart from the general
/// register file, the same way ARM64 does not expose PC as a numbered
/// register. `Register::Pc` is accepted by `read`/`write` only so the
/// debugger can inspect and patch it by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cpu {
    /// Address of the next instruction to fetch.
    ///
    /// EDUCATIONAL: every instruction is 4 bytes, so the step loop adds 4
    /// unless a branch hands back a target.
    pub ip: Address,

    /// x0..x30 plus the stack pointer.
    ///
    /// EDUCATIONAL: encoding 31 names either SP or the zero register
    /// depending on the instruction; the zero register has no storage here.
    pub registers: RegisterFile,

    /// NZCV, written only by flag-setting instructions (and by the kernel,
    /// which reports lookup misses in carry).
    pub flags: ConditionFlags,
}

impl Cpu {
    pub fn new(entry_point: Address) -> Self {
        Self {
            ip: entry_point,
            ..Self::default()
        }
    }

    pub fn read(&self, register: Register) -> u64 {
        match register {
            Register::Pc => self.ip,
            other => self.registers.read(other),
        }
    }

    /// Returns the 64-bit view that actually changed storage, if any.
    pub fn write(&mut self, register: Register, value: u64) -> Option<Register> {
        match register {
            Register::Pc => {
                self.ip = value;
                Some(Register::Pc)
            }
            other => self.registers.write(other, value),
        }
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.flags.get(flag)
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.flags.set(flag, value);
    }

    /// Registers as a four-column table, followed by pc and NZCV.
    pub fn dump_registers(&self) -> String {
        let mut out = String::new();
        for (index, value) in self.registers.slots().iter().enumerate() {
            let name = if index == crate::registers::SP_SLOT {
                "sp".to_string()
            } else {
                format!("x{}", index)
            };
            out.push_str(&format!("{:>4}: 0x{:016x}", name, value));
            out.push(if index % 4 == 3 { '\n' } else { ' ' });
        }
        out.push_str(&format!(
            "  pc: 0x{:016x} nzcv: {}{}{}{}\n",
            self.ip,
            self.flags.negative as u8,
            self.flags.zero as u8,
            self.flags.carry as u8,
            self.flags.overflow as u8
        ));
        out
    }
}
