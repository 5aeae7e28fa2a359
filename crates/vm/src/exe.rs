use types::Address;

use crate::error::SystemProcessException;
use crate::flags::{ConditionFlags, Flag};
use crate::instruction::{Instruction, LogicalOp, MemWidth};
use crate::process::Process;
use crate::registers::{Register, LINK_REGISTER};

/// Where the instruction pointer goes after an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Next,
    Jump(Address),
}

/// Value mask for the 32-bit (`sf == false`) or 64-bit form.
fn width_mask(sf: bool) -> u64 {
    if sf {
        u64::MAX
    } else {
        0xFFFF_FFFF
    }
}

/// AArch64 AddWithCarry: returns the result and the NZCV it produces.
///
/// EDUCATIONAL: subtraction is `x + !y + 1`, which is why SUBS sets carry
/// when *no* borrow happened.
pub fn add_with_carry(x: u64, y: u64, carry_in: bool, sf: bool) -> (u64, ConditionFlags) {
    let mask = width_mask(sf);
    let bits = if sf { 64 } else { 32 };
    let (x, y) = (x & mask, y & mask);
    let wide = x as u128 + y as u128 + carry_in as u128;
    let result = (wide as u64) & mask;
    let sign = |value: u64| (value >> (bits - 1)) & 1 == 1;
    let flags = ConditionFlags {
        negative: sign(result),
        zero: result == 0,
        carry: wide > mask as u128,
        overflow: sign(x) == sign(y) && sign(result) != sign(x),
    };
    (result, flags)
}

impl Process {
    /// Reads register number `n`; 31 is the zero register unless `sp`.
    fn reg(&self, n: u8, sf: bool, sp: bool) -> u64 {
        let register = if sp {
            Register::general_or_sp(n, sf)
        } else {
            Register::general(n, sf)
        };
        self.register(register)
    }

    fn set_reg(&mut self, n: u8, sf: bool, sp: bool, value: u64) {
        let register = if sp {
            Register::general_or_sp(n, sf)
        } else {
            Register::general(n, sf)
        };
        self.set_register(register, value);
    }

    fn set_nzcv(&mut self, flags: ConditionFlags) {
        for flag in Flag::ALL {
            self.set_flag(flag, flags.get(flag));
        }
    }

    fn relative(&self, offset: i64) -> Address {
        self.cpu.ip.wrapping_add_signed(offset)
    }

    /// Executes a decoded instruction against this process.
    ///
    /// EDUCATIONAL PURPOSE: this is the execute phase. Register 31 means the
    /// stack pointer for the base of loads/stores and for the non-flag-setting
    /// add/sub immediate forms; everywhere else it reads as zero.
    pub(crate) fn execute(&mut self, instruction: Instruction) -> Result<Flow, SystemProcessException> {
        match instruction {
            Instruction::Movz { rd, imm16, shift, sf } => {
                self.set_reg(rd, sf, false, (imm16 as u64) << shift);
            }
            Instruction::Movn { rd, imm16, shift, sf } => {
                self.set_reg(rd, sf, false, !((imm16 as u64) << shift) & width_mask(sf));
            }
            Instruction::Movk { rd, imm16, shift, sf } => {
                let lane = 0xFFFFu64 << shift;
                let old = self.reg(rd, sf, false);
                self.set_reg(rd, sf, false, (old & !lane) | ((imm16 as u64) << shift));
            }

            Instruction::AddImm { rd, rn, imm12, shift12, sf, set_flags }
            | Instruction::SubImm { rd, rn, imm12, shift12, sf, set_flags } => {
                let sub = matches!(instruction, Instruction::SubImm { .. });
                let imm = (imm12 as u64) << if shift12 { 12 } else { 0 };
                let lhs = self.reg(rn, sf, true);
                let (result, flags) = if sub {
                    add_with_carry(lhs, !imm, true, sf)
                } else {
                    add_with_carry(lhs, imm, false, sf)
                };
                // ADDS/SUBS write xzr at 31 (CMP/CMN); the plain forms write sp.
                self.set_reg(rd, sf, !set_flags, result);
                if set_flags {
                    self.set_nzcv(flags);
                }
            }
            Instruction::AddReg { rd, rn, rm, lsl, sf, set_flags }
            | Instruction::SubReg { rd, rn, rm, lsl, sf, set_flags } => {
                let sub = matches!(instruction, Instruction::SubReg { .. });
                let lhs = self.reg(rn, sf, false);
                let rhs = (self.reg(rm, sf, false) << lsl) & width_mask(sf);
                let (result, flags) = if sub {
                    add_with_carry(lhs, !rhs, true, sf)
                } else {
                    add_with_carry(lhs, rhs, false, sf)
                };
                self.set_reg(rd, sf, false, result);
                if set_flags {
                    self.set_nzcv(flags);
                }
            }
            Instruction::Logical { op, rd, rn, rm, lsl, sf } => {
                let lhs = self.reg(rn, sf, false);
                let rhs = (self.reg(rm, sf, false) << lsl) & width_mask(sf);
                let result = match op {
                    LogicalOp::And | LogicalOp::Ands => lhs & rhs,
                    LogicalOp::Orr => lhs | rhs,
                    LogicalOp::Eor => lhs ^ rhs,
                } & width_mask(sf);
                self.set_reg(rd, sf, false, result);
                if op == LogicalOp::Ands {
                    let top = if sf { 63 } else { 31 };
                    self.set_nzcv(ConditionFlags {
                        negative: (result >> top) & 1 == 1,
                        zero: result == 0,
                        carry: false,
                        overflow: false,
                    });
                }
            }

            Instruction::Adr { rd, offset } => {
                let address = self.relative(offset);
                self.set_reg(rd, true, false, address);
            }

            Instruction::B { offset } => return Ok(Flow::Jump(self.relative(offset))),
            Instruction::Bl { offset } => {
                let target = self.relative(offset);
                let ret = self.relative(4);
                self.set_register(LINK_REGISTER, ret);
                return Ok(Flow::Jump(target));
            }
            Instruction::BCond { cond, offset } => {
                if cond.holds(&self.cpu.flags) {
                    return Ok(Flow::Jump(self.relative(offset)));
                }
            }
            Instruction::Cbz { rt, offset, sf } => {
                if self.reg(rt, sf, false) == 0 {
                    return Ok(Flow::Jump(self.relative(offset)));
                }
            }
            Instruction::Cbnz { rt, offset, sf } => {
                if self.reg(rt, sf, false) != 0 {
                    return Ok(Flow::Jump(self.relative(offset)));
                }
            }
            Instruction::Br { rn } | Instruction::Ret { rn } => {
                return Ok(Flow::Jump(self.reg(rn, true, false)));
            }
            Instruction::Blr { rn } => {
                // Read the target first: `blr x30` must jump to the old x30.
                let target = self.reg(rn, true, false);
                let ret = self.relative(4);
                self.set_register(LINK_REGISTER, ret);
                return Ok(Flow::Jump(target));
            }

            Instruction::Ldr { rt, rn, offset, width } => {
                let address = self.reg(rn, true, true).wrapping_add(offset);
                let bytes = self.read_bytes(address, width.bytes())?;
                let mut buffer = [0u8; 8];
                buffer[..bytes.len()].copy_from_slice(&bytes);
                let value = u64::from_le_bytes(buffer);
                self.set_reg(rt, width == MemWidth::Double, false, value);
            }
            Instruction::Str { rt, rn, offset, width } => {
                let address = self.reg(rn, true, true).wrapping_add(offset);
                let value = self.reg(rt, true, false);
                let bytes = value.to_le_bytes();
                self.write_bytes(address, &bytes[..width.bytes()])?;
            }

            // The immediate is ignored; x16 selects the call.
            Instruction::Svc { .. } => self.trap()?,
            Instruction::Nop => {}
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtraction_flags() {
        // 5 - 5: zero, carry (no borrow)
        let (result, flags) = add_with_carry(5, !5, true, true);
        assert_eq!(result, 0);
        assert!(flags.zero && flags.carry && !flags.negative && !flags.overflow);

        // 3 - 5 in 32 bits: negative, borrow
        let (result, flags) = add_with_carry(3, !5, true, false);
        assert_eq!(result, 0xFFFF_FFFE);
        assert!(flags.negative && !flags.carry && !flags.zero);
    }

    #[test]
    fn signed_overflow() {
        let (_, flags) = add_with_carry(i64::MAX as u64, 1, false, true);
        assert!(flags.overflow && flags.negative);
        let (_, flags) = add_with_carry(0x7FFF_FFFF, 1, false, false);
        assert!(flags.overflow);
    }
}
