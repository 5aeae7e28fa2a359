use std::fmt::Debug;

use crate::instruction::{Condition, Instruction, LogicalOp, MemWidth};

/// Translates between 32-bit instruction words and typed instructions.
///
/// The engine only talks to this trait, so a process can be handed a
/// different instruction subset without touching the step loop.
pub trait Codec: Send + Sync + Debug {
    /// `None` means the word is outside the supported subset.
    fn decode(&self, word: u32) -> Option<Instruction>;
    fn encode(&self, instruction: &Instruction) -> u32;
}

/// Little-endian AArch64 subset: moves, add/sub, logical, branches,
/// unsigned-offset loads and stores, `svc`, `nop`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Arm64Codec;

const NOP: u32 = 0xD503_201F;

#[inline]
fn bits(word: u32, low: u32, len: u32) -> u32 {
    (word >> low) & ((1u32 << len) - 1)
}

#[inline]
fn reg(word: u32, low: u32) -> u8 {
    bits(word, low, 5) as u8
}

/// Sign-extend the low `width` bits of `value`.
fn sign_extend(value: u32, width: u32) -> i64 {
    let shift = 64 - width;
    ((value as i64) << shift) >> shift
}

/// Pack a byte offset into an immediate of `width` words.
fn pack_word_offset(offset: i64, width: u32) -> u32 {
    ((offset >> 2) as u32) & ((1u32 << width) - 1)
}

impl Codec for Arm64Codec {
    fn decode(&self, word: u32) -> Option<Instruction> {
        if word == NOP {
            return Some(Instruction::Nop);
        }
        let sf = bits(word, 31, 1) == 1;

        // Move wide immediate
        if word & 0x1F80_0000 == 0x1280_0000 {
            let hw = bits(word, 21, 2) as u8;
            if !sf && hw > 1 {
                return None;
            }
            let rd = reg(word, 0);
            let imm16 = bits(word, 5, 16) as u16;
            let shift = hw * 16;
            return match bits(word, 29, 2) {
                0 => Some(Instruction::Movn { rd, imm16, shift, sf }),
                2 => Some(Instruction::Movz { rd, imm16, shift, sf }),
                3 => Some(Instruction::Movk { rd, imm16, shift, sf }),
                _ => None,
            };
        }

        // Add/subtract immediate
        if word & 0x1F80_0000 == 0x1100_0000 {
            let rd = reg(word, 0);
            let rn = reg(word, 5);
            let imm12 = bits(word, 10, 12) as u16;
            let shift12 = bits(word, 22, 1) == 1;
            let set_flags = bits(word, 29, 1) == 1;
            return Some(if bits(word, 30, 1) == 1 {
                Instruction::SubImm { rd, rn, imm12, shift12, sf, set_flags }
            } else {
                Instruction::AddImm { rd, rn, imm12, shift12, sf, set_flags }
            });
        }

        // Add/subtract shifted register, LSL only
        if word & 0x1F20_0000 == 0x0B00_0000 {
            let lsl = bits(word, 10, 6) as u8;
            if bits(word, 22, 2) != 0 || (!sf && lsl >= 32) {
                return None;
            }
            let rd = reg(word, 0);
            let rn = reg(word, 5);
            let rm = reg(word, 16);
            let set_flags = bits(word, 29, 1) == 1;
            return Some(if bits(word, 30, 1) == 1 {
                Instruction::SubReg { rd, rn, rm, lsl, sf, set_flags }
            } else {
                Instruction::AddReg { rd, rn, rm, lsl, sf, set_flags }
            });
        }

        // Logical shifted register, LSL and no inversion
        if word & 0x1F00_0000 == 0x0A00_0000 {
            let lsl = bits(word, 10, 6) as u8;
            if bits(word, 21, 1) != 0 || bits(word, 22, 2) != 0 || (!sf && lsl >= 32) {
                return None;
            }
            let op = match bits(word, 29, 2) {
                0 => LogicalOp::And,
                1 => LogicalOp::Orr,
                2 => LogicalOp::Eor,
                _ => LogicalOp::Ands,
            };
            return Some(Instruction::Logical {
                op,
                rd: reg(word, 0),
                rn: reg(word, 5),
                rm: reg(word, 16),
                lsl,
                sf,
            });
        }

        if word & 0x9F00_0000 == 0x1000_0000 {
            let imm = (bits(word, 5, 19) << 2) | bits(word, 29, 2);
            return Some(Instruction::Adr {
                rd: reg(word, 0),
                offset: sign_extend(imm, 21),
            });
        }

        if word & 0x7C00_0000 == 0x1400_0000 {
            let offset = sign_extend(bits(word, 0, 26), 26) * 4;
            return Some(if sf {
                Instruction::Bl { offset }
            } else {
                Instruction::B { offset }
            });
        }

        if word & 0xFF00_0010 == 0x5400_0000 {
            return Some(Instruction::BCond {
                cond: Condition::from_bits(bits(word, 0, 4)),
                offset: sign_extend(bits(word, 5, 19), 19) * 4,
            });
        }

        if word & 0x7E00_0000 == 0x3400_0000 {
            let rt = reg(word, 0);
            let offset = sign_extend(bits(word, 5, 19), 19) * 4;
            return Some(if bits(word, 24, 1) == 1 {
                Instruction::Cbnz { rt, offset, sf }
            } else {
                Instruction::Cbz { rt, offset, sf }
            });
        }

        match word & 0xFFFF_FC1F {
            0xD61F_0000 => return Some(Instruction::Br { rn: reg(word, 5) }),
            0xD63F_0000 => return Some(Instruction::Blr { rn: reg(word, 5) }),
            0xD65F_0000 => return Some(Instruction::Ret { rn: reg(word, 5) }),
            _ => {}
        }

        // Load/store register, unsigned offset, general registers only
        if word & 0x3B00_0000 == 0x3900_0000 && bits(word, 26, 1) == 0 {
            let width = MemWidth::from_size(bits(word, 30, 2));
            let rt = reg(word, 0);
            let rn = reg(word, 5);
            let offset = (bits(word, 10, 12) as u64) << (width as u64);
            return match bits(word, 22, 2) {
                0 => Some(Instruction::Str { rt, rn, offset, width }),
                1 => Some(Instruction::Ldr { rt, rn, offset, width }),
                _ => None,
            };
        }

        if word & 0xFFE0_001F == 0xD400_0001 {
            return Some(Instruction::Svc {
                imm16: bits(word, 5, 16) as u16,
            });
        }

        None
    }

    fn encode(&self, instruction: &Instruction) -> u32 {
        let sf_bit = |sf: bool| (sf as u32) << 31;
        match *instruction {
            Instruction::Movn { rd, imm16, shift, sf } => {
                sf_bit(sf) | 0x1280_0000 | ((shift as u32 / 16) << 21) | ((imm16 as u32) << 5) | rd as u32
            }
            Instruction::Movz { rd, imm16, shift, sf } => {
                sf_bit(sf) | 0x5280_0000 | ((shift as u32 / 16) << 21) | ((imm16 as u32) << 5) | rd as u32
            }
            Instruction::Movk { rd, imm16, shift, sf } => {
                sf_bit(sf) | 0x7280_0000 | ((shift as u32 / 16) << 21) | ((imm16 as u32) << 5) | rd as u32
            }
            Instruction::AddImm { rd, rn, imm12, shift12, sf, set_flags } => {
                add_sub_imm(false, rd, rn, imm12, shift12, sf, set_flags)
            }
            Instruction::SubImm { rd, rn, imm12, shift12, sf, set_flags } => {
                add_sub_imm(true, rd, rn, imm12, shift12, sf, set_flags)
            }
            Instruction::AddReg { rd, rn, rm, lsl, sf, set_flags } => {
                add_sub_reg(false, rd, rn, rm, lsl, sf, set_flags)
            }
            Instruction::SubReg { rd, rn, rm, lsl, sf, set_flags } => {
                add_sub_reg(true, rd, rn, rm, lsl, sf, set_flags)
            }
            Instruction::Logical { op, rd, rn, rm, lsl, sf } => {
                let opc = match op {
                    LogicalOp::And => 0,
                    LogicalOp::Orr => 1,
                    LogicalOp::Eor => 2,
                    LogicalOp::Ands => 3,
                };
                sf_bit(sf)
                    | (opc << 29)
                    | 0x0A00_0000
                    | ((rm as u32) << 16)
                    | (((lsl & 0x3F) as u32) << 10)
                    | ((rn as u32) << 5)
                    | rd as u32
            }
            Instruction::Adr { rd, offset } => {
                let imm = (offset as u32) & 0x1F_FFFF;
                0x1000_0000 | ((imm & 0b11) << 29) | ((imm >> 2) << 5) | rd as u32
            }
            Instruction::B { offset } => 0x1400_0000 | pack_word_offset(offset, 26),
            Instruction::Bl { offset } => 0x9400_0000 | pack_word_offset(offset, 26),
            Instruction::BCond { cond, offset } => {
                0x5400_0000 | (pack_word_offset(offset, 19) << 5) | cond as u32
            }
            Instruction::Cbz { rt, offset, sf } => {
                sf_bit(sf) | 0x3400_0000 | (pack_word_offset(offset, 19) << 5) | rt as u32
            }
            Instruction::Cbnz { rt, offset, sf } => {
                sf_bit(sf) | 0x3500_0000 | (pack_word_offset(offset, 19) << 5) | rt as u32
            }
            Instruction::Br { rn } => 0xD61F_0000 | ((rn as u32) << 5),
            Instruction::Blr { rn } => 0xD63F_0000 | ((rn as u32) << 5),
            Instruction::Ret { rn } => 0xD65F_0000 | ((rn as u32) << 5),
            Instruction::Ldr { rt, rn, offset, width } => load_store(1, rt, rn, offset, width),
            Instruction::Str { rt, rn, offset, width } => load_store(0, rt, rn, offset, width),
            Instruction::Svc { imm16 } => 0xD400_0001 | ((imm16 as u32) << 5),
            Instruction::Nop => NOP,
        }
    }
}

fn add_sub_imm(sub: bool, rd: u8, rn: u8, imm12: u16, shift12: bool, sf: bool, set_flags: bool) -> u32 {
    ((sf as u32) << 31)
        | ((sub as u32) << 30)
        | ((set_flags as u32) << 29)
        | 0x1100_0000
        | ((shift12 as u32) << 22)
        | (((imm12 & 0xFFF) as u32) << 10)
        | ((rn as u32) << 5)
        | rd as u32
}

fn add_sub_reg(sub: bool, rd: u8, rn: u8, rm: u8, lsl: u8, sf: bool, set_flags: bool) -> u32 {
    ((sf as u32) << 31)
        | ((sub as u32) << 30)
        | ((set_flags as u32) << 29)
        | 0x0B00_0000
        | ((rm as u32) << 16)
        | (((lsl & 0x3F) as u32) << 10)
        | ((rn as u32) << 5)
        | rd as u32
}

fn load_store(opc: u32, rt: u8, rn: u8, offset: u64, width: MemWidth) -> u32 {
    let imm12 = ((offset >> (width as u64)) as u32) & 0xFFF;
    ((width as u32) << 30) | 0x3900_0000 | (opc << 22) | (imm12 << 10) | ((rn as u32) << 5) | rt as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_words() {
        let codec = Arm64Codec;
        assert_eq!(
            codec.decode(0xD280_0020),
            Some(Instruction::Movz { rd: 0, imm16: 1, shift: 0, sf: true })
        );
        assert_eq!(codec.decode(0xD400_1001), Some(Instruction::Svc { imm16: 0x80 }));
        assert_eq!(codec.decode(0xD65F_03C0), Some(Instruction::Ret { rn: 30 }));
        assert_eq!(
            codec.decode(0x9100_0421),
            Some(Instruction::AddImm { rd: 1, rn: 1, imm12: 1, shift12: false, sf: true, set_flags: false })
        );
        assert_eq!(
            codec.decode(0xF940_0420),
            Some(Instruction::Ldr { rt: 0, rn: 1, offset: 8, width: MemWidth::Double })
        );
        assert_eq!(
            codec.decode(0x5400_0040),
            Some(Instruction::BCond { cond: Condition::Eq, offset: 8 })
        );
        assert_eq!(codec.decode(0x97FF_FFFF), Some(Instruction::Bl { offset: -4 }));
        assert_eq!(codec.decode(0xD503_201F), Some(Instruction::Nop));
    }

    #[test]
    fn rejects_unsupported_words() {
        let codec = Arm64Codec;
        assert_eq!(codec.decode(0x0000_0000), None);
        assert_eq!(codec.decode(0xFFFF_FFFF), None);
        // ldrsw is outside the subset
        assert_eq!(codec.decode(0xB980_0020), None);
    }

    #[test]
    fn encodes_what_it_decodes() {
        let codec = Arm64Codec;
        let program = [
            Instruction::Movk { rd: 2, imm16: 0xBEEF, shift: 16, sf: true },
            Instruction::SubImm { rd: 0, rn: 0, imm12: 1, shift12: false, sf: true, set_flags: true },
            Instruction::Logical { op: LogicalOp::Eor, rd: 3, rn: 4, rm: 5, lsl: 2, sf: false },
            Instruction::Adr { rd: 1, offset: -12 },
            Instruction::Cbnz { rt: 7, offset: -8, sf: false },
            Instruction::Str { rt: 1, rn: 31, offset: 4, width: MemWidth::Word },
        ];
        for instruction in program {
            assert_eq!(codec.decode(codec.encode(&instruction)), Some(instruction));
        }
    }
}
