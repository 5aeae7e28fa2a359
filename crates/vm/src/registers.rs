use std::fmt;
use std::str::FromStr;

use crate::error::SystemProcessException;

/// A named view onto the register file.
///
/// `X`/`W` are the 64- and 32-bit views of x0..x30; `Sp`/`Wsp` view the
/// stack pointer (slot 31); `Xzr`/`Wzr` read as zero and discard writes;
/// `Pc` is the instruction pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    X(u8),
    W(u8),
    Sp,
    Wsp,
    Xzr,
    Wzr,
    Pc,
}

pub const SP_SLOT: usize = 31;
pub const LINK_REGISTER: Register = Register::X(30);
pub const SYSCALL_NUMBER_REGISTER: Register = Register::X(16);
pub const SYSCALL_RESULT_REGISTER: Register = Register::X(0);

impl Register {
    /// Encoded register number `n`, treating 31 as the zero register.
    pub fn general(n: u8, sf: bool) -> Self {
        match (n, sf) {
            (31, true) => Register::Xzr,
            (31, false) => Register::Wzr,
            (n, true) => Register::X(n),
            (n, false) => Register::W(n),
        }
    }

    /// Encoded register number `n`, treating 31 as the stack pointer.
    pub fn general_or_sp(n: u8, sf: bool) -> Self {
        match (n, sf) {
            (31, true) => Register::Sp,
            (31, false) => Register::Wsp,
            _ => Self::general(n, sf),
        }
    }

    pub fn is_wide(self) -> bool {
        !matches!(self, Register::W(_) | Register::Wsp | Register::Wzr)
    }

    /// Slot in the 32-entry backing store, if the view has one.
    pub fn slot(self) -> Option<usize> {
        match self {
            Register::X(n) | Register::W(n) => Some(n as usize),
            Register::Sp | Register::Wsp => Some(SP_SLOT),
            Register::Xzr | Register::Wzr | Register::Pc => None,
        }
    }

    /// The 64-bit view sharing this view's storage.
    pub fn canonical(self) -> Self {
        match self {
            Register::W(n) => Register::X(n),
            Register::Wsp => Register::Sp,
            Register::Wzr => Register::Xzr,
            other => other,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::X(n) => write!(f, "x{}", n),
            Register::W(n) => write!(f, "w{}", n),
            Register::Sp => write!(f, "sp"),
            Register::Wsp => write!(f, "wsp"),
            Register::Xzr => write!(f, "xzr"),
            Register::Wzr => write!(f, "wzr"),
            Register::Pc => write!(f, "pc"),
        }
    }
}

impl FromStr for Register {
    type Err = SystemProcessException;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let lower = name.trim().to_ascii_lowercase();
        match lower.as_str() {
            "sp" => return Ok(Register::Sp),
            "wsp" => return Ok(Register::Wsp),
            "xzr" => return Ok(Register::Xzr),
            "wzr" => return Ok(Register::Wzr),
            "pc" => return Ok(Register::Pc),
            "lr" => return Ok(Register::X(30)),
            "fp" => return Ok(Register::X(29)),
            _ => {}
        }
        let (wide, digits) = match lower.split_at_checked(1) {
            Some(("x", rest)) => (true, rest),
            Some(("w", rest)) => (false, rest),
            _ => return Err(SystemProcessException::UnknownRegister(name.to_string())),
        };
        let index: u32 = digits
            .parse()
            .map_err(|_| SystemProcessException::UnknownRegister(name.to_string()))?;
        if index > 30 {
            return Err(SystemProcessException::MissingRegister(name.to_string()));
        }
        Ok(if wide {
            Register::X(index as u8)
        } else {
            Register::W(index as u8)
        })
    }
}

const LOW_WORD: u64 = 0xFFFF_FFFF;

/// x0..x30 plus the stack pointer, each stored as 64 bits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterFile {
    slots: [u64; 32],
}

impl RegisterFile {
    pub fn read(&self, register: Register) -> u64 {
        match register.slot() {
            Some(slot) if register.is_wide() => self.slots[slot],
            Some(slot) => self.slots[slot] & LOW_WORD,
            None => 0,
        }
    }

    /// Store `value` through `register`. Returns the 64-bit view that was
    /// modified, or `None` for the zero registers and `Pc`.
    ///
    /// A 32-bit view keeps the upper half of the slot and replaces the lower
    /// half with the truncated value. This deliberately differs from the
    /// architectural zero-extension.
    pub fn write(&mut self, register: Register, value: u64) -> Option<Register> {
        let slot = register.slot()?;
        if register.is_wide() {
            self.slots[slot] = value;
        } else {
            self.slots[slot] = (self.slots[slot] & !LOW_WORD) | (value & LOW_WORD);
        }
        Some(register.canonical())
    }

    pub fn slots(&self) -> &[u64; 32] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_views() {
        assert_eq!("x0".parse::<Register>().unwrap(), Register::X(0));
        assert_eq!("W30".parse::<Register>().unwrap(), Register::W(30));
        assert_eq!("sp".parse::<Register>().unwrap(), Register::Sp);
        assert_eq!("lr".parse::<Register>().unwrap(), Register::X(30));
        assert!(matches!(
            "x31".parse::<Register>(),
            Err(SystemProcessException::MissingRegister(_))
        ));
        assert!(matches!(
            "q0".parse::<Register>(),
            Err(SystemProcessException::UnknownRegister(_))
        ));
        assert!(matches!(
            "xa".parse::<Register>(),
            Err(SystemProcessException::UnknownRegister(_))
        ));
    }

    #[test]
    fn narrow_write_keeps_upper_half() {
        let mut file = RegisterFile::default();
        file.write(Register::X(3), 0xAAAA_BBBB_CCCC_DDDD);
        assert_eq!(file.write(Register::W(3), 0x1234_5678_0000_0001), Some(Register::X(3)));
        assert_eq!(file.read(Register::X(3)), 0xAAAA_BBBB_0000_0001);
        assert_eq!(file.read(Register::W(3)), 0x0000_0001);
    }

    #[test]
    fn zero_register_discards_writes() {
        let mut file = RegisterFile::default();
        assert_eq!(file.write(Register::Xzr, 7), None);
        assert_eq!(file.read(Register::Xzr), 0);
        file.write(Register::Sp, 0x8000);
        assert_eq!(file.read(Register::general_or_sp(31, true)), 0x8000);
        assert_eq!(file.read(Register::general(31, true)), 0);
    }
}
