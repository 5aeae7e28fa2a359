use std::fmt;
use std::str::FromStr;

use crate::error::SystemProcessException;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    Negative,
    Zero,
    Carry,
    Overflow,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::Negative, Flag::Zero, Flag::Carry, Flag::Overflow];
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flag::Negative => "n",
            Flag::Zero => "z",
            Flag::Carry => "c",
            Flag::Overflow => "v",
        };
        f.write_str(name)
    }
}

impl FromStr for Flag {
    type Err = SystemProcessException;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "n" | "negative" => Ok(Flag::Negative),
            "z" | "zero" => Ok(Flag::Zero),
            "c" | "carry" => Ok(Flag::Carry),
            "v" | "overflow" => Ok(Flag::Overflow),
            _ => Err(SystemProcessException::MissingFlag(name.to_string())),
        }
    }
}

/// NZCV condition flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConditionFlags {
    pub negative: bool,
    pub zero: bool,
    pub carry: bool,
    pub overflow: bool,
}

impl ConditionFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Negative => self.negative,
            Flag::Zero => self.zero,
            Flag::Carry => self.carry,
            Flag::Overflow => self.overflow,
        }
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Negative => self.negative = value,
            Flag::Zero => self.zero = value,
            Flag::Carry => self.carry = value,
            Flag::Overflow => self.overflow = value,
        }
    }
}
