use std::collections::BTreeSet;

use types::Address;

use crate::flags::Flag;
use crate::registers::Register;

/// Locations written by the most recently executed instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessStateDiff {
    pub memory: BTreeSet<Address>,
    pub registers: BTreeSet<Register>,
    pub flags: BTreeSet<Flag>,
}

impl ProcessStateDiff {
    pub fn clear(&mut self) {
        self.memory.clear();
        self.registers.clear();
        self.flags.clear();
    }

    pub fn record_memory(&mut self, address: Address, len: usize) {
        self.memory
            .extend((0..len as u64).map(|offset| address.wrapping_add(offset)));
    }

    pub fn record_register(&mut self, register: Register) {
        self.registers.insert(register);
    }

    pub fn record_flag(&mut self, flag: Flag) {
        self.flags.insert(flag);
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.registers.is_empty() && self.flags.is_empty()
    }
}
