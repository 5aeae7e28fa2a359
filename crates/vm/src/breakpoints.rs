use std::collections::BTreeMap;

use types::Address;

/// Breakpoint addresses and whether each is currently armed.
///
/// A breakpoint disarms itself when hit so the halted instruction can be
/// stepped over on resume; the run loop re-arms it once that step completes.
#[derive(Clone, Debug, Default)]
pub struct Breakpoints {
    entries: BTreeMap<Address, bool>,
}

impl Breakpoints {
    pub fn set(&mut self, address: Address) {
        self.entries.insert(address, true);
    }

    pub fn clear(&mut self, address: Address) -> bool {
        self.entries.remove(&address).is_some()
    }

    pub fn is_armed(&self, address: Address) -> bool {
        self.entries.get(&address).copied().unwrap_or(false)
    }

    pub fn disarm(&mut self, address: Address) {
        if let Some(armed) = self.entries.get_mut(&address) {
            *armed = false;
        }
    }

    pub fn rearm(&mut self, address: Address) {
        if let Some(armed) = self.entries.get_mut(&address) {
            *armed = true;
        }
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.entries.keys().copied()
    }

    pub fn contains(&self, address: Address) -> bool {
        self.entries.contains_key(&address)
    }
}
