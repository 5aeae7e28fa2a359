use std::sync::{Condvar, Mutex};

use vm::{ProcessControl, SystemInterrupt, SystemProcessException};

use crate::error::poisoned;

/// Single-slot byte channel. Pushes append to whatever is buffered; a take
/// empties the slot.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<Vec<u8>>>,
    ready: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: &[u8]) -> Result<(), SystemProcessException> {
        let mut slot = self.slot.lock().map_err(|_| poisoned("mailbox"))?;
        slot.get_or_insert_with(Vec::new).extend_from_slice(bytes);
        self.ready.notify_all();
        Ok(())
    }

    /// Take the buffered bytes without waiting.
    pub fn take(&self) -> Result<Option<Vec<u8>>, SystemProcessException> {
        Ok(self.slot.lock().map_err(|_| poisoned("mailbox"))?.take())
    }

    /// Wait until bytes arrive or `control` asks the process to stop.
    pub fn take_blocking(&self, control: &ProcessControl) -> Result<Vec<u8>, SystemProcessException> {
        let mut slot = self.slot.lock().map_err(|_| poisoned("mailbox"))?;
        loop {
            if control.kill_requested() {
                return Err(SystemInterrupt::ProcessKill.into());
            }
            if let Some(bytes) = slot.take() {
                return Ok(bytes);
            }
            slot = self.ready.wait(slot).map_err(|_| poisoned("mailbox"))?;
        }
    }

    /// Wake every waiter so it re-checks its kill flag.
    pub fn interrupt(&self) {
        // Holding the lock orders the wakeup after any in-progress flag check.
        let _slot = self.slot.lock();
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn pushes_accumulate_until_taken() {
        let mailbox = Mailbox::new();
        mailbox.push(b"ab").unwrap();
        mailbox.push(b"cd").unwrap();
        assert_eq!(mailbox.take().unwrap(), Some(b"abcd".to_vec()));
        assert_eq!(mailbox.take().unwrap(), None);
    }

    #[test]
    fn blocking_take_waits_for_a_push() {
        let mailbox = Arc::new(Mailbox::new());
        let writer = Arc::clone(&mailbox);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.push(b"late").unwrap();
        });
        let control = ProcessControl::new();
        assert_eq!(mailbox.take_blocking(&control).unwrap(), b"late");
        handle.join().unwrap();
    }

    #[test]
    fn interrupt_releases_a_killed_waiter() {
        let mailbox = Arc::new(Mailbox::new());
        let control = Arc::new(ProcessControl::new());
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            let control = Arc::clone(&control);
            thread::spawn(move || mailbox.take_blocking(&control))
        };
        thread::sleep(Duration::from_millis(20));
        control.request_kill();
        mailbox.interrupt();
        assert_eq!(
            waiter.join().unwrap(),
            Err(SystemProcessException::SystemInterrupt(SystemInterrupt::ProcessKill))
        );
    }
}
