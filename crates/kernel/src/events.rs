use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use types::Pid;
use vm::{KernelSubroutine, SystemInterrupt, SystemProcessException};

/// Everything an observer can learn about running processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelEvent {
    /// Bytes a process wrote to standard output.
    Stdout { pid: Pid, bytes: Vec<u8> },
    /// A syscall was trapped, before it is serviced.
    Subroutine { pid: Pid, request: KernelSubroutine },
    Exit { pid: Pid, code: i32 },
    /// A run ended with a failure.
    RuntimeException { pid: Pid, error: SystemProcessException },
    /// A run ended with an interrupt (breakpoint, exit, kill).
    Interrupt { pid: Pid, interrupt: SystemInterrupt },
}

/// Fan-out of kernel events to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<KernelEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<KernelEvent> {
        let (sender, receiver) = channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(sender);
        }
        receiver
    }

    /// Deliver `event` to every live subscriber; dropped receivers are pruned.
    pub fn publish(&self, event: KernelEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }
}
