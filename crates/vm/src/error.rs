use thiserror::Error;
use types::Address;

/// Signals that stop the run loop without being a failure of the process.
///
/// A breakpoint hit is resumable; exit and kill end the process.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SystemInterrupt {
    #[error("breakpoint hit at 0x{address:016x}")]
    BreakpointHit {
        address: Address,
        last_executed_instruction: Option<Address>,
    },
    #[error("process exited with status {code}")]
    ProcessExit { code: i32 },
    #[error("process killed")]
    ProcessKill,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeExceptionKind {
    SegmentationFault { fault_address: Option<Address> },
    InvalidInstruction { word: u32 },
}

/// The only error shape handed to observers: what went wrong, at which
/// instruction, and which instruction completed last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("{kind:?} at 0x{address:016x}")]
pub struct RuntimeException {
    pub kind: RuntimeExceptionKind,
    pub address: Address,
    pub last_executed_instruction: Option<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SystemProcessException {
    #[error("process has no virtual memory")]
    NoVirtualMemory,
    #[error("value conversion failed: {0}")]
    ValueConversionError(String),
    #[error("unknown condition flag {0:?}")]
    MissingFlag(String),
    #[error("register {0:?} does not exist")]
    MissingRegister(String),
    #[error("unknown register {0:?}")]
    UnknownRegister(String),
    #[error("unknown syscall 0x{0:x}")]
    UnknownSyscall(u64),
    #[error("invalid file descriptor {0}")]
    InvalidDescriptor(u64),
    #[error("process failure: {0}")]
    ProcessFailure(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("{0}: no such file or directory")]
    FileNotExists(String),
    #[error("{0}")]
    SystemInterrupt(SystemInterrupt),
    #[error("runtime exception: {0}")]
    RuntimeException(RuntimeException),
}

impl SystemProcessException {
    /// Exit and kill are the expected ways a run ends.
    pub fn is_termination(&self) -> bool {
        matches!(
            self,
            SystemProcessException::SystemInterrupt(
                SystemInterrupt::ProcessExit { .. } | SystemInterrupt::ProcessKill
            )
        )
    }
}

impl From<SystemInterrupt> for SystemProcessException {
    fn from(interrupt: SystemInterrupt) -> Self {
        SystemProcessException::SystemInterrupt(interrupt)
    }
}

impl From<RuntimeException> for SystemProcessException {
    fn from(exception: RuntimeException) -> Self {
        SystemProcessException::RuntimeException(exception)
    }
}
