use dyld::DynamicLinkerError;
use thiserror::Error;
use types::Pid;
use vm::memory::VirtualMemoryError;
use vm::SystemProcessException;

/// Errors returned by supervisor calls.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("no such process: {0}")]
    NoSuchProcess(Pid),
    #[error(transparent)]
    Process(#[from] SystemProcessException),
    #[error(transparent)]
    Memory(#[from] VirtualMemoryError),
    #[error(transparent)]
    Loader(#[from] DynamicLinkerError),
}

pub(crate) fn poisoned(what: &str) -> SystemProcessException {
    SystemProcessException::ProcessFailure(format!("{} lock poisoned", what))
}
