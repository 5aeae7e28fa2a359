use std::fmt::Debug;

use types::Address;

use crate::error::SystemProcessException;
use crate::process::Process;

/// Syscall numbers, passed in x16.
pub const SYS_EXIT: u64 = 0x2001;
pub const SYS_READ: u64 = 0x2002;
pub const SYS_WRITE: u64 = 0x2004;
pub const SYS_EXECVE: u64 = 0x203b;
pub const SYS_GET_UID_FOR_NAME: u64 = 0x5001;
pub const SYS_UID_BELONGS_TO_GID: u64 = 0x5002;

/// Number of argument registers (x0..x8) captured at the trap.
pub const SYSCALL_ARG_COUNT: usize = 9;

/// A trapped syscall with its raw arguments already picked out of the
/// argument registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelSubroutine {
    Exit { code: i32 },
    Write { fd: u64, buf: Address, count: u64 },
    /// `count` is carried for observers but not used to bound the read.
    Read { fd: u64, buf: Address, count: u64 },
    Execve { path: Address },
    GetUidForName { name: Address },
    UidBelongsToGid { uid: u64, gid: u64 },
}

impl KernelSubroutine {
    pub fn decode(number: u64, args: [u64; SYSCALL_ARG_COUNT]) -> Result<Self, SystemProcessException> {
        Ok(match number {
            SYS_EXIT => KernelSubroutine::Exit { code: args[0] as i32 },
            SYS_READ => KernelSubroutine::Read {
                fd: args[0],
                buf: args[1],
                count: args[2],
            },
            SYS_WRITE => KernelSubroutine::Write {
                fd: args[0],
                buf: args[1],
                count: args[2],
            },
            SYS_EXECVE => KernelSubroutine::Execve { path: args[0] },
            SYS_GET_UID_FOR_NAME => KernelSubroutine::GetUidForName { name: args[0] },
            SYS_UID_BELONGS_TO_GID => KernelSubroutine::UidBelongsToGid {
                uid: args[0],
                gid: args[1],
            },
            other => return Err(SystemProcessException::UnknownSyscall(other)),
        })
    }

    pub fn number(&self) -> u64 {
        match self {
            KernelSubroutine::Exit { .. } => SYS_EXIT,
            KernelSubroutine::Read { .. } => SYS_READ,
            KernelSubroutine::Write { .. } => SYS_WRITE,
            KernelSubroutine::Execve { .. } => SYS_EXECVE,
            KernelSubroutine::GetUidForName { .. } => SYS_GET_UID_FOR_NAME,
            KernelSubroutine::UidBelongsToGid { .. } => SYS_UID_BELONGS_TO_GID,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KernelSubroutine::Exit { .. } => "exit",
            KernelSubroutine::Read { .. } => "read",
            KernelSubroutine::Write { .. } => "write",
            KernelSubroutine::Execve { .. } => "execve",
            KernelSubroutine::GetUidForName { .. } => "getUidForName",
            KernelSubroutine::UidBelongsToGid { .. } => "uidBelongsToGid",
        }
    }
}

/// Services syscalls on behalf of a process.
///
/// EDUCATIONAL: the call is synchronous. A delegate that has to wait for
/// something external, like the next chunk of standard input, blocks the
/// calling execution thread right here, which is the one place the
/// instruction loop can stop mid-run. The returned value lands in x0.
pub trait KernelDelegate: Send + Sync + Debug {
    fn dispatch(&self, process: &mut Process, request: KernelSubroutine) -> Result<u64, SystemProcessException>;
}
