//! Kernel side of the syscall trap. Each `sys_*` services one
//! `KernelSubroutine` against the calling process.

use std::sync::{Arc, RwLock};

use types::{Address, Pid};
use vm::flags::Flag;
use vm::{KernelDelegate, KernelSubroutine, Process, ProcessControl, SystemInterrupt, SystemProcessException};

use crate::error::poisoned;
use crate::events::{EventBus, KernelEvent};
use crate::mailbox::Mailbox;
use crate::shell::{Shell, ShellSession, Terminal};
use crate::users::UserRegistry;

const STDIN: u64 = 0;
const STDOUT: u64 = 1;

/// Shared standard I/O plus an event bus for observers.
#[derive(Debug, Default)]
pub struct StandardIo {
    pub stdin: Mailbox,
    pub stdout: Mailbox,
    pub events: EventBus,
}

impl StandardIo {
    pub fn write_stdout(&self, pid: Pid, bytes: &[u8]) -> Result<(), SystemProcessException> {
        self.stdout.push(bytes)?;
        self.events.publish(KernelEvent::Stdout {
            pid,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }
}

/// The kernel delegate attached to every spawned process.
#[derive(Debug)]
pub struct KernelServices {
    shell_path: String,
    shell: Shell,
    users: Arc<RwLock<UserRegistry>>,
    io: Arc<StandardIo>,
}

impl KernelServices {
    pub fn new(shell_path: String, shell: Shell, users: Arc<RwLock<UserRegistry>>, io: Arc<StandardIo>) -> Self {
        Self {
            shell_path,
            shell,
            users,
            io,
        }
    }

    fn sys_exit(&self, process: &mut Process, code: i32) -> Result<u64, SystemProcessException> {
        log::info!("[pid {}] exit({})", process.pid, code);
        self.io.events.publish(KernelEvent::Exit {
            pid: process.pid,
            code,
        });
        Err(SystemInterrupt::ProcessExit { code }.into())
    }

    fn sys_write(&self, process: &mut Process, fd: u64, buf: Address, count: u64) -> Result<u64, SystemProcessException> {
        if fd != STDOUT {
            return Err(SystemProcessException::InvalidDescriptor(fd));
        }
        let len = usize::try_from(count)
            .map_err(|_| SystemProcessException::ValueConversionError(format!("write count {}", count)))?;
        let bytes = process.read_bytes(buf, len)?;
        self.io.write_stdout(process.pid, &bytes)?;
        Ok(count)
    }

    /// Waits for one chunk of input regardless of the requested count, writes
    /// it NUL-terminated to `buf` and returns the chunk length.
    fn sys_read(&self, process: &mut Process, fd: u64, buf: Address) -> Result<u64, SystemProcessException> {
        if fd != STDIN {
            return Err(SystemProcessException::InvalidDescriptor(fd));
        }
        let control = process.control();
        let mut chunk = self.io.stdin.take_blocking(&control)?;
        let len = chunk.len() as u64;
        chunk.push(0);
        process.write_bytes(buf, &chunk)?;
        Ok(len)
    }

    fn sys_execve(&self, process: &mut Process, path: Address) -> Result<u64, SystemProcessException> {
        let path = process.read_c_string(path)?;
        if path != self.shell_path {
            return Err(SystemProcessException::FileNotExists(path));
        }
        let known = self.users.read().map_err(|_| poisoned("user registry"))?.contains_uid(process.owner);
        if !known {
            return Err(SystemProcessException::PermissionDenied);
        }
        log::info!("[pid {}] execve({}) as uid {}", process.pid, path, process.owner);
        let terminal = ProcessTerminal {
            pid: process.pid,
            control: process.control(),
            io: &self.io,
        };
        let session = ShellSession {
            uid: process.owner,
            users: Arc::clone(&self.users),
        };
        let status = self.shell.run(&terminal, &session)?;
        Ok(status as i64 as u64)
    }

    fn sys_get_uid_for_name(&self, process: &mut Process, name: Address) -> Result<u64, SystemProcessException> {
        let name = process.read_c_string(name)?;
        let uid = self.users.read().map_err(|_| poisoned("user registry"))?.uid_for_name(&name);
        process.set_flag(Flag::Carry, uid.is_none());
        Ok(uid.map_or(u64::MAX, u64::from))
    }

    fn sys_uid_belongs_to_gid(&self, uid: u64, gid: u64) -> Result<u64, SystemProcessException> {
        let (Ok(uid), Ok(gid)) = (u32::try_from(uid), u32::try_from(gid)) else {
            return Ok(0);
        };
        let users = self.users.read().map_err(|_| poisoned("user registry"))?;
        Ok(users.uid_belongs_to_gid(uid, gid) as u64)
    }
}

impl KernelDelegate for KernelServices {
    fn dispatch(&self, process: &mut Process, request: KernelSubroutine) -> Result<u64, SystemProcessException> {
        self.io.events.publish(KernelEvent::Subroutine {
            pid: process.pid,
            request: request.clone(),
        });
        match request {
            KernelSubroutine::Exit { code } => self.sys_exit(process, code),
            KernelSubroutine::Write { fd, buf, count } => self.sys_write(process, fd, buf, count),
            KernelSubroutine::Read { fd, buf, .. } => self.sys_read(process, fd, buf),
            KernelSubroutine::Execve { path } => self.sys_execve(process, path),
            KernelSubroutine::GetUidForName { name } => self.sys_get_uid_for_name(process, name),
            KernelSubroutine::UidBelongsToGid { uid, gid } => self.sys_uid_belongs_to_gid(uid, gid),
        }
    }
}

/// The shared standard I/O bound to one process's kill flag.
struct ProcessTerminal<'a> {
    pid: Pid,
    control: Arc<ProcessControl>,
    io: &'a StandardIo,
}

impl Terminal for ProcessTerminal<'_> {
    fn read_chunk(&self) -> Result<Vec<u8>, SystemProcessException> {
        self.io.stdin.take_blocking(&self.control)
    }

    fn write(&self, bytes: &[u8]) -> Result<(), SystemProcessException> {
        self.io.write_stdout(self.pid, bytes)
    }
}
