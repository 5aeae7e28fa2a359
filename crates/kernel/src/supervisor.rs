use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};

use dyld::DynamicLinker;
use types::{Address, Pid, Uid};
use vm::flags::Flag;
use vm::{Halt, Process, ProcessControl, ProcessState, ProcessStateDiff, Register, SystemProcessException};

use crate::config::KernelConfig;
use crate::error::{poisoned, KernelError};
use crate::events::{EventBus, KernelEvent};
use crate::shell::{BasicCommands, CommandHandler, Shell};
use crate::syscall::{KernelServices, StandardIo};
use crate::users::UserRegistry;

#[derive(Debug)]
struct Task {
    process: Arc<Mutex<Process>>,
    control: Arc<ProcessControl>,
}

/// Owns the process table, the user registry and the standard I/O shared by
/// every process. One instance per sandbox run.
///
/// Debugger calls lock the target process. While it is running on a worker
/// thread they wait until the run halts.
#[derive(Debug)]
pub struct Kernel {
    config: KernelConfig,
    linker: DynamicLinker,
    users: Arc<RwLock<UserRegistry>>,
    io: Arc<StandardIo>,
    services: Arc<KernelServices>,
    processes: BTreeMap<Pid, Task>,
    next_pid: Pid,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        Self::with_commands(config, Arc::new(BasicCommands))
    }

    /// Kernel whose shell delegates to `commands`.
    pub fn with_commands(config: KernelConfig, commands: Arc<dyn CommandHandler>) -> Self {
        let users = Arc::new(RwLock::new(UserRegistry::from_config(&config)));
        let io = Arc::new(StandardIo::default());
        let services = Arc::new(KernelServices::new(
            config.shell_path.clone(),
            Shell::new(commands),
            Arc::clone(&users),
            Arc::clone(&io),
        ));
        Self {
            linker: DynamicLinker::new(config.loader),
            config,
            users,
            io,
            services,
            processes: BTreeMap::new(),
            next_pid: 1,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn users(&self) -> Arc<RwLock<UserRegistry>> {
        Arc::clone(&self.users)
    }

    /// Load `binary` into a new process owned by `owner`.
    pub fn spawn_process(&mut self, binary: &[u8], owner: Uid) -> Result<Pid, KernelError> {
        let image = self.linker.load_binary(binary)?;
        let pid = self.next_pid;
        self.next_pid += 1;

        let mut process = Process::from_image(pid, owner, image);
        process.attach_kernel(self.services.clone());
        process.set_trace(self.config.trace_instructions);
        log::info!(
            "[pid {}] spawned for uid {} entry=0x{:x}",
            pid,
            owner,
            process.entry_point
        );
        let control = process.control();
        self.processes.insert(
            pid,
            Task {
                process: Arc::new(Mutex::new(process)),
                control,
            },
        );
        Ok(pid)
    }

    pub fn processes(&self) -> Vec<Pid> {
        self.processes.keys().copied().collect()
    }

    /// Run `pid` on the calling thread until it halts.
    pub fn run(&self, pid: Pid) -> Result<Halt, KernelError> {
        let process = Arc::clone(&self.task(pid)?.process);
        let mut process = lock(&process)?;
        Ok(drive(&self.io.events, &mut process)?)
    }

    /// Continue a process halted at a breakpoint.
    pub fn resume(&self, pid: Pid) -> Result<Halt, KernelError> {
        self.run(pid)
    }

    /// Run `pid` on a worker thread.
    pub fn start(&self, pid: Pid) -> Result<JoinHandle<Result<Halt, SystemProcessException>>, KernelError> {
        let process = Arc::clone(&self.task(pid)?.process);
        let io = Arc::clone(&self.io);
        log::info!("[pid {}] starting on worker thread", pid);
        Ok(thread::spawn(move || {
            let mut process = lock(&process)?;
            drive(&io.events, &mut process)
        }))
    }

    /// Ask `pid` to stop. A blocked `read` or shell wakes up and the run
    /// ends with `ProcessKill`.
    pub fn kill(&self, pid: Pid) -> Result<(), KernelError> {
        let task = self.task(pid)?;
        log::info!("[pid {}] kill requested", pid);
        task.control.request_kill();
        self.io.stdin.interrupt();
        Ok(())
    }

    /// Kill `pid` and drop it from the process table.
    pub fn remove_process(&mut self, pid: Pid) -> Result<(), KernelError> {
        self.kill(pid)?;
        self.processes.remove(&pid);
        Ok(())
    }

    pub fn process_state(&self, pid: Pid) -> Result<ProcessState, KernelError> {
        self.with_process(pid, |process| Ok(process.state()))
    }

    pub fn set_breakpoint(&self, pid: Pid, address: Address) -> Result<(), KernelError> {
        self.with_process(pid, |process| {
            process.set_breakpoint(address);
            Ok(())
        })
    }

    pub fn clear_breakpoint(&self, pid: Pid, address: Address) -> Result<bool, KernelError> {
        self.with_process(pid, |process| Ok(process.clear_breakpoint(address)))
    }

    pub fn breakpoints(&self, pid: Pid) -> Result<Vec<Address>, KernelError> {
        self.with_process(pid, |process| Ok(process.breakpoints()))
    }

    /// `count` quad-words from `base`; a negative count reads backward.
    pub fn read_memory(&self, pid: Pid, base: Address, count: i64) -> Result<Vec<u64>, KernelError> {
        self.with_process(pid, |process| Ok(process.read_quads(base, count)?))
    }

    pub fn read_registers(&self, pid: Pid, names: &[&str]) -> Result<Vec<(Register, u64)>, KernelError> {
        self.with_process(pid, |process| Ok(process.read_named_registers(names)?))
    }

    pub fn read_flags(&self, pid: Pid, names: &[&str]) -> Result<Vec<(Flag, bool)>, KernelError> {
        self.with_process(pid, |process| Ok(process.read_named_flags(names)?))
    }

    pub fn last_diff(&self, pid: Pid) -> Result<ProcessStateDiff, KernelError> {
        self.with_process(pid, |process| Ok(process.last_diff().clone()))
    }

    pub fn dump_memory(&self, pid: Pid, address: Address, len: usize) -> Result<String, KernelError> {
        self.with_process(pid, |process| Ok(process.dump_memory(address, len)?))
    }

    pub fn dump_registers(&self, pid: Pid) -> Result<String, KernelError> {
        self.with_process(pid, |process| Ok(process.cpu.dump_registers()))
    }

    pub fn push_stdin(&self, bytes: &[u8]) -> Result<(), KernelError> {
        Ok(self.io.stdin.push(bytes)?)
    }

    /// Take everything written to standard output since the last drain.
    pub fn drain_stdout(&self) -> Result<Vec<u8>, KernelError> {
        Ok(self.io.stdout.take()?.unwrap_or_default())
    }

    pub fn subscribe(&self) -> Receiver<KernelEvent> {
        self.io.events.subscribe()
    }

    fn task(&self, pid: Pid) -> Result<&Task, KernelError> {
        self.processes.get(&pid).ok_or(KernelError::NoSuchProcess(pid))
    }

    fn with_process<T>(
        &self,
        pid: Pid,
        f: impl FnOnce(&mut Process) -> Result<T, KernelError>,
    ) -> Result<T, KernelError> {
        let process = Arc::clone(&self.task(pid)?.process);
        let mut process = lock(&process)?;
        f(&mut process)
    }
}

fn lock(process: &Mutex<Process>) -> Result<MutexGuard<'_, Process>, SystemProcessException> {
    process.lock().map_err(|_| poisoned("process"))
}

/// Run the process and report how the run ended.
fn drive(events: &EventBus, process: &mut Process) -> Result<Halt, SystemProcessException> {
    let pid = process.pid;
    // Nothing executed, so observers hear nothing.
    if process.state() == ProcessState::Terminated {
        log::warn!("[pid {}] run requested after termination", pid);
        return Err(SystemProcessException::ProcessFailure(format!(
            "process {} has terminated",
            pid
        )));
    }
    log::info!("[pid {}] running from 0x{:x}", pid, process.cpu.ip);
    let result = process.run();
    match &result {
        Ok(Halt::Interrupted(interrupt)) => {
            log::info!("[pid {}] {}", pid, interrupt);
            events.publish(KernelEvent::Interrupt {
                pid,
                interrupt: interrupt.clone(),
            });
        }
        Ok(Halt::EndOfProgram) => {
            log::info!("[pid {}] reached end of program", pid);
        }
        Err(error) => {
            log::warn!("[pid {}] {}", pid, error);
            events.publish(KernelEvent::RuntimeException {
                pid,
                error: error.clone(),
            });
        }
    }
    result
}
