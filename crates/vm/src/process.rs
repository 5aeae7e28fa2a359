use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use types::{AccessMode, Address, Layout, Pid, Uid};

use crate::breakpoints::Breakpoints;
use crate::cpu::Cpu;
use crate::decoder::{Arm64Codec, Codec};
use crate::error::{RuntimeException, RuntimeExceptionKind, SystemInterrupt, SystemProcessException};
use crate::exe::Flow;
use crate::flags::Flag;
use crate::memory::{VirtualMemory, VirtualMemoryError, PAGE_SIZE};
use crate::registers::Register;
use crate::state_diff::ProcessStateDiff;
use crate::sys_call::KernelDelegate;

type Result<T> = std::result::Result<T, SystemProcessException>;

/// Lifecycle of a process as seen by its supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Running,
    BreakpointHalt,
    ExceptionHalt,
    Terminated,
}

/// Why a run stopped without failing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Halt {
    Interrupted(SystemInterrupt),
    /// The instruction pointer reached the end of the entry segment's code.
    EndOfProgram,
}

/// Outcome of a single successful step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Executed,
    EndOfProgram,
}

/// Cross-thread handle used to ask a running process to stop.
#[derive(Debug, Default)]
pub struct ProcessControl {
    kill: AtomicBool,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_kill(&self) {
        self.kill.store(true, Ordering::SeqCst);
    }

    pub fn kill_requested(&self) -> bool {
        self.kill.load(Ordering::SeqCst)
    }
}

/// A loaded program ready to be attached to a process.
#[derive(Debug)]
pub struct ProgramImage {
    pub memory: VirtualMemory,
    pub entry_point: Address,
    pub stack_base: Address,
    pub stack_size: u64,
    /// First address past the file-backed bytes of the entry segment.
    pub program_end: Address,
}

/// One emulated ARM64 process: CPU state, address space and debugger state.
///
/// EDUCATIONAL: everything the instruction loop touches lives here, so a
/// process can be driven directly in a test or wrapped in a mutex and run on
/// a worker thread by the kernel. Syscalls leave the process only through the
/// attached `KernelDelegate`, which receives `&mut Process` back so it can
/// read arguments out of memory and write results in.
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    /// Uid the process runs as; `execve` starts the shell as this user.
    pub owner: Uid,
    pub cpu: Cpu,
    pub entry_point: Address,
    /// Lowest address of the `Stack` segment. SP starts at
    /// `stack_base + stack_size` and grows down.
    pub stack_base: Address,
    pub stack_size: u64,
    /// Reaching this address ends the run with `Halt::EndOfProgram`.
    pub program_end: Option<Address>,

    /// EDUCATIONAL: `None` until an image is loaded. Every access goes
    /// through `memory()`/`memory_mut()` so a missing address space is an
    /// error instead of a panic.
    memory: Option<VirtualMemory>,
    breakpoints: Breakpoints,
    /// Address of the last instruction that completed, reported with every
    /// breakpoint hit and runtime exception.
    last_executed: Option<Address>,
    /// Locations written by the last executed instruction.
    diff: ProcessStateDiff,
    state: ProcessState,
    /// Turns fetched words into instructions.
    codec: Arc<dyn Codec>,
    /// Services `svc`. The process holds the kernel, never the other way
    /// round.
    kernel: Option<Arc<dyn KernelDelegate>>,
    /// Kill flag shared with the supervisor.
    control: Arc<ProcessControl>,
    /// Log each executed instruction at `trace` level.
    trace: bool,
}

impl Process {
    /// A process with no address space yet. Attach one with `load`.
    pub fn new(pid: Pid, owner: Uid) -> Self {
        Self {
            pid,
            owner,
            cpu: Cpu::default(),
            entry_point: 0,
            stack_base: 0,
            stack_size: 0,
            program_end: None,
            memory: None,
            breakpoints: Breakpoints::default(),
            last_executed: None,
            diff: ProcessStateDiff::default(),
            state: ProcessState::Idle,
            codec: Arc::new(Arm64Codec),
            kernel: None,
            control: Arc::new(ProcessControl::new()),
            trace: false,
        }
    }

    pub fn from_image(pid: Pid, owner: Uid, image: ProgramImage) -> Self {
        let mut process = Self::new(pid, owner);
        process.load(image);
        process
    }

    /// Install `image` and reset the CPU to its entry point with the stack
    /// pointer at the top of the stack segment.
    pub fn load(&mut self, image: ProgramImage) {
        self.cpu = Cpu::new(image.entry_point);
        self.cpu.registers.write(Register::Sp, image.stack_base + image.stack_size);
        self.entry_point = image.entry_point;
        self.stack_base = image.stack_base;
        self.stack_size = image.stack_size;
        self.program_end = Some(image.program_end);
        self.memory = Some(image.memory);
        self.last_executed = None;
        self.diff.clear();
        self.state = ProcessState::Idle;
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn attach_kernel(&mut self, kernel: Arc<dyn KernelDelegate>) {
        self.kernel = Some(kernel);
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn control(&self) -> Arc<ProcessControl> {
        Arc::clone(&self.control)
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn last_executed_instruction(&self) -> Option<Address> {
        self.last_executed
    }

    pub fn last_diff(&self) -> &ProcessStateDiff {
        &self.diff
    }

    pub fn memory(&self) -> Result<&VirtualMemory> {
        self.memory.as_ref().ok_or(SystemProcessException::NoVirtualMemory)
    }

    pub fn memory_mut(&mut self) -> Result<&mut VirtualMemory> {
        self.memory.as_mut().ok_or(SystemProcessException::NoVirtualMemory)
    }

    // ---- breakpoints ------------------------------------------------------

    pub fn set_breakpoint(&mut self, address: Address) {
        self.breakpoints.set(address);
    }

    pub fn clear_breakpoint(&mut self, address: Address) -> bool {
        self.breakpoints.clear(address)
    }

    pub fn breakpoints(&self) -> Vec<Address> {
        self.breakpoints.addresses().collect()
    }

    // ---- run loop ---------------------------------------------------------

    /// Run until an interrupt, the end of the program, or a failure.
    ///
    /// Breakpoint hits, exit and kill come back as `Ok(Halt::Interrupted)`.
    /// Anything else leaves the process in `ExceptionHalt` and is returned
    /// as the error. Calling `run` again after a breakpoint continues from
    /// the halted instruction.
    pub fn run(&mut self) -> Result<Halt> {
        if self.state == ProcessState::Terminated {
            return Err(SystemProcessException::ProcessFailure(format!(
                "process {} has terminated",
                self.pid
            )));
        }
        self.state = ProcessState::Running;
        loop {
            match self.step() {
                Ok(Step::Executed) => continue,
                Ok(Step::EndOfProgram) => {
                    self.state = ProcessState::Terminated;
                    return Ok(Halt::EndOfProgram);
                }
                Err(SystemProcessException::SystemInterrupt(interrupt)) => {
                    self.state = match interrupt {
                        SystemInterrupt::BreakpointHit { .. } => ProcessState::BreakpointHalt,
                        SystemInterrupt::ProcessExit { .. } | SystemInterrupt::ProcessKill => {
                            ProcessState::Terminated
                        }
                    };
                    return Ok(Halt::Interrupted(interrupt));
                }
                Err(error) => {
                    self.state = ProcessState::ExceptionHalt;
                    return Err(error);
                }
            }
        }
    }

    /// Execute one instruction.
    ///
    /// EDUCATIONAL: the order matters. A pending kill wins over everything,
    /// then an armed breakpoint stops *before* the instruction runs. The
    /// diff is cleared only once the word decoded, so a failed fetch leaves
    /// the previous step's diff visible to the debugger.
    pub fn step(&mut self) -> Result<Step> {
        if self.control.kill_requested() {
            return Err(SystemInterrupt::ProcessKill.into());
        }
        let ip = self.cpu.ip;
        if self.breakpoints.is_armed(ip) {
            self.breakpoints.disarm(ip);
            return Err(SystemInterrupt::BreakpointHit {
                address: ip,
                last_executed_instruction: self.last_executed,
            }
            .into());
        }
        if self.program_end == Some(ip) {
            return Ok(Step::EndOfProgram);
        }

        let word = match self.memory_mut()?.fetch(ip, AccessMode::User) {
            Ok(word) => word,
            Err(error) => return Err(self.memory_fault(error)),
        };
        let instruction = self.codec.decode(word).ok_or_else(|| {
            SystemProcessException::RuntimeException(RuntimeException {
                kind: RuntimeExceptionKind::InvalidInstruction { word },
                address: ip,
                last_executed_instruction: self.last_executed,
            })
        })?;
        self.diff.clear();
        if self.trace {
            log::trace!(
                "[pid {}] 0x{:016x}: {}  {}",
                self.pid,
                ip,
                hex::encode(word.to_le_bytes()),
                instruction.pretty_print()
            );
        }

        let flow = self.execute(instruction)?;
        self.last_executed = Some(ip);
        self.cpu.ip = match flow {
            Flow::Next => ip.wrapping_add(Layout::INSTRUCTION_SIZE),
            Flow::Jump(target) => target,
        };
        self.breakpoints.rearm(ip);
        Ok(Step::Executed)
    }

    /// The single place a memory error becomes an observer-visible
    /// runtime exception, attributed to the current instruction.
    pub fn memory_fault(&self, error: VirtualMemoryError) -> SystemProcessException {
        SystemProcessException::RuntimeException(RuntimeException {
            kind: RuntimeExceptionKind::SegmentationFault {
                fault_address: error.fault_address(),
            },
            address: self.cpu.ip,
            last_executed_instruction: self.last_executed,
        })
    }

    // ---- register and flag access ----------------------------------------

    pub fn register(&self, register: Register) -> u64 {
        self.cpu.read(register)
    }

    /// Write a register and record it in the current diff.
    pub fn set_register(&mut self, register: Register, value: u64) {
        if let Some(written) = self.cpu.write(register, value) {
            self.diff.record_register(written);
        }
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.cpu.flag(flag)
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.cpu.set_flag(flag, value);
        self.diff.record_flag(flag);
    }

    pub fn read_named_registers<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<(Register, u64)>> {
        names
            .iter()
            .map(|name| {
                let register: Register = name.as_ref().parse()?;
                Ok((register, self.register(register)))
            })
            .collect()
    }

    pub fn read_named_flags<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<(Flag, bool)>> {
        names
            .iter()
            .map(|name| {
                let flag: Flag = name.as_ref().parse()?;
                Ok((flag, self.flag(flag)))
            })
            .collect()
    }

    // ---- memory access ----------------------------------------------------

    /// User-mode read that may span pages.
    pub fn read_bytes(&self, address: Address, count: usize) -> Result<Vec<u8>> {
        read_spanning(self.memory()?, address, count, AccessMode::User)
            .map_err(|error| self.memory_fault(error))
    }

    /// User-mode write that may span pages; written addresses land in the
    /// diff.
    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let mut written = 0usize;
        while written < bytes.len() {
            let cursor = address.wrapping_add(written as u64);
            let room = PAGE_SIZE - (cursor as usize % PAGE_SIZE);
            let chunk = room.min(bytes.len() - written);
            let result = self
                .memory_mut()?
                .write(cursor, &bytes[written..written + chunk], AccessMode::User);
            if let Err(error) = result {
                return Err(self.memory_fault(error));
            }
            written += chunk;
        }
        self.diff.record_memory(address, bytes.len());
        Ok(())
    }

    /// Read a NUL-terminated UTF-8 string of at most
    /// `Layout::MAX_C_STRING_LEN` bytes.
    pub fn read_c_string(&self, address: Address) -> Result<String> {
        let mut bytes = Vec::new();
        let mut cursor = address;
        while bytes.len() < Layout::MAX_C_STRING_LEN {
            let room = PAGE_SIZE - (cursor as usize % PAGE_SIZE);
            let chunk = room.min(Layout::MAX_C_STRING_LEN - bytes.len());
            let part = self.read_bytes(cursor, chunk)?;
            if let Some(nul) = part.iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&part[..nul]);
                return String::from_utf8(bytes).map_err(|error| {
                    SystemProcessException::ValueConversionError(format!(
                        "string at 0x{:x} is not UTF-8: {}",
                        address, error
                    ))
                });
            }
            bytes.extend_from_slice(&part);
            cursor = cursor.wrapping_add(chunk as u64);
        }
        Err(SystemProcessException::ValueConversionError(format!(
            "string at 0x{:x} is not terminated within {} bytes",
            address,
            Layout::MAX_C_STRING_LEN
        )))
    }

    /// Read `count` quad-words starting at `base`, in kernel mode. A negative
    /// count reads the `|count|` quad-words just below `base`. The result is
    /// always in ascending address order.
    pub fn read_quads(&self, base: Address, count: i64) -> Result<Vec<u64>> {
        let memory = self.memory()?;
        let len = count.unsigned_abs();
        let start = if count < 0 {
            len.checked_mul(8)
                .and_then(|bytes| base.checked_sub(bytes))
                .ok_or_else(|| self.memory_fault(VirtualMemoryError::SegmentationFault(base)))?
        } else {
            base
        };
        (0..len)
            .map(|index| {
                let address = start.wrapping_add(index.wrapping_mul(8));
                let bytes = read_spanning(memory, address, 8, AccessMode::Kernel)
                    .map_err(|error| self.memory_fault(error))?;
                let mut quad = [0u8; 8];
                quad.copy_from_slice(&bytes);
                Ok(u64::from_le_bytes(quad))
            })
            .collect()
    }

    /// Hex dump of `len` bytes at `address`, sixteen per line.
    pub fn dump_memory(&self, address: Address, len: usize) -> Result<String> {
        let memory = self.memory()?;
        let bytes = read_spanning(memory, address, len, AccessMode::Kernel)
            .map_err(|error| self.memory_fault(error))?;
        let mut out = String::new();
        for (index, line) in bytes.chunks(16).enumerate() {
            out.push_str(&format!(
                "0x{:016x}: {}\n",
                address + (index * 16) as u64,
                hex::encode(line)
            ));
        }
        Ok(out)
    }

    /// Call into the attached kernel on `svc`. Blocks until it answers.
    pub(crate) fn trap(&mut self) -> Result<()> {
        use crate::registers::{SYSCALL_NUMBER_REGISTER, SYSCALL_RESULT_REGISTER};
        use crate::sys_call::{KernelSubroutine, SYSCALL_ARG_COUNT};

        let number = self.register(SYSCALL_NUMBER_REGISTER);
        let mut args = [0u64; SYSCALL_ARG_COUNT];
        for (index, arg) in args.iter_mut().enumerate() {
            *arg = self.register(Register::X(index as u8));
        }
        let request = KernelSubroutine::decode(number, args)?;
        let kernel = self.kernel.clone().ok_or_else(|| {
            SystemProcessException::ProcessFailure("no kernel attached".to_string())
        })?;
        log::debug!("[pid {}] syscall {} {:?}", self.pid, request.name(), request);
        let result = kernel.dispatch(self, request)?;
        self.set_register(SYSCALL_RESULT_REGISTER, result);
        Ok(())
    }
}

fn read_spanning(
    memory: &VirtualMemory,
    address: Address,
    count: usize,
    mode: AccessMode,
) -> std::result::Result<Vec<u8>, VirtualMemoryError> {
    if address.checked_add(count as u64).is_none() {
        return Err(VirtualMemoryError::SegmentationFault(address));
    }
    // `count` may come straight from a guest register; grow as pages are read.
    let mut out = Vec::with_capacity(count.min(PAGE_SIZE));
    let mut cursor = address;
    while out.len() < count {
        let room = PAGE_SIZE - (cursor as usize % PAGE_SIZE);
        let chunk = room.min(count - out.len());
        out.extend_from_slice(&memory.read(cursor, chunk, mode)?);
        cursor = cursor.wrapping_add(chunk as u64);
    }
    Ok(out)
}
