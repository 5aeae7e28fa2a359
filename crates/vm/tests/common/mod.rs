#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use types::{AccessMode, Layout, Protection};
use vm::flags::Flag;
use vm::instruction::Instruction;
use vm::memory::{Segment, VirtualMemory};
use vm::{Arm64Codec, Codec, KernelDelegate, KernelSubroutine, Process, ProgramImage, SystemInterrupt, SystemProcessException};

pub const TEXT: u64 = 0x1000_0000;
pub const DATA: u64 = 0x2000_0000;
pub const STACK_SIZE: u64 = 0x1_0000;

pub fn assemble(program: &[Instruction]) -> Vec<u8> {
    let codec = Arm64Codec;
    program
        .iter()
        .flat_map(|instruction| codec.encode(instruction).to_le_bytes())
        .collect()
}

/// Code at `TEXT`, a writable `__DATA` page, and a stack at the top of user
/// space.
pub fn image(code: &[u8]) -> ProgramImage {
    let mut memory = VirtualMemory::new();
    memory
        .map(Segment::new("__TEXT", TEXT, 0x1000, Protection::rx()), AccessMode::User)
        .unwrap();
    memory
        .map(Segment::new("__DATA", DATA, 0x1000, Protection::rw()), AccessMode::User)
        .unwrap();
    let stack_base = Layout::USER_SPACE_END - STACK_SIZE;
    memory
        .map(
            Segment::new(Layout::STACK_SEGMENT, stack_base, STACK_SIZE, Protection::rw()),
            AccessMode::User,
        )
        .unwrap();
    memory.populate(TEXT, code).unwrap();
    ProgramImage {
        memory,
        entry_point: TEXT,
        stack_base,
        stack_size: STACK_SIZE,
        program_end: TEXT + code.len() as u64,
    }
}

pub fn process(program: &[Instruction]) -> Process {
    Process::from_image(1, 0, image(&assemble(program)))
}

/// Kernel stand-in that records every request it sees.
#[derive(Debug, Default)]
pub struct RecordingKernel {
    pub calls: Mutex<Vec<KernelSubroutine>>,
}

impl RecordingKernel {
    pub fn attach(process: &mut Process) -> Arc<RecordingKernel> {
        let kernel = Arc::new(RecordingKernel::default());
        process.attach_kernel(kernel.clone());
        kernel
    }

    pub fn calls(&self) -> Vec<KernelSubroutine> {
        self.calls.lock().unwrap().clone()
    }
}

impl KernelDelegate for RecordingKernel {
    fn dispatch(&self, process: &mut Process, request: KernelSubroutine) -> Result<u64, SystemProcessException> {
        self.calls.lock().unwrap().push(request.clone());
        match request {
            KernelSubroutine::Exit { code } => Err(SystemInterrupt::ProcessExit { code }.into()),
            KernelSubroutine::GetUidForName { name } => {
                let name = process.read_c_string(name)?;
                let found = name == "root";
                process.set_flag(Flag::Carry, !found);
                Ok(if found { 0 } else { u64::MAX })
            }
            KernelSubroutine::UidBelongsToGid { uid, gid } => Ok((uid == gid) as u64),
            _ => Ok(0),
        }
    }
}
