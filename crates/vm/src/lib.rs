//! Process virtual machine: paged memory, the ARM64 execution engine and the
//! syscall trap surface a kernel plugs into.

pub mod breakpoints;
pub mod cpu;
pub mod decoder;
pub mod error;
pub mod exe;
pub mod flags;
pub mod instruction;
pub mod memory;
pub mod process;
pub mod registers;
pub mod state_diff;
pub mod sys_call;

pub use decoder::{Arm64Codec, Codec};
pub use error::{RuntimeException, RuntimeExceptionKind, SystemInterrupt, SystemProcessException};
pub use flags::{ConditionFlags, Flag};
pub use instruction::Instruction;
pub use process::{Halt, Process, ProcessControl, ProcessState, ProgramImage, Step};
pub use registers::Register;
pub use state_diff::ProcessStateDiff;
pub use sys_call::{KernelDelegate, KernelSubroutine};
