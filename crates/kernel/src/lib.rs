//! Process supervisor for the sandbox: spawns loaded images as processes,
//! services their syscalls and exposes a debugger-facing surface.

pub mod config;
pub mod error;
pub mod events;
pub mod mailbox;
pub mod shell;
pub mod supervisor;
pub mod syscall;
pub mod users;

pub use config::{GroupEntry, KernelConfig, UserEntry};
pub use error::KernelError;
pub use events::{EventBus, KernelEvent};
pub use shell::{BasicCommands, CommandHandler, CommandOutcome, Shell, ShellSession, Terminal};
pub use supervisor::Kernel;
pub use users::UserRegistry;
