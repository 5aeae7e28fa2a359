use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kernel::{Kernel, KernelConfig, KernelEvent};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use vm::{Halt, SystemInterrupt};

/// Run an ARM64 sandbox image with host stdin/stdout attached.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the Mach-O image
    image: PathBuf,

    /// Owner uid of the spawned process
    #[arg(short, long, default_value_t = 0)]
    uid: u32,

    /// Log every executed instruction
    #[arg(short, long)]
    trace: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let args = Args::parse();
    SimpleLogger::new()
        .with_level(if args.trace { LevelFilter::Trace } else { LevelFilter::Warn })
        .init()
        .context("failed to install logger")?;

    let binary = fs::read(&args.image).with_context(|| format!("failed to read {:?}", args.image))?;
    let config = KernelConfig {
        trace_instructions: args.trace,
        ..KernelConfig::default()
    };
    let mut kernel = Kernel::new(config);
    let pid = kernel.spawn_process(&binary, args.uid)?;
    let kernel = Arc::new(kernel);
    let events = kernel.subscribe();

    let feeder = Arc::clone(&kernel);
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(mut line) = line else { break };
            line.push('\n');
            if feeder.push_stdin(line.as_bytes()).is_err() {
                break;
            }
        }
    });

    let worker = kernel.start(pid)?;
    let mut stdout = io::stdout();
    loop {
        match events.recv_timeout(Duration::from_millis(50)) {
            Ok(KernelEvent::Stdout { .. }) => {
                stdout.write_all(&kernel.drain_stdout()?)?;
                stdout.flush()?;
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) if worker.is_finished() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    stdout.write_all(&kernel.drain_stdout()?)?;
    stdout.flush()?;

    let halt = worker
        .join()
        .map_err(|_| anyhow::anyhow!("process worker panicked"))??;
    Ok(match halt {
        Halt::Interrupted(SystemInterrupt::ProcessExit { code }) => code,
        Halt::Interrupted(SystemInterrupt::ProcessKill) => 137,
        Halt::Interrupted(SystemInterrupt::BreakpointHit { .. }) | Halt::EndOfProgram => 0,
    })
}
