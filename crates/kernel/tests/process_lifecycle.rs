use std::time::Duration;

use dyld::ImageBuilder;
use kernel::{Kernel, KernelConfig, KernelError, KernelEvent, UserEntry};
use vm::instruction::{Instruction, LogicalOp, MemWidth};
use vm::{
    Arm64Codec, Codec, Halt, KernelSubroutine, ProcessState, Register, RuntimeExceptionKind, SystemInterrupt,
    SystemProcessException,
};

const TEXT: u64 = 0x1000_0000;
const DATA: u64 = 0x2000_0000;

fn movz(rd: u8, imm16: u16, shift: u8) -> Instruction {
    Instruction::Movz { rd, imm16, shift, sf: true }
}

/// rd = DATA + offset
fn data_pointer(rd: u8, offset: u16) -> [Instruction; 2] {
    [
        movz(rd, 0x2000, 16),
        Instruction::AddImm { rd, rn: rd, imm12: offset, shift12: false, sf: true, set_flags: false },
    ]
}

fn syscall(number: u16) -> [Instruction; 2] {
    [movz(16, number, 0), Instruction::Svc { imm16: 0x80 }]
}

fn image(program: &[Instruction], data: &[u8]) -> Vec<u8> {
    let codec = Arm64Codec;
    let code: Vec<u8> = program
        .iter()
        .flat_map(|instruction| codec.encode(instruction).to_le_bytes())
        .collect();
    ImageBuilder::new()
        .entry(TEXT, 0x4000)
        .text(TEXT, code)
        .data(DATA, data.to_vec())
        .build()
        .unwrap()
}

fn hello_world() -> Vec<u8> {
    let mut program = vec![movz(0, 1, 0)];
    program.extend(data_pointer(1, 0));
    program.push(movz(2, 2, 0));
    program.extend(syscall(0x2004));
    program.push(movz(0, 0, 0));
    program.extend(syscall(0x2001));
    image(&program, b"hi")
}

#[test]
fn write_then_exit_end_to_end() {
    let mut kernel = Kernel::new(KernelConfig::default());
    let events = kernel.subscribe();
    let pid = kernel.spawn_process(&hello_world(), 0).unwrap();

    assert_eq!(
        kernel.run(pid),
        Ok(Halt::Interrupted(SystemInterrupt::ProcessExit { code: 0 }))
    );
    assert_eq!(kernel.drain_stdout().unwrap(), b"hi");
    assert_eq!(kernel.drain_stdout().unwrap(), b"");
    assert_eq!(kernel.process_state(pid), Ok(ProcessState::Terminated));

    let seen: Vec<KernelEvent> = events.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            KernelEvent::Subroutine {
                pid,
                request: KernelSubroutine::Write { fd: 1, buf: DATA, count: 2 },
            },
            KernelEvent::Stdout { pid, bytes: b"hi".to_vec() },
            KernelEvent::Subroutine {
                pid,
                request: KernelSubroutine::Exit { code: 0 },
            },
            KernelEvent::Exit { pid, code: 0 },
            KernelEvent::Interrupt {
                pid,
                interrupt: SystemInterrupt::ProcessExit { code: 0 },
            },
        ]
    );
}

#[test]
fn rerunning_a_terminated_process_publishes_nothing() {
    let mut kernel = Kernel::new(KernelConfig::default());
    let pid = kernel.spawn_process(&hello_world(), 0).unwrap();
    kernel.run(pid).unwrap();
    let events = kernel.subscribe();

    assert!(matches!(
        kernel.run(pid),
        Err(KernelError::Process(SystemProcessException::ProcessFailure(_)))
    ));
    assert!(matches!(
        kernel.start(pid).unwrap().join().unwrap(),
        Err(SystemProcessException::ProcessFailure(_))
    ));
    assert_eq!(events.try_iter().count(), 0);
    assert_eq!(kernel.process_state(pid), Ok(ProcessState::Terminated));
}

#[test]
fn huge_write_count_is_a_segmentation_fault() {
    // write(1, DATA, 0x0FFF_0000_0000_0000)
    let mut program = vec![movz(0, 1, 0)];
    program.extend(data_pointer(1, 0));
    program.push(movz(2, 0x0FFF, 48));
    program.extend(syscall(0x2004));
    let mut kernel = Kernel::new(KernelConfig::default());
    let pid = kernel.spawn_process(&image(&program, b"hi"), 0).unwrap();

    match kernel.run(pid) {
        Err(KernelError::Process(SystemProcessException::RuntimeException(exception))) => {
            assert_eq!(
                exception.kind,
                RuntimeExceptionKind::SegmentationFault {
                    fault_address: Some(DATA + 0x1000),
                }
            );
            assert_eq!(exception.address, TEXT + 20);
        }
        other => panic!("expected a segmentation fault, got {:?}", other),
    }
    assert_eq!(kernel.drain_stdout().unwrap(), b"");
    assert_eq!(kernel.process_state(pid), Ok(ProcessState::ExceptionHalt));
}

#[test]
fn pids_are_unique() {
    let mut kernel = Kernel::new(KernelConfig::default());
    let a = kernel.spawn_process(&hello_world(), 0).unwrap();
    let b = kernel.spawn_process(&hello_world(), 0).unwrap();
    assert_ne!(a, b);
    assert_eq!(kernel.processes(), vec![a, b]);
    kernel.remove_process(a).unwrap();
    assert_eq!(kernel.processes(), vec![b]);
    assert_eq!(kernel.run(a), Err(KernelError::NoSuchProcess(a)));
}

#[test]
fn write_to_other_descriptor_fails() {
    let mut program = vec![movz(0, 2, 0)];
    program.extend(data_pointer(1, 0));
    program.push(movz(2, 2, 0));
    program.extend(syscall(0x2004));
    let mut kernel = Kernel::new(KernelConfig::default());
    let events = kernel.subscribe();
    let pid = kernel.spawn_process(&image(&program, b"hi"), 0).unwrap();

    let expected = SystemProcessException::InvalidDescriptor(2);
    assert_eq!(kernel.run(pid), Err(KernelError::Process(expected.clone())));
    assert_eq!(kernel.process_state(pid), Ok(ProcessState::ExceptionHalt));
    assert!(events
        .try_iter()
        .any(|event| event == KernelEvent::RuntimeException { pid, error: expected.clone() }));
}

#[test]
fn read_echoes_one_chunk() {
    // n = read(0, buf, 1); write(1, buf, n)
    let mut program = vec![movz(0, 0, 0)];
    program.extend(data_pointer(1, 0));
    program.push(movz(2, 1, 0));
    program.extend(syscall(0x2002));
    program.push(Instruction::Logical {
        op: LogicalOp::Orr,
        rd: 2,
        rn: 31,
        rm: 0,
        lsl: 0,
        sf: true,
    });
    program.push(movz(0, 1, 0));
    program.extend(data_pointer(1, 0));
    program.extend(syscall(0x2004));

    let mut kernel = Kernel::new(KernelConfig::default());
    let pid = kernel.spawn_process(&image(&program, &[0xAA; 16]), 0).unwrap();
    kernel.push_stdin(b"pi").unwrap();
    kernel.push_stdin(b"ng").unwrap();

    assert_eq!(kernel.run(pid), Ok(Halt::EndOfProgram));
    // The whole chunk is delivered even though only one byte was asked for.
    assert_eq!(kernel.drain_stdout().unwrap(), b"ping");
    assert_eq!(kernel.read_registers(pid, &["x0"]).unwrap(), vec![(Register::X(0), 4)]);
    let quad = kernel.read_memory(pid, DATA, 1).unwrap()[0];
    assert_eq!(quad.to_le_bytes(), [b'p', b'i', b'n', b'g', 0, 0xAA, 0xAA, 0xAA]);
}

#[test]
fn uid_lookup_hit_and_miss() {
    let lookup = |name: &[u8]| {
        let mut program = data_pointer(0, 0).to_vec();
        program.extend(syscall(0x5001));
        let mut kernel = Kernel::new(KernelConfig::default());
        let pid = kernel.spawn_process(&image(&program, name), 0).unwrap();
        assert_eq!(kernel.run(pid), Ok(Halt::EndOfProgram));
        let x0 = kernel.read_registers(pid, &["x0"]).unwrap()[0].1;
        let carry = kernel.read_flags(pid, &["c"]).unwrap()[0].1;
        (x0, carry)
    };
    assert_eq!(lookup(b"nobody\0"), (0xFFFF_FFFF_FFFF_FFFF, true));
    assert_eq!(lookup(b"root\0"), (0, false));
}

#[test]
fn uid_belongs_to_gid() {
    let mut program = vec![movz(0, 0, 0), movz(1, 0, 0)];
    program.extend(syscall(0x5002));
    program.push(movz(3, 0, 0));
    program.push(movz(0, 501, 0));
    program.extend(syscall(0x5002));

    let mut kernel = Kernel::new(KernelConfig::default());
    let pid = kernel.spawn_process(&image(&program, &[]), 0).unwrap();
    kernel.set_breakpoint(pid, TEXT + 16).unwrap();
    assert!(matches!(
        kernel.run(pid),
        Ok(Halt::Interrupted(SystemInterrupt::BreakpointHit { .. }))
    ));
    assert_eq!(kernel.read_registers(pid, &["x0"]).unwrap()[0].1, 1);
    assert_eq!(kernel.resume(pid), Ok(Halt::EndOfProgram));
    assert_eq!(kernel.read_registers(pid, &["x0"]).unwrap()[0].1, 0);
}

fn exec_shell_program() -> Vec<u8> {
    // status = execve("/bin/sh"); exit(status)
    let mut program = data_pointer(0, 0).to_vec();
    program.extend(syscall(0x203b));
    program.extend(syscall(0x2001));
    image(&program, b"/bin/sh\0")
}

#[test]
fn execve_runs_the_shell() {
    let mut config = KernelConfig::default();
    config.users.push(UserEntry {
        name: "alice".to_string(),
        uid: 501,
    });
    let mut kernel = Kernel::new(config);
    let pid = kernel.spawn_process(&exec_shell_program(), 0).unwrap();
    kernel
        .push_stdin(b"whoami\nassign alice wheel\nid\nfrobnicate\necho a  b\nexit 7\n")
        .unwrap();

    assert_eq!(
        kernel.run(pid),
        Ok(Halt::Interrupted(SystemInterrupt::ProcessExit { code: 7 }))
    );
    assert_eq!(
        String::from_utf8(kernel.drain_stdout().unwrap()).unwrap(),
        "# root\nuid=0(root) groups=0(wheel)\nsh: frobnicate: command not found\na b\n"
    );
    assert!(kernel.users().read().unwrap().uid_belongs_to_gid(501, 0));
}

#[test]
fn shell_prompt_for_regular_user() {
    let mut config = KernelConfig::default();
    config.users.push(UserEntry {
        name: "alice".to_string(),
        uid: 501,
    });
    let mut kernel = Kernel::new(config);
    let pid = kernel.spawn_process(&exec_shell_program(), 501).unwrap();
    kernel.push_stdin(b"assign alice wheel\nexit\n").unwrap();
    assert_eq!(
        kernel.run(pid),
        Ok(Halt::Interrupted(SystemInterrupt::ProcessExit { code: 1 }))
    );
    assert_eq!(
        kernel.drain_stdout().unwrap(),
        b"$ assign: permission denied\n"
    );
}

#[test]
fn execve_of_anything_else_is_file_not_found() {
    let mut program = data_pointer(0, 0).to_vec();
    program.extend(syscall(0x203b));
    let mut kernel = Kernel::new(KernelConfig::default());
    let pid = kernel.spawn_process(&image(&program, b"/bin/ls\0"), 0).unwrap();
    assert_eq!(
        kernel.run(pid),
        Err(KernelError::Process(SystemProcessException::FileNotExists(
            "/bin/ls".to_string()
        )))
    );
}

#[test]
fn execve_by_unknown_owner_is_denied() {
    let mut kernel = Kernel::new(KernelConfig::default());
    let pid = kernel.spawn_process(&exec_shell_program(), 4242).unwrap();
    assert_eq!(
        kernel.run(pid),
        Err(KernelError::Process(SystemProcessException::PermissionDenied))
    );
}

#[test]
fn kill_wakes_a_blocked_read() {
    let mut program = vec![movz(0, 0, 0)];
    program.extend(data_pointer(1, 0));
    program.extend(syscall(0x2002));
    let mut kernel = Kernel::new(KernelConfig::default());
    let pid = kernel.spawn_process(&image(&program, &[0; 8]), 0).unwrap();

    let worker = kernel.start(pid).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    kernel.kill(pid).unwrap();
    assert_eq!(
        worker.join().unwrap(),
        Ok(Halt::Interrupted(SystemInterrupt::ProcessKill))
    );
    assert_eq!(kernel.process_state(pid), Ok(ProcessState::Terminated));
}

#[test]
fn breakpoints_and_debugger_reads() {
    let program = [
        movz(0, 0x11, 0),
        movz(1, 0x22, 0),
        Instruction::Nop,
        Instruction::Nop,
    ];
    let mut kernel = Kernel::new(KernelConfig::default());
    let pid = kernel.spawn_process(&image(&program, &[]), 0).unwrap();
    kernel.set_breakpoint(pid, TEXT + 8).unwrap();
    kernel.set_breakpoint(pid, TEXT + 12).unwrap();
    assert_eq!(kernel.breakpoints(pid).unwrap(), vec![TEXT + 8, TEXT + 12]);

    assert_eq!(
        kernel.run(pid),
        Ok(Halt::Interrupted(SystemInterrupt::BreakpointHit {
            address: TEXT + 8,
            last_executed_instruction: Some(TEXT + 4),
        }))
    );
    assert_eq!(kernel.process_state(pid), Ok(ProcessState::BreakpointHalt));
    let registers = kernel.read_registers(pid, &["x0", "w1", "pc"]).unwrap();
    assert_eq!(
        registers,
        vec![(Register::X(0), 0x11), (Register::W(1), 0x22), (Register::Pc, TEXT + 8)]
    );
    assert!(kernel.last_diff(pid).unwrap().registers.contains(&Register::X(1)));
    assert!(matches!(
        kernel.read_flags(pid, &["q"]),
        Err(KernelError::Process(SystemProcessException::MissingFlag(_)))
    ));
    assert_eq!(kernel.read_flags(pid, &["n", "z", "c", "v"]).unwrap().len(), 4);
    assert!(kernel.clear_breakpoint(pid, TEXT + 12).unwrap());
    assert!(!kernel.clear_breakpoint(pid, TEXT + 12).unwrap());

    assert_eq!(kernel.resume(pid), Ok(Halt::EndOfProgram));
    assert!(kernel.dump_registers(pid).unwrap().starts_with("  x0: 0x0000000000000011"));
}

#[test]
fn stores_below_the_stack_top_show_up_in_memory_reads() {
    let program = [
        Instruction::SubImm { rd: 31, rn: 31, imm12: 16, shift12: false, sf: true, set_flags: false },
        movz(1, 0x22, 0),
        Instruction::Str { rt: 1, rn: 31, offset: 8, width: MemWidth::Double },
    ];
    let mut kernel = Kernel::new(KernelConfig::default());
    let pid = kernel.spawn_process(&image(&program, &[]), 0).unwrap();
    assert_eq!(kernel.run(pid), Ok(Halt::EndOfProgram));
    let sp = kernel.read_registers(pid, &["sp"]).unwrap()[0].1;
    assert_eq!(kernel.read_memory(pid, sp + 16, -1).unwrap(), vec![0x22]);
    assert_eq!(kernel.read_memory(pid, sp, 2).unwrap(), vec![0, 0x22]);
    assert!(kernel.dump_memory(pid, sp + 8, 8).unwrap().ends_with("2200000000000000\n"));
    assert!(kernel.last_diff(pid).unwrap().memory.contains(&(sp + 8)));
}
