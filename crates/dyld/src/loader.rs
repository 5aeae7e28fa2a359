use goblin::mach::constants::cputype::CPU_TYPE_ARM64;
use goblin::mach::header::{Header64, MH_MAGIC_64};
use goblin::mach::load_command::{CommandVariant, LoadCommand, SegmentCommand64};
use scroll::Pread;
use types::address::page_align_up;
use types::{AccessMode, Address, Layout, Protection};
use vm::memory::{Segment, VirtualMemory, VirtualMemoryError};
use vm::ProgramImage;

use crate::error::DynamicLinkerError;

/// Loader configuration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Stack size used when `LC_MAIN` asks for 0.
    pub default_stack_size: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            default_stack_size: 64 * 1024,
        }
    }
}

/// One `LC_SEGMENT_64`, reduced to what the loader maps.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SegmentSpec {
    name: String,
    vmaddr: Address,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    protection: Protection,
}

impl SegmentSpec {
    fn from_command(command: &SegmentCommand64) -> Self {
        let len = command
            .segname
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(command.segname.len());
        Self {
            name: String::from_utf8_lossy(&command.segname[..len]).into_owned(),
            vmaddr: command.vmaddr,
            vmsize: command.vmsize,
            fileoff: command.fileoff,
            filesize: command.filesize,
            protection: Protection::from_vm_prot(command.initprot as u32),
        }
    }

    fn contains(&self, address: Address) -> bool {
        address >= self.vmaddr && address - self.vmaddr < self.vmsize
    }
}

/// Turns raw image bytes into a populated address space.
#[derive(Debug, Default, Clone)]
pub struct DynamicLinker {
    pub config: LoaderConfig,
}

impl DynamicLinker {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn load_binary(&self, bytes: &[u8]) -> Result<ProgramImage, DynamicLinkerError> {
        let header: Header64 = bytes
            .pread_with(0, scroll::LE)
            .map_err(|error| DynamicLinkerError::MalformedHeader(error.to_string()))?;
        if header.magic != MH_MAGIC_64 {
            return Err(DynamicLinkerError::MalformedHeader(format!(
                "bad magic 0x{:08x}",
                header.magic
            )));
        }
        if header.cputype != CPU_TYPE_ARM64 {
            return Err(DynamicLinkerError::MalformedHeader(format!(
                "unsupported cpu type 0x{:08x}",
                header.cputype
            )));
        }
        log::debug!(
            "image: cpusubtype=0x{:x} filetype={} ncmds={} flags=0x{:x}",
            header.cpusubtype,
            header.filetype,
            header.ncmds,
            header.flags
        );

        let mut main: Option<(Address, u64)> = None;
        let mut segments: Vec<SegmentSpec> = Vec::new();
        let mut offset = std::mem::size_of::<Header64>();
        for index in 0..header.ncmds {
            let command_offset = offset;
            let command = LoadCommand::parse(bytes, &mut offset, scroll::LE).map_err(|error| {
                DynamicLinkerError::CouldNotDecodeLoadCommand {
                    index,
                    reason: error.to_string(),
                }
            })?;
            match command.command {
                CommandVariant::Main(entry) => {
                    log::debug!("LC_MAIN entry=0x{:x} stacksize=0x{:x}", entry.entryoff, entry.stacksize);
                    main = Some((entry.entryoff, entry.stacksize));
                }
                CommandVariant::Segment64(segment) => {
                    let spec = SegmentSpec::from_command(&segment);
                    validate_file_range(&spec, bytes.len(), index)?;
                    log::debug!(
                        "LC_SEGMENT_64 {} vmaddr=0x{:x} vmsize=0x{:x} fileoff=0x{:x} filesize=0x{:x} {}",
                        spec.name,
                        spec.vmaddr,
                        spec.vmsize,
                        spec.fileoff,
                        spec.filesize,
                        spec.protection
                    );
                    segments.push(spec);
                }
                // Only LC_MAIN and LC_SEGMENT_64 are understood; anything
                // else, even a kind goblin can parse, is rejected.
                _ => {
                    let cmd: u32 = bytes.pread_with(command_offset, scroll::LE).unwrap_or_default();
                    return Err(DynamicLinkerError::CouldNotDecodeLoadCommand {
                        index,
                        reason: format!("unsupported load command 0x{:x}", cmd),
                    });
                }
            }
        }

        if segments.is_empty() {
            return Err(DynamicLinkerError::LoadCommandsMissing);
        }
        let (entry_point, requested_stack) = main.ok_or(DynamicLinkerError::EntryPointMissing)?;
        let program_end = segments
            .iter()
            .find(|segment| segment.contains(entry_point))
            .map(|segment| segment.vmaddr + segment.filesize)
            .ok_or(DynamicLinkerError::EntryPointMissing)?;

        let mut memory = VirtualMemory::new();
        for spec in segments.iter().filter(|spec| spec.vmsize > 0) {
            let size = page_align_up(spec.vmsize)
                .ok_or(VirtualMemoryError::SegmentationFault(spec.vmaddr))?;
            memory.map(
                Segment::new(spec.name.clone(), spec.vmaddr, size, spec.protection),
                AccessMode::User,
            )?;
        }

        let stack_size = match requested_stack {
            0 => self.config.default_stack_size,
            size => size,
        };
        let stack_size = page_align_up(stack_size)
            .filter(|size| *size > 0 && *size < Layout::USER_SPACE_END)
            .ok_or(VirtualMemoryError::InvalidMemoryPageAddress(stack_size))?;
        let stack_base = Layout::USER_SPACE_END - stack_size;
        memory.map(
            Segment::new(Layout::STACK_SEGMENT, stack_base, stack_size, Protection::rw()),
            AccessMode::User,
        )?;

        for spec in &segments {
            if spec.filesize == 0 {
                continue;
            }
            let start = spec.fileoff as usize;
            let end = start + spec.filesize as usize;
            memory.populate(spec.vmaddr, &bytes[start..end])?;
        }

        log::debug!(
            "loaded image: entry=0x{:x} stack=0x{:x}+0x{:x} end=0x{:x}",
            entry_point,
            stack_base,
            stack_size,
            program_end
        );
        Ok(ProgramImage {
            memory,
            entry_point,
            stack_base,
            stack_size,
            program_end,
        })
    }
}

/// File-backed bytes must lie inside the file and fit in the segment.
fn validate_file_range(spec: &SegmentSpec, file_len: usize, index: u32) -> Result<(), DynamicLinkerError> {
    let in_file = spec
        .fileoff
        .checked_add(spec.filesize)
        .is_some_and(|end| end <= file_len as u64);
    if !in_file || spec.filesize > spec.vmsize {
        return Err(DynamicLinkerError::CouldNotDecodeLoadCommand {
            index,
            reason: format!(
                "segment {} file range 0x{:x}+0x{:x} is out of bounds",
                spec.name, spec.fileoff, spec.filesize
            ),
        });
    }
    Ok(())
}
