use std::mem::size_of;

use goblin::mach::constants::cputype::{CPU_SUBTYPE_ARM64_ALL, CPU_TYPE_ARM64};
use goblin::mach::header::{Header64, MH_EXECUTE, MH_MAGIC_64};
use goblin::mach::load_command::{EntryPointCommand, SegmentCommand64, LC_MAIN, LC_SEGMENT_64};
use scroll::Pwrite;
use types::address::page_align_up;
use types::{Address, Layout, Protection};

#[derive(Debug, Clone)]
struct SegmentData {
    name: String,
    vmaddr: Address,
    vmsize: u64,
    protection: Protection,
    bytes: Vec<u8>,
}

/// Writes loadable images: a Mach-O header, an optional `LC_MAIN`, one
/// `LC_SEGMENT_64` per segment, then the segment bytes back to back.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    entry: Option<(Address, u64)>,
    segments: Vec<SegmentData>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry_point: Address, stack_size: u64) -> Self {
        self.entry = Some((entry_point, stack_size));
        self
    }

    pub fn segment(
        mut self,
        name: &str,
        vmaddr: Address,
        vmsize: u64,
        protection: Protection,
        bytes: Vec<u8>,
    ) -> Self {
        self.segments.push(SegmentData {
            name: name.to_string(),
            vmaddr,
            vmsize,
            protection,
            bytes,
        });
        self
    }

    /// `__TEXT` segment (r-x) sized to the next page boundary.
    pub fn text(self, vmaddr: Address, code: Vec<u8>) -> Self {
        let vmsize = page_align_up(code.len().max(1) as u64).unwrap_or(Layout::PAGE_SIZE as u64);
        self.segment("__TEXT", vmaddr, vmsize, Protection::rx(), code)
    }

    /// `__DATA` segment (rw-) sized to the next page boundary.
    pub fn data(self, vmaddr: Address, bytes: Vec<u8>) -> Self {
        let vmsize = page_align_up(bytes.len().max(1) as u64).unwrap_or(Layout::PAGE_SIZE as u64);
        self.segment("__DATA", vmaddr, vmsize, Protection::rw(), bytes)
    }

    pub fn build(&self) -> Result<Vec<u8>, scroll::Error> {
        let main_size = size_of::<EntryPointCommand>();
        let segment_size = size_of::<SegmentCommand64>();
        let ncmds = self.segments.len() + self.entry.is_some() as usize;
        let sizeofcmds = self.segments.len() * segment_size + if self.entry.is_some() { main_size } else { 0 };
        let data_start = size_of::<Header64>() + sizeofcmds;
        let total = data_start + self.segments.iter().map(|s| s.bytes.len()).sum::<usize>();

        let mut out = vec![0u8; total];
        let header = Header64 {
            magic: MH_MAGIC_64,
            cputype: CPU_TYPE_ARM64,
            cpusubtype: CPU_SUBTYPE_ARM64_ALL,
            filetype: MH_EXECUTE,
            ncmds: ncmds as u32,
            sizeofcmds: sizeofcmds as u32,
            flags: 0,
            reserved: 0,
        };
        let mut offset = out.pwrite_with(header, 0, scroll::LE)?;

        if let Some((entryoff, stacksize)) = self.entry {
            let main = EntryPointCommand {
                cmd: LC_MAIN,
                cmdsize: main_size as u32,
                entryoff,
                stacksize,
            };
            offset += out.pwrite_with(main, offset, scroll::LE)?;
        }

        let mut fileoff = data_start;
        for segment in &self.segments {
            let mut segname = [0u8; 16];
            let name = segment.name.as_bytes();
            let len = name.len().min(segname.len());
            segname[..len].copy_from_slice(&name[..len]);
            let command = SegmentCommand64 {
                cmd: LC_SEGMENT_64,
                cmdsize: segment_size as u32,
                segname,
                vmaddr: segment.vmaddr,
                vmsize: segment.vmsize,
                fileoff: fileoff as u64,
                filesize: segment.bytes.len() as u64,
                maxprot: segment.protection.bits() as _,
                initprot: segment.protection.bits() as _,
                nsects: 0,
                flags: 0,
            };
            offset += out.pwrite_with(command, offset, scroll::LE)?;
            out[fileoff..fileoff + segment.bytes.len()].copy_from_slice(&segment.bytes);
            fileoff += segment.bytes.len();
        }
        debug_assert_eq!(offset, data_start);
        Ok(out)
    }
}
