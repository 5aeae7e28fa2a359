use thiserror::Error;
use vm::memory::VirtualMemoryError;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DynamicLinkerError {
    #[error("malformed image header: {0}")]
    MalformedHeader(String),
    #[error("could not decode load command {index}: {reason}")]
    CouldNotDecodeLoadCommand { index: u32, reason: String },
    #[error("image has no entry point")]
    EntryPointMissing,
    #[error("image has no segment load commands")]
    LoadCommandsMissing,
    #[error("mapping segment failed: {0}")]
    SegmentMapping(#[from] VirtualMemoryError),
}
