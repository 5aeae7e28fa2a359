//! Loader for the sandbox's executable images.
//!
//! An image is a 64-bit little-endian Mach-O file carrying an `LC_MAIN`
//! command and one or more `LC_SEGMENT_64` commands. Loading maps every
//! segment, adds a `Stack` segment at the top of user space and copies the
//! file-backed bytes in. There are no imports or relocations.

pub mod error;
pub mod image_builder;
pub mod loader;

pub use error::DynamicLinkerError;
pub use image_builder::ImageBuilder;
pub use loader::{DynamicLinker, LoaderConfig};
