//! Primitives shared by every layer of the sandbox: addresses, identities,
//! the address-space layout and segment protection bits.

pub mod address;
pub use address::{AccessMode, Address};

pub mod layout;
pub use layout::Layout;

pub mod protection;
pub use protection::Protection;

/// Process identifier handed out by the kernel supervisor.
pub type Pid = u32;
/// User identifier.
pub type Uid = u32;
/// Group identifier.
pub type Gid = u32;
