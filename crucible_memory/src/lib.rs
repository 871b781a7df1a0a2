//! Bounds-checked, byte-addressable memory for the Crucible VM.
//!
//! Every field, static, and array slot in the VM is backed by a
//! [`MemoryRegion`]. Regions either own their backing allocation or are
//! bounded slices translating offsets into a shared backing; all regions
//! over one backing alias, so a write through any slice is visible through
//! every other.
//!
//! Two access modes are provided:
//!
//! - **Plain** — no cross-operation ordering guarantee; the fast path.
//! - **Ordered** — atomic for the access width when the offset is aligned;
//!   at unaligned offsets the value is assembled byte by byte, which is
//!   correct but not atomic mid-flight. Single-byte access is always
//!   atomic.
//!
//! Out-of-bounds access of any width is a [`Fault`], not a guest
//! exception: it signals an interpreter-internal invariant breach.

mod region;

pub use region::{ByteOrder, MemoryRegion};

pub use crucible_core::Fault;
