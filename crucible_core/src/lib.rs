//! Core types shared across the Crucible virtual machine.
//!
//! This crate defines the two-class error taxonomy (guest-visible
//! exceptions vs. internal faults) and the symbolic member resolution
//! records used by the dynamic call linker. It deliberately knows nothing
//! about objects, memory, or instructions; those live in `crucible_memory`
//! and `crucible_vm`.

pub mod error;
pub mod member;

pub use error::{Fault, GuestException, VmError, VmResult};
pub use member::{MemberKind, MemberRecord, RefKind};
