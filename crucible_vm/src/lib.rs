//! Bytecode virtual machine core.
//!
//! The crate is organized around four cooperating parts:
//!
//! - [`vm`] — the machine itself: class registry, heap, native bridge,
//!   and the invocation entry point.
//! - [`interp`] and [`dispatch`] — the dispatch loop and the rebindable
//!   opcode-indexed processor table, with exception-table delivery.
//! - [`ops`] — the standard instruction processors.
//! - [`linker`] — dynamic call-site linkage and invocation.
//!
//! Method bodies are pre-decoded [`insn::Insn`] sequences. Object and
//! array storage is byte-addressed through `crucible_memory` regions;
//! references in storage are 64-bit handles resolved through the VM's
//! handle pool.

pub mod context;
pub mod desc;
pub mod dispatch;
pub mod insn;
pub mod interp;
pub mod linker;
pub mod locals;
pub mod mirror;
pub mod natives;
pub mod object;
pub mod ops;
pub mod resolve;
pub mod stack;
pub mod symbols;
pub mod value;
pub mod vm;

pub use crucible_core::{
    Fault, GuestException, MemberKind, MemberRecord, RefKind, VmError, VmResult,
};
pub use crucible_memory::{ByteOrder, MemoryRegion};

pub use context::ExecutionContext;
pub use dispatch::{Control, InstructionInterceptor, InterceptVerdict, Processor, ProcessorTable};
pub use interp::Outcome;
pub use linker::{BootstrapArg, BootstrapRef, CallSiteNode};
pub use mirror::{ClassBuilder, ClassMirror, FieldMirror, MethodMirror};
pub use object::{ArrayKind, HandlePool, HostPayload, Monitor, Object};
pub use value::{ObjectRef, Value};
pub use vm::{ExecutionOptions, Vm};
