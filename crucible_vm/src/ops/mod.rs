//! The standard instruction processors.
//!
//! Each submodule owns one opcode family and binds its processors into
//! the table. Processors receive the full instruction and re-match on
//! it; a mismatch means the table was rebound inconsistently and is
//! reported as a fault.

use crate::dispatch::ProcessorTable;
use crate::insn::Insn;
use crucible_core::{Fault, VmError};

pub mod arithmetic;
pub mod array;
pub mod field;
pub mod flow;
pub mod invoke;
pub mod load_store;
pub mod objects;

pub(crate) fn bind_all(table: &mut ProcessorTable) {
    load_store::bind(table);
    arithmetic::bind(table);
    flow::bind(table);
    objects::bind(table);
    array::bind(table);
    field::bind(table);
    invoke::bind(table);
}

/// Fault for a processor invoked on the wrong instruction form.
pub(crate) fn mismatch(expected: &'static str, insn: &Insn) -> VmError {
    Fault::TypeConfusion {
        expected,
        found: insn.mnemonic(),
    }
    .into()
}
