//! Processor dispatch.
//!
//! Every opcode byte indexes into a 256-entry table of processor
//! functions. The table is populated with the standard set at startup and
//! stays rebindable: embedders can replace or remove individual
//! processors. Dispatching an opcode with no bound processor raises a
//! guest `InternalError` through the normal exception channel, so guest
//! handlers can observe it.

use crate::context::ExecutionContext;
use crate::insn::Insn;
use crate::value::Value;
use crate::vm::Vm;
use crucible_core::VmResult;

/// What a processor tells the dispatch loop to do next.
#[derive(Debug)]
pub enum Control {
    /// Fall through to the next instruction.
    Continue,
    /// Transfer to an instruction index.
    Jump(u32),
    /// Leave the method with an optional result.
    Return(Option<Value>),
}

/// An instruction processor.
pub type Processor = fn(&Vm, &mut ExecutionContext, &Insn) -> VmResult<Control>;

/// Verdict of an instruction interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptVerdict {
    Continue,
    /// Stop before the instruction executes; no side effects occur.
    Abort,
}

/// Hook consulted before each instruction, pseudo-instructions included.
///
/// A line marker updates the context's line before interceptors run, so
/// an observer always sees the current line; aborting on a marker stops
/// the method like aborting on any other instruction.
pub trait InstructionInterceptor: Send + Sync {
    fn before(&self, vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> InterceptVerdict;
}

impl std::fmt::Debug for dyn InstructionInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InstructionInterceptor")
    }
}

/// Opcode-indexed processor table.
pub struct ProcessorTable {
    handlers: [Option<Processor>; 256],
}

impl ProcessorTable {
    /// An empty table; every dispatch raises `InternalError`.
    pub const fn empty() -> Self {
        Self {
            handlers: [None; 256],
        }
    }

    /// The standard table with all built-in processors bound.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        crate::ops::bind_all(&mut table);
        table
    }

    /// Binds a processor, replacing any previous binding.
    pub fn bind(&mut self, opcode: u8, processor: Processor) -> Option<Processor> {
        self.handlers[opcode as usize].replace(processor)
    }

    /// Removes a binding.
    pub fn unbind(&mut self, opcode: u8) -> Option<Processor> {
        self.handlers[opcode as usize].take()
    }

    #[inline]
    pub fn lookup(&self, opcode: u8) -> Option<Processor> {
        self.handlers[opcode as usize]
    }
}

impl std::fmt::Debug for ProcessorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = self.handlers.iter().filter(|h| h.is_some()).count();
        f.debug_struct("ProcessorTable").field("bound", &bound).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Vm, _: &mut ExecutionContext, _: &Insn) -> VmResult<Control> {
        Ok(Control::Continue)
    }

    #[test]
    fn test_bind_unbind() {
        let mut table = ProcessorTable::empty();
        assert!(table.lookup(0x30).is_none());
        assert!(table.bind(0x30, noop).is_none());
        assert!(table.lookup(0x30).is_some());
        assert!(table.unbind(0x30).is_some());
        assert!(table.lookup(0x30).is_none());
    }

    #[test]
    fn test_standard_covers_core_opcodes() {
        let table = ProcessorTable::standard();
        for opcode in [0x01, 0x30, 0x31, 0x50, 0x60, 0x83, 0x91, 0x94] {
            assert!(table.lookup(opcode).is_some(), "opcode {opcode:#x} unbound");
        }
        assert!(table.lookup(0xFF).is_none());
    }
}
