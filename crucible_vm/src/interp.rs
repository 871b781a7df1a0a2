//! The dispatch loop.
//!
//! One iteration per instruction: capture the position, advance the
//! program counter, record line markers, consult interceptors, then run
//! the bound processor. Guest exceptions raised by a processor are
//! delivered through the method's exception table at the capturing
//! position; internal faults pass through untouched.

use crate::context::ExecutionContext;
use crate::dispatch::{Control, InterceptVerdict};
use crate::insn::{Insn, MethodCode};
use crate::resolve;
use crate::value::Value;
use crate::vm::Vm;
use crucible_core::{Fault, GuestException, VmError, VmResult};

/// How a method activation ended.
#[derive(Debug)]
pub enum Outcome {
    /// Normal completion, with the return value if the method has one.
    Returned(Option<Value>),
    /// An interceptor stopped execution before an instruction ran.
    Aborted,
}

/// Runs a method body to completion.
pub fn execute(vm: &Vm, ctx: &mut ExecutionContext, code: &MethodCode) -> VmResult<Outcome> {
    let interceptors = vm.interceptor_snapshot();
    loop {
        let position = ctx.pc();
        let insn = match code.insns.get(position as usize) {
            Some(insn) => insn,
            None => {
                ctx.unwind();
                return Err(Fault::PcOutOfRange {
                    pc: position,
                    len: code.insns.len(),
                }
                .into());
            }
        };
        ctx.set_pc(position + 1);

        // Line markers update the context before interceptors run, so an
        // observer already sees the marker's line when it fires.
        if let Insn::Line(line) = insn {
            if vm.options().track_line_numbers {
                ctx.set_line(*line);
            }
        }

        let mut aborted = false;
        for interceptor in &interceptors {
            if interceptor.before(vm, ctx, insn) == InterceptVerdict::Abort {
                aborted = true;
                break;
            }
        }
        if aborted {
            ctx.unwind();
            return Ok(Outcome::Aborted);
        }

        // Pseudo-instructions carry no opcode and never reach a
        // processor; interception above is all they participate in.
        let Some(opcode) = insn.opcode() else {
            continue;
        };

        let processor = vm.processors().lookup(opcode);
        let step = match processor {
            Some(processor) => processor(vm, ctx, insn),
            // A missing processor surfaces as a guest error so handlers
            // can observe it, same as any other throw.
            None => Err(vm.raise(
                "java/lang/InternalError",
                Some(format!("no processor bound for opcode {opcode:#04x}")),
            )),
        };

        match step {
            Ok(Control::Continue) => {}
            Ok(Control::Jump(target)) => ctx.set_pc(target),
            Ok(Control::Return(value)) => {
                ctx.unwind();
                return Ok(Outcome::Returned(value));
            }
            Err(VmError::Exception(ex)) => deliver(vm, ctx, code, position, ex)?,
            Err(fault) => {
                ctx.unwind();
                return Err(fault);
            }
        }
    }
}

/// Searches the exception table for a handler covering `position`.
///
/// Held monitors are released first, before any entry is consulted; a
/// handler in the same frame therefore runs with the frame's monitors
/// already gone.
///
/// Entries are consulted in declaration order. If resolving an entry's
/// catch type itself raises, the new exception replaces the current one,
/// is treated as thrown at that entry's handler position, and the scan
/// restarts from the top of the table. There is no bound on restarts; a
/// cyclic table is the program's own bug.
///
/// On a match the operand stack is cleared, the thrown object pushed,
/// and the program counter set to the handler. On exhaustion the
/// exception propagates.
fn deliver(
    vm: &Vm,
    ctx: &mut ExecutionContext,
    code: &MethodCode,
    position: u32,
    exception: GuestException,
) -> VmResult<()> {
    ctx.unwind();
    let mut index = position;
    let mut current = exception;
    let mut thrown_class = vm.exception_class(&current);
    'search: loop {
        for entry in &code.exception_table {
            if !entry.covers(index) {
                continue;
            }
            let matches = match &entry.catch_type {
                None => true,
                Some(catch) => match resolve::resolve_class(vm, catch) {
                    Ok(catch_class) => thrown_class
                        .as_deref()
                        .is_some_and(|thrown| catch_class.is_assignable_from(thrown)),
                    Err(VmError::Exception(new_ex)) => {
                        current = new_ex;
                        thrown_class = vm.exception_class(&current);
                        index = entry.handler;
                        continue 'search;
                    }
                    Err(fault) => return Err(fault),
                },
            };
            if matches {
                ctx.stack().clear();
                let object = vm.exception_object(&current);
                ctx.stack().push_reference(object);
                ctx.set_pc(entry.handler);
                return Ok(());
            }
        }
        return Err(VmError::Exception(current));
    }
}
