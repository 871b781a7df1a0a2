//! Invocation processors.
//!
//! Arguments are popped in reverse declaration order and reassembled
//! receiver-first before the callee runs. Virtual and interface calls
//! re-select on the receiver's dynamic class; special calls use the
//! resolved method as-is. Dynamic calls defer to the call-site linker.

use crate::context::ExecutionContext;
use crate::desc::{MethodDescriptor, TypeDesc};
use crate::dispatch::{Control, ProcessorTable};
use crate::insn::Insn;
use crate::linker;
use crate::ops::mismatch;
use crate::resolve;
use crate::stack::OperandStack;
use crate::value::Value;
use crate::vm::Vm;
use crucible_core::VmResult;

pub(crate) fn bind(table: &mut ProcessorTable) {
    table.bind(0x90, invoke_virtual);
    table.bind(0x91, invoke_static);
    table.bind(0x92, invoke_special);
    table.bind(0x93, invoke_virtual);
    table.bind(0x94, invoke_dynamic);
}

/// Pops declared arguments off the stack, restoring declaration order.
pub(crate) fn pop_args(
    stack: &mut OperandStack,
    desc: &MethodDescriptor,
) -> VmResult<Vec<Value>> {
    let mut args = Vec::with_capacity(desc.params.len());
    for param in desc.params.iter().rev() {
        let value = match param {
            TypeDesc::Long => Value::Long(stack.pop_long()?),
            TypeDesc::Double => Value::Double(stack.pop_double()?),
            TypeDesc::Float => Value::Float(stack.pop_float()?),
            TypeDesc::Object(_) | TypeDesc::Array(_) => {
                Value::Reference(stack.pop_reference()?)
            }
            _ => Value::Int(stack.pop_int()?),
        };
        args.push(value);
    }
    args.reverse();
    Ok(args)
}

/// Pushes a call result, if the callee produced one.
pub(crate) fn push_result(stack: &mut OperandStack, result: Option<Value>) {
    if let Some(value) = result {
        stack.push(value);
    }
}

fn invoke_static(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::InvokeStatic(site) = insn else {
        return Err(mismatch("invokestatic", insn));
    };
    let (class, method) = resolve::resolve_method(vm, site)?;
    vm.ensure_initialized(&class)?;
    let args = pop_args(ctx.stack(), &method.desc)?;
    let result = vm.invoke(&method, args)?;
    push_result(ctx.stack(), result);
    Ok(Control::Continue)
}

fn invoke_virtual(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let site = match insn {
        Insn::InvokeVirtual(site) | Insn::InvokeInterface(site) => site,
        _ => return Err(mismatch("invokevirtual", insn)),
    };
    let (_, resolved) = resolve::resolve_method(vm, site)?;
    let mut args = pop_args(ctx.stack(), &resolved.desc)?;
    let receiver = ctx.stack().pop_reference()?.ok_or_else(|| vm.raise_npe())?;
    let selected = resolve::select_virtual(receiver.class(), &resolved);
    args.insert(0, Value::Reference(Some(receiver)));
    let result = vm.invoke(&selected, args)?;
    push_result(ctx.stack(), result);
    Ok(Control::Continue)
}

fn invoke_special(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::InvokeSpecial(site) = insn else {
        return Err(mismatch("invokespecial", insn));
    };
    let (_, method) = resolve::resolve_method(vm, site)?;
    let mut args = pop_args(ctx.stack(), &method.desc)?;
    let receiver = ctx.stack().pop_reference()?.ok_or_else(|| vm.raise_npe())?;
    args.insert(0, Value::Reference(Some(receiver)));
    let result = vm.invoke(&method, args)?;
    push_result(ctx.stack(), result);
    Ok(Control::Continue)
}

fn invoke_dynamic(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::InvokeDynamic(node) = insn else {
        return Err(mismatch("invokedynamic", insn));
    };
    let args = pop_args(ctx.stack(), node.descriptor())?;
    let caller = vm.find_class(&ctx.method().owner)?;
    let result = linker::dynamic_call(vm, node, &caller, args)?;
    push_result(ctx.stack(), result);
    Ok(Control::Continue)
}
