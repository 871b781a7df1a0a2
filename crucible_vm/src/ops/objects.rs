//! Allocation, type-check, and monitor processors.

use crate::context::ExecutionContext;
use crate::dispatch::{Control, ProcessorTable};
use crate::insn::Insn;
use crate::ops::mismatch;
use crate::resolve;
use crate::vm::Vm;
use crucible_core::VmResult;

pub(crate) fn bind(table: &mut ProcessorTable) {
    table.bind(0x70, new);
    table.bind(0x75, checkcast);
    table.bind(0x76, instance_of);
    table.bind(0x77, monitor_enter);
    table.bind(0x78, monitor_exit);
}

fn new(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::New(site) = insn else {
        return Err(mismatch("new", insn));
    };
    let class = resolve::resolve_class(vm, site)?;
    vm.ensure_initialized(&class)?;
    let object = vm.alloc_instance(&class);
    ctx.stack().push_reference(Some(object));
    Ok(Control::Continue)
}

fn checkcast(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::CheckCast(site) = insn else {
        return Err(mismatch("checkcast", insn));
    };
    let class = resolve::resolve_class(vm, site)?;
    let value = ctx.stack().pop_reference()?;
    if let Some(object) = &value {
        if !class.is_assignable_from(object.class()) {
            return Err(vm.raise(
                "java/lang/ClassCastException",
                Some(format!(
                    "class {} cannot be cast to class {}",
                    object.class().name(),
                    class.name()
                )),
            ));
        }
    }
    ctx.stack().push_reference(value);
    Ok(Control::Continue)
}

fn instance_of(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::InstanceOf(site) = insn else {
        return Err(mismatch("instanceof", insn));
    };
    let class = resolve::resolve_class(vm, site)?;
    let value = ctx.stack().pop_reference()?;
    let result = match value {
        Some(object) => class.is_assignable_from(object.class()) as i32,
        None => 0,
    };
    ctx.stack().push_int(result);
    Ok(Control::Continue)
}

fn monitor_enter(vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    match ctx.stack().pop_reference()? {
        Some(object) => {
            object.monitor().enter();
            ctx.monitor_entered(object);
            Ok(Control::Continue)
        }
        None => Err(vm.raise_npe()),
    }
}

fn monitor_exit(vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    match ctx.stack().pop_reference()? {
        Some(object) => {
            if !object.monitor().exit() {
                return Err(vm.raise("java/lang/IllegalMonitorStateException", None));
            }
            ctx.monitor_exited(&object);
            Ok(Control::Continue)
        }
        None => Err(vm.raise_npe()),
    }
}
