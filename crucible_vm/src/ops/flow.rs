//! Branch, return, and throw processors.

use crate::context::ExecutionContext;
use crate::dispatch::{Control, ProcessorTable};
use crate::insn::Insn;
use crate::ops::mismatch;
use crate::vm::Vm;
use crucible_core::{VmError, VmResult};

pub(crate) fn bind(table: &mut ProcessorTable) {
    table.bind(0x50, goto);
    table.bind(0x51, if_zero);
    table.bind(0x52, if_icmp);
    table.bind(0x53, if_null);
    table.bind(0x54, if_non_null);
    table.bind(0x60, return_void);
    table.bind(0x61, return_value);
    table.bind(0x62, return_wide);
    table.bind(0x79, throw);
}

fn goto(_vm: &Vm, _ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::Goto(target) = insn else {
        return Err(mismatch("goto", insn));
    };
    Ok(Control::Jump(*target))
}

fn if_zero(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::If(cond, target) = insn else {
        return Err(mismatch("if", insn));
    };
    let v = ctx.stack().pop_int()?;
    Ok(if cond.holds(v, 0) {
        Control::Jump(*target)
    } else {
        Control::Continue
    })
}

fn if_icmp(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::IfICmp(cond, target) = insn else {
        return Err(mismatch("if_icmp", insn));
    };
    let rhs = ctx.stack().pop_int()?;
    let lhs = ctx.stack().pop_int()?;
    Ok(if cond.holds(lhs, rhs) {
        Control::Jump(*target)
    } else {
        Control::Continue
    })
}

fn if_null(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::IfNull(target) = insn else {
        return Err(mismatch("ifnull", insn));
    };
    let v = ctx.stack().pop_reference()?;
    Ok(if v.is_none() {
        Control::Jump(*target)
    } else {
        Control::Continue
    })
}

fn if_non_null(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::IfNonNull(target) = insn else {
        return Err(mismatch("ifnonnull", insn));
    };
    let v = ctx.stack().pop_reference()?;
    Ok(if v.is_some() {
        Control::Jump(*target)
    } else {
        Control::Continue
    })
}

fn return_void(_vm: &Vm, _ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    Ok(Control::Return(None))
}

fn return_value(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let value = ctx.stack().pop()?;
    Ok(Control::Return(Some(value)))
}

fn return_wide(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let value = ctx.stack().pop_wide()?;
    Ok(Control::Return(Some(value)))
}

fn throw(vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let thrown = ctx.stack().pop_reference()?;
    match thrown {
        Some(object) => Err(VmError::Exception(vm.exception_from_object(&object))),
        None => Err(vm.raise_npe()),
    }
}
