//! Constant, local, and stack-shuffling processors.

use crate::context::ExecutionContext;
use crate::dispatch::{Control, ProcessorTable};
use crate::insn::Insn;
use crate::ops::mismatch;
use crate::vm::Vm;
use crucible_core::{Fault, VmResult};

pub(crate) fn bind(table: &mut ProcessorTable) {
    table.bind(0x00, nop);
    table.bind(0x01, push_int);
    table.bind(0x02, push_long);
    table.bind(0x03, push_float);
    table.bind(0x04, push_double);
    table.bind(0x05, push_null);
    table.bind(0x06, push_string);
    table.bind(0x10, load);
    table.bind(0x11, store);
    table.bind(0x12, load_wide);
    table.bind(0x13, store_wide);
    table.bind(0x14, inc);
    table.bind(0x20, pop);
    table.bind(0x21, pop2);
    table.bind(0x22, dup);
    table.bind(0x23, dup_x1);
    table.bind(0x24, swap);
}

fn nop(_vm: &Vm, _ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    Ok(Control::Continue)
}

fn push_int(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::PushInt(v) = insn else {
        return Err(mismatch("push.i", insn));
    };
    ctx.stack().push_int(*v);
    Ok(Control::Continue)
}

fn push_long(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::PushLong(v) = insn else {
        return Err(mismatch("push.l", insn));
    };
    ctx.stack().push_long(*v);
    Ok(Control::Continue)
}

fn push_float(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::PushFloat(v) = insn else {
        return Err(mismatch("push.f", insn));
    };
    ctx.stack().push_float(*v);
    Ok(Control::Continue)
}

fn push_double(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::PushDouble(v) = insn else {
        return Err(mismatch("push.d", insn));
    };
    ctx.stack().push_double(*v);
    Ok(Control::Continue)
}

fn push_null(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    ctx.stack().push_reference(None);
    Ok(Control::Continue)
}

fn push_string(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::PushString(text) = insn else {
        return Err(mismatch("push.str", insn));
    };
    let object = vm.intern(text);
    ctx.stack().push_reference(Some(object));
    Ok(Control::Continue)
}

fn load(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::Load(slot) = insn else {
        return Err(mismatch("load", insn));
    };
    let value = ctx.locals().load(*slot as usize)?;
    if value.is_wide() {
        return Err(Fault::TypeConfusion {
            expected: "single-slot local",
            found: value.kind_name(),
        }
        .into());
    }
    ctx.stack().push(value);
    Ok(Control::Continue)
}

fn load_wide(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::LoadWide(slot) = insn else {
        return Err(mismatch("load.w", insn));
    };
    let value = ctx.locals().load(*slot as usize)?;
    if !value.is_wide() {
        return Err(Fault::TypeConfusion {
            expected: "wide local",
            found: value.kind_name(),
        }
        .into());
    }
    ctx.stack().push(value);
    Ok(Control::Continue)
}

fn store(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::Store(slot) = insn else {
        return Err(mismatch("store", insn));
    };
    let value = ctx.stack().pop()?;
    let slot = *slot as usize;
    ctx.locals().store(slot, value)?;
    Ok(Control::Continue)
}

fn store_wide(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::StoreWide(slot) = insn else {
        return Err(mismatch("store.w", insn));
    };
    let value = ctx.stack().pop_wide()?;
    let slot = *slot as usize;
    ctx.locals().store(slot, value)?;
    Ok(Control::Continue)
}

fn inc(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::Inc(slot, delta) = insn else {
        return Err(mismatch("inc", insn));
    };
    ctx.locals().inc(*slot as usize, *delta)?;
    Ok(Control::Continue)
}

fn pop(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    ctx.stack().pop()?;
    Ok(Control::Continue)
}

fn pop2(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    ctx.stack().pop2()?;
    Ok(Control::Continue)
}

fn dup(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let value = ctx.stack().pop()?;
    ctx.stack().push(value.clone());
    ctx.stack().push(value);
    Ok(Control::Continue)
}

fn dup_x1(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let v1 = ctx.stack().pop()?;
    let v2 = ctx.stack().pop()?;
    ctx.stack().push(v1.clone());
    ctx.stack().push(v2);
    ctx.stack().push(v1);
    Ok(Control::Continue)
}

fn swap(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let v1 = ctx.stack().pop()?;
    let v2 = ctx.stack().pop()?;
    ctx.stack().push(v1);
    ctx.stack().push(v2);
    Ok(Control::Continue)
}
