//! Array processors.
//!
//! Checks run in a fixed order before the substrate is touched: null
//! receiver first, then bounds, so a null array with a wild index still
//! raises `NullPointerException`. Element addresses are always in range
//! once the index check passes; the region itself would fault otherwise.

use crate::context::ExecutionContext;
use crate::dispatch::{Control, ProcessorTable};
use crate::insn::Insn;
use crate::object::{handle_of, ArrayKind, Object};
use crate::ops::mismatch;
use crate::resolve;
use crate::value::Value;
use crate::vm::Vm;
use crucible_core::{VmError, VmResult};
use std::sync::Arc;

pub(crate) fn bind(table: &mut ProcessorTable) {
    table.bind(0x80, new_array);
    table.bind(0x81, new_ref_array);
    table.bind(0x82, array_length);
    table.bind(0x83, array_load);
    table.bind(0x84, array_store);
}

fn checked_array(
    vm: &Vm,
    array: Option<Arc<Object>>,
    index: i32,
) -> Result<(Arc<Object>, i64), VmError> {
    let array = array.ok_or_else(|| vm.raise_npe())?;
    let length = array.array_length().unwrap_or(0);
    if index < 0 || index >= length {
        return Err(vm.raise(
            "java/lang/ArrayIndexOutOfBoundsException",
            Some(format!("Index {index} out of bounds for length {length}")),
        ));
    }
    Ok((array, index as i64))
}

fn negative_size(vm: &Vm, length: i32) -> VmError {
    vm.raise(
        "java/lang/NegativeArraySizeException",
        Some(length.to_string()),
    )
}

fn new_array(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::NewArray(kind) = insn else {
        return Err(mismatch("newarray", insn));
    };
    let length = ctx.stack().pop_int()?;
    if length < 0 {
        return Err(negative_size(vm, length));
    }
    let class = vm.array_class(*kind)?;
    let array = vm.alloc_array(&class, *kind, length);
    ctx.stack().push_reference(Some(array));
    Ok(Control::Continue)
}

fn new_ref_array(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::NewRefArray(site) = insn else {
        return Err(mismatch("newrefarray", insn));
    };
    let length = ctx.stack().pop_int()?;
    if length < 0 {
        return Err(negative_size(vm, length));
    }
    // The element class must exist even though elements are untyped
    // handles in storage.
    resolve::resolve_class(vm, site)?;
    let class = vm.ref_array_class(&site.name);
    let array = vm.alloc_array(&class, ArrayKind::Reference, length);
    ctx.stack().push_reference(Some(array));
    Ok(Control::Continue)
}

fn array_length(vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let array = ctx.stack().pop_reference()?.ok_or_else(|| vm.raise_npe())?;
    let length = array.array_length().unwrap_or(0);
    ctx.stack().push_int(length);
    Ok(Control::Continue)
}

fn array_load(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::ArrayLoad(kind) = insn else {
        return Err(mismatch("aload", insn));
    };
    let index = ctx.stack().pop_int()?;
    let array = ctx.stack().pop_reference()?;
    let (array, index) = checked_array(vm, array, index)?;
    let data = array.data();
    let offset = index * kind.width() as i64;
    let value = match kind {
        ArrayKind::Boolean | ArrayKind::Byte => Value::Int(data.read_i8(offset)? as i32),
        ArrayKind::Char => Value::Int(data.read_u16(offset)? as i32),
        ArrayKind::Short => Value::Int(data.read_i16(offset)? as i32),
        ArrayKind::Int => Value::Int(data.read_i32(offset)?),
        ArrayKind::Long => Value::Long(data.read_i64(offset)?),
        ArrayKind::Float => Value::Float(f32::from_bits(data.read_i32(offset)? as u32)),
        ArrayKind::Double => Value::Double(f64::from_bits(data.read_i64(offset)? as u64)),
        ArrayKind::Reference => {
            let handle = data.read_i64(offset)?;
            Value::Reference(vm.pool().resolve(handle)?)
        }
    };
    ctx.stack().push(value);
    Ok(Control::Continue)
}

fn array_store(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::ArrayStore(kind) = insn else {
        return Err(mismatch("astore", insn));
    };
    let value = match kind {
        ArrayKind::Long => Value::Long(ctx.stack().pop_long()?),
        ArrayKind::Double => Value::Double(ctx.stack().pop_double()?),
        ArrayKind::Float => Value::Float(ctx.stack().pop_float()?),
        ArrayKind::Reference => Value::Reference(ctx.stack().pop_reference()?),
        _ => Value::Int(ctx.stack().pop_int()?),
    };
    let index = ctx.stack().pop_int()?;
    let array = ctx.stack().pop_reference()?;
    let (array, index) = checked_array(vm, array, index)?;
    let data = array.data();
    let offset = index * kind.width() as i64;
    match (kind, value) {
        (ArrayKind::Boolean, Value::Int(v)) => data.write_i8(offset, (v & 1) as i8)?,
        (ArrayKind::Byte, Value::Int(v)) => data.write_i8(offset, v as i8)?,
        (ArrayKind::Char, Value::Int(v)) => data.write_u16(offset, v as u16)?,
        (ArrayKind::Short, Value::Int(v)) => data.write_i16(offset, v as i16)?,
        (ArrayKind::Int, Value::Int(v)) => data.write_i32(offset, v)?,
        (ArrayKind::Long, Value::Long(v)) => data.write_i64(offset, v)?,
        (ArrayKind::Float, Value::Float(v)) => data.write_i32(offset, v.to_bits() as i32)?,
        (ArrayKind::Double, Value::Double(v)) => data.write_i64(offset, v.to_bits() as i64)?,
        (ArrayKind::Reference, Value::Reference(v)) => data.write_i64(offset, handle_of(&v))?,
        _ => unreachable!("value popped by kind"),
    }
    Ok(Control::Continue)
}
