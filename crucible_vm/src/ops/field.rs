//! Field access processors.
//!
//! Instance fields live in the object's data region, statics in the
//! declaring class's static region. Volatile fields go through the
//! substrate's ordered access mode; everything else uses plain access.
//! Floating-point fields are stored as raw bit patterns, so NaN payloads
//! survive a store/load cycle.

use crate::context::ExecutionContext;
use crate::desc::TypeDesc;
use crate::dispatch::{Control, ProcessorTable};
use crate::insn::Insn;
use crate::mirror::FieldMirror;
use crate::object::handle_of;
use crate::ops::mismatch;
use crate::resolve;
use crate::value::Value;
use crate::vm::Vm;
use crucible_core::{Fault, VmResult};
use crucible_memory::MemoryRegion;

pub(crate) fn bind(table: &mut ProcessorTable) {
    table.bind(0x71, get_field);
    table.bind(0x72, put_field);
    table.bind(0x73, get_static);
    table.bind(0x74, put_static);
}

/// Reads one field slot as a stack value.
pub(crate) fn read_slot(vm: &Vm, region: &MemoryRegion, field: &FieldMirror) -> VmResult<Value> {
    let offset = field.offset as i64;
    let ordered = field.is_volatile();
    let value = match &field.desc {
        TypeDesc::Boolean | TypeDesc::Byte => Value::Int(if ordered {
            region.read_u8_ordered(offset)? as i8 as i32
        } else {
            region.read_i8(offset)? as i32
        }),
        TypeDesc::Char => Value::Int(if ordered {
            region.read_i16_ordered(offset)? as u16 as i32
        } else {
            region.read_u16(offset)? as i32
        }),
        TypeDesc::Short => Value::Int(if ordered {
            region.read_i16_ordered(offset)? as i32
        } else {
            region.read_i16(offset)? as i32
        }),
        TypeDesc::Int => Value::Int(if ordered {
            region.read_i32_ordered(offset)?
        } else {
            region.read_i32(offset)?
        }),
        TypeDesc::Float => {
            let bits = if ordered {
                region.read_i32_ordered(offset)?
            } else {
                region.read_i32(offset)?
            };
            Value::Float(f32::from_bits(bits as u32))
        }
        TypeDesc::Long => Value::Long(if ordered {
            region.read_i64_ordered(offset)?
        } else {
            region.read_i64(offset)?
        }),
        TypeDesc::Double => {
            let bits = if ordered {
                region.read_i64_ordered(offset)?
            } else {
                region.read_i64(offset)?
            };
            Value::Double(f64::from_bits(bits as u64))
        }
        TypeDesc::Object(_) | TypeDesc::Array(_) => {
            let handle = if ordered {
                region.read_i64_ordered(offset)?
            } else {
                region.read_i64(offset)?
            };
            Value::Reference(vm.pool().resolve(handle)?)
        }
        TypeDesc::Void => {
            return Err(Fault::TypeConfusion {
                expected: "storable field type",
                found: "void",
            }
            .into())
        }
    };
    Ok(value)
}

/// Writes one field slot from a stack value.
pub(crate) fn write_slot(region: &MemoryRegion, field: &FieldMirror, value: &Value) -> VmResult<()> {
    let offset = field.offset as i64;
    let ordered = field.is_volatile();
    match &field.desc {
        TypeDesc::Boolean => {
            let v = (value.as_int()? & 1) as u8;
            if ordered {
                region.write_u8_ordered(offset, v)?;
            } else {
                region.write_u8(offset, v)?;
            }
        }
        TypeDesc::Byte => {
            let v = value.as_int()? as i8;
            if ordered {
                region.write_u8_ordered(offset, v as u8)?;
            } else {
                region.write_i8(offset, v)?;
            }
        }
        TypeDesc::Char => {
            let v = value.as_int()? as u16;
            if ordered {
                region.write_i16_ordered(offset, v as i16)?;
            } else {
                region.write_u16(offset, v)?;
            }
        }
        TypeDesc::Short => {
            let v = value.as_int()? as i16;
            if ordered {
                region.write_i16_ordered(offset, v)?;
            } else {
                region.write_i16(offset, v)?;
            }
        }
        TypeDesc::Int => {
            let v = value.as_int()?;
            if ordered {
                region.write_i32_ordered(offset, v)?;
            } else {
                region.write_i32(offset, v)?;
            }
        }
        TypeDesc::Float => {
            let bits = value.as_float()?.to_bits() as i32;
            if ordered {
                region.write_i32_ordered(offset, bits)?;
            } else {
                region.write_i32(offset, bits)?;
            }
        }
        TypeDesc::Long => {
            let v = value.as_long()?;
            if ordered {
                region.write_i64_ordered(offset, v)?;
            } else {
                region.write_i64(offset, v)?;
            }
        }
        TypeDesc::Double => {
            let bits = value.as_double()?.to_bits() as i64;
            if ordered {
                region.write_i64_ordered(offset, bits)?;
            } else {
                region.write_i64(offset, bits)?;
            }
        }
        TypeDesc::Object(_) | TypeDesc::Array(_) => {
            let handle = handle_of(&value.as_reference()?);
            if ordered {
                region.write_i64_ordered(offset, handle)?;
            } else {
                region.write_i64(offset, handle)?;
            }
        }
        TypeDesc::Void => {
            return Err(Fault::TypeConfusion {
                expected: "storable field type",
                found: "void",
            }
            .into())
        }
    }
    Ok(())
}

fn get_field(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::GetField(site) = insn else {
        return Err(mismatch("getfield", insn));
    };
    let object = ctx.stack().pop_reference()?.ok_or_else(|| vm.raise_npe())?;
    let (_, field) = resolve::resolve_field(vm, site)?;
    let value = read_slot(vm, object.data(), &field)?;
    ctx.stack().push(value);
    Ok(Control::Continue)
}

fn put_field(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::PutField(site) = insn else {
        return Err(mismatch("putfield", insn));
    };
    let value = ctx.stack().pop_any()?;
    let object = ctx.stack().pop_reference()?.ok_or_else(|| vm.raise_npe())?;
    let (_, field) = resolve::resolve_field(vm, site)?;
    write_slot(object.data(), &field, &value)?;
    Ok(Control::Continue)
}

fn get_static(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::GetStatic(site) = insn else {
        return Err(mismatch("getstatic", insn));
    };
    let (declarer, field) = resolve::resolve_field(vm, site)?;
    vm.ensure_initialized(&declarer)?;
    let value = read_slot(vm, declarer.static_data(), &field)?;
    ctx.stack().push(value);
    Ok(Control::Continue)
}

fn put_static(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::PutStatic(site) = insn else {
        return Err(mismatch("putstatic", insn));
    };
    let (declarer, field) = resolve::resolve_field(vm, site)?;
    vm.ensure_initialized(&declarer)?;
    let value = ctx.stack().pop_any()?;
    write_slot(declarer.static_data(), &field, &value)?;
    Ok(Control::Continue)
}
