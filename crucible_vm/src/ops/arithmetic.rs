//! Arithmetic, conversion, and comparison processors.
//!
//! Integer arithmetic wraps on overflow; `i64::MIN / -1` and friends are
//! well-defined. Integer division and remainder by zero raise the guest
//! `ArithmeticException`. Shift distances mask to the operand width.
//! Float-to-int conversions saturate, with NaN mapping to zero.

use crate::context::ExecutionContext;
use crate::dispatch::{Control, ProcessorTable};
use crate::insn::{Conv, FpBinOp, Insn, IntBinOp};
use crate::ops::mismatch;
use crate::vm::Vm;
use crucible_core::VmResult;

pub(crate) fn bind(table: &mut ProcessorTable) {
    table.bind(0x30, int_bin);
    table.bind(0x31, long_bin);
    table.bind(0x32, float_bin);
    table.bind(0x33, double_bin);
    table.bind(0x34, int_neg);
    table.bind(0x35, long_neg);
    table.bind(0x36, float_neg);
    table.bind(0x37, double_neg);
    table.bind(0x40, convert);
    table.bind(0x41, long_cmp);
    table.bind(0x42, float_cmp);
    table.bind(0x43, double_cmp);
}

fn div_by_zero(vm: &Vm) -> crucible_core::VmError {
    vm.raise("java/lang/ArithmeticException", Some("/ by zero".to_string()))
}

fn int_bin(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::IntBin(op) = insn else {
        return Err(mismatch("ibin", insn));
    };
    let rhs = ctx.stack().pop_int()?;
    let lhs = ctx.stack().pop_int()?;
    let result = match op {
        IntBinOp::Add => lhs.wrapping_add(rhs),
        IntBinOp::Sub => lhs.wrapping_sub(rhs),
        IntBinOp::Mul => lhs.wrapping_mul(rhs),
        IntBinOp::Div => {
            if rhs == 0 {
                return Err(div_by_zero(vm));
            }
            lhs.wrapping_div(rhs)
        }
        IntBinOp::Rem => {
            if rhs == 0 {
                return Err(div_by_zero(vm));
            }
            lhs.wrapping_rem(rhs)
        }
        IntBinOp::And => lhs & rhs,
        IntBinOp::Or => lhs | rhs,
        IntBinOp::Xor => lhs ^ rhs,
        IntBinOp::Shl => lhs.wrapping_shl(rhs as u32),
        IntBinOp::Shr => lhs.wrapping_shr(rhs as u32),
        IntBinOp::Ushr => ((lhs as u32).wrapping_shr(rhs as u32)) as i32,
    };
    ctx.stack().push_int(result);
    Ok(Control::Continue)
}

fn long_bin(vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::LongBin(op) = insn else {
        return Err(mismatch("lbin", insn));
    };
    // Shift distances are int-typed on the stack.
    let result = match op {
        IntBinOp::Shl | IntBinOp::Shr | IntBinOp::Ushr => {
            let shift = ctx.stack().pop_int()? as u32;
            let lhs = ctx.stack().pop_long()?;
            match op {
                IntBinOp::Shl => lhs.wrapping_shl(shift),
                IntBinOp::Shr => lhs.wrapping_shr(shift),
                _ => ((lhs as u64).wrapping_shr(shift)) as i64,
            }
        }
        _ => {
            let rhs = ctx.stack().pop_long()?;
            let lhs = ctx.stack().pop_long()?;
            match op {
                IntBinOp::Add => lhs.wrapping_add(rhs),
                IntBinOp::Sub => lhs.wrapping_sub(rhs),
                IntBinOp::Mul => lhs.wrapping_mul(rhs),
                IntBinOp::Div => {
                    if rhs == 0 {
                        return Err(div_by_zero(vm));
                    }
                    lhs.wrapping_div(rhs)
                }
                IntBinOp::Rem => {
                    if rhs == 0 {
                        return Err(div_by_zero(vm));
                    }
                    lhs.wrapping_rem(rhs)
                }
                IntBinOp::And => lhs & rhs,
                IntBinOp::Or => lhs | rhs,
                IntBinOp::Xor => lhs ^ rhs,
                _ => unreachable!("shift handled above"),
            }
        }
    };
    ctx.stack().push_long(result);
    Ok(Control::Continue)
}

fn float_bin(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::FloatBin(op) = insn else {
        return Err(mismatch("fbin", insn));
    };
    let rhs = ctx.stack().pop_float()?;
    let lhs = ctx.stack().pop_float()?;
    let result = match op {
        FpBinOp::Add => lhs + rhs,
        FpBinOp::Sub => lhs - rhs,
        FpBinOp::Mul => lhs * rhs,
        FpBinOp::Div => lhs / rhs,
        FpBinOp::Rem => lhs % rhs,
    };
    ctx.stack().push_float(result);
    Ok(Control::Continue)
}

fn double_bin(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::DoubleBin(op) = insn else {
        return Err(mismatch("dbin", insn));
    };
    let rhs = ctx.stack().pop_double()?;
    let lhs = ctx.stack().pop_double()?;
    let result = match op {
        FpBinOp::Add => lhs + rhs,
        FpBinOp::Sub => lhs - rhs,
        FpBinOp::Mul => lhs * rhs,
        FpBinOp::Div => lhs / rhs,
        FpBinOp::Rem => lhs % rhs,
    };
    ctx.stack().push_double(result);
    Ok(Control::Continue)
}

fn int_neg(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let v = ctx.stack().pop_int()?;
    ctx.stack().push_int(v.wrapping_neg());
    Ok(Control::Continue)
}

fn long_neg(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let v = ctx.stack().pop_long()?;
    ctx.stack().push_long(v.wrapping_neg());
    Ok(Control::Continue)
}

fn float_neg(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let v = ctx.stack().pop_float()?;
    ctx.stack().push_float(-v);
    Ok(Control::Continue)
}

fn double_neg(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let v = ctx.stack().pop_double()?;
    ctx.stack().push_double(-v);
    Ok(Control::Continue)
}

fn convert(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::Convert(conv) = insn else {
        return Err(mismatch("conv", insn));
    };
    let stack = ctx.stack();
    match conv {
        Conv::I2L => {
            let v = stack.pop_int()?;
            stack.push_long(v as i64);
        }
        Conv::I2F => {
            let v = stack.pop_int()?;
            stack.push_float(v as f32);
        }
        Conv::I2D => {
            let v = stack.pop_int()?;
            stack.push_double(v as f64);
        }
        Conv::L2I => {
            let v = stack.pop_long()?;
            stack.push_int(v as i32);
        }
        Conv::L2F => {
            let v = stack.pop_long()?;
            stack.push_float(v as f32);
        }
        Conv::L2D => {
            let v = stack.pop_long()?;
            stack.push_double(v as f64);
        }
        Conv::F2I => {
            let v = stack.pop_float()?;
            stack.push_int(v as i32);
        }
        Conv::F2L => {
            let v = stack.pop_float()?;
            stack.push_long(v as i64);
        }
        Conv::F2D => {
            let v = stack.pop_float()?;
            stack.push_double(v as f64);
        }
        Conv::D2I => {
            let v = stack.pop_double()?;
            stack.push_int(v as i32);
        }
        Conv::D2L => {
            let v = stack.pop_double()?;
            stack.push_long(v as i64);
        }
        Conv::D2F => {
            let v = stack.pop_double()?;
            stack.push_float(v as f32);
        }
        Conv::I2B => {
            let v = stack.pop_int()?;
            stack.push_int(v as i8 as i32);
        }
        Conv::I2C => {
            let v = stack.pop_int()?;
            stack.push_int(v as u16 as i32);
        }
        Conv::I2S => {
            let v = stack.pop_int()?;
            stack.push_int(v as i16 as i32);
        }
    }
    Ok(Control::Continue)
}

fn long_cmp(_vm: &Vm, ctx: &mut ExecutionContext, _insn: &Insn) -> VmResult<Control> {
    let rhs = ctx.stack().pop_long()?;
    let lhs = ctx.stack().pop_long()?;
    ctx.stack().push_int(match lhs.cmp(&rhs) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    });
    Ok(Control::Continue)
}

fn float_cmp(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::FloatCmp(nan_result) = insn else {
        return Err(mismatch("fcmp", insn));
    };
    let rhs = ctx.stack().pop_float()?;
    let lhs = ctx.stack().pop_float()?;
    ctx.stack().push_int(match lhs.partial_cmp(&rhs) {
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) => 1,
        None => *nan_result,
    });
    Ok(Control::Continue)
}

fn double_cmp(_vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> VmResult<Control> {
    let Insn::DoubleCmp(nan_result) = insn else {
        return Err(mismatch("dcmp", insn));
    };
    let rhs = ctx.stack().pop_double()?;
    let lhs = ctx.stack().pop_double()?;
    ctx.stack().push_int(match lhs.partial_cmp(&rhs) {
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) => 1,
        None => *nan_result,
    });
    Ok(Control::Continue)
}
