//! The operand stack.
//!
//! Wide values (`long`, `double`) occupy two slots: the value itself and a
//! [`Value::Top`] filler above it. Pushes lay the pair down; wide pops
//! verify the filler is intact. Any tear (popping half of a wide pair,
//! underflow) is an internal fault, never a guest exception.

use crate::value::{ObjectRef, Value};
use crucible_core::Fault;
use smallvec::SmallVec;

#[derive(Debug, Default)]
pub struct OperandStack {
    slots: SmallVec<[Value; 16]>,
}

impl OperandStack {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Discards everything (handler entry resets the stack).
    #[inline]
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Pushes a value, laying down the `Top` filler for wide kinds.
    pub fn push(&mut self, value: Value) {
        let wide = value.is_wide();
        self.slots.push(value);
        if wide {
            self.slots.push(Value::Top);
        }
    }

    #[inline]
    pub fn push_int(&mut self, v: i32) {
        self.slots.push(Value::Int(v));
    }

    #[inline]
    pub fn push_long(&mut self, v: i64) {
        self.push(Value::Long(v));
    }

    #[inline]
    pub fn push_float(&mut self, v: f32) {
        self.slots.push(Value::Float(v));
    }

    #[inline]
    pub fn push_double(&mut self, v: f64) {
        self.push(Value::Double(v));
    }

    #[inline]
    pub fn push_reference(&mut self, v: ObjectRef) {
        self.slots.push(Value::Reference(v));
    }

    /// Pops one single-slot value. Popping into a wide pair is a fault.
    pub fn pop(&mut self) -> Result<Value, Fault> {
        match self.slots.pop() {
            Some(Value::Top) => Err(Fault::OperandStack("single pop hit wide filler")),
            Some(value) => Ok(value),
            None => Err(Fault::OperandStack("underflow")),
        }
    }

    /// Pops a wide value, consuming its filler first.
    pub fn pop_wide(&mut self) -> Result<Value, Fault> {
        match self.slots.pop() {
            Some(Value::Top) => {}
            Some(_) => return Err(Fault::OperandStack("wide pop missing filler")),
            None => return Err(Fault::OperandStack("underflow")),
        }
        match self.slots.pop() {
            Some(value) if value.is_wide() => Ok(value),
            Some(_) => Err(Fault::OperandStack("filler without wide value")),
            None => Err(Fault::OperandStack("underflow")),
        }
    }

    /// Pops either a single-slot value or a full wide pair.
    pub fn pop_any(&mut self) -> Result<Value, Fault> {
        match self.slots.last() {
            Some(Value::Top) => self.pop_wide(),
            Some(_) => self.pop(),
            None => Err(Fault::OperandStack("underflow")),
        }
    }

    /// Pops two slots: one wide pair or two single-slot values.
    pub fn pop2(&mut self) -> Result<(), Fault> {
        match self.slots.last() {
            Some(Value::Top) => {
                self.pop_wide()?;
            }
            Some(_) => {
                self.pop()?;
                self.pop()?;
            }
            None => return Err(Fault::OperandStack("underflow")),
        }
        Ok(())
    }

    pub fn pop_int(&mut self) -> Result<i32, Fault> {
        self.pop()?.as_int()
    }

    pub fn pop_long(&mut self) -> Result<i64, Fault> {
        self.pop_wide()?.as_long()
    }

    pub fn pop_float(&mut self) -> Result<f32, Fault> {
        self.pop()?.as_float()
    }

    pub fn pop_double(&mut self) -> Result<f64, Fault> {
        self.pop_wide()?.as_double()
    }

    pub fn pop_reference(&mut self) -> Result<ObjectRef, Fault> {
        self.pop()?.as_reference()
    }

    pub fn peek(&self) -> Result<&Value, Fault> {
        self.slots.last().ok_or(Fault::OperandStack("underflow"))
    }
}
