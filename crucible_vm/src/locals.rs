//! The local variable table.
//!
//! Fixed-size, slot-indexed. Wide values take two consecutive slots with
//! the `Top` filler in the second; uninitialized slots also read as `Top`.

use crate::value::Value;
use crucible_core::Fault;

#[derive(Debug)]
pub struct Locals {
    slots: Box<[Value]>,
}

impl Locals {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![Value::Top; size].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reads a slot. Reading a filler or uninitialized slot is a fault.
    pub fn load(&self, slot: usize) -> Result<Value, Fault> {
        match self.slots.get(slot) {
            Some(Value::Top) => Err(Fault::BadLocalSlot {
                slot,
                size: self.slots.len(),
            }),
            Some(value) => Ok(value.clone()),
            None => Err(Fault::BadLocalSlot {
                slot,
                size: self.slots.len(),
            }),
        }
    }

    /// Writes a slot, laying down the filler for wide values.
    pub fn store(&mut self, slot: usize, value: Value) -> Result<(), Fault> {
        let span = if value.is_wide() { 2 } else { 1 };
        if slot + span > self.slots.len() {
            return Err(Fault::BadLocalSlot {
                slot,
                size: self.slots.len(),
            });
        }
        if span == 2 {
            self.slots[slot + 1] = Value::Top;
        }
        self.slots[slot] = value;
        Ok(())
    }

    /// In-place int increment (`iinc`).
    pub fn inc(&mut self, slot: usize, delta: i32) -> Result<(), Fault> {
        let current = self.load(slot)?.as_int()?;
        self.slots[slot] = Value::Int(current.wrapping_add(delta));
        Ok(())
    }
}
