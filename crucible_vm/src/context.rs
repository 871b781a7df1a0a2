//! Per-invocation execution context.
//!
//! One context per method activation: operand stack, locals, the program
//! counter, the last observed line marker, and the monitors this
//! activation has entered. [`ExecutionContext::unwind`] releases those
//! monitors when the activation is abandoned, whether by a thrown
//! exception leaving the method or by normal return with entries still
//! recorded.

use crate::locals::Locals;
use crate::mirror::MethodMirror;
use crate::object::Object;
use crate::stack::OperandStack;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Debug)]
pub struct ExecutionContext {
    method: Arc<MethodMirror>,
    stack: OperandStack,
    locals: Locals,
    pc: u32,
    /// Last line marker crossed; 0 until one is seen.
    line: u32,
    held_monitors: SmallVec<[Arc<Object>; 2]>,
}

impl ExecutionContext {
    pub fn new(method: Arc<MethodMirror>, locals: Locals) -> Self {
        Self {
            method,
            stack: OperandStack::new(),
            locals,
            pc: 0,
            line: 0,
            held_monitors: SmallVec::new(),
        }
    }

    #[inline]
    pub fn method(&self) -> &Arc<MethodMirror> {
        &self.method
    }

    #[inline]
    pub fn stack(&mut self) -> &mut OperandStack {
        &mut self.stack
    }

    #[inline]
    pub fn locals(&mut self) -> &mut Locals {
        &mut self.locals
    }

    #[inline]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    #[inline]
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    #[inline]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[inline]
    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    /// Records a monitor this activation entered.
    pub fn monitor_entered(&mut self, object: Arc<Object>) {
        self.held_monitors.push(object);
    }

    /// Forgets one recorded entry for `object` (its `exit` already ran).
    pub fn monitor_exited(&mut self, object: &Arc<Object>) {
        if let Some(pos) = self
            .held_monitors
            .iter()
            .rposition(|held| Arc::ptr_eq(held, object))
        {
            self.held_monitors.remove(pos);
        }
    }

    /// Releases every monitor still recorded, newest first.
    ///
    /// Unbalanced exits during unwinding are swallowed; the activation is
    /// already being torn down.
    pub fn unwind(&mut self) {
        while let Some(object) = self.held_monitors.pop() {
            let _ = object.monitor().exit();
        }
    }

    pub fn held_monitor_count(&self) -> usize {
        self.held_monitors.len()
    }
}
