//! Error types for the virtual machine.
//!
//! Errors fall into exactly two disjoint classes:
//!
//! - [`GuestException`] — a guest-visible exception. Always routed through
//!   the exception-table search; catchable by guest handlers; propagates up
//!   the guest call stack if unhandled.
//! - [`Fault`] — an internal invariant breach (segfault, unlinked native,
//!   malformed linkage). Never catchable by guest code; fatal to the
//!   current operation and surfaced to the embedder as-is.
//!
//! [`VmError`] is the carrier for both; the dispatch loop intercepts the
//! `Exception` arm and lets the `Fault` arm pass through untouched.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The result type used throughout the VM.
pub type VmResult<T> = Result<T, VmError>;

/// A guest-visible exception crossing the host boundary.
///
/// Carries the heap handle of the exception object (`oop`) so the
/// unwinding code can recover its dynamic class and push it for handlers,
/// plus the class name and detail message for host-side rendering.
#[derive(Debug, Clone)]
pub struct GuestException {
    /// Heap handle of the exception instance.
    pub oop: i64,
    /// Internal name of the exception's dynamic class.
    pub class_name: Arc<str>,
    /// Detail message, if one was set.
    pub message: Option<Arc<str>>,
}

impl GuestException {
    pub fn new(oop: i64, class_name: Arc<str>, message: Option<Arc<str>>) -> Self {
        Self {
            oop,
            class_name,
            message,
        }
    }
}

impl fmt::Display for GuestException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.class_name, msg),
            None => write!(f, "{}", self.class_name),
        }
    }
}

/// An internal, non-recoverable fault.
///
/// Signals a structural defect in the VM or the loaded program. Guest
/// handlers can never observe these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Memory access outside a region's bounds.
    #[error("segfault: access of width {width} at offset {offset} in region of length {length}")]
    Segfault {
        /// Requested offset.
        offset: i64,
        /// Access width in bytes.
        width: usize,
        /// Region length.
        length: usize,
    },

    /// Operand stack underflow or wide-pairing violation.
    #[error("operand stack corrupted: {0}")]
    OperandStack(&'static str),

    /// A slot held a value of an unexpected kind.
    #[error("type confusion: expected {expected}, found {found}")]
    TypeConfusion {
        /// What the operation required.
        expected: &'static str,
        /// What was actually there.
        found: &'static str,
    },

    /// A native method was invoked with no registered implementation.
    #[error("no native implementation for {owner}.{name}{desc}")]
    UnmappedNative {
        /// Owning class name.
        owner: Arc<str>,
        /// Method name.
        name: Arc<str>,
        /// Method descriptor.
        desc: Arc<str>,
    },

    /// The call-site linkage protocol produced a structurally invalid result.
    #[error("malformed call-site linkage: {0}")]
    MalformedLinkage(Arc<str>),

    /// A local variable slot index was out of range.
    #[error("local slot {slot} out of range for table of {size}")]
    BadLocalSlot {
        /// Requested slot.
        slot: usize,
        /// Local table size.
        size: usize,
    },

    /// A handle did not resolve to a live object.
    #[error("dangling heap handle {0}")]
    DanglingHandle(i64),

    /// Execution ran past the end of a method body.
    #[error("program counter {pc} out of range for body of {len} instructions")]
    PcOutOfRange {
        /// Offending program counter.
        pc: u32,
        /// Method body length.
        len: usize,
    },
}

/// Top-level VM error: a guest exception or an internal fault.
#[derive(Debug, Clone)]
pub enum VmError {
    /// Guest-visible exception (catchable by guest handlers).
    Exception(GuestException),
    /// Internal fault (never catchable).
    Fault(Fault),
}

impl VmError {
    /// Returns the guest exception if this is one.
    #[inline]
    pub fn as_exception(&self) -> Option<&GuestException> {
        match self {
            Self::Exception(ex) => Some(ex),
            Self::Fault(_) => None,
        }
    }

    /// Returns true if this is an internal fault.
    #[inline]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(ex) => write!(f, "{}", ex),
            Self::Fault(fault) => write!(f, "fault: {}", fault),
        }
    }
}

impl std::error::Error for VmError {}

impl From<Fault> for VmError {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

impl From<GuestException> for VmError {
    fn from(ex: GuestException) -> Self {
        Self::Exception(ex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_exception_display() {
        let ex = GuestException::new(1, "java/lang/IllegalStateException".into(), Some("bad".into()));
        assert_eq!(ex.to_string(), "java/lang/IllegalStateException: bad");

        let bare = GuestException::new(2, "java/lang/InternalError".into(), None);
        assert_eq!(bare.to_string(), "java/lang/InternalError");
    }

    #[test]
    fn test_fault_is_not_exception() {
        let err: VmError = Fault::Segfault {
            offset: 16,
            width: 8,
            length: 8,
        }
        .into();
        assert!(err.is_fault());
        assert!(err.as_exception().is_none());
    }

    #[test]
    fn test_fault_display() {
        let fault = Fault::Segfault {
            offset: -1,
            width: 4,
            length: 32,
        };
        let text = fault.to_string();
        assert!(text.contains("segfault"));
        assert!(text.contains("-1"));
    }
}
