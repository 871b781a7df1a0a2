//! Typed slot values for the operand stack and locals.

use crate::object::Object;
use crucible_core::Fault;
use std::sync::Arc;

/// A guest object reference; `None` is the null reference.
pub type ObjectRef = Option<Arc<Object>>;

/// One typed slot.
///
/// `Long` and `Double` are *wide* values: on the operand stack and in
/// locals they occupy two slots, the second of which is the [`Value::Top`]
/// filler. Partial access to a wide value is never observable; the stack
/// enforces pairing and reports violations as faults.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(ObjectRef),
    /// Second slot of a wide value, or an uninitialized local.
    Top,
}

impl Value {
    /// Null reference shorthand.
    #[inline]
    pub fn null() -> Self {
        Self::Reference(None)
    }

    /// True for the two-slot kinds.
    #[inline]
    pub fn is_wide(&self) -> bool {
        matches!(self, Self::Long(_) | Self::Double(_))
    }

    /// Kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Reference(_) => "reference",
            Self::Top => "top",
        }
    }

    pub fn as_int(&self) -> Result<i32, Fault> {
        match self {
            Self::Int(v) => Ok(*v),
            other => Err(Fault::TypeConfusion {
                expected: "int",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_long(&self) -> Result<i64, Fault> {
        match self {
            Self::Long(v) => Ok(*v),
            other => Err(Fault::TypeConfusion {
                expected: "long",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_float(&self) -> Result<f32, Fault> {
        match self {
            Self::Float(v) => Ok(*v),
            other => Err(Fault::TypeConfusion {
                expected: "float",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_double(&self) -> Result<f64, Fault> {
        match self {
            Self::Double(v) => Ok(*v),
            other => Err(Fault::TypeConfusion {
                expected: "double",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_reference(&self) -> Result<ObjectRef, Fault> {
        match self {
            Self::Reference(r) => Ok(r.clone()),
            other => Err(Fault::TypeConfusion {
                expected: "reference",
                found: other.kind_name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_detection() {
        assert!(Value::Long(0).is_wide());
        assert!(Value::Double(0.0).is_wide());
        assert!(!Value::Int(0).is_wide());
        assert!(!Value::null().is_wide());
    }

    #[test]
    fn test_type_confusion_is_fault() {
        let err = Value::Int(1).as_long().unwrap_err();
        assert_eq!(
            err,
            Fault::TypeConfusion {
                expected: "long",
                found: "int"
            }
        );
    }
}
