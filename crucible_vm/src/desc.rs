//! Method and field descriptor parsing.
//!
//! Descriptors use the compact internal form: `I` int, `J` long, `F` float,
//! `D` double, `Z`/`B`/`C`/`S` small ints, `V` void, `Lpkg/Name;` reference,
//! `[` array prefix. A method descriptor is `(params)return`.

use crucible_core::Fault;
use std::sync::Arc;

/// A parsed parameter or return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    /// `Lname;` — carries the internal class name.
    Object(Arc<str>),
    /// `[elem` — carries the element type.
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    /// Number of stack/local slots a value of this type occupies.
    #[inline]
    pub fn slots(&self) -> usize {
        match self {
            Self::Long | Self::Double => 2,
            Self::Void => 0,
            _ => 1,
        }
    }

    /// True for the sub-int types that widen to `int` on the stack.
    #[inline]
    pub fn is_subword(&self) -> bool {
        matches!(self, Self::Boolean | Self::Byte | Self::Char | Self::Short)
    }

    /// True for `Object` and `Array`.
    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<TypeDesc>,
    pub ret: TypeDesc,
}

impl MethodDescriptor {
    /// Parses `(IJLjava/lang/String;)V`-style text.
    pub fn parse(text: &str) -> Result<Self, Fault> {
        let bytes = text.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(malformed(text));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match bytes.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => {
                    let (ty, next) = parse_type(text, pos)?;
                    params.push(ty);
                    pos = next;
                }
                None => return Err(malformed(text)),
            }
        }
        let (ret, end) = parse_type(text, pos)?;
        if end != bytes.len() {
            return Err(malformed(text));
        }
        Ok(Self { params, ret })
    }

    /// Total parameter slot count (wide params count twice).
    pub fn param_slots(&self) -> usize {
        self.params.iter().map(TypeDesc::slots).sum()
    }
}

/// Parses a single field or component descriptor, e.g. `J` or `[I`.
pub fn parse_field(text: &str) -> Result<TypeDesc, Fault> {
    let (ty, end) = parse_type(text, 0)?;
    if end != text.len() || ty == TypeDesc::Void {
        return Err(malformed(text));
    }
    Ok(ty)
}

fn parse_type(text: &str, pos: usize) -> Result<(TypeDesc, usize), Fault> {
    let bytes = text.as_bytes();
    match bytes.get(pos) {
        Some(b'Z') => Ok((TypeDesc::Boolean, pos + 1)),
        Some(b'B') => Ok((TypeDesc::Byte, pos + 1)),
        Some(b'C') => Ok((TypeDesc::Char, pos + 1)),
        Some(b'S') => Ok((TypeDesc::Short, pos + 1)),
        Some(b'I') => Ok((TypeDesc::Int, pos + 1)),
        Some(b'J') => Ok((TypeDesc::Long, pos + 1)),
        Some(b'F') => Ok((TypeDesc::Float, pos + 1)),
        Some(b'D') => Ok((TypeDesc::Double, pos + 1)),
        Some(b'V') => Ok((TypeDesc::Void, pos + 1)),
        Some(b'L') => {
            let rest = &text[pos + 1..];
            match rest.find(';') {
                Some(semi) => Ok((
                    TypeDesc::Object(Arc::from(&rest[..semi])),
                    pos + 1 + semi + 1,
                )),
                None => Err(malformed(text)),
            }
        }
        Some(b'[') => {
            let (elem, next) = parse_type(text, pos + 1)?;
            if elem == TypeDesc::Void {
                return Err(malformed(text));
            }
            Ok((TypeDesc::Array(Box::new(elem)), next))
        }
        _ => Err(malformed(text)),
    }
}

fn malformed(text: &str) -> Fault {
    Fault::MalformedLinkage(Arc::from(format!("bad descriptor: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let d = MethodDescriptor::parse("(IJ)V").unwrap();
        assert_eq!(d.params, vec![TypeDesc::Int, TypeDesc::Long]);
        assert_eq!(d.ret, TypeDesc::Void);
        assert_eq!(d.param_slots(), 3);
    }

    #[test]
    fn test_parse_objects_and_arrays() {
        let d = MethodDescriptor::parse("([ILjava/lang/String;)[D").unwrap();
        assert_eq!(d.params.len(), 2);
        assert_eq!(d.params[0], TypeDesc::Array(Box::new(TypeDesc::Int)));
        assert_eq!(
            d.params[1],
            TypeDesc::Object(Arc::from("java/lang/String"))
        );
        assert_eq!(d.ret, TypeDesc::Array(Box::new(TypeDesc::Double)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MethodDescriptor::parse("IJ)V").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("(Q)V").is_err());
        assert!(MethodDescriptor::parse("(I)Vx").is_err());
        assert!(MethodDescriptor::parse("([V)V").is_err());
        assert!(MethodDescriptor::parse("(Ljava/lang/String)V").is_err());
    }

    #[test]
    fn test_parse_field_desc() {
        assert_eq!(parse_field("J").unwrap(), TypeDesc::Long);
        assert_eq!(
            parse_field("[[B").unwrap(),
            TypeDesc::Array(Box::new(TypeDesc::Array(Box::new(TypeDesc::Byte))))
        );
        assert!(parse_field("V").is_err());
        assert!(parse_field("JJ").is_err());
    }
}
