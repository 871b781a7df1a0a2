//! Symbolic member resolution records.
//!
//! A [`MemberRecord`] identifies a concrete field or method in a way that
//! survives re-resolution: a reference-kind tag, the owner's internal
//! name, the member's slot (methods) or storage offset (fields), and a
//! flags word combining erased access flags, a member-kind marker, and
//! the reference kind at a fixed bit offset.

use std::sync::Arc;

/// Member-name flag: the record names a method.
pub const MN_IS_METHOD: u32 = 0x0001_0000;
/// Member-name flag: the record names a constructor.
pub const MN_IS_CONSTRUCTOR: u32 = 0x0002_0000;
/// Member-name flag: the record names a field.
pub const MN_IS_FIELD: u32 = 0x0004_0000;
/// Member-name flag: the record names a type.
pub const MN_IS_TYPE: u32 = 0x0008_0000;
/// Bit offset of the reference kind within the flags word.
pub const MN_REFERENCE_KIND_SHIFT: u32 = 24;
/// Mask for the reference kind after shifting.
pub const MN_REFERENCE_KIND_MASK: u32 = 0x0F;

/// Access flags recognized for methods when erasing into a flags word.
pub const RECOGNIZED_METHOD_MODIFIERS: u32 = 0xFFFF;
/// Access flags recognized for fields when erasing into a flags word.
pub const RECOGNIZED_FIELD_MODIFIERS: u32 = 0xFFFF;

/// Dispatch reference kind, numbered per the method-handle protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RefKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

impl RefKind {
    /// Decodes a numeric tag, if valid.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::GetField,
            2 => Self::GetStatic,
            3 => Self::PutField,
            4 => Self::PutStatic,
            5 => Self::InvokeVirtual,
            6 => Self::InvokeStatic,
            7 => Self::InvokeSpecial,
            8 => Self::NewInvokeSpecial,
            9 => Self::InvokeInterface,
            _ => return None,
        })
    }

    /// True for the field access kinds.
    #[inline]
    pub fn is_field(self) -> bool {
        matches!(
            self,
            Self::GetField | Self::GetStatic | Self::PutField | Self::PutStatic
        )
    }
}

/// What kind of member a record names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Constructor,
    Field,
    Type,
}

impl MemberKind {
    /// The member-kind marker for the flags word.
    #[inline]
    pub fn marker(self) -> u32 {
        match self {
            Self::Method => MN_IS_METHOD,
            Self::Constructor => MN_IS_CONSTRUCTOR,
            Self::Field => MN_IS_FIELD,
            Self::Type => MN_IS_TYPE,
        }
    }
}

/// Immutable, symbolic identification of a resolved member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    /// Reference kind the member was resolved under.
    pub kind: RefKind,
    /// Internal name of the owning class.
    pub owner: Arc<str>,
    /// Member name.
    pub name: Arc<str>,
    /// Member descriptor.
    pub desc: Arc<str>,
    /// Method slot or field storage offset, whichever applies.
    pub slot: i64,
    /// Flags word: erased access | kind marker | refkind << shift.
    pub flags: u32,
}

impl MemberRecord {
    /// Builds a record for a method member.
    pub fn method(
        kind: RefKind,
        owner: Arc<str>,
        name: Arc<str>,
        desc: Arc<str>,
        slot: i64,
        access: u32,
    ) -> Self {
        let member_kind = if &*name == "<init>" {
            MemberKind::Constructor
        } else {
            MemberKind::Method
        };
        let flags = (access & RECOGNIZED_METHOD_MODIFIERS)
            | member_kind.marker()
            | ((kind as u32) << MN_REFERENCE_KIND_SHIFT);
        Self {
            kind,
            owner,
            name,
            desc,
            slot,
            flags,
        }
    }

    /// Builds a record for a field member with its resolved storage offset.
    pub fn field(
        kind: RefKind,
        owner: Arc<str>,
        name: Arc<str>,
        desc: Arc<str>,
        offset: i64,
        access: u32,
    ) -> Self {
        let flags = (access & RECOGNIZED_FIELD_MODIFIERS)
            | MemberKind::Field.marker()
            | ((kind as u32) << MN_REFERENCE_KIND_SHIFT);
        Self {
            kind,
            owner,
            name,
            desc,
            slot: offset,
            flags,
        }
    }

    /// Extracts the reference kind back out of the flags word.
    #[inline]
    pub fn flags_ref_kind(&self) -> Option<RefKind> {
        RefKind::from_tag(((self.flags >> MN_REFERENCE_KIND_SHIFT) & MN_REFERENCE_KIND_MASK) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_record_flags() {
        let rec = MemberRecord::method(
            RefKind::InvokeStatic,
            "demo/Bootstrap".into(),
            "make".into(),
            "()V".into(),
            3,
            0x0008,
        );
        assert_eq!(rec.flags & MN_IS_METHOD, MN_IS_METHOD);
        assert_eq!(rec.flags & 0xFFFF, 0x0008);
        assert_eq!(rec.flags_ref_kind(), Some(RefKind::InvokeStatic));
    }

    #[test]
    fn test_constructor_marker() {
        let rec = MemberRecord::method(
            RefKind::NewInvokeSpecial,
            "demo/Point".into(),
            "<init>".into(),
            "(II)V".into(),
            0,
            0,
        );
        assert_eq!(rec.flags & MN_IS_CONSTRUCTOR, MN_IS_CONSTRUCTOR);
        assert_eq!(rec.flags & MN_IS_METHOD, 0);
    }

    #[test]
    fn test_field_record_keeps_offset() {
        let rec = MemberRecord::field(
            RefKind::GetStatic,
            "demo/Holder".into(),
            "COUNT".into(),
            "J".into(),
            16,
            0x0008,
        );
        assert_eq!(rec.slot, 16);
        assert_eq!(rec.flags_ref_kind(), Some(RefKind::GetStatic));
        assert_eq!(rec.flags & MN_IS_FIELD, MN_IS_FIELD);
    }

    #[test]
    fn test_ref_kind_round_trip() {
        for tag in 1..=9u8 {
            let kind = RefKind::from_tag(tag).unwrap();
            assert_eq!(kind as u8, tag);
        }
        assert!(RefKind::from_tag(0).is_none());
        assert!(RefKind::from_tag(10).is_none());
    }
}
