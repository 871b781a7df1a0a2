//! Class, field, and method mirrors.
//!
//! Mirrors are the host-side reflection of loaded guest classes. A
//! [`ClassMirror`] fixes the instance field layout (byte offsets into the
//! object's data region), owns the static field storage, and tracks the
//! one-shot initialization state consumed by the `<clinit>` protocol.

use crate::desc::{parse_field, MethodDescriptor, TypeDesc};
use crate::insn::MethodCode;
use crucible_core::Fault;
use crucible_memory::MemoryRegion;
use parking_lot::Mutex;
use std::sync::Arc;

// ============================================================================
// Access flags
// ============================================================================

pub const ACC_PUBLIC: u32 = 0x0001;
pub const ACC_PRIVATE: u32 = 0x0002;
pub const ACC_PROTECTED: u32 = 0x0004;
pub const ACC_STATIC: u32 = 0x0008;
pub const ACC_FINAL: u32 = 0x0010;
pub const ACC_SYNCHRONIZED: u32 = 0x0020;
pub const ACC_VOLATILE: u32 = 0x0040;
pub const ACC_NATIVE: u32 = 0x0100;
pub const ACC_INTERFACE: u32 = 0x0200;
pub const ACC_ABSTRACT: u32 = 0x0400;
pub const ACC_SYNTHETIC: u32 = 0x1000;

// ============================================================================
// Field mirrors
// ============================================================================

/// A declared field with its resolved byte offset.
#[derive(Debug)]
pub struct FieldMirror {
    pub name: Arc<str>,
    pub desc: TypeDesc,
    pub raw_desc: Arc<str>,
    pub flags: u32,
    /// Byte offset into instance data (or the class's static region).
    pub offset: usize,
}

impl FieldMirror {
    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags & ACC_STATIC != 0
    }

    #[inline]
    pub fn is_volatile(&self) -> bool {
        self.flags & ACC_VOLATILE != 0
    }

    /// Storage width in bytes.
    pub fn width(&self) -> usize {
        match self.desc {
            TypeDesc::Boolean | TypeDesc::Byte => 1,
            TypeDesc::Char | TypeDesc::Short => 2,
            TypeDesc::Int | TypeDesc::Float => 4,
            _ => 8,
        }
    }
}

// ============================================================================
// Method mirrors
// ============================================================================

/// A declared method.
#[derive(Debug)]
pub struct MethodMirror {
    pub owner: Arc<str>,
    pub name: Arc<str>,
    pub desc: MethodDescriptor,
    pub raw_desc: Arc<str>,
    pub flags: u32,
    pub code: Option<MethodCode>,
    /// Signature-polymorphic: resolution matches any descriptor and the
    /// caller's descriptor governs argument passing.
    pub polymorphic: bool,
}

impl MethodMirror {
    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags & ACC_STATIC != 0
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        self.flags & ACC_NATIVE != 0
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.flags & ACC_ABSTRACT != 0
    }

    /// Argument slot count including the receiver for instance methods.
    pub fn arg_slots(&self) -> usize {
        self.desc.param_slots() + if self.is_static() { 0 } else { 1 }
    }
}

// ============================================================================
// Class mirrors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    InProgress,
    Initialized,
}

/// A loaded class.
#[derive(Debug)]
pub struct ClassMirror {
    name: Arc<str>,
    flags: u32,
    super_class: Option<Arc<ClassMirror>>,
    interfaces: Vec<Arc<ClassMirror>>,
    fields: Vec<Arc<FieldMirror>>,
    static_fields: Vec<Arc<FieldMirror>>,
    methods: Vec<Arc<MethodMirror>>,
    /// Total instance data size including the super chain.
    instance_size: usize,
    static_data: MemoryRegion,
    init: Mutex<InitState>,
}

impl ClassMirror {
    pub fn builder(name: impl Into<Arc<str>>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            flags: ACC_PUBLIC,
            super_class: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            static_fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn super_class(&self) -> Option<&Arc<ClassMirror>> {
        self.super_class.as_ref()
    }

    #[inline]
    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// Static field storage for this class.
    #[inline]
    pub fn static_data(&self) -> &MemoryRegion {
        &self.static_data
    }

    pub fn methods(&self) -> &[Arc<MethodMirror>] {
        &self.methods
    }

    /// Looks up an instance or static field by name, walking the super
    /// chain.
    pub fn find_field(&self, name: &str) -> Option<Arc<FieldMirror>> {
        let mut current = Some(self);
        while let Some(class) = current {
            for field in class.fields.iter().chain(&class.static_fields) {
                if &*field.name == name {
                    return Some(field.clone());
                }
            }
            current = class.super_class.as_deref();
        }
        None
    }

    /// The class that *declares* a given field (needed to pick the static
    /// storage region for inherited statics).
    pub fn declarer_of(self: &Arc<Self>, field: &Arc<FieldMirror>) -> Arc<ClassMirror> {
        let mut current = self.clone();
        loop {
            let declares = current
                .fields
                .iter()
                .chain(&current.static_fields)
                .any(|f| Arc::ptr_eq(f, field));
            if declares {
                return current;
            }
            match current.super_class.clone() {
                Some(sup) => current = sup,
                None => return current,
            }
        }
    }

    /// Looks up a method by name and descriptor, walking the super chain
    /// and then interfaces. Signature-polymorphic methods match on name
    /// alone.
    pub fn find_method(&self, name: &str, desc: &str) -> Option<Arc<MethodMirror>> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(found) = class.declared_method(name, desc) {
                return Some(found);
            }
            current = class.super_class.as_deref();
        }
        for iface in &self.interfaces {
            if let Some(found) = iface.find_method(name, desc) {
                return Some(found);
            }
        }
        None
    }

    /// Declared-only lookup (no super chain).
    pub fn declared_method(&self, name: &str, desc: &str) -> Option<Arc<MethodMirror>> {
        self.methods
            .iter()
            .find(|m| &*m.name == name && (m.polymorphic || &*m.raw_desc == desc))
            .cloned()
    }

    /// Subtype test: is a value of class `other` assignable to this class?
    pub fn is_assignable_from(&self, other: &ClassMirror) -> bool {
        if std::ptr::eq(self, other) || self.name == other.name {
            return true;
        }
        if let Some(sup) = &other.super_class {
            if self.is_assignable_from(sup) {
                return true;
            }
        }
        other
            .interfaces
            .iter()
            .any(|iface| self.is_assignable_from(iface))
    }

    /// Marks this class ready for `<clinit>` if it has not run yet.
    ///
    /// Returns the initializer to execute, or `None` when initialization
    /// already happened (or is in progress on this thread, the recursive
    /// case). The caller must invoke the returned method and then call
    /// [`finish_init`](Self::finish_init).
    pub fn begin_init(&self) -> Option<Arc<MethodMirror>> {
        let mut state = self.init.lock();
        if *state != InitState::Uninitialized {
            return None;
        }
        *state = InitState::InProgress;
        match self.declared_method("<clinit>", "()V") {
            Some(clinit) => Some(clinit),
            None => {
                *state = InitState::Initialized;
                None
            }
        }
    }

    pub fn finish_init(&self) {
        *self.init.lock() = InitState::Initialized;
    }

    pub fn is_initialized(&self) -> bool {
        *self.init.lock() == InitState::Initialized
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Incremental class definition; `build` fixes the layout.
pub struct ClassBuilder {
    name: Arc<str>,
    flags: u32,
    super_class: Option<Arc<ClassMirror>>,
    interfaces: Vec<Arc<ClassMirror>>,
    fields: Vec<(Arc<str>, Arc<str>, u32)>,
    static_fields: Vec<(Arc<str>, Arc<str>, u32)>,
    methods: Vec<MethodMirror>,
}

impl ClassBuilder {
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn extends(mut self, super_class: Arc<ClassMirror>) -> Self {
        self.super_class = Some(super_class);
        self
    }

    pub fn implements(mut self, iface: Arc<ClassMirror>) -> Self {
        self.interfaces.push(iface);
        self
    }

    pub fn field(mut self, name: &str, desc: &str, flags: u32) -> Self {
        let entry = (Arc::from(name), Arc::from(desc), flags);
        if flags & ACC_STATIC != 0 {
            self.static_fields.push(entry);
        } else {
            self.fields.push(entry);
        }
        self
    }

    pub fn method(mut self, name: &str, desc: &str, flags: u32, code: MethodCode) -> Self {
        self.push_method(name, desc, flags, Some(code), false);
        self
    }

    pub fn native_method(mut self, name: &str, desc: &str, flags: u32) -> Self {
        self.push_method(name, desc, flags | ACC_NATIVE, None, false);
        self
    }

    /// Declares a signature-polymorphic native (e.g. `invokeExact`).
    pub fn polymorphic_method(mut self, name: &str, flags: u32) -> Self {
        self.push_method(name, "([Ljava/lang/Object;)Ljava/lang/Object;", flags | ACC_NATIVE, None, true);
        self
    }

    fn push_method(
        &mut self,
        name: &str,
        desc: &str,
        flags: u32,
        code: Option<MethodCode>,
        polymorphic: bool,
    ) {
        let parsed = MethodDescriptor::parse(desc)
            .unwrap_or_else(|_| panic!("bad method descriptor in class definition: {desc}"));
        self.methods.push(MethodMirror {
            owner: self.name.clone(),
            name: Arc::from(name),
            desc: parsed,
            raw_desc: Arc::from(desc),
            flags,
            code,
            polymorphic,
        });
    }

    pub fn build(self) -> Result<Arc<ClassMirror>, Fault> {
        let base = self
            .super_class
            .as_ref()
            .map_or(0, |sup| sup.instance_size());
        let (fields, instance_size) = layout(&self.fields, base)?;
        let (static_fields, static_size) = layout(&self.static_fields, 0)?;
        Ok(Arc::new(ClassMirror {
            name: self.name,
            flags: self.flags,
            super_class: self.super_class,
            interfaces: self.interfaces,
            fields,
            static_fields,
            methods: self.methods.into_iter().map(Arc::new).collect(),
            instance_size,
            static_data: MemoryRegion::alloc(static_size),
            init: Mutex::new(InitState::Uninitialized),
        }))
    }
}

/// Assigns naturally-aligned byte offsets starting at `base`.
fn layout(
    declared: &[(Arc<str>, Arc<str>, u32)],
    base: usize,
) -> Result<(Vec<Arc<FieldMirror>>, usize), Fault> {
    let mut offset = base;
    let mut out = Vec::with_capacity(declared.len());
    for (name, raw_desc, flags) in declared {
        let desc = parse_field(raw_desc)?;
        let width = match desc {
            TypeDesc::Boolean | TypeDesc::Byte => 1,
            TypeDesc::Char | TypeDesc::Short => 2,
            TypeDesc::Int | TypeDesc::Float => 4,
            _ => 8,
        };
        offset = (offset + width - 1) & !(width - 1);
        out.push(Arc::new(FieldMirror {
            name: name.clone(),
            desc,
            raw_desc: raw_desc.clone(),
            flags: *flags,
            offset,
        }));
        offset += width;
    }
    Ok((out, offset))
}
