//! Heap objects, arrays, monitors, and the handle pool.
//!
//! Object storage is byte-addressed: instance fields and array elements
//! live in a [`MemoryRegion`] owned by the object. References stored *in*
//! memory (reference fields, reference array elements) are written as
//! 64-bit handles and resolved back through the VM's [`HandlePool`];
//! handle `0` is the null reference.

use crate::mirror::ClassMirror;
use crate::value::ObjectRef;
use crucible_core::{Fault, MemberRecord};
use crucible_memory::MemoryRegion;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

// ============================================================================
// Array element kinds
// ============================================================================

/// Element kind of a guest array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Elements are 64-bit object handles.
    Reference,
}

impl ArrayKind {
    /// Element width in bytes.
    #[inline]
    pub fn width(self) -> usize {
        match self {
            Self::Boolean | Self::Byte => 1,
            Self::Char | Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double | Self::Reference => 8,
        }
    }

    /// Decodes the `newarray` type tag (4..=11).
    pub fn from_atype(tag: u8) -> Option<Self> {
        match tag {
            4 => Some(Self::Boolean),
            5 => Some(Self::Char),
            6 => Some(Self::Float),
            7 => Some(Self::Double),
            8 => Some(Self::Byte),
            9 => Some(Self::Short),
            10 => Some(Self::Int),
            11 => Some(Self::Long),
            _ => None,
        }
    }
}

// ============================================================================
// Monitors
// ============================================================================

/// Per-object recursive monitor.
///
/// Tracks the owning thread and entry count. Contention is not modeled;
/// execution contexts are single-threaded and `enter` only records
/// ownership.
#[derive(Debug, Default)]
pub struct Monitor {
    state: Mutex<MonitorState>,
}

#[derive(Debug, Default)]
struct MonitorState {
    owner: Option<ThreadId>,
    entries: u32,
}

impl Monitor {
    /// Acquires the monitor for the current thread (recursive).
    pub fn enter(&self) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner == me => state.entries += 1,
            _ => {
                state.owner = Some(me);
                state.entries = 1;
            }
        }
    }

    /// Releases one entry. Returns `false` if the current thread does not
    /// own the monitor (the caller raises the guest exception).
    pub fn exit(&self) -> bool {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) || state.entries == 0 {
            return false;
        }
        state.entries -= 1;
        if state.entries == 0 {
            state.owner = None;
        }
        true
    }

    /// Current entry count, regardless of owner.
    pub fn entry_count(&self) -> u32 {
        self.state.lock().entries
    }
}

// ============================================================================
// Host payloads
// ============================================================================

/// Host-side value attached to an object that mirrors a host concept.
///
/// Boxed primitives, interned strings, resolved method handles, and class
/// mirrors carry their host representation here; ordinary guest objects
/// have none.
#[derive(Debug, Clone)]
pub enum HostPayload {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Backing text of a `java/lang/String`.
    Text(Arc<str>),
    /// Resolved target of a `java/lang/invoke/MethodHandle`.
    Handle(MemberRecord),
    /// The class a `java/lang/Class` instance mirrors.
    Type(Arc<ClassMirror>),
}

// ============================================================================
// Objects
// ============================================================================

#[derive(Debug, Clone)]
enum ObjectShape {
    Instance,
    Array { kind: ArrayKind, length: i32 },
}

/// A heap object: an ordinary instance or an array.
#[derive(Debug)]
pub struct Object {
    handle: i64,
    class: Arc<ClassMirror>,
    shape: ObjectShape,
    data: MemoryRegion,
    monitor: Monitor,
    payload: Mutex<Option<HostPayload>>,
}

impl Object {
    pub(crate) fn instance(handle: i64, class: Arc<ClassMirror>, data: MemoryRegion) -> Self {
        Self {
            handle,
            class,
            shape: ObjectShape::Instance,
            data,
            monitor: Monitor::default(),
            payload: Mutex::new(None),
        }
    }

    pub(crate) fn array(
        handle: i64,
        class: Arc<ClassMirror>,
        kind: ArrayKind,
        length: i32,
        data: MemoryRegion,
    ) -> Self {
        Self {
            handle,
            class,
            shape: ObjectShape::Array { kind, length },
            data,
            monitor: Monitor::default(),
            payload: Mutex::new(None),
        }
    }

    #[inline]
    pub fn handle(&self) -> i64 {
        self.handle
    }

    #[inline]
    pub fn class(&self) -> &Arc<ClassMirror> {
        &self.class
    }

    /// Field or element storage.
    #[inline]
    pub fn data(&self) -> &MemoryRegion {
        &self.data
    }

    #[inline]
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self.shape, ObjectShape::Array { .. })
    }

    /// Array length; `None` for non-arrays.
    pub fn array_length(&self) -> Option<i32> {
        match self.shape {
            ObjectShape::Array { length, .. } => Some(length),
            ObjectShape::Instance => None,
        }
    }

    /// Array element kind; `None` for non-arrays.
    pub fn array_kind(&self) -> Option<ArrayKind> {
        match self.shape {
            ObjectShape::Array { kind, .. } => Some(kind),
            ObjectShape::Instance => None,
        }
    }

    /// Attaches a host payload, replacing any previous one.
    pub fn set_payload(&self, payload: HostPayload) {
        *self.payload.lock() = Some(payload);
    }

    /// Clones out the host payload, if any.
    pub fn payload(&self) -> Option<HostPayload> {
        self.payload.lock().clone()
    }

    /// Backing text, if this object carries one.
    pub fn text(&self) -> Option<Arc<str>> {
        match self.payload.lock().as_ref() {
            Some(HostPayload::Text(text)) => Some(text.clone()),
            _ => None,
        }
    }
}

// ============================================================================
// Handle pool
// ============================================================================

/// Maps the 64-bit handles stored in memory back to live objects.
///
/// Handles start at 1; handle 0 is the null reference and never allocated.
/// Objects stay live for the pool's lifetime (collection is an external
/// concern).
#[derive(Debug, Default)]
pub struct HandlePool {
    live: Mutex<FxHashMap<i64, Arc<Object>>>,
    next: AtomicI64,
}

impl HandlePool {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(FxHashMap::default()),
            next: AtomicI64::new(1),
        }
    }

    /// Reserves a fresh handle and registers the object built for it.
    pub fn adopt(&self, build: impl FnOnce(i64) -> Object) -> Arc<Object> {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        let object = Arc::new(build(handle));
        self.live.lock().insert(handle, object.clone());
        object
    }

    /// Resolves a non-null handle. A stale handle is a fault.
    pub fn get(&self, handle: i64) -> Result<Arc<Object>, Fault> {
        self.live
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(Fault::DanglingHandle(handle))
    }

    /// Resolves a handle where 0 means null.
    pub fn resolve(&self, handle: i64) -> Result<ObjectRef, Fault> {
        if handle == 0 {
            Ok(None)
        } else {
            self.get(handle).map(Some)
        }
    }
}

/// Handle of a possibly-null reference (0 for null).
#[inline]
pub fn handle_of(reference: &ObjectRef) -> i64 {
    reference.as_ref().map_or(0, |obj| obj.handle())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atype_decoding() {
        assert_eq!(ArrayKind::from_atype(4), Some(ArrayKind::Boolean));
        assert_eq!(ArrayKind::from_atype(11), Some(ArrayKind::Long));
        assert_eq!(ArrayKind::from_atype(3), None);
        assert_eq!(ArrayKind::from_atype(12), None);
    }

    #[test]
    fn test_monitor_recursion() {
        let mon = Monitor::default();
        mon.enter();
        mon.enter();
        assert_eq!(mon.entry_count(), 2);
        assert!(mon.exit());
        assert!(mon.exit());
        assert_eq!(mon.entry_count(), 0);
        assert!(!mon.exit());
    }

    #[test]
    fn test_element_widths() {
        assert_eq!(ArrayKind::Byte.width(), 1);
        assert_eq!(ArrayKind::Char.width(), 2);
        assert_eq!(ArrayKind::Float.width(), 4);
        assert_eq!(ArrayKind::Reference.width(), 8);
    }
}
