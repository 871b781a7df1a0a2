//! The native bridge.
//!
//! Methods without bodies dispatch here, keyed by owner, name, and
//! descriptor. Signature-polymorphic natives register under the `*`
//! descriptor and match any caller descriptor. An unmapped native is an
//! internal fault, not a guest exception.

use crate::mirror::MethodMirror;
use crate::value::Value;
use crate::vm::Vm;
use crucible_core::{Fault, VmResult};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Descriptor key matching any caller descriptor.
pub const POLYMORPHIC_DESC: &str = "*";

/// A host implementation of a guest method.
pub type NativeFn = fn(&Vm, &Arc<MethodMirror>, Vec<Value>) -> VmResult<Option<Value>>;

type Key = (Arc<str>, Arc<str>, Arc<str>);

#[derive(Default)]
pub struct NativeBridge {
    entries: Mutex<FxHashMap<Key, NativeFn>>,
}

impl NativeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation, replacing any previous one.
    pub fn register(&self, owner: &str, name: &str, desc: &str, imp: NativeFn) {
        self.entries
            .lock()
            .insert((Arc::from(owner), Arc::from(name), Arc::from(desc)), imp);
    }

    /// Removes an implementation.
    pub fn unregister(&self, owner: &str, name: &str, desc: &str) -> bool {
        self.entries
            .lock()
            .remove(&(Arc::from(owner), Arc::from(name), Arc::from(desc)))
            .is_some()
    }

    fn lookup(&self, method: &MethodMirror) -> Option<NativeFn> {
        let entries = self.entries.lock();
        entries
            .get(&(
                method.owner.clone(),
                method.name.clone(),
                method.raw_desc.clone(),
            ))
            .or_else(|| {
                entries.get(&(
                    method.owner.clone(),
                    method.name.clone(),
                    Arc::from(POLYMORPHIC_DESC),
                ))
            })
            .copied()
    }

    /// Dispatches a bodiless method.
    pub fn dispatch(
        &self,
        vm: &Vm,
        method: &Arc<MethodMirror>,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        match self.lookup(method) {
            Some(imp) => imp(vm, method, args),
            None => Err(Fault::UnmappedNative {
                owner: method.owner.clone(),
                name: method.name.clone(),
                desc: method.raw_desc.clone(),
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for NativeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBridge")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}
