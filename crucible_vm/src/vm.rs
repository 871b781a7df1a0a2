//! The virtual machine: class registry, heap, processor table, native
//! bridge, and the method invocation entry point.

use crate::context::ExecutionContext;
use crate::dispatch::{InstructionInterceptor, ProcessorTable};
use crate::interp::{self, Outcome};
use crate::locals::Locals;
use crate::mirror::{ClassMirror, MethodMirror, ACC_SYNCHRONIZED};
use crate::natives::NativeBridge;
use crate::object::{ArrayKind, HandlePool, HostPayload, Object};
use crate::symbols;
use crate::value::{ObjectRef, Value};
use crucible_core::{GuestException, VmError, VmResult};
use crucible_memory::MemoryRegion;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::sync::Arc;

/// Guest call depth above which invocation fails with
/// `StackOverflowError`.
const MAX_CALL_DEPTH: usize = 1024;

thread_local! {
    // Each guest frame recurses on the host stack, so the depth guard is
    // per host thread: one thread's stack does not count against another's.
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Tunables fixed at VM construction.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Record line markers into the context as they are crossed.
    pub track_line_numbers: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            track_line_numbers: true,
        }
    }
}

/// A booted virtual machine.
///
/// All state is interior-mutable; `&Vm` is the working handle everywhere.
#[derive(Debug)]
pub struct Vm {
    classes: Mutex<FxHashMap<Arc<str>, Arc<ClassMirror>>>,
    pool: HandlePool,
    processors: RwLock<ProcessorTable>,
    interceptors: Mutex<Vec<Arc<dyn InstructionInterceptor>>>,
    natives: NativeBridge,
    options: ExecutionOptions,
    strings: Mutex<FxHashMap<Arc<str>, Arc<Object>>>,
    class_objects: Mutex<FxHashMap<Arc<str>, Arc<Object>>>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_options(ExecutionOptions::default())
    }

    pub fn with_options(options: ExecutionOptions) -> Self {
        let vm = Self {
            classes: Mutex::new(FxHashMap::default()),
            pool: HandlePool::new(),
            processors: RwLock::new(ProcessorTable::standard()),
            interceptors: Mutex::new(Vec::new()),
            natives: NativeBridge::new(),
            options,
            strings: Mutex::new(FxHashMap::default()),
            class_objects: Mutex::new(FxHashMap::default()),
        };
        symbols::bootstrap(&vm);
        vm
    }

    #[inline]
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    #[inline]
    pub fn pool(&self) -> &HandlePool {
        &self.pool
    }

    #[inline]
    pub fn natives(&self) -> &NativeBridge {
        &self.natives
    }

    // ------------------------------------------------------------------
    // Classes
    // ------------------------------------------------------------------

    /// Registers a class, replacing any previous definition of the name.
    pub fn register_class(&self, class: Arc<ClassMirror>) {
        self.classes.lock().insert(class.name().clone(), class);
    }

    pub fn lookup_class(&self, name: &str) -> Option<Arc<ClassMirror>> {
        self.classes.lock().get(name).cloned()
    }

    /// Looks up a class; absence is the guest `NoClassDefFoundError`.
    pub fn find_class(&self, name: &str) -> VmResult<Arc<ClassMirror>> {
        self.lookup_class(name)
            .ok_or_else(|| self.raise("java/lang/NoClassDefFoundError", Some(name.to_string())))
    }

    /// Runs `<clinit>` if the class has not been initialized, supers
    /// first. A second call is a no-op, as is the recursive call made
    /// while the initializer itself runs.
    pub fn ensure_initialized(&self, class: &Arc<ClassMirror>) -> VmResult<()> {
        if class.is_initialized() {
            return Ok(());
        }
        if let Some(sup) = class.super_class() {
            self.ensure_initialized(&sup.clone())?;
        }
        if let Some(clinit) = class.begin_init() {
            let result = self.invoke(&clinit, Vec::new());
            class.finish_init();
            result?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    pub fn alloc_instance(&self, class: &Arc<ClassMirror>) -> Arc<Object> {
        let data = MemoryRegion::alloc(class.instance_size());
        let class = class.clone();
        self.pool
            .adopt(move |handle| Object::instance(handle, class, data))
    }

    /// Allocates an array; the caller has already rejected negative
    /// lengths.
    pub fn alloc_array(
        &self,
        class: &Arc<ClassMirror>,
        kind: ArrayKind,
        length: i32,
    ) -> Arc<Object> {
        let data = MemoryRegion::alloc(length as usize * kind.width());
        let class = class.clone();
        self.pool
            .adopt(move |handle| Object::array(handle, class, kind, length, data))
    }

    /// The registered class for a primitive array kind.
    pub fn array_class(&self, kind: ArrayKind) -> VmResult<Arc<ClassMirror>> {
        let name = match kind {
            ArrayKind::Boolean => "[Z",
            ArrayKind::Byte => "[B",
            ArrayKind::Char => "[C",
            ArrayKind::Short => "[S",
            ArrayKind::Int => "[I",
            ArrayKind::Long => "[J",
            ArrayKind::Float => "[F",
            ArrayKind::Double => "[D",
            ArrayKind::Reference => "[Ljava/lang/Object;",
        };
        self.find_class(name)
    }

    /// The array-of-`element` class, created on first use.
    pub fn ref_array_class(&self, element: &str) -> Arc<ClassMirror> {
        let name = format!("[L{element};");
        if let Some(existing) = self.lookup_class(&name) {
            return existing;
        }
        let mut builder = ClassMirror::builder(name.as_str());
        if let Some(object) = self.lookup_class("java/lang/Object") {
            builder = builder.extends(object);
        }
        let class = builder.build().expect("array class layout");
        self.register_class(class.clone());
        class
    }

    // ------------------------------------------------------------------
    // Strings and exceptions
    // ------------------------------------------------------------------

    /// Interned string object for `text`.
    pub fn intern(&self, text: &str) -> Arc<Object> {
        let mut strings = self.strings.lock();
        if let Some(existing) = strings.get(text) {
            return existing.clone();
        }
        let class = self
            .lookup_class("java/lang/String")
            .expect("string class is registered at boot");
        let object = self.alloc_instance(&class);
        let text: Arc<str> = Arc::from(text);
        object.set_payload(HostPayload::Text(text.clone()));
        strings.insert(text, object.clone());
        object
    }

    /// The `java/lang/Class` instance mirroring a class, created on
    /// first use.
    pub fn class_object(&self, class: &Arc<ClassMirror>) -> Arc<Object> {
        let mut objects = self.class_objects.lock();
        if let Some(existing) = objects.get(class.name()) {
            return existing.clone();
        }
        let class_class = self
            .lookup_class("java/lang/Class")
            .expect("class mirror class is registered at boot");
        let object = self.alloc_instance(&class_class);
        object.set_payload(HostPayload::Type(class.clone()));
        objects.insert(class.name().clone(), object.clone());
        object
    }

    /// Builds a guest exception of the named class.
    ///
    /// The instance is allocated so handlers can receive it; if the class
    /// is not registered the exception still carries the name and routes
    /// normally, with a null object pushed at the handler.
    pub fn raise(&self, class_name: &str, message: Option<String>) -> VmError {
        let message: Option<Arc<str>> = message.map(Arc::from);
        let oop = match self.lookup_class(class_name) {
            Some(class) => {
                let object = self.alloc_instance(&class);
                if let (Some(msg), Some(field)) = (&message, class.find_field("message")) {
                    let interned = self.intern(msg);
                    let _ = object
                        .data()
                        .write_i64(field.offset as i64, interned.handle());
                }
                object.handle()
            }
            None => 0,
        };
        VmError::Exception(GuestException::new(oop, Arc::from(class_name), message))
    }

    pub fn raise_npe(&self) -> VmError {
        self.raise("java/lang/NullPointerException", None)
    }

    /// The dynamic class of a thrown exception, when recoverable.
    pub fn exception_class(&self, ex: &GuestException) -> Option<Arc<ClassMirror>> {
        if ex.oop != 0 {
            if let Ok(object) = self.pool.get(ex.oop) {
                return Some(object.class().clone());
            }
        }
        self.lookup_class(&ex.class_name)
    }

    /// The thrown object itself; null when the instance was never
    /// materialized.
    pub fn exception_object(&self, ex: &GuestException) -> ObjectRef {
        self.pool.resolve(ex.oop).ok().flatten()
    }

    /// Reconstructs the exception record from a thrown object.
    pub fn exception_from_object(&self, object: &Arc<Object>) -> GuestException {
        let class = object.class();
        let message = class
            .find_field("message")
            .and_then(|field| object.data().read_i64(field.offset as i64).ok())
            .and_then(|handle| self.pool.resolve(handle).ok().flatten())
            .and_then(|string| string.text());
        GuestException::new(object.handle(), class.name().clone(), message)
    }

    // ------------------------------------------------------------------
    // Dispatch surface
    // ------------------------------------------------------------------

    pub fn processors(&self) -> RwLockReadGuard<'_, ProcessorTable> {
        self.processors.read()
    }

    pub fn processors_mut(&self) -> RwLockWriteGuard<'_, ProcessorTable> {
        self.processors.write()
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn InstructionInterceptor>) {
        self.interceptors.lock().push(interceptor);
    }

    pub(crate) fn interceptor_snapshot(&self) -> Vec<Arc<dyn InstructionInterceptor>> {
        self.interceptors.lock().clone()
    }

    // ------------------------------------------------------------------
    // Invocation
    // ------------------------------------------------------------------

    /// Invokes a method with already-ordered arguments (receiver first
    /// for instance methods).
    pub fn invoke(
        &self,
        method: &Arc<MethodMirror>,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        let depth = CALL_DEPTH.with(Cell::get);
        if depth >= MAX_CALL_DEPTH {
            return Err(self.raise("java/lang/StackOverflowError", None));
        }
        CALL_DEPTH.with(|d| d.set(depth + 1));
        let result = self.invoke_inner(method, args);
        CALL_DEPTH.with(|d| d.set(depth));
        result
    }

    fn invoke_inner(
        &self,
        method: &Arc<MethodMirror>,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        if method.is_abstract() {
            return Err(self.raise(
                "java/lang/AbstractMethodError",
                Some(format!("{}.{}", method.owner, method.name)),
            ));
        }
        let code = match &method.code {
            Some(code) => code,
            None => return self.natives.dispatch(self, method, args),
        };
        let arg_slots = method.arg_slots();
        let mut locals = Locals::new(code.max_locals.max(arg_slots));
        let mut slot = 0;
        let receiver = if method.is_static() {
            None
        } else {
            args.first().and_then(|v| v.as_reference().ok()).flatten()
        };
        for value in args {
            let span = if value.is_wide() { 2 } else { 1 };
            locals.store(slot, value)?;
            slot += span;
        }
        let mut ctx = ExecutionContext::new(method.clone(), locals);
        if method.flags & ACC_SYNCHRONIZED != 0 {
            if let Some(receiver) = receiver {
                receiver.monitor().enter();
                ctx.monitor_entered(receiver);
            }
        }
        match interp::execute(self, &mut ctx, code)? {
            Outcome::Returned(value) => Ok(value),
            Outcome::Aborted => Ok(None),
        }
    }

    /// Convenience wrapper: initializes the class and invokes one of its
    /// static methods.
    pub fn call_static(
        &self,
        class: &str,
        name: &str,
        desc: &str,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        let class = self.find_class(class)?;
        self.ensure_initialized(&class)?;
        let method = class.find_method(name, desc).ok_or_else(|| {
            self.raise(
                "java/lang/NoSuchMethodError",
                Some(format!("{}.{name}{desc}", class.name())),
            )
        })?;
        self.invoke(&method, args)
    }
}
