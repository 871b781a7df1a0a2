//! Dynamic call-site linkage.
//!
//! Each `invokedynamic` instruction owns a [`CallSiteNode`]. The first
//! execution links it: the bootstrap reference is checked (it must be a
//! static-invoke handle), materialized as a method-handle object, and the
//! linkage method on the runtime's linkage class is invoked with a
//! one-element appendix array as the output slot. The object left in the
//! appendix — a call site or a bare method handle — is cached on the node
//! and reused by every later execution. The node's lock is held for the
//! whole bootstrap call, so two threads racing the first execution link
//! exactly once; the same lock makes linking non-reentrant: a bootstrap
//! method that executes its own call site deadlocks.
//!
//! Invocation never caches through a call site: when the linked object is
//! a `CallSite`, its `getTarget` runs again on every call, so retargeting
//! a mutable call site takes effect on the next invocation.

use crate::desc::MethodDescriptor;
use crate::mirror::ClassMirror;
use crate::object::{ArrayKind, HostPayload, Object};
use crate::resolve;
use crate::value::Value;
use crate::vm::Vm;
use crucible_core::{Fault, MemberRecord, RefKind, VmResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// Class that hosts the linkage entry point.
pub const LINKAGE_CLASS: &str = "java/lang/invoke/MethodHandleNatives";

/// Primary descriptor of the linkage entry point.
pub const LINK_CALL_SITE_DESC: &str =
    "(Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/invoke/MemberName;";

/// Transitional descriptor with an extra int parameter; consulted when
/// the primary form is absent.
pub const LINK_CALL_SITE_DESC_LEGACY: &str =
    "(Ljava/lang/Object;ILjava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/invoke/MemberName;";

/// A bootstrap method reference.
#[derive(Debug, Clone)]
pub struct BootstrapRef {
    pub kind: RefKind,
    pub owner: Arc<str>,
    pub name: Arc<str>,
    pub desc: Arc<str>,
}

impl BootstrapRef {
    pub fn new(kind: RefKind, owner: &str, name: &str, desc: &str) -> Self {
        Self {
            kind,
            owner: Arc::from(owner),
            name: Arc::from(name),
            desc: Arc::from(desc),
        }
    }
}

/// A static bootstrap argument, boxed into a guest object at link time.
#[derive(Debug, Clone)]
pub enum BootstrapArg {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(Arc<str>),
    Handle(BootstrapRef),
}

/// Per-instruction dynamic call site.
#[derive(Debug)]
pub struct CallSiteNode {
    name: Arc<str>,
    raw_desc: Arc<str>,
    desc: MethodDescriptor,
    bootstrap: BootstrapRef,
    args: Vec<BootstrapArg>,
    linked: Mutex<Option<Arc<Object>>>,
}

impl CallSiteNode {
    pub fn new(
        name: &str,
        desc: &str,
        bootstrap: BootstrapRef,
        args: Vec<BootstrapArg>,
    ) -> Result<Arc<Self>, Fault> {
        Ok(Arc::new(Self {
            name: Arc::from(name),
            raw_desc: Arc::from(desc),
            desc: MethodDescriptor::parse(desc)?,
            bootstrap,
            args,
            linked: Mutex::new(None),
        }))
    }

    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[inline]
    pub fn raw_descriptor(&self) -> &Arc<str> {
        &self.raw_desc
    }

    #[inline]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.desc
    }

    pub fn is_linked(&self) -> bool {
        self.linked.lock().is_some()
    }
}

// ============================================================================
// Member synthesis
// ============================================================================

/// Resolves a handle reference to its member record.
pub fn resolve_member(vm: &Vm, handle: &BootstrapRef) -> VmResult<MemberRecord> {
    let owner = vm.find_class(&handle.owner)?;
    if handle.kind.is_field() {
        let field = owner.find_field(&handle.name).ok_or_else(|| {
            vm.raise(
                "java/lang/NoSuchFieldError",
                Some(format!("{}.{}", handle.owner, handle.name)),
            )
        })?;
        Ok(MemberRecord::field(
            handle.kind,
            handle.owner.clone(),
            field.name.clone(),
            field.raw_desc.clone(),
            field.offset as i64,
            field.flags,
        ))
    } else {
        let method = owner.find_method(&handle.name, &handle.desc).ok_or_else(|| {
            vm.raise(
                "java/lang/NoSuchMethodError",
                Some(format!("{}.{}{}", handle.owner, handle.name, handle.desc)),
            )
        })?;
        Ok(MemberRecord::method(
            handle.kind,
            method.owner.clone(),
            method.name.clone(),
            method.raw_desc.clone(),
            0,
            method.flags,
        ))
    }
}

/// Materializes a method-handle object for a handle reference.
pub fn method_handle_constant(vm: &Vm, handle: &BootstrapRef) -> VmResult<Arc<Object>> {
    let member = resolve_member(vm, handle)?;
    let class = vm.find_class("java/lang/invoke/MethodHandle")?;
    let object = vm.alloc_instance(&class);
    object.set_payload(HostPayload::Handle(member));
    Ok(object)
}

/// Allocates a call site of the given class wired to an initial target.
/// Bootstrap methods use this to produce their result.
pub fn new_call_site(vm: &Vm, class_name: &str, target: &Arc<Object>) -> VmResult<Arc<Object>> {
    let class = vm.find_class(class_name)?;
    let site = vm.alloc_instance(&class);
    let field = class
        .find_field(crate::symbols::CALL_SITE_TARGET_FIELD)
        .ok_or_else(|| {
            vm.raise(
                "java/lang/NoSuchFieldError",
                Some(crate::symbols::CALL_SITE_TARGET_FIELD.to_string()),
            )
        })?;
    site.data().write_i64(field.offset as i64, target.handle())?;
    Ok(site)
}

fn box_bootstrap_arg(vm: &Vm, arg: &BootstrapArg) -> VmResult<Arc<Object>> {
    let boxed = match arg {
        BootstrapArg::Int(v) => {
            let class = vm.find_class("java/lang/Integer")?;
            let object = vm.alloc_instance(&class);
            object.set_payload(HostPayload::Int(*v));
            object
        }
        BootstrapArg::Long(v) => {
            let class = vm.find_class("java/lang/Long")?;
            let object = vm.alloc_instance(&class);
            object.set_payload(HostPayload::Long(*v));
            object
        }
        BootstrapArg::Float(v) => {
            let class = vm.find_class("java/lang/Float")?;
            let object = vm.alloc_instance(&class);
            object.set_payload(HostPayload::Float(*v));
            object
        }
        BootstrapArg::Double(v) => {
            let class = vm.find_class("java/lang/Double")?;
            let object = vm.alloc_instance(&class);
            object.set_payload(HostPayload::Double(*v));
            object
        }
        BootstrapArg::Text(text) => vm.intern(text),
        BootstrapArg::Handle(handle) => method_handle_constant(vm, handle)?,
    };
    Ok(boxed)
}

// ============================================================================
// Linkage
// ============================================================================

/// Links the call site, or returns the cached result.
pub fn link(vm: &Vm, node: &CallSiteNode, caller: &Arc<ClassMirror>) -> VmResult<Arc<Object>> {
    let mut linked = node.linked.lock();
    if let Some(target) = &*linked {
        return Ok(target.clone());
    }

    if node.bootstrap.kind != RefKind::InvokeStatic {
        return Err(vm.raise(
            "java/lang/IllegalStateException",
            Some("Bootstrap tag is not static".to_string()),
        ));
    }
    let bootstrap_handle = method_handle_constant(vm, &node.bootstrap)?;

    let object_array = vm.array_class(ArrayKind::Reference)?;
    let bsm_args = vm.alloc_array(&object_array, ArrayKind::Reference, node.args.len() as i32);
    for (i, arg) in node.args.iter().enumerate() {
        let boxed = box_bootstrap_arg(vm, arg)?;
        bsm_args.data().write_i64(i as i64 * 8, boxed.handle())?;
    }
    let appendix = vm.alloc_array(&object_array, ArrayKind::Reference, 1);

    let linkage = vm.find_class(LINKAGE_CLASS)?;
    vm.ensure_initialized(&linkage)?;
    let (method, legacy) = match linkage.declared_method("linkCallSite", LINK_CALL_SITE_DESC) {
        Some(method) => (method, false),
        None => match linkage.declared_method("linkCallSite", LINK_CALL_SITE_DESC_LEGACY) {
            Some(method) => (method, true),
            None => {
                return Err(vm.raise(
                    "java/lang/NoSuchMethodError",
                    Some(format!("{LINKAGE_CLASS}.linkCallSite")),
                ))
            }
        },
    };

    let caller_object = Value::Reference(Some(vm.class_object(caller)));
    let name = Value::Reference(Some(vm.intern(&node.name)));
    // The descriptor string stands in for the method-type object.
    let call_type = Value::Reference(Some(vm.intern(&node.raw_desc)));
    let link_args = if legacy {
        vec![
            caller_object,
            Value::Int(0),
            Value::Reference(Some(bootstrap_handle)),
            name,
            call_type,
            Value::Reference(Some(bsm_args)),
            Value::Reference(Some(appendix.clone())),
        ]
    } else {
        vec![
            caller_object,
            Value::Reference(Some(bootstrap_handle)),
            name,
            call_type,
            Value::Reference(Some(bsm_args)),
            Value::Reference(Some(appendix.clone())),
        ]
    };
    vm.invoke(&method, link_args)?;

    let target_handle = appendix.data().read_i64(0)?;
    if target_handle == 0 {
        return Err(Fault::MalformedLinkage(Arc::from(format!(
            "linkage of {}{} produced no target",
            node.name, node.raw_desc
        )))
        .into());
    }
    let target = vm.pool().get(target_handle)?;
    *linked = Some(target.clone());
    Ok(target)
}

/// Executes a linked dynamic call.
///
/// `args` are the popped declared arguments; a leading null reference is
/// a padding sentinel and is skipped. The effective target is re-read
/// from call sites on every invocation.
pub fn dynamic_call(
    vm: &Vm,
    node: &CallSiteNode,
    caller: &Arc<ClassMirror>,
    args: Vec<Value>,
) -> VmResult<Option<Value>> {
    let mut handle = link(vm, node, caller)?;

    let call_site_class = vm.find_class("java/lang/invoke/CallSite")?;
    if call_site_class.is_assignable_from(handle.class()) {
        let get_target = handle
            .class()
            .find_method("getTarget", "()Ljava/lang/invoke/MethodHandle;")
            .ok_or_else(|| {
                vm.raise(
                    "java/lang/NoSuchMethodError",
                    Some("getTarget".to_string()),
                )
            })?;
        let target = vm
            .invoke(&get_target, vec![Value::Reference(Some(handle.clone()))])?
            .and_then(|value| value.as_reference().ok())
            .flatten();
        handle = target.ok_or_else(|| vm.raise_npe())?;
    }

    let invoke_exact = handle
        .class()
        .find_method("invokeExact", &node.raw_desc)
        .ok_or_else(|| {
            vm.raise(
                "java/lang/NoSuchMethodError",
                Some(format!("invokeExact{}", node.raw_desc)),
            )
        })?;

    let skip = matches!(args.first(), Some(Value::Reference(None)));
    let mut call_args = Vec::with_capacity(args.len() + 1);
    call_args.push(Value::Reference(Some(handle)));
    call_args.extend(args.into_iter().skip(usize::from(skip)));
    vm.invoke(&invoke_exact, call_args)
}

/// Built-in target dispatch for `invokeExact` on a handle object carrying
/// a resolved member.
pub fn invoke_exact_target(
    vm: &Vm,
    handle: &Arc<Object>,
    args: Vec<Value>,
) -> VmResult<Option<Value>> {
    let member = match handle.payload() {
        Some(HostPayload::Handle(member)) => member,
        _ => {
            return Err(Fault::MalformedLinkage(Arc::from(
                "method handle carries no resolved member",
            ))
            .into())
        }
    };
    match member.kind {
        RefKind::InvokeStatic => {
            let owner = vm.find_class(&member.owner)?;
            vm.ensure_initialized(&owner)?;
            let method = owner.find_method(&member.name, &member.desc).ok_or_else(|| {
                vm.raise(
                    "java/lang/NoSuchMethodError",
                    Some(format!("{}.{}", member.owner, member.name)),
                )
            })?;
            vm.invoke(&method, args)
        }
        RefKind::InvokeVirtual | RefKind::InvokeInterface => {
            let receiver = args
                .first()
                .and_then(|v| v.as_reference().ok())
                .flatten()
                .ok_or_else(|| vm.raise_npe())?;
            let owner = vm.find_class(&member.owner)?;
            let resolved = owner.find_method(&member.name, &member.desc).ok_or_else(|| {
                vm.raise(
                    "java/lang/NoSuchMethodError",
                    Some(format!("{}.{}", member.owner, member.name)),
                )
            })?;
            let selected = resolve::select_virtual(receiver.class(), &resolved);
            vm.invoke(&selected, args)
        }
        RefKind::InvokeSpecial => {
            let owner = vm.find_class(&member.owner)?;
            let method = owner.find_method(&member.name, &member.desc).ok_or_else(|| {
                vm.raise(
                    "java/lang/NoSuchMethodError",
                    Some(format!("{}.{}", member.owner, member.name)),
                )
            })?;
            vm.invoke(&method, args)
        }
        RefKind::NewInvokeSpecial => {
            let owner = vm.find_class(&member.owner)?;
            vm.ensure_initialized(&owner)?;
            let init = owner.find_method("<init>", &member.desc).ok_or_else(|| {
                vm.raise(
                    "java/lang/NoSuchMethodError",
                    Some(format!("{}.<init>", member.owner)),
                )
            })?;
            let object = vm.alloc_instance(&owner);
            let mut init_args = Vec::with_capacity(args.len() + 1);
            init_args.push(Value::Reference(Some(object.clone())));
            init_args.extend(args);
            vm.invoke(&init, init_args)?;
            Ok(Some(Value::Reference(Some(object))))
        }
        RefKind::GetField | RefKind::GetStatic | RefKind::PutField | RefKind::PutStatic => {
            field_access(vm, &member, args)
        }
    }
}

fn field_access(vm: &Vm, member: &MemberRecord, mut args: Vec<Value>) -> VmResult<Option<Value>> {
    let owner = vm.find_class(&member.owner)?;
    let field = owner.find_field(&member.name).ok_or_else(|| {
        vm.raise(
            "java/lang/NoSuchFieldError",
            Some(format!("{}.{}", member.owner, member.name)),
        )
    })?;
    let is_static = matches!(member.kind, RefKind::GetStatic | RefKind::PutStatic);
    let region;
    if is_static {
        let declarer = owner.declarer_of(&field);
        vm.ensure_initialized(&declarer)?;
        region = declarer.static_data().clone();
    } else {
        let receiver = if args.is_empty() {
            None
        } else {
            args.remove(0).as_reference()?
        };
        let receiver = receiver.ok_or_else(|| vm.raise_npe())?;
        region = receiver.data().clone();
    }
    match member.kind {
        RefKind::GetField | RefKind::GetStatic => {
            crate::ops::field::read_slot(vm, &region, &field).map(Some)
        }
        _ => {
            let value = args
                .pop()
                .ok_or(Fault::OperandStack("missing store operand"))?;
            crate::ops::field::write_slot(&region, &field, &value)?;
            Ok(None)
        }
    }
}
