//! The boot class world.
//!
//! Registers the well-known classes the runtime itself depends on — the
//! root hierarchy, the throwable tree, primitive array classes, boxes,
//! and the method-handle machinery — together with their built-in native
//! implementations. Embedders register their own classes on top.

use crate::linker::{self, LINKAGE_CLASS, LINK_CALL_SITE_DESC, LINK_CALL_SITE_DESC_LEGACY};
use crate::mirror::{ClassMirror, MethodMirror, ACC_FINAL, ACC_PUBLIC};
use crate::object::Object;
use crate::value::Value;
use crate::vm::Vm;
use crucible_core::{Fault, VmResult};
use std::sync::Arc;

/// Field on `java/lang/invoke/CallSite` holding the current target.
pub const CALL_SITE_TARGET_FIELD: &str = "target";

pub(crate) fn bootstrap(vm: &Vm) {
    let object = define(vm, ClassMirror::builder("java/lang/Object"));
    define(vm, ClassMirror::builder("java/lang/Class").extends(object.clone()));
    define(vm, ClassMirror::builder("java/lang/String").extends(object.clone()));

    for box_class in [
        "java/lang/Integer",
        "java/lang/Long",
        "java/lang/Float",
        "java/lang/Double",
    ] {
        define(vm, ClassMirror::builder(box_class).extends(object.clone()));
    }

    for array_class in ["[Z", "[B", "[C", "[S", "[I", "[J", "[F", "[D", "[Ljava/lang/Object;"] {
        define(vm, ClassMirror::builder(array_class).extends(object.clone()));
    }

    throwables(vm, &object);
    method_handles(vm, &object);
}

fn throwables(vm: &Vm, object: &Arc<ClassMirror>) {
    let throwable = define(
        vm,
        ClassMirror::builder("java/lang/Throwable")
            .extends(object.clone())
            .field("message", "Ljava/lang/String;", 0),
    );
    let exception = define(
        vm,
        ClassMirror::builder("java/lang/Exception").extends(throwable.clone()),
    );
    let error = define(
        vm,
        ClassMirror::builder("java/lang/Error").extends(throwable.clone()),
    );
    let runtime_exception = define(
        vm,
        ClassMirror::builder("java/lang/RuntimeException").extends(exception.clone()),
    );
    for name in [
        "java/lang/NullPointerException",
        "java/lang/ArithmeticException",
        "java/lang/IllegalStateException",
        "java/lang/IllegalMonitorStateException",
        "java/lang/ClassCastException",
        "java/lang/NegativeArraySizeException",
    ] {
        define(vm, ClassMirror::builder(name).extends(runtime_exception.clone()));
    }
    let index_oob = define(
        vm,
        ClassMirror::builder("java/lang/IndexOutOfBoundsException")
            .extends(runtime_exception.clone()),
    );
    define(
        vm,
        ClassMirror::builder("java/lang/ArrayIndexOutOfBoundsException").extends(index_oob),
    );

    let vm_error = define(
        vm,
        ClassMirror::builder("java/lang/VirtualMachineError").extends(error.clone()),
    );
    define(
        vm,
        ClassMirror::builder("java/lang/InternalError").extends(vm_error.clone()),
    );
    define(
        vm,
        ClassMirror::builder("java/lang/StackOverflowError").extends(vm_error),
    );

    let linkage_error = define(
        vm,
        ClassMirror::builder("java/lang/LinkageError").extends(error),
    );
    define(
        vm,
        ClassMirror::builder("java/lang/NoClassDefFoundError").extends(linkage_error.clone()),
    );
    let icce = define(
        vm,
        ClassMirror::builder("java/lang/IncompatibleClassChangeError")
            .extends(linkage_error),
    );
    for name in [
        "java/lang/NoSuchFieldError",
        "java/lang/NoSuchMethodError",
        "java/lang/AbstractMethodError",
    ] {
        define(vm, ClassMirror::builder(name).extends(icce.clone()));
    }
}

fn method_handles(vm: &Vm, object: &Arc<ClassMirror>) {
    define(
        vm,
        ClassMirror::builder("java/lang/invoke/MemberName").extends(object.clone()),
    );
    define(
        vm,
        ClassMirror::builder("java/lang/invoke/MethodHandle")
            .extends(object.clone())
            .polymorphic_method("invokeExact", ACC_PUBLIC | ACC_FINAL),
    );
    let call_site = define(
        vm,
        ClassMirror::builder("java/lang/invoke/CallSite")
            .extends(object.clone())
            .field(CALL_SITE_TARGET_FIELD, "Ljava/lang/invoke/MethodHandle;", 0)
            .native_method("getTarget", "()Ljava/lang/invoke/MethodHandle;", ACC_PUBLIC)
            .native_method(
                "setTarget",
                "(Ljava/lang/invoke/MethodHandle;)V",
                ACC_PUBLIC,
            ),
    );
    define(
        vm,
        ClassMirror::builder("java/lang/invoke/ConstantCallSite").extends(call_site.clone()),
    );
    define(
        vm,
        ClassMirror::builder("java/lang/invoke/MutableCallSite").extends(call_site),
    );
    define(
        vm,
        ClassMirror::builder(LINKAGE_CLASS)
            .extends(object.clone())
            .native_method(
                "linkCallSite",
                LINK_CALL_SITE_DESC,
                ACC_PUBLIC | crate::mirror::ACC_STATIC,
            ),
    );

    let natives = vm.natives();
    natives.register(
        "java/lang/invoke/MethodHandle",
        "invokeExact",
        crate::natives::POLYMORPHIC_DESC,
        mh_invoke_exact,
    );
    natives.register(
        "java/lang/invoke/CallSite",
        "getTarget",
        "()Ljava/lang/invoke/MethodHandle;",
        call_site_get_target,
    );
    natives.register(
        "java/lang/invoke/CallSite",
        "setTarget",
        "(Ljava/lang/invoke/MethodHandle;)V",
        call_site_set_target,
    );
    // Both descriptor generations dispatch to the same entry point.
    natives.register(LINKAGE_CLASS, "linkCallSite", LINK_CALL_SITE_DESC, link_call_site);
    natives.register(
        LINKAGE_CLASS,
        "linkCallSite",
        LINK_CALL_SITE_DESC_LEGACY,
        link_call_site,
    );
}

fn define(vm: &Vm, builder: crate::mirror::ClassBuilder) -> Arc<ClassMirror> {
    let class = builder.build().expect("boot class layout");
    vm.register_class(class.clone());
    class
}

// ============================================================================
// Built-in natives
// ============================================================================

fn receiver(vm: &Vm, args: &[Value]) -> VmResult<Arc<Object>> {
    args.first()
        .and_then(|v| v.as_reference().ok())
        .flatten()
        .ok_or_else(|| vm.raise_npe())
}

fn mh_invoke_exact(
    vm: &Vm,
    _method: &Arc<MethodMirror>,
    mut args: Vec<Value>,
) -> VmResult<Option<Value>> {
    let handle = receiver(vm, &args)?;
    args.remove(0);
    linker::invoke_exact_target(vm, &handle, args)
}

fn call_site_target_field(
    vm: &Vm,
    site: &Arc<Object>,
) -> VmResult<Arc<crate::mirror::FieldMirror>> {
    site.class()
        .find_field(CALL_SITE_TARGET_FIELD)
        .ok_or_else(|| {
            vm.raise(
                "java/lang/NoSuchFieldError",
                Some(CALL_SITE_TARGET_FIELD.to_string()),
            )
        })
}

fn call_site_get_target(
    vm: &Vm,
    _method: &Arc<MethodMirror>,
    args: Vec<Value>,
) -> VmResult<Option<Value>> {
    let site = receiver(vm, &args)?;
    let field = call_site_target_field(vm, &site)?;
    let handle = site.data().read_i64(field.offset as i64)?;
    Ok(Some(Value::Reference(vm.pool().resolve(handle)?)))
}

fn call_site_set_target(
    vm: &Vm,
    _method: &Arc<MethodMirror>,
    args: Vec<Value>,
) -> VmResult<Option<Value>> {
    let site = receiver(vm, &args)?;
    let field = call_site_target_field(vm, &site)?;
    let target = args
        .get(1)
        .map(|v| v.as_reference())
        .transpose()?
        .flatten();
    site.data()
        .write_i64(field.offset as i64, crate::object::handle_of(&target))?;
    Ok(None)
}

/// Default linkage entry point: runs the bootstrap handle with
/// `(caller, name, type, args)` and publishes the produced call site (or
/// bare handle) through the appendix output slot.
fn link_call_site(
    vm: &Vm,
    method: &Arc<MethodMirror>,
    mut args: Vec<Value>,
) -> VmResult<Option<Value>> {
    if &*method.raw_desc == LINK_CALL_SITE_DESC_LEGACY {
        // Transitional form carries a reserved int in slot 1.
        if args.len() > 1 {
            args.remove(1);
        }
    }
    let [caller, bootstrap, name, call_type, bsm_args, appendix]: [Value; 6] =
        args.try_into().map_err(|_| {
            Fault::MalformedLinkage(Arc::from("linkCallSite arity mismatch"))
        })?;
    let bootstrap = bootstrap.as_reference()?.ok_or_else(|| vm.raise_npe())?;
    let appendix = appendix.as_reference()?.ok_or_else(|| vm.raise_npe())?;

    let produced = linker::invoke_exact_target(
        vm,
        &bootstrap,
        vec![caller, name, call_type, bsm_args],
    )?;
    let site = produced
        .map(|v| v.as_reference())
        .transpose()?
        .flatten()
        .ok_or_else(|| Fault::MalformedLinkage(Arc::from("bootstrap produced no call site")))?;
    appendix.data().write_i64(0, site.handle())?;
    Ok(Some(Value::null()))
}
