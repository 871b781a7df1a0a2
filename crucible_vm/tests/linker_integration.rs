//! Dynamic call-site linkage tests: one-shot bootstrap, per-call target
//! reads through mutable sites, and the linkage failure modes.

use crucible_vm::insn::{Insn, IntBinOp, MethodCode};
use crucible_vm::linker::{self, BootstrapRef, CallSiteNode};
use crucible_vm::mirror::{ClassMirror, MethodMirror, ACC_PUBLIC, ACC_STATIC};
use crucible_vm::value::Value;
use crucible_vm::vm::Vm;
use crucible_vm::{RefKind, VmResult};
use std::sync::Arc;

const STATIC: u32 = ACC_PUBLIC | ACC_STATIC;

const BSM_DESC: &str =
    "(Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/invoke/CallSite;";

fn int_bin_body(op: IntBinOp) -> MethodCode {
    MethodCode::new(
        2,
        vec![
            Insn::Load(0),
            Insn::Load(1),
            Insn::IntBin(op),
            Insn::ReturnValue,
        ],
    )
}

/// Registers the bootstrap host class: two arithmetic targets, a link
/// counter, a slot for the produced site, and the bootstrap natives.
fn install_demo(vm: &Vm) {
    let mirror = ClassMirror::builder("demo/Indy")
        .field("BOOT_COUNT", "I", ACC_STATIC)
        .field("SITE", "Ljava/lang/Object;", ACC_STATIC)
        .method("add", "(II)I", STATIC, int_bin_body(IntBinOp::Add))
        .method("mul", "(II)I", STATIC, int_bin_body(IntBinOp::Mul))
        .native_method("bootConstant", BSM_DESC, STATIC)
        .native_method("bootMutable", BSM_DESC, STATIC)
        .build()
        .unwrap();
    vm.register_class(mirror);
    vm.natives()
        .register("demo/Indy", "bootConstant", BSM_DESC, boot_constant);
    vm.natives()
        .register("demo/Indy", "bootMutable", BSM_DESC, boot_mutable);
}

/// Registers a caller whose body computes `indy 20, 22` through the node.
fn install_main(vm: &Vm, node: Arc<CallSiteNode>) {
    let mirror = ClassMirror::builder("demo/Main")
        .method(
            "run",
            "()I",
            STATIC,
            MethodCode::new(
                0,
                vec![
                    Insn::PushInt(20),
                    Insn::PushInt(22),
                    Insn::InvokeDynamic(node),
                    Insn::ReturnValue,
                ],
            ),
        )
        .build()
        .unwrap();
    vm.register_class(mirror);
}

fn add_node(vm: &Vm, bootstrap_name: &str) -> Arc<CallSiteNode> {
    let node = CallSiteNode::new(
        "add",
        "(II)I",
        BootstrapRef::new(RefKind::InvokeStatic, "demo/Indy", bootstrap_name, BSM_DESC),
        vec![],
    )
    .unwrap();
    install_main(vm, node.clone());
    node
}

fn boot_count(vm: &Vm) -> i32 {
    let class = vm.find_class("demo/Indy").unwrap();
    let field = class.find_field("BOOT_COUNT").unwrap();
    class.static_data().read_i32(field.offset as i64).unwrap()
}

fn bump_boot_count(vm: &Vm) -> VmResult<()> {
    let class = vm.find_class("demo/Indy")?;
    let field = class.find_field("BOOT_COUNT").expect("counter field");
    let count = class.static_data().read_i32(field.offset as i64)?;
    class
        .static_data()
        .write_i32(field.offset as i64, count + 1)?;
    Ok(())
}

fn add_handle(vm: &Vm) -> VmResult<Arc<crucible_vm::object::Object>> {
    linker::method_handle_constant(
        vm,
        &BootstrapRef::new(RefKind::InvokeStatic, "demo/Indy", "add", "(II)I"),
    )
}

fn boot_constant(
    vm: &Vm,
    _method: &Arc<MethodMirror>,
    _args: Vec<Value>,
) -> VmResult<Option<Value>> {
    bump_boot_count(vm)?;
    let target = add_handle(vm)?;
    let site = linker::new_call_site(vm, "java/lang/invoke/ConstantCallSite", &target)?;
    Ok(Some(Value::Reference(Some(site))))
}

fn boot_mutable(
    vm: &Vm,
    _method: &Arc<MethodMirror>,
    _args: Vec<Value>,
) -> VmResult<Option<Value>> {
    bump_boot_count(vm)?;
    let target = add_handle(vm)?;
    let site = linker::new_call_site(vm, "java/lang/invoke/MutableCallSite", &target)?;
    let class = vm.find_class("demo/Indy")?;
    let field = class.find_field("SITE").expect("site field");
    class
        .static_data()
        .write_i64(field.offset as i64, site.handle())?;
    Ok(Some(Value::Reference(Some(site))))
}

fn run_main(vm: &Vm) -> VmResult<Option<Value>> {
    vm.call_static("demo/Main", "run", "()I", vec![])
}

#[test]
fn test_linked_site_invokes_target() {
    let vm = Vm::new();
    install_demo(&vm);
    let node = add_node(&vm, "bootConstant");
    assert!(!node.is_linked());

    let result = run_main(&vm).unwrap();
    assert!(matches!(result, Some(Value::Int(42))));
    assert!(node.is_linked());
    assert_eq!(boot_count(&vm), 1);
}

#[test]
fn test_bootstrap_runs_once_per_site() {
    let vm = Vm::new();
    install_demo(&vm);
    add_node(&vm, "bootConstant");

    for _ in 0..3 {
        let result = run_main(&vm).unwrap();
        assert!(matches!(result, Some(Value::Int(42))));
    }
    assert_eq!(boot_count(&vm), 1);
}

#[test]
fn test_mutable_site_retargets_next_call() {
    let vm = Vm::new();
    install_demo(&vm);
    add_node(&vm, "bootMutable");

    let result = run_main(&vm).unwrap();
    assert!(matches!(result, Some(Value::Int(42))));

    // Swap the site's target; the next call must read it afresh.
    let indy = vm.find_class("demo/Indy").unwrap();
    let field = indy.find_field("SITE").unwrap();
    let site_handle = indy.static_data().read_i64(field.offset as i64).unwrap();
    let site = vm.pool().get(site_handle).unwrap();
    let mul = linker::method_handle_constant(
        &vm,
        &BootstrapRef::new(RefKind::InvokeStatic, "demo/Indy", "mul", "(II)I"),
    )
    .unwrap();
    let set_target = site
        .class()
        .find_method("setTarget", "(Ljava/lang/invoke/MethodHandle;)V")
        .unwrap();
    vm.invoke(
        &set_target,
        vec![
            Value::Reference(Some(site)),
            Value::Reference(Some(mul)),
        ],
    )
    .unwrap();

    let result = run_main(&vm).unwrap();
    assert!(matches!(result, Some(Value::Int(440))));
    assert_eq!(boot_count(&vm), 1);
}

#[test]
fn test_non_static_bootstrap_tag_rejected() {
    let vm = Vm::new();
    install_demo(&vm);
    let node = CallSiteNode::new(
        "add",
        "(II)I",
        BootstrapRef::new(RefKind::InvokeVirtual, "demo/Indy", "bootConstant", BSM_DESC),
        vec![],
    )
    .unwrap();
    install_main(&vm, node);

    let err = run_main(&vm).unwrap_err();
    let ex = err.as_exception().expect("guest exception");
    assert_eq!(&*ex.class_name, "java/lang/IllegalStateException");
    assert_eq!(ex.message.as_deref(), Some("Bootstrap tag is not static"));
}

#[test]
fn test_legacy_linkage_descriptor_fallback() {
    let vm = Vm::new();
    install_demo(&vm);
    add_node(&vm, "bootConstant");

    // Replace the linkage class with one declaring only the transitional
    // form; the built-in native is registered under both descriptors.
    let object = vm.find_class("java/lang/Object").unwrap();
    let linkage = ClassMirror::builder(linker::LINKAGE_CLASS)
        .extends(object)
        .native_method(
            "linkCallSite",
            linker::LINK_CALL_SITE_DESC_LEGACY,
            STATIC,
        )
        .build()
        .unwrap();
    vm.register_class(linkage);

    let result = run_main(&vm).unwrap();
    assert!(matches!(result, Some(Value::Int(42))));
    assert_eq!(boot_count(&vm), 1);
}

#[test]
fn test_leading_null_sentinel_skipped() {
    let vm = Vm::new();
    install_demo(&vm);
    let node = add_node(&vm, "bootConstant");
    let caller = vm.find_class("demo/Main").unwrap();

    let result = linker::dynamic_call(
        &vm,
        &node,
        &caller,
        vec![Value::Reference(None), Value::Int(20), Value::Int(22)],
    )
    .unwrap();
    assert!(matches!(result, Some(Value::Int(42))));
}

fn silent_link(
    _vm: &Vm,
    _method: &Arc<MethodMirror>,
    _args: Vec<Value>,
) -> VmResult<Option<Value>> {
    Ok(None)
}

#[test]
fn test_empty_appendix_is_linkage_fault() {
    let vm = Vm::new();
    install_demo(&vm);
    add_node(&vm, "bootConstant");
    // A linkage method that never fills the appendix slot.
    vm.natives().register(
        linker::LINKAGE_CLASS,
        "linkCallSite",
        linker::LINK_CALL_SITE_DESC,
        silent_link,
    );

    let err = run_main(&vm).unwrap_err();
    assert!(err.is_fault());
}

#[test]
fn test_virtual_handle_selects_override() {
    let vm = Vm::new();
    let base = ClassMirror::builder("demo/Base")
        .method(
            "id",
            "()I",
            ACC_PUBLIC,
            MethodCode::new(1, vec![Insn::PushInt(1), Insn::ReturnValue]),
        )
        .build()
        .unwrap();
    let sub = ClassMirror::builder("demo/Sub")
        .extends(base.clone())
        .method(
            "id",
            "()I",
            ACC_PUBLIC,
            MethodCode::new(1, vec![Insn::PushInt(2), Insn::ReturnValue]),
        )
        .build()
        .unwrap();
    vm.register_class(base);
    vm.register_class(sub.clone());

    let handle = linker::method_handle_constant(
        &vm,
        &BootstrapRef::new(RefKind::InvokeVirtual, "demo/Base", "id", "()I"),
    )
    .unwrap();
    let receiver = vm.alloc_instance(&sub);
    let result = linker::invoke_exact_target(
        &vm,
        &handle,
        vec![Value::Reference(Some(receiver))],
    )
    .unwrap();
    assert!(matches!(result, Some(Value::Int(2))));
}
