//! End-to-end dispatch loop tests: arithmetic semantics, exception-table
//! delivery, interceptors, and monitor bookkeeping.

use crucible_vm::dispatch::{InstructionInterceptor, InterceptVerdict};
use crucible_vm::insn::{
    ClassRef, Cond, ExceptionTableEntry, FieldRef, Insn, IntBinOp, MethodCode, MethodRef,
};
use crucible_vm::mirror::{ClassMirror, MethodMirror, ACC_PUBLIC, ACC_STATIC};
use crucible_vm::object::{ArrayKind, Object};
use crucible_vm::value::Value;
use crucible_vm::vm::{ExecutionOptions, Vm};
use crucible_vm::{ExecutionContext, VmError, VmResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const STATIC: u32 = ACC_PUBLIC | ACC_STATIC;

fn run_static(vm: &Vm, class: &str, name: &str, desc: &str, args: Vec<Value>) -> Option<Value> {
    vm.call_static(class, name, desc, args).unwrap()
}

fn define_one(vm: &Vm, class: &str, name: &str, desc: &str, code: MethodCode) {
    let mirror = ClassMirror::builder(class)
        .method(name, desc, STATIC, code)
        .build()
        .unwrap();
    vm.register_class(mirror);
}

#[test]
fn test_long_xor() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Arith",
        "xor",
        "()J",
        MethodCode::new(
            0,
            vec![
                Insn::PushLong(0b1010),
                Insn::PushLong(0b1100),
                Insn::LongBin(IntBinOp::Xor),
                Insn::ReturnWide,
            ],
        ),
    );
    let result = run_static(&vm, "t/Arith", "xor", "()J", vec![]);
    assert!(matches!(result, Some(Value::Long(6))));
}

#[test]
fn test_long_add_wraps_at_min() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Arith",
        "wrap",
        "()J",
        MethodCode::new(
            0,
            vec![
                Insn::PushLong(i64::MIN),
                Insn::PushLong(-1),
                Insn::LongBin(IntBinOp::Add),
                Insn::ReturnWide,
            ],
        ),
    );
    let result = run_static(&vm, "t/Arith", "wrap", "()J", vec![]);
    assert!(matches!(result, Some(Value::Long(i64::MAX))));
}

#[test]
fn test_division_by_zero_is_catchable() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Arith",
        "div",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::PushInt(1),
                Insn::PushInt(0),
                Insn::IntBin(IntBinOp::Div),
                Insn::ReturnValue,
                // handler
                Insn::Pop,
                Insn::PushInt(-1),
                Insn::ReturnValue,
            ],
        )
        .with_table(vec![ExceptionTableEntry {
            start: 0,
            end: 3,
            handler: 4,
            catch_type: Some(ClassRef::new("java/lang/ArithmeticException")),
        }]),
    );
    let result = run_static(&vm, "t/Arith", "div", "()I", vec![]);
    assert!(matches!(result, Some(Value::Int(-1))));
}

#[test]
fn test_uncaught_division_carries_message() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Arith",
        "div",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::PushInt(1),
                Insn::PushInt(0),
                Insn::IntBin(IntBinOp::Div),
                Insn::ReturnValue,
            ],
        ),
    );
    let err = vm.call_static("t/Arith", "div", "()I", vec![]).unwrap_err();
    let ex = err.as_exception().expect("guest exception");
    assert_eq!(&*ex.class_name, "java/lang/ArithmeticException");
    assert_eq!(ex.message.as_deref(), Some("/ by zero"));
}

#[test]
fn test_handlers_match_in_declaration_order() {
    let vm = Vm::new();
    // Both entries cover the throw; the typed one is declared first and
    // must win over the catch-all.
    define_one(
        &vm,
        "t/Order",
        "pick",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::PushNull,
                Insn::Throw,
                Insn::Nop,
                // typed handler
                Insn::Pop,
                Insn::PushInt(1),
                Insn::ReturnValue,
                // catch-all handler
                Insn::Pop,
                Insn::PushInt(2),
                Insn::ReturnValue,
            ],
        )
        .with_table(vec![
            ExceptionTableEntry {
                start: 0,
                end: 2,
                handler: 3,
                catch_type: Some(ClassRef::new("java/lang/RuntimeException")),
            },
            ExceptionTableEntry {
                start: 0,
                end: 2,
                handler: 6,
                catch_type: None,
            },
        ]),
    );
    let result = run_static(&vm, "t/Order", "pick", "()I", vec![]);
    assert!(matches!(result, Some(Value::Int(1))));
}

#[test]
fn test_guard_range_end_is_exclusive() {
    let vm = Vm::new();
    // The throw sits exactly at the entry's end index, so the entry does
    // not cover it and the exception propagates.
    define_one(
        &vm,
        "t/Range",
        "edge",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::Nop,
                Insn::Nop,
                Insn::PushNull,
                Insn::Throw,
                // handler (never reached)
                Insn::Pop,
                Insn::PushInt(0),
                Insn::ReturnValue,
            ],
        )
        .with_table(vec![ExceptionTableEntry {
            start: 0,
            end: 3,
            handler: 4,
            catch_type: None,
        }]),
    );
    let err = vm.call_static("t/Range", "edge", "()I", vec![]).unwrap_err();
    let ex = err.as_exception().expect("guest exception");
    assert_eq!(&*ex.class_name, "java/lang/NullPointerException");
}

#[test]
fn test_catch_type_resolution_failure_restarts_scan() {
    let vm = Vm::new();
    // The first entry's catch type does not exist. Its resolution failure
    // becomes the current exception, considered thrown at that entry's
    // handler, and the restarted scan finds the second entry.
    define_one(
        &vm,
        "t/Restart",
        "go",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::PushNull,
                Insn::Throw,
                Insn::Nop,
                Insn::Nop,
                Insn::Nop,
                Insn::Nop, // 5: first entry's handler, covered by second entry
                Insn::Pop, // 6: second entry's handler
                Insn::PushInt(42),
                Insn::ReturnValue,
            ],
        )
        .with_table(vec![
            ExceptionTableEntry {
                start: 0,
                end: 2,
                handler: 5,
                catch_type: Some(ClassRef::new("does/not/Exist")),
            },
            ExceptionTableEntry {
                start: 5,
                end: 6,
                handler: 6,
                catch_type: Some(ClassRef::new("java/lang/NoClassDefFoundError")),
            },
        ]),
    );
    let result = run_static(&vm, "t/Restart", "go", "()I", vec![]);
    assert!(matches!(result, Some(Value::Int(42))));
}

#[test]
fn test_unbound_opcode_raises_catchable_internal_error() {
    let vm = Vm::new();
    vm.processors_mut()
        .unbind(Insn::IntBin(IntBinOp::Add).opcode().unwrap());
    define_one(
        &vm,
        "t/Unbound",
        "go",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::PushInt(1),
                Insn::PushInt(2),
                Insn::IntBin(IntBinOp::Add),
                Insn::ReturnValue,
                Insn::Pop,
                Insn::PushInt(7),
                Insn::ReturnValue,
            ],
        )
        .with_table(vec![ExceptionTableEntry {
            start: 0,
            end: 4,
            handler: 4,
            catch_type: Some(ClassRef::new("java/lang/InternalError")),
        }]),
    );
    let result = run_static(&vm, "t/Unbound", "go", "()I", vec![]);
    assert!(matches!(result, Some(Value::Int(7))));
}

struct AbortOnPutStatic;

impl InstructionInterceptor for AbortOnPutStatic {
    fn before(&self, _vm: &Vm, _ctx: &mut ExecutionContext, insn: &Insn) -> InterceptVerdict {
        if matches!(insn, Insn::PutStatic(_)) {
            InterceptVerdict::Abort
        } else {
            InterceptVerdict::Continue
        }
    }
}

#[test]
fn test_interceptor_abort_suppresses_side_effects() {
    let vm = Vm::new();
    let mirror = ClassMirror::builder("t/Abort")
        .field("FLAG", "I", ACC_STATIC)
        .method(
            "go",
            "()V",
            STATIC,
            MethodCode::new(
                0,
                vec![
                    Insn::PushInt(5),
                    Insn::PutStatic(FieldRef::new("t/Abort", "FLAG", "I")),
                    Insn::Return,
                ],
            ),
        )
        .build()
        .unwrap();
    vm.register_class(mirror.clone());
    vm.add_interceptor(Arc::new(AbortOnPutStatic));

    let result = run_static(&vm, "t/Abort", "go", "()V", vec![]);
    assert!(result.is_none());

    let field = mirror.find_field("FLAG").unwrap();
    assert_eq!(mirror.static_data().read_i32(field.offset as i64).unwrap(), 0);
}

#[derive(Default)]
struct LineSpy {
    seen: Mutex<Vec<(u32, &'static str)>>,
}

impl InstructionInterceptor for LineSpy {
    fn before(&self, _vm: &Vm, ctx: &mut ExecutionContext, insn: &Insn) -> InterceptVerdict {
        self.seen.lock().push((ctx.line(), insn.mnemonic()));
        InterceptVerdict::Continue
    }
}

#[test]
fn test_line_markers_recorded_before_interceptors() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Lines",
        "go",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::Line(10),
                Insn::PushInt(1),
                Insn::Line(11),
                Insn::ReturnValue,
            ],
        ),
    );
    let spy = Arc::new(LineSpy::default());
    vm.add_interceptor(spy.clone());
    run_static(&vm, "t/Lines", "go", "()I", vec![]);

    let seen = spy.seen.lock();
    // Markers reach interceptors like any instruction, with the line
    // already updated when the marker itself is observed.
    assert_eq!(
        &*seen,
        &[(10, "line"), (10, "push.i"), (11, "line"), (11, "return.v")]
    );
}

#[test]
fn test_line_tracking_can_be_disabled() {
    let vm = Vm::with_options(ExecutionOptions {
        track_line_numbers: false,
    });
    define_one(
        &vm,
        "t/Lines",
        "go",
        "()I",
        MethodCode::new(
            0,
            vec![Insn::Line(10), Insn::PushInt(1), Insn::ReturnValue],
        ),
    );
    let spy = Arc::new(LineSpy::default());
    vm.add_interceptor(spy.clone());
    run_static(&vm, "t/Lines", "go", "()I", vec![]);
    // The marker is still intercepted; only the line update is skipped.
    assert_eq!(
        &*spy.seen.lock(),
        &[(0, "line"), (0, "push.i"), (0, "return.v")]
    );
}

struct AbortOnLineMarker;

impl InstructionInterceptor for AbortOnLineMarker {
    fn before(&self, _vm: &Vm, _ctx: &mut ExecutionContext, insn: &Insn) -> InterceptVerdict {
        if insn.is_pseudo() {
            InterceptVerdict::Abort
        } else {
            InterceptVerdict::Continue
        }
    }
}

#[test]
fn test_abort_on_line_marker_stops_method() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Lines",
        "go",
        "()I",
        MethodCode::new(
            0,
            vec![Insn::Line(10), Insn::PushInt(1), Insn::ReturnValue],
        ),
    );
    vm.add_interceptor(Arc::new(AbortOnLineMarker));
    // The abort lands on the marker itself; nothing after it executes.
    let result = run_static(&vm, "t/Lines", "go", "()I", vec![]);
    assert!(result.is_none());
}

#[test]
fn test_array_load_null_and_bounds() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Arr",
        "null_load",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::PushNull,
                Insn::PushInt(0),
                Insn::ArrayLoad(ArrayKind::Int),
                Insn::ReturnValue,
            ],
        ),
    );
    let err = vm
        .call_static("t/Arr", "null_load", "()I", vec![])
        .unwrap_err();
    assert_eq!(
        &*err.as_exception().unwrap().class_name,
        "java/lang/NullPointerException"
    );

    define_one(
        &vm,
        "t/Arr2",
        "oob",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::PushInt(2),
                Insn::NewArray(ArrayKind::Int),
                Insn::PushInt(5),
                Insn::ArrayLoad(ArrayKind::Int),
                Insn::ReturnValue,
            ],
        ),
    );
    let err = vm.call_static("t/Arr2", "oob", "()I", vec![]).unwrap_err();
    let ex = err.as_exception().unwrap();
    assert_eq!(
        &*ex.class_name,
        "java/lang/ArrayIndexOutOfBoundsException"
    );
    assert_eq!(
        ex.message.as_deref(),
        Some("Index 5 out of bounds for length 2")
    );
}

#[test]
fn test_array_round_trip_long() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Arr",
        "go",
        "()J",
        MethodCode::new(
            1,
            vec![
                Insn::PushInt(3),
                Insn::NewArray(ArrayKind::Long),
                Insn::Store(0),
                Insn::Load(0),
                Insn::PushInt(2),
                Insn::PushLong(-7),
                Insn::ArrayStore(ArrayKind::Long),
                Insn::Load(0),
                Insn::PushInt(2),
                Insn::ArrayLoad(ArrayKind::Long),
                Insn::ReturnWide,
            ],
        ),
    );
    let result = run_static(&vm, "t/Arr", "go", "()J", vec![]);
    assert!(matches!(result, Some(Value::Long(-7))));
}

#[test]
fn test_double_static_preserves_nan_payload() {
    let vm = Vm::new();
    let bits = 0x7FF8_0000_DEAD_BEEFu64;
    let mirror = ClassMirror::builder("t/Nan")
        .field("D", "D", ACC_STATIC)
        .method(
            "go",
            "()D",
            STATIC,
            MethodCode::new(
                0,
                vec![
                    Insn::PushDouble(f64::from_bits(bits)),
                    Insn::PutStatic(FieldRef::new("t/Nan", "D", "D")),
                    Insn::GetStatic(FieldRef::new("t/Nan", "D", "D")),
                    Insn::ReturnWide,
                ],
            ),
        )
        .build()
        .unwrap();
    vm.register_class(mirror);
    let result = run_static(&vm, "t/Nan", "go", "()D", vec![]);
    match result {
        Some(Value::Double(v)) => assert_eq!(v.to_bits(), bits),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_monitors_released_on_unwinding() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Mon",
        "go",
        "(Ljava/lang/Object;)V",
        MethodCode::new(
            1,
            vec![
                Insn::Load(0),
                Insn::MonitorEnter,
                Insn::PushNull,
                Insn::Throw,
            ],
        ),
    );
    let object_class = vm.find_class("java/lang/Object").unwrap();
    let lock = vm.alloc_instance(&object_class);
    let err = vm
        .call_static(
            "t/Mon",
            "go",
            "(Ljava/lang/Object;)V",
            vec![Value::Reference(Some(lock.clone()))],
        )
        .unwrap_err();
    assert!(err.as_exception().is_some());
    assert_eq!(lock.monitor().entry_count(), 0);
}

struct HandlerEntryWatch {
    lock: Arc<Object>,
    entries_at_handler: Mutex<Option<u32>>,
}

impl InstructionInterceptor for HandlerEntryWatch {
    fn before(&self, _vm: &Vm, _ctx: &mut ExecutionContext, insn: &Insn) -> InterceptVerdict {
        // The handler body starts with this sentinel push.
        if matches!(insn, Insn::PushInt(99)) {
            *self.entries_at_handler.lock() = Some(self.lock.monitor().entry_count());
        }
        InterceptVerdict::Continue
    }
}

#[test]
fn test_monitors_released_before_handler_runs() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Mon",
        "caught",
        "(Ljava/lang/Object;)I",
        MethodCode::new(
            1,
            vec![
                Insn::Load(0),
                Insn::MonitorEnter,
                Insn::PushNull,
                Insn::Throw,
                // handler
                Insn::Pop,
                Insn::PushInt(99),
                Insn::ReturnValue,
            ],
        )
        .with_table(vec![ExceptionTableEntry {
            start: 0,
            end: 4,
            handler: 4,
            catch_type: None,
        }]),
    );
    let object_class = vm.find_class("java/lang/Object").unwrap();
    let lock = vm.alloc_instance(&object_class);
    let watch = Arc::new(HandlerEntryWatch {
        lock: lock.clone(),
        entries_at_handler: Mutex::new(None),
    });
    vm.add_interceptor(watch.clone());

    let result = run_static(
        &vm,
        "t/Mon",
        "caught",
        "(Ljava/lang/Object;)I",
        vec![Value::Reference(Some(lock.clone()))],
    );
    assert!(matches!(result, Some(Value::Int(99))));
    // Unwinding runs before the handler search, so the handler already
    // observes the monitor released even though it is in the same frame.
    assert_eq!(*watch.entries_at_handler.lock(), Some(0));
    assert_eq!(lock.monitor().entry_count(), 0);
}

#[test]
fn test_unowned_monitor_exit_raises() {
    let vm = Vm::new();
    define_one(
        &vm,
        "t/Mon",
        "bad_exit",
        "(Ljava/lang/Object;)V",
        MethodCode::new(1, vec![Insn::Load(0), Insn::MonitorExit, Insn::Return]),
    );
    let object_class = vm.find_class("java/lang/Object").unwrap();
    let lock = vm.alloc_instance(&object_class);
    let err = vm
        .call_static(
            "t/Mon",
            "bad_exit",
            "(Ljava/lang/Object;)V",
            vec![Value::Reference(Some(lock))],
        )
        .unwrap_err();
    assert_eq!(
        &*err.as_exception().unwrap().class_name,
        "java/lang/IllegalMonitorStateException"
    );
}

#[test]
fn test_virtual_dispatch_selects_override() {
    let vm = Vm::new();
    let base = ClassMirror::builder("t/Base")
        .method("id", "()I", ACC_PUBLIC, MethodCode::new(1, vec![
            Insn::PushInt(1),
            Insn::ReturnValue,
        ]))
        .build()
        .unwrap();
    let sub = ClassMirror::builder("t/Sub")
        .extends(base.clone())
        .method("id", "()I", ACC_PUBLIC, MethodCode::new(1, vec![
            Insn::PushInt(2),
            Insn::ReturnValue,
        ]))
        .build()
        .unwrap();
    vm.register_class(base);
    vm.register_class(sub);
    define_one(
        &vm,
        "t/Main",
        "go",
        "()I",
        MethodCode::new(
            0,
            vec![
                Insn::New(ClassRef::new("t/Sub")),
                Insn::InvokeVirtual(MethodRef::new("t/Base", "id", "()I")),
                Insn::ReturnValue,
            ],
        ),
    );
    let result = run_static(&vm, "t/Main", "go", "()I", vec![]);
    assert!(matches!(result, Some(Value::Int(2))));
}

#[test]
fn test_class_initializer_runs_once() {
    let vm = Vm::new();
    let mirror = ClassMirror::builder("t/Init")
        .field("COUNT", "I", ACC_STATIC)
        .method(
            "<clinit>",
            "()V",
            STATIC,
            MethodCode::new(
                0,
                vec![
                    Insn::GetStatic(FieldRef::new("t/Init", "COUNT", "I")),
                    Insn::PushInt(1),
                    Insn::IntBin(IntBinOp::Add),
                    Insn::PutStatic(FieldRef::new("t/Init", "COUNT", "I")),
                    Insn::Return,
                ],
            ),
        )
        .method(
            "count",
            "()I",
            STATIC,
            MethodCode::new(
                0,
                vec![
                    Insn::GetStatic(FieldRef::new("t/Init", "COUNT", "I")),
                    Insn::ReturnValue,
                ],
            ),
        )
        .build()
        .unwrap();
    vm.register_class(mirror);
    for _ in 0..3 {
        let result = run_static(&vm, "t/Init", "count", "()I", vec![]);
        assert!(matches!(result, Some(Value::Int(1))));
    }
}

static PARKED: AtomicBool = AtomicBool::new(false);
static RELEASE: AtomicBool = AtomicBool::new(false);

fn park(_vm: &Vm, _method: &Arc<MethodMirror>, _args: Vec<Value>) -> VmResult<Option<Value>> {
    PARKED.store(true, Ordering::Release);
    while !RELEASE.load(Ordering::Acquire) {
        std::thread::yield_now();
    }
    Ok(None)
}

/// `(I)I` body counting down to zero by self-recursion; at the bottom it
/// runs `tail` before returning 0.
fn countdown(class: &str, name: &str, tail: Vec<Insn>) -> MethodCode {
    let mut insns = vec![
        Insn::Load(0),
        Insn::If(Cond::Le, 7),
        Insn::Load(0),
        Insn::PushInt(1),
        Insn::IntBin(IntBinOp::Sub),
        Insn::InvokeStatic(MethodRef::new(class, name, "(I)I")),
        Insn::ReturnValue,
    ];
    insns.extend(tail);
    insns.push(Insn::PushInt(0));
    insns.push(Insn::ReturnValue);
    MethodCode::new(1, insns)
}

#[test]
fn test_call_depth_guard_is_per_thread() {
    let vm = Arc::new(Vm::new());
    let mirror = ClassMirror::builder("t/Deep")
        .method(
            "hold",
            "(I)I",
            STATIC,
            countdown(
                "t/Deep",
                "hold",
                vec![Insn::InvokeStatic(MethodRef::new("t/Deep", "park", "()V"))],
            ),
        )
        .method("descend", "(I)I", STATIC, countdown("t/Deep", "descend", vec![]))
        .native_method("park", "()V", STATIC)
        .build()
        .unwrap();
    vm.register_class(mirror);
    vm.natives().register("t/Deep", "park", "()V", park);

    // One thread sits parked 700 frames down while the other descends the
    // same 700 frames; each stack is legal on its own.
    let holder = {
        let vm = vm.clone();
        std::thread::Builder::new()
            .stack_size(32 << 20)
            .spawn(move || vm.call_static("t/Deep", "hold", "(I)I", vec![Value::Int(700)]))
            .unwrap()
    };
    while !PARKED.load(Ordering::Acquire) {
        std::thread::yield_now();
    }
    let walker = {
        let vm = vm.clone();
        std::thread::Builder::new()
            .stack_size(32 << 20)
            .spawn(move || vm.call_static("t/Deep", "descend", "(I)I", vec![Value::Int(700)]))
            .unwrap()
    };
    let walked = walker.join().unwrap().unwrap();
    assert!(matches!(walked, Some(Value::Int(0))));

    RELEASE.store(true, Ordering::Release);
    let held = holder.join().unwrap().unwrap();
    assert!(matches!(held, Some(Value::Int(0))));
}

#[test]
fn test_unknown_class_is_guest_error() {
    let vm = Vm::new();
    let err = vm
        .call_static("no/Such", "m", "()V", vec![])
        .unwrap_err();
    match err {
        VmError::Exception(ex) => {
            assert_eq!(&*ex.class_name, "java/lang/NoClassDefFoundError")
        }
        VmError::Fault(fault) => panic!("expected guest exception, got {fault}"),
    }
}
