//! Instruction encoding: the instruction set, symbolic references with
//! their resolution caches, exception tables, and method bodies.
//!
//! Instructions are pre-decoded; each carries its operands inline. Every
//! real instruction maps to a stable opcode byte that indexes the
//! processor table. `Line` is a pseudo-instruction: it has no opcode, so
//! interceptors observe it but it never reaches a processor.

use crate::linker::CallSiteNode;
use crate::mirror::{ClassMirror, FieldMirror, MethodMirror};
use crate::object::ArrayKind;
use std::sync::{Arc, OnceLock};

// ============================================================================
// Symbolic references
// ============================================================================

/// Symbolic class reference with a one-shot resolution cache.
#[derive(Debug)]
pub struct ClassRef {
    pub name: Arc<str>,
    cache: OnceLock<Arc<ClassMirror>>,
}

impl ClassRef {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            cache: OnceLock::new(),
        }
    }

    #[inline]
    pub fn cached(&self) -> Option<&Arc<ClassMirror>> {
        self.cache.get()
    }

    #[inline]
    pub fn fill(&self, class: Arc<ClassMirror>) -> &Arc<ClassMirror> {
        self.cache.get_or_init(|| class)
    }
}

/// Symbolic field reference.
#[derive(Debug)]
pub struct FieldRef {
    pub owner: Arc<str>,
    pub name: Arc<str>,
    pub desc: Arc<str>,
    cache: OnceLock<(Arc<ClassMirror>, Arc<FieldMirror>)>,
}

impl FieldRef {
    pub fn new(owner: &str, name: &str, desc: &str) -> Self {
        Self {
            owner: Arc::from(owner),
            name: Arc::from(name),
            desc: Arc::from(desc),
            cache: OnceLock::new(),
        }
    }

    #[inline]
    pub fn cached(&self) -> Option<&(Arc<ClassMirror>, Arc<FieldMirror>)> {
        self.cache.get()
    }

    #[inline]
    pub fn fill(
        &self,
        entry: (Arc<ClassMirror>, Arc<FieldMirror>),
    ) -> &(Arc<ClassMirror>, Arc<FieldMirror>) {
        self.cache.get_or_init(|| entry)
    }
}

/// Symbolic method reference.
#[derive(Debug)]
pub struct MethodRef {
    pub owner: Arc<str>,
    pub name: Arc<str>,
    pub desc: Arc<str>,
    cache: OnceLock<(Arc<ClassMirror>, Arc<MethodMirror>)>,
}

impl MethodRef {
    pub fn new(owner: &str, name: &str, desc: &str) -> Self {
        Self {
            owner: Arc::from(owner),
            name: Arc::from(name),
            desc: Arc::from(desc),
            cache: OnceLock::new(),
        }
    }

    #[inline]
    pub fn cached(&self) -> Option<&(Arc<ClassMirror>, Arc<MethodMirror>)> {
        self.cache.get()
    }

    #[inline]
    pub fn fill(
        &self,
        entry: (Arc<ClassMirror>, Arc<MethodMirror>),
    ) -> &(Arc<ClassMirror>, Arc<MethodMirror>) {
        self.cache.get_or_init(|| entry)
    }
}

// ============================================================================
// Operation families
// ============================================================================

/// Binary integer operation, shared by the int and long families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

/// Binary floating-point operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Primitive conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conv {
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
}

/// Comparison condition for branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Cond {
    #[inline]
    pub fn holds(self, lhs: i32, rhs: i32) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
            Self::Le => lhs <= rhs,
        }
    }
}

// ============================================================================
// Instructions
// ============================================================================

/// A pre-decoded instruction.
///
/// Branch targets are instruction indices into the method body, not byte
/// offsets.
#[derive(Debug)]
pub enum Insn {
    Nop,

    // Constants
    PushInt(i32),
    PushLong(i64),
    PushFloat(f32),
    PushDouble(f64),
    PushNull,
    PushString(Arc<str>),

    // Locals
    Load(u16),
    Store(u16),
    LoadWide(u16),
    StoreWide(u16),
    Inc(u16, i32),

    // Stack shuffling
    Pop,
    Pop2,
    Dup,
    DupX1,
    Swap,

    // Arithmetic
    IntBin(IntBinOp),
    LongBin(IntBinOp),
    FloatBin(FpBinOp),
    DoubleBin(FpBinOp),
    IntNeg,
    LongNeg,
    FloatNeg,
    DoubleNeg,

    // Conversions and comparisons
    Convert(Conv),
    LongCmp,
    /// `nan_result` is pushed when either operand is NaN (+1 or -1).
    FloatCmp(i32),
    DoubleCmp(i32),

    // Control flow
    Goto(u32),
    /// Compare int against zero.
    If(Cond, u32),
    /// Compare two ints.
    IfICmp(Cond, u32),
    IfNull(u32),
    IfNonNull(u32),
    Return,
    ReturnValue,
    ReturnWide,

    // Objects and fields
    New(ClassRef),
    GetField(FieldRef),
    PutField(FieldRef),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    CheckCast(ClassRef),
    InstanceOf(ClassRef),
    MonitorEnter,
    MonitorExit,
    Throw,

    // Arrays
    NewArray(ArrayKind),
    NewRefArray(ClassRef),
    ArrayLength,
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),

    // Invocation
    InvokeVirtual(MethodRef),
    InvokeStatic(MethodRef),
    InvokeSpecial(MethodRef),
    InvokeInterface(MethodRef),
    InvokeDynamic(Arc<CallSiteNode>),

    /// Line-number marker; intercepted but never dispatched.
    Line(u32),
}

impl Insn {
    /// Opcode byte indexing the processor table; `None` for
    /// pseudo-instructions, which cannot be bound to a processor.
    pub fn opcode(&self) -> Option<u8> {
        Some(match self {
            Self::Nop => 0x00,
            Self::PushInt(_) => 0x01,
            Self::PushLong(_) => 0x02,
            Self::PushFloat(_) => 0x03,
            Self::PushDouble(_) => 0x04,
            Self::PushNull => 0x05,
            Self::PushString(_) => 0x06,
            Self::Load(_) => 0x10,
            Self::Store(_) => 0x11,
            Self::LoadWide(_) => 0x12,
            Self::StoreWide(_) => 0x13,
            Self::Inc(_, _) => 0x14,
            Self::Pop => 0x20,
            Self::Pop2 => 0x21,
            Self::Dup => 0x22,
            Self::DupX1 => 0x23,
            Self::Swap => 0x24,
            Self::IntBin(_) => 0x30,
            Self::LongBin(_) => 0x31,
            Self::FloatBin(_) => 0x32,
            Self::DoubleBin(_) => 0x33,
            Self::IntNeg => 0x34,
            Self::LongNeg => 0x35,
            Self::FloatNeg => 0x36,
            Self::DoubleNeg => 0x37,
            Self::Convert(_) => 0x40,
            Self::LongCmp => 0x41,
            Self::FloatCmp(_) => 0x42,
            Self::DoubleCmp(_) => 0x43,
            Self::Goto(_) => 0x50,
            Self::If(_, _) => 0x51,
            Self::IfICmp(_, _) => 0x52,
            Self::IfNull(_) => 0x53,
            Self::IfNonNull(_) => 0x54,
            Self::Return => 0x60,
            Self::ReturnValue => 0x61,
            Self::ReturnWide => 0x62,
            Self::New(_) => 0x70,
            Self::GetField(_) => 0x71,
            Self::PutField(_) => 0x72,
            Self::GetStatic(_) => 0x73,
            Self::PutStatic(_) => 0x74,
            Self::CheckCast(_) => 0x75,
            Self::InstanceOf(_) => 0x76,
            Self::MonitorEnter => 0x77,
            Self::MonitorExit => 0x78,
            Self::Throw => 0x79,
            Self::NewArray(_) => 0x80,
            Self::NewRefArray(_) => 0x81,
            Self::ArrayLength => 0x82,
            Self::ArrayLoad(_) => 0x83,
            Self::ArrayStore(_) => 0x84,
            Self::InvokeVirtual(_) => 0x90,
            Self::InvokeStatic(_) => 0x91,
            Self::InvokeSpecial(_) => 0x92,
            Self::InvokeInterface(_) => 0x93,
            Self::InvokeDynamic(_) => 0x94,
            Self::Line(_) => return None,
        })
    }

    /// Pseudo-instructions participate in interception but never consult
    /// the processor table.
    #[inline]
    pub fn is_pseudo(&self) -> bool {
        self.opcode().is_none()
    }

    /// Human-readable name for diagnostics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::PushInt(_) => "push.i",
            Self::PushLong(_) => "push.l",
            Self::PushFloat(_) => "push.f",
            Self::PushDouble(_) => "push.d",
            Self::PushNull => "push.null",
            Self::PushString(_) => "push.str",
            Self::Load(_) => "load",
            Self::Store(_) => "store",
            Self::LoadWide(_) => "load.w",
            Self::StoreWide(_) => "store.w",
            Self::Inc(_, _) => "inc",
            Self::Pop => "pop",
            Self::Pop2 => "pop2",
            Self::Dup => "dup",
            Self::DupX1 => "dup_x1",
            Self::Swap => "swap",
            Self::IntBin(_) => "ibin",
            Self::LongBin(_) => "lbin",
            Self::FloatBin(_) => "fbin",
            Self::DoubleBin(_) => "dbin",
            Self::IntNeg => "ineg",
            Self::LongNeg => "lneg",
            Self::FloatNeg => "fneg",
            Self::DoubleNeg => "dneg",
            Self::Convert(_) => "conv",
            Self::LongCmp => "lcmp",
            Self::FloatCmp(_) => "fcmp",
            Self::DoubleCmp(_) => "dcmp",
            Self::Goto(_) => "goto",
            Self::If(_, _) => "if",
            Self::IfICmp(_, _) => "if_icmp",
            Self::IfNull(_) => "ifnull",
            Self::IfNonNull(_) => "ifnonnull",
            Self::Return => "return",
            Self::ReturnValue => "return.v",
            Self::ReturnWide => "return.w",
            Self::New(_) => "new",
            Self::GetField(_) => "getfield",
            Self::PutField(_) => "putfield",
            Self::GetStatic(_) => "getstatic",
            Self::PutStatic(_) => "putstatic",
            Self::CheckCast(_) => "checkcast",
            Self::InstanceOf(_) => "instanceof",
            Self::MonitorEnter => "monitorenter",
            Self::MonitorExit => "monitorexit",
            Self::Throw => "throw",
            Self::NewArray(_) => "newarray",
            Self::NewRefArray(_) => "newrefarray",
            Self::ArrayLength => "arraylength",
            Self::ArrayLoad(_) => "aload",
            Self::ArrayStore(_) => "astore",
            Self::InvokeVirtual(_) => "invokevirtual",
            Self::InvokeStatic(_) => "invokestatic",
            Self::InvokeSpecial(_) => "invokespecial",
            Self::InvokeInterface(_) => "invokeinterface",
            Self::InvokeDynamic(_) => "invokedynamic",
            Self::Line(_) => "line",
        }
    }
}

// ============================================================================
// Exception tables and method bodies
// ============================================================================

/// One guarded range. `start..end` is half-open over instruction indices;
/// `catch_type` of `None` catches everything.
#[derive(Debug)]
pub struct ExceptionTableEntry {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    pub catch_type: Option<ClassRef>,
}

impl ExceptionTableEntry {
    #[inline]
    pub fn covers(&self, index: u32) -> bool {
        self.start <= index && index < self.end
    }
}

/// Executable body of a method.
#[derive(Debug, Default)]
pub struct MethodCode {
    pub max_locals: usize,
    pub insns: Vec<Insn>,
    pub exception_table: Vec<ExceptionTableEntry>,
}

impl MethodCode {
    pub fn new(max_locals: usize, insns: Vec<Insn>) -> Self {
        Self {
            max_locals,
            insns,
            exception_table: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: Vec<ExceptionTableEntry>) -> Self {
        self.exception_table = table;
        self
    }
}
