//! Heap object kinds.
//!
//! Every object embeds a [`GcHeader`] carrying the mark flag and the byte
//! footprint recorded at allocation time. Objects reference each other by
//! typed arena id, never by pointer, so cycles are free and the collector
//! can walk the graph without aliasing trouble.

use lox_util::define_idx;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

define_idx!(StringId);
define_idx!(FunId);
define_idx!(ClosureId);
define_idx!(UpvalueId);
define_idx!(NativeId);
define_idx!(ClassId);
define_idx!(InstanceId);
define_idx!(BoundMethodId);

/// A reference to a heap object, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjRef {
    String(StringId),
    Function(FunId),
    Closure(ClosureId),
    Upvalue(UpvalueId),
    Native(NativeId),
    Class(ClassId),
    Instance(InstanceId),
    BoundMethod(BoundMethodId),
}

/// Per-object GC metadata.
///
/// `dark` is the mark flag: set while tracing, cleared on surviving objects
/// during sweep. `size` is the byte footprint charged against the heap at
/// allocation time and credited back when the object is freed.
#[derive(Debug, Clone, Copy)]
pub struct GcHeader {
    pub dark: bool,
    pub size: usize,
}

impl GcHeader {
    pub fn new(size: usize) -> Self {
        Self { dark: false, size }
    }
}

/// Trait unifying header access across object kinds, for the sweep loop.
pub(crate) trait GcObject {
    fn header(&self) -> &GcHeader;
    fn header_mut(&mut self) -> &mut GcHeader;
}

macro_rules! impl_gc_object {
    ($($ty:ty),* $(,)?) => {
        $(impl GcObject for $ty {
            fn header(&self) -> &GcHeader {
                &self.header
            }

            fn header_mut(&mut self) -> &mut GcHeader {
                &mut self.header
            }
        })*
    };
}

/// An immutable, interned string with its precomputed FNV-1a hash.
///
/// At most one `LoxString` exists per content; the interner guarantees it.
#[derive(Debug)]
pub struct LoxString {
    pub header: GcHeader,
    pub chars: String,
    pub hash: u32,
}

/// A compiled function: its bytecode chunk plus calling metadata.
#[derive(Debug)]
pub struct Function {
    pub header: GcHeader,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// `None` for the top-level script.
    pub name: Option<StringId>,
}

/// A function plus its captured upvalues.
///
/// The upvalue list reaches `Function::upvalue_count` entries while the
/// closure is still rooted only by the stack slot it was pushed into, before
/// it becomes reachable from anywhere else.
#[derive(Debug)]
pub struct Closure {
    pub header: GcHeader,
    pub function: FunId,
    pub upvalues: Vec<UpvalueId>,
}

/// Where an upvalue's storage currently lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    /// Still on the value stack, at this slot index.
    Open(usize),
    /// Hoisted off the stack into the upvalue itself.
    Closed(Value),
}

/// A heap cell giving closures shared access to a captured variable.
#[derive(Debug)]
pub struct Upvalue {
    pub header: GcHeader,
    pub state: UpvalueState,
}

impl Upvalue {
    /// The stack slot this upvalue points at, while open.
    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }
}

/// Signature of built-in functions.
pub type NativeFn = fn(&Vm, &[Value]) -> Value;

/// A built-in function exposed to Lox code.
pub struct Native {
    pub header: GcHeader,
    pub function: NativeFn,
}

impl std::fmt::Debug for Native {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Native").finish_non_exhaustive()
    }
}

/// A class: name, optional superclass, and its method table.
///
/// The method table already contains every inherited method; inheritance is
/// resolved by copy when the subclass is created, so lookup is one probe.
#[derive(Debug)]
pub struct Class {
    pub header: GcHeader,
    pub name: StringId,
    pub superclass: Option<ClassId>,
    pub methods: Table,
}

/// An instance: its class and per-instance field table.
#[derive(Debug)]
pub struct Instance {
    pub header: GcHeader,
    pub class: ClassId,
    pub fields: Table,
}

/// A method closure paired with the receiver it was accessed through.
#[derive(Debug)]
pub struct BoundMethod {
    pub header: GcHeader,
    pub receiver: Value,
    pub method: ClosureId,
}

impl_gc_object!(
    LoxString,
    Function,
    Closure,
    Upvalue,
    Native,
    Class,
    Instance,
    BoundMethod,
);
