//! lox-runtime - The bytecode virtual machine.
//!
//! This crate is the core of the system: the value and object model, the
//! arena-backed garbage-collected heap, the open-addressed string-keyed
//! table, the string interner, the bytecode format, and the dispatch loop
//! with its call-frame / closure / upvalue machinery.
//!
//! Heap references are typed arena indices rather than pointers: object
//! graphs form arbitrary cycles (a class whose method closes over an
//! instance of itself), which arena ids express without fighting ownership.
//! The arenas own every object; the sweep phase returns dead slots to a free
//! list.
//!
//! The compiler is an external collaborator: it allocates functions and
//! strings through [`Heap`] and registers its in-progress objects as GC
//! roots (see [`Heap::push_compiler_root`]). The driver wires the two
//! together.

mod arena;
mod chunk;
mod config;
pub mod debug;
mod error;
mod gc;
mod heap;
mod natives;
mod object;
mod table;
mod value;
mod vm;

pub use arena::Arena;
pub use chunk::{Chunk, Op};
pub use config::GcConfig;
pub use error::{RuntimeError, TraceFrame};
pub use gc::Roots;
pub use heap::{hash_string, Heap};
pub use object::{
    BoundMethod, BoundMethodId, Class, ClassId, Closure, ClosureId, FunId, Function, GcHeader,
    Instance, InstanceId, LoxString, Native, NativeFn, NativeId, ObjRef, StringId, Upvalue,
    UpvalueId, UpvalueState,
};
pub use table::Table;
pub use value::Value;
pub use vm::{CallFrame, Vm, MAX_FRAMES, STACK_MAX};
