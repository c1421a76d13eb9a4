//! The object heap: typed arenas, the string interner, and byte accounting.
//!
//! Allocation never collects on its own; the VM and compiler treat their
//! allocation sites as safepoints and ask [`Heap::should_collect`] first.
//! That keeps the no-write-barrier discipline auditable: a collection can
//! only happen where the caller has already rooted everything it holds.

use std::mem::size_of;

use crate::arena::Arena;
use crate::chunk::Chunk;
use crate::config::GcConfig;
use crate::object::{
    BoundMethod, BoundMethodId, Class, ClassId, Closure, ClosureId, FunId, Function, GcHeader,
    Instance, InstanceId, LoxString, Native, NativeFn, NativeId, ObjRef, StringId, Upvalue,
    UpvalueId, UpvalueState,
};
use crate::table::Table;
use crate::value::Value;

/// First collection fires once this many bytes are live.
pub(crate) const INITIAL_NEXT_GC: usize = 1024 * 1024;

/// After a collection the threshold becomes `bytes_allocated` times this.
pub(crate) const HEAP_GROW_FACTOR: usize = 2;

/// The garbage-collected heap.
pub struct Heap {
    pub strings: Arena<StringId, LoxString>,
    pub functions: Arena<FunId, Function>,
    pub closures: Arena<ClosureId, Closure>,
    pub upvalues: Arena<UpvalueId, Upvalue>,
    pub natives: Arena<NativeId, Native>,
    pub classes: Arena<ClassId, Class>,
    pub instances: Arena<InstanceId, Instance>,
    pub bound_methods: Arena<BoundMethodId, BoundMethod>,

    /// Interned strings, used as a set (all values are `nil`). Weak: the
    /// collector drops entries for strings no other root keeps alive.
    pub(crate) interned: Table,

    /// Values the compiler has registered as roots while it builds
    /// functions that are not yet reachable from anywhere else.
    pub(crate) compiler_roots: Vec<Value>,

    /// The gray worklist. An object is gray iff it is in here; `dark` alone
    /// means marked. Plain `Vec` storage, outside the managed heap, so
    /// growing it can never re-enter the collector.
    pub(crate) gray: Vec<ObjRef>,

    pub(crate) bytes_allocated: usize,
    pub(crate) next_gc: usize,
    pub(crate) collections: u64,
    pub(crate) config: GcConfig,
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        Self {
            strings: Arena::new(),
            functions: Arena::new(),
            closures: Arena::new(),
            upvalues: Arena::new(),
            natives: Arena::new(),
            classes: Arena::new(),
            instances: Arena::new(),
            bound_methods: Arena::new(),
            interned: Table::new(),
            compiler_roots: Vec::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            collections: 0,
            config,
        }
    }

    /// True when the next allocation site should run a collection first.
    #[inline]
    pub fn should_collect(&self) -> bool {
        self.config.stress || self.bytes_allocated > self.next_gc
    }

    /// Live heap bytes currently charged.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Completed collection cycles.
    pub fn collections(&self) -> u64 {
        self.collections
    }

    // === String interning ===

    /// Intern the contents of a borrowed buffer.
    pub fn copy_string(&mut self, text: &str) -> StringId {
        let hash = hash_string(text);
        if let Some(existing) = self.interned.find_string(text, hash, &self.strings) {
            return existing;
        }
        self.intern_new(text.to_owned(), hash)
    }

    /// Intern an owned buffer, dropping it when the content is already
    /// interned. Concatenation comes through here so a novel joined buffer
    /// becomes the canonical string without another copy.
    pub fn take_string(&mut self, text: String) -> StringId {
        let hash = hash_string(&text);
        if let Some(existing) = self.interned.find_string(&text, hash, &self.strings) {
            return existing;
        }
        self.intern_new(text, hash)
    }

    fn intern_new(&mut self, chars: String, hash: u32) -> StringId {
        let size = size_of::<LoxString>() + chars.capacity();
        self.bytes_allocated += size;
        let id = self.strings.alloc(LoxString {
            header: GcHeader::new(size),
            chars,
            hash,
        });
        self.interned.set(id, hash, Value::Nil);
        id
    }

    /// The character content of an interned string.
    pub fn string(&self, id: StringId) -> &str {
        &self.strings[id].chars
    }

    /// The precomputed hash of an interned string.
    #[inline]
    pub fn string_hash(&self, id: StringId) -> u32 {
        self.strings[id].hash
    }

    // === Object allocation ===

    pub fn new_function(
        &mut self,
        name: Option<StringId>,
        arity: u8,
        upvalue_count: usize,
        chunk: Chunk,
    ) -> FunId {
        let size = size_of::<Function>()
            + chunk.code.capacity()
            + chunk.lines.capacity() * size_of::<u32>()
            + chunk.constants.capacity() * size_of::<Value>();
        self.bytes_allocated += size;
        self.functions.alloc(Function {
            header: GcHeader::new(size),
            arity,
            upvalue_count,
            chunk,
            name,
        })
    }

    /// A closure over `function` with an empty upvalue list; the VM fills
    /// the list while the closure sits on the stack.
    pub fn new_closure(&mut self, function: FunId) -> ClosureId {
        let upvalue_count = self.functions[function].upvalue_count;
        let size = size_of::<Closure>() + upvalue_count * size_of::<UpvalueId>();
        self.bytes_allocated += size;
        self.closures.alloc(Closure {
            header: GcHeader::new(size),
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        })
    }

    /// An open upvalue pointing at `slot` on the value stack.
    pub fn new_upvalue(&mut self, slot: usize) -> UpvalueId {
        let size = size_of::<Upvalue>();
        self.bytes_allocated += size;
        self.upvalues.alloc(Upvalue {
            header: GcHeader::new(size),
            state: UpvalueState::Open(slot),
        })
    }

    pub fn new_native(&mut self, function: NativeFn) -> NativeId {
        let size = size_of::<Native>();
        self.bytes_allocated += size;
        self.natives.alloc(Native {
            header: GcHeader::new(size),
            function,
        })
    }

    pub fn new_class(&mut self, name: StringId, superclass: Option<ClassId>) -> ClassId {
        let size = size_of::<Class>();
        self.bytes_allocated += size;
        self.classes.alloc(Class {
            header: GcHeader::new(size),
            name,
            superclass,
            methods: Table::new(),
        })
    }

    pub fn new_instance(&mut self, class: ClassId) -> InstanceId {
        let size = size_of::<Instance>();
        self.bytes_allocated += size;
        self.instances.alloc(Instance {
            header: GcHeader::new(size),
            class,
            fields: Table::new(),
        })
    }

    pub fn new_bound_method(&mut self, receiver: Value, method: ClosureId) -> BoundMethodId {
        let size = size_of::<BoundMethod>();
        self.bytes_allocated += size;
        self.bound_methods.alloc(BoundMethod {
            header: GcHeader::new(size),
            receiver,
            method,
        })
    }

    // === Compiler roots ===

    /// Register a value the compiler holds outside any other root. The
    /// mark phase grays every registered value.
    pub fn push_compiler_root(&mut self, value: Value) {
        self.compiler_roots.push(value);
    }

    /// Drop the most recently registered compiler root.
    pub fn pop_compiler_root(&mut self) {
        self.compiler_roots
            .pop()
            .expect("compiler root stack underflow");
    }

    /// Current depth of the compiler root stack.
    pub fn compiler_roots_len(&self) -> usize {
        self.compiler_roots.len()
    }

    /// Drop every compiler root registered past `len`. The compiler calls
    /// this once its output is rooted elsewhere.
    pub fn truncate_compiler_roots(&mut self, len: usize) {
        self.compiler_roots.truncate(len);
    }

    // === Printing ===

    /// Canonical textual form of a value, as `print` shows it.
    pub fn format_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            // f64 Display is the shortest decimal that round-trips.
            Value::Number(n) => n.to_string(),
            Value::Obj(obj) => self.format_obj(obj),
        }
    }

    fn format_obj(&self, obj: ObjRef) -> String {
        match obj {
            ObjRef::String(id) => self.strings[id].chars.clone(),
            ObjRef::Function(id) => self.format_function(id),
            ObjRef::Closure(id) => self.format_function(self.closures[id].function),
            ObjRef::BoundMethod(id) => {
                self.format_function(self.closures[self.bound_methods[id].method].function)
            }
            ObjRef::Upvalue(_) => "upvalue".to_string(),
            ObjRef::Native(_) => "<native fn>".to_string(),
            ObjRef::Class(id) => format!("<{}>", self.string(self.classes[id].name)),
            ObjRef::Instance(id) => {
                let class = self.instances[id].class;
                format!("<{} instance>", self.string(self.classes[class].name))
            }
        }
    }

    fn format_function(&self, id: FunId) -> String {
        match self.functions[id].name {
            Some(name) => format!("<fn {}>", self.string(name)),
            None => "<script>".to_string(),
        }
    }
}

/// 32-bit FNV-1a.
pub fn hash_string(text: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in text.as_bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_values() {
        // Reference vectors for 32-bit FNV-1a.
        assert_eq!(hash_string(""), 2166136261);
        assert_eq!(hash_string("a"), 0xe40c292c);
        assert_eq!(hash_string("foobar"), 0xbf9cf968);
    }

    #[test]
    fn test_interning_returns_identical_ids() {
        let mut heap = Heap::new(GcConfig::default());
        let a = heap.copy_string("hello");
        let b = heap.copy_string("hello");
        let c = heap.take_string("hello".to_string());
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(heap.strings.len(), 1);

        let d = heap.copy_string("world");
        assert_ne!(a, d);
        assert_eq!(heap.strings.len(), 2);
    }

    #[test]
    fn test_bytes_accounting_grows() {
        let mut heap = Heap::new(GcConfig::default());
        let before = heap.bytes_allocated();
        heap.copy_string("some text");
        assert!(heap.bytes_allocated() > before);
    }

    #[test]
    fn test_stress_mode_requests_collection() {
        let heap = Heap::new(GcConfig {
            stress: true,
            log: false,
        });
        assert!(heap.should_collect());

        let quiet = Heap::new(GcConfig::default());
        assert!(!quiet.should_collect());
    }

    #[test]
    fn test_format_values() {
        let mut heap = Heap::new(GcConfig::default());
        assert_eq!(heap.format_value(Value::Nil), "nil");
        assert_eq!(heap.format_value(Value::Bool(true)), "true");
        assert_eq!(heap.format_value(Value::Number(7.0)), "7");
        assert_eq!(heap.format_value(Value::Number(2.5)), "2.5");

        let s = heap.copy_string("verbatim");
        assert_eq!(heap.format_value(Value::Obj(ObjRef::String(s))), "verbatim");

        let script = heap.new_function(None, 0, 0, Chunk::new());
        assert_eq!(
            heap.format_value(Value::Obj(ObjRef::Function(script))),
            "<script>"
        );

        let name = heap.copy_string("mk");
        let named = heap.new_function(Some(name), 0, 0, Chunk::new());
        assert_eq!(
            heap.format_value(Value::Obj(ObjRef::Function(named))),
            "<fn mk>"
        );

        let class_name = heap.copy_string("Point");
        let class = heap.new_class(class_name, None);
        assert_eq!(
            heap.format_value(Value::Obj(ObjRef::Class(class))),
            "<Point>"
        );
        let instance = heap.new_instance(class);
        assert_eq!(
            heap.format_value(Value::Obj(ObjRef::Instance(instance))),
            "<Point instance>"
        );
    }
}
