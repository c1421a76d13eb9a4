//! Tri-colour mark-sweep collection.
//!
//! White is the default, dark is the mark flag, and gray is membership in
//! the worklist. The collector runs only at allocation safepoints, where
//! every held reference is reachable from the root set: the value stack,
//! active frame closures, open upvalues, the globals table, registered
//! compiler roots, and the `init` sentinel. Interned strings are weak: after
//! tracing, interner entries whose key stayed white are dropped so the sweep
//! cannot leave a dangling key behind.

use lox_util::Idx;
use tracing::{debug, trace};

use crate::arena::Arena;
use crate::heap::{Heap, HEAP_GROW_FACTOR};
use crate::object::{GcHeader, GcObject, ObjRef, StringId, UpvalueId, UpvalueState};
use crate::table::Table;
use crate::value::Value;
use crate::vm::CallFrame;

/// Borrowed views of every VM-side root, assembled at the collection site.
pub struct Roots<'a> {
    pub stack: &'a [Value],
    pub frames: &'a [CallFrame],
    pub open_upvalues: &'a [UpvalueId],
    pub globals: &'a Table,
    pub init_string: StringId,
}

impl Heap {
    /// Run one full collection cycle against `roots`.
    pub fn collect(&mut self, roots: Roots<'_>) {
        let before = self.bytes_allocated;
        trace!(cycle = self.collections, "gc: mark roots");

        for &value in roots.stack {
            self.mark_value(value);
        }
        for frame in roots.frames {
            self.mark_object(ObjRef::Closure(frame.closure));
        }
        for &upvalue in roots.open_upvalues {
            self.mark_object(ObjRef::Upvalue(upvalue));
        }
        self.mark_table_snapshot(roots.globals.pairs());
        for i in 0..self.compiler_roots.len() {
            let value = self.compiler_roots[i];
            self.mark_value(value);
        }
        self.mark_object(ObjRef::String(roots.init_string));

        trace!(cycle = self.collections, "gc: trace");
        while let Some(obj) = self.gray.pop() {
            self.blacken(obj);
        }

        // Weaken the interner before freeing white strings.
        let Heap {
            interned, strings, ..
        } = self;
        interned.remove_white(strings);

        trace!(cycle = self.collections, "gc: sweep");
        let freed = self.sweep();
        self.bytes_allocated -= freed;
        self.next_gc = self.bytes_allocated * HEAP_GROW_FACTOR;
        self.collections += 1;

        debug!(
            cycle = self.collections,
            reclaimed = freed,
            live = self.bytes_allocated,
            next_gc = self.next_gc,
            "gc: cycle complete"
        );
        if self.config.log {
            eprintln!(
                "[GC] cycle {}: reclaimed {} bytes ({} -> {}), next at {}",
                self.collections, freed, before, self.bytes_allocated, self.next_gc
            );
        }
    }

    pub(crate) fn mark_value(&mut self, value: Value) {
        if let Value::Obj(obj) = value {
            self.mark_object(obj);
        }
    }

    /// Gray `obj`: set its dark flag and queue it for tracing. Already-dark
    /// objects are skipped, which is what terminates cycles.
    pub(crate) fn mark_object(&mut self, obj: ObjRef) {
        let header = self.header_mut(obj);
        if header.dark {
            return;
        }
        header.dark = true;
        self.gray.push(obj);
    }

    fn mark_table_snapshot(&mut self, pairs: Vec<(StringId, Value)>) {
        for (key, value) in pairs {
            self.mark_object(ObjRef::String(key));
            self.mark_value(value);
        }
    }

    /// Blacken one gray object: gray everything it references.
    fn blacken(&mut self, obj: ObjRef) {
        match obj {
            // No outgoing references.
            ObjRef::String(_) | ObjRef::Native(_) => {}

            ObjRef::Upvalue(id) => {
                if let UpvalueState::Closed(value) = self.upvalues[id].state {
                    self.mark_value(value);
                }
            }

            ObjRef::Function(id) => {
                if let Some(name) = self.functions[id].name {
                    self.mark_object(ObjRef::String(name));
                }
                for i in 0..self.functions[id].chunk.constants.len() {
                    let constant = self.functions[id].chunk.constants[i];
                    self.mark_value(constant);
                }
            }

            ObjRef::Closure(id) => {
                let function = self.closures[id].function;
                self.mark_object(ObjRef::Function(function));
                for i in 0..self.closures[id].upvalues.len() {
                    let upvalue = self.closures[id].upvalues[i];
                    self.mark_object(ObjRef::Upvalue(upvalue));
                }
            }

            ObjRef::Class(id) => {
                let name = self.classes[id].name;
                self.mark_object(ObjRef::String(name));
                let methods = self.classes[id].methods.pairs();
                self.mark_table_snapshot(methods);
            }

            ObjRef::Instance(id) => {
                let class = self.instances[id].class;
                self.mark_object(ObjRef::Class(class));
                let fields = self.instances[id].fields.pairs();
                self.mark_table_snapshot(fields);
            }

            ObjRef::BoundMethod(id) => {
                let receiver = self.bound_methods[id].receiver;
                let method = self.bound_methods[id].method;
                self.mark_value(receiver);
                self.mark_object(ObjRef::Closure(method));
            }
        }
    }

    fn header_mut(&mut self, obj: ObjRef) -> &mut GcHeader {
        match obj {
            ObjRef::String(id) => &mut self.strings[id].header,
            ObjRef::Function(id) => &mut self.functions[id].header,
            ObjRef::Closure(id) => &mut self.closures[id].header,
            ObjRef::Upvalue(id) => &mut self.upvalues[id].header,
            ObjRef::Native(id) => &mut self.natives[id].header,
            ObjRef::Class(id) => &mut self.classes[id].header,
            ObjRef::Instance(id) => &mut self.instances[id].header,
            ObjRef::BoundMethod(id) => &mut self.bound_methods[id].header,
        }
    }

    /// Free every white object and clear the mark on survivors. Returns the
    /// bytes credited back.
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        freed += sweep_arena(&mut self.strings);
        freed += sweep_arena(&mut self.functions);
        freed += sweep_arena(&mut self.closures);
        freed += sweep_arena(&mut self.upvalues);
        freed += sweep_arena(&mut self.natives);
        freed += sweep_arena(&mut self.classes);
        freed += sweep_arena(&mut self.instances);
        freed += sweep_arena(&mut self.bound_methods);
        freed
    }
}

fn sweep_arena<I: Idx, T: GcObject>(arena: &mut Arena<I, T>) -> usize {
    let dead: Vec<I> = arena
        .iter()
        .filter(|(_, obj)| !obj.header().dark)
        .map(|(id, _)| id)
        .collect();

    let mut freed = 0;
    for id in dead {
        freed += arena.free(id).header().size;
    }

    for survivor in arena.iter_mut() {
        survivor.header_mut().dark = false;
    }

    freed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::config::GcConfig;
    use crate::value::Value;

    struct Fixture {
        heap: Heap,
        init_string: StringId,
        globals: Table,
    }

    impl Fixture {
        fn new() -> Self {
            let mut heap = Heap::new(GcConfig::default());
            let init_string = heap.copy_string("init");
            Self {
                heap,
                init_string,
                globals: Table::new(),
            }
        }

        fn collect(&mut self, stack: &[Value]) {
            self.heap.collect(Roots {
                stack,
                frames: &[],
                open_upvalues: &[],
                globals: &self.globals,
                init_string: self.init_string,
            });
        }
    }

    #[test]
    fn test_unrooted_objects_are_swept() {
        let mut f = Fixture::new();
        let garbage = f.heap.copy_string("garbage");
        let before = f.heap.bytes_allocated();

        f.collect(&[]);

        assert!(f.heap.strings.get(garbage).is_none());
        assert!(f.heap.bytes_allocated() < before);
        // The interner entry went with it.
        assert_eq!(
            f.heap
                .interned
                .find_string("garbage", crate::heap::hash_string("garbage"), &f.heap.strings),
            None
        );
    }

    #[test]
    fn test_stack_roots_survive_and_are_unmarked() {
        let mut f = Fixture::new();
        let kept = f.heap.copy_string("kept");

        f.collect(&[Value::Obj(ObjRef::String(kept))]);

        assert_eq!(f.heap.string(kept), "kept");
        // Invariant: after sweep every survivor is white again.
        assert!(!f.heap.strings[kept].header.dark);
    }

    #[test]
    fn test_init_sentinel_survives() {
        let mut f = Fixture::new();
        let init = f.init_string;
        f.collect(&[]);
        assert_eq!(f.heap.string(init), "init");
    }

    #[test]
    fn test_globals_keep_values_alive() {
        let mut f = Fixture::new();
        let name = f.heap.copy_string("answer");
        let hash = f.heap.string_hash(name);
        let text = f.heap.copy_string("forty-two");
        f.globals
            .set(name, hash, Value::Obj(ObjRef::String(text)));

        f.collect(&[]);

        assert_eq!(f.heap.string(name), "answer");
        assert_eq!(f.heap.string(text), "forty-two");
    }

    #[test]
    fn test_transitive_marking_through_instance() {
        let mut f = Fixture::new();
        let class_name = f.heap.copy_string("Widget");
        let class = f.heap.new_class(class_name, None);
        let instance = f.heap.new_instance(class);
        let field = f.heap.copy_string("label");
        let field_hash = f.heap.string_hash(field);
        let value = f.heap.copy_string("on");
        f.heap.instances[instance]
            .fields
            .set(field, field_hash, Value::Obj(ObjRef::String(value)));

        f.collect(&[Value::Obj(ObjRef::Instance(instance))]);

        assert_eq!(f.heap.string(class_name), "Widget");
        assert_eq!(f.heap.string(value), "on");
        assert!(f.heap.classes.get(class).is_some());
    }

    #[test]
    fn test_closed_upvalue_keeps_its_value() {
        let mut f = Fixture::new();
        let captured = f.heap.copy_string("captured");
        let upvalue = f.heap.new_upvalue(0);
        f.heap.upvalues[upvalue].state =
            UpvalueState::Closed(Value::Obj(ObjRef::String(captured)));

        let fun = f.heap.new_function(None, 0, 1, Chunk::new());
        let closure = f.heap.new_closure(fun);
        f.heap.closures[closure].upvalues.push(upvalue);

        f.collect(&[Value::Obj(ObjRef::Closure(closure))]);

        assert_eq!(f.heap.string(captured), "captured");
        assert!(f.heap.upvalues.get(upvalue).is_some());
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut f = Fixture::new();
        // An instance whose field points back at itself.
        let name = f.heap.copy_string("Selfish");
        let class = f.heap.new_class(name, None);
        let instance = f.heap.new_instance(class);
        let field = f.heap.copy_string("me");
        let hash = f.heap.string_hash(field);
        f.heap.instances[instance]
            .fields
            .set(field, hash, Value::Obj(ObjRef::Instance(instance)));

        // Rooted: survives its own cycle.
        f.collect(&[Value::Obj(ObjRef::Instance(instance))]);
        assert!(f.heap.instances.get(instance).is_some());

        // Unrooted: the whole cycle goes.
        f.collect(&[]);
        assert!(f.heap.instances.get(instance).is_none());
        assert!(f.heap.classes.get(class).is_none());
    }

    #[test]
    fn test_compiler_roots_are_marked() {
        let mut f = Fixture::new();
        let fun = f.heap.new_function(None, 0, 0, Chunk::new());
        f.heap.push_compiler_root(Value::Obj(ObjRef::Function(fun)));

        f.collect(&[]);
        assert!(f.heap.functions.get(fun).is_some());

        f.heap.pop_compiler_root();
        f.collect(&[]);
        assert!(f.heap.functions.get(fun).is_none());
    }

    #[test]
    fn test_threshold_doubles_after_collection() {
        let mut f = Fixture::new();
        f.collect(&[]);
        assert_eq!(
            f.heap.next_gc,
            f.heap.bytes_allocated() * HEAP_GROW_FACTOR
        );
    }
}
