//! The virtual machine: value stack, call frames, and the dispatch loop.
//!
//! One tight decode loop executes the instruction stream of the active
//! frame. Calls push frames, returns pop them; the outermost return halts.
//! Every allocation-bearing opcode treats its allocation as a GC safepoint
//! and keeps the object it is building reachable from the stack before
//! allocating anything the object will reference.

use std::time::Instant;

use crate::chunk::Op;
use crate::config::GcConfig;
use crate::error::{RuntimeError, TraceFrame};
use crate::gc::Roots;
use crate::heap::Heap;
use crate::natives;
use crate::object::{
    ClassId, ClosureId, FunId, NativeFn, ObjRef, StringId, UpvalueId, UpvalueState,
};
use crate::table::Table;
use crate::value::Value;

/// Activation records are capped; deeper recursion is a runtime fault.
pub const MAX_FRAMES: usize = 64;

/// Value-stack capacity: 256 slots per possible frame.
pub const STACK_MAX: usize = MAX_FRAMES * 256;

/// The activation record for one in-progress call.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub closure: ClosureId,
    /// The closure's function, cached to shorten instruction reads.
    pub function: FunId,
    /// Cursor into the function's code.
    pub ip: usize,
    /// Stack index of the callee slot; argument 0 lives at `slots + 1`.
    pub slots: usize,
}

/// The virtual machine.
pub struct Vm {
    pub heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Open upvalues, sorted by descending stack slot.
    open_upvalues: Vec<UpvalueId>,
    init_string: StringId,
    started: Instant,
}

impl Vm {
    /// Initialise stacks, tables, the interner, the `init` sentinel, and
    /// the built-in natives.
    pub fn new(config: GcConfig) -> Self {
        let mut heap = Heap::new(config);
        let init_string = heap.copy_string("init");

        let mut vm = Self {
            heap,
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(MAX_FRAMES),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            init_string,
            started: Instant::now(),
        };
        vm.define_native("clock", natives::clock);
        vm
    }

    /// Install a native function as a global.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let native = self.heap.new_native(function);
        let name = self.heap.copy_string(name);
        let hash = self.heap.string_hash(name);
        self.globals.set(name, hash, Value::Obj(ObjRef::Native(native)));
    }

    /// Look up a global by name. Mostly useful to hosts and tests.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        let hash = crate::heap::hash_string(name);
        let id = self.heap.interned.find_string(name, hash, &self.heap.strings)?;
        self.globals.get(id, hash)
    }

    /// Seconds since the VM was created.
    pub(crate) fn uptime(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Wrap `function` in a closure, push a top-level frame, and run to
    /// completion. On fault, the message and stack trace go to stderr and
    /// the stacks are reset; the host decides whether to continue.
    pub fn execute(&mut self, function: FunId) -> Result<(), RuntimeError> {
        self.push(Value::Obj(ObjRef::Function(function)))?;
        self.collect_if_needed();
        let closure = self.heap.new_closure(function);
        self.pop();
        self.push(Value::Obj(ObjRef::Closure(closure)))?;

        let result = self
            .call_value(Value::Obj(ObjRef::Closure(closure)), 0)
            .and_then(|()| self.run());

        if let Err(error) = &result {
            error.report();
            self.reset_stack();
        }
        result
    }

    /// Run a collection if the heap has crossed its threshold (or always,
    /// under stress). Call sites are exactly the allocation points.
    pub fn collect_if_needed(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    /// Collect now, rooting the stack, frames, open upvalues, globals, the
    /// `init` sentinel, and whatever the compiler has registered.
    pub fn collect_garbage(&mut self) {
        self.heap.collect(Roots {
            stack: &self.stack,
            frames: &self.frames,
            open_upvalues: &self.open_upvalues,
            globals: &self.globals,
            init_string: self.init_string,
        });
    }

    // === Stack primitives ===

    #[inline]
    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() == STACK_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.stack.push(value);
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> Value {
        self.stack.pop().expect("pop from empty value stack")
    }

    #[inline]
    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    // === Instruction reading ===

    #[inline]
    fn frame(&self) -> CallFrame {
        *self.frames.last().expect("no active call frame")
    }

    #[inline]
    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    #[inline]
    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let ip = frame.ip;
        frame.ip += 1;
        let function = frame.function;
        self.heap.functions[function].chunk.code[ip]
    }

    /// Big-endian two-byte operand.
    #[inline]
    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    #[inline]
    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let function = self.frame().function;
        self.heap.functions[function].chunk.constants[index]
    }

    #[inline]
    fn read_string(&mut self) -> StringId {
        match self.read_constant() {
            Value::Obj(ObjRef::String(id)) => id,
            other => unreachable!("constant operand is not a string: {other:?}"),
        }
    }

    // === Errors ===

    /// Build a fault carrying the message and a stack trace, one line per
    /// frame, most recent call first.
    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let function = &self.heap.functions[frame.function];
                // The per-byte line table makes ip-1 exact even when the
                // cursor sits past an operand.
                let line = function.chunk.lines[frame.ip.saturating_sub(1)];
                TraceFrame {
                    line,
                    function: function.name.map(|n| self.heap.string(n).to_string()),
                }
            })
            .collect();

        RuntimeError {
            message: message.into(),
            trace,
        }
    }

    // === Calling ===

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), RuntimeError> {
        if let Value::Obj(obj) = callee {
            match obj {
                ObjRef::Closure(closure) => return self.call_closure(closure, argc),

                ObjRef::Native(native) => {
                    let function = self.heap.natives[native].function;
                    let first_arg = self.stack.len() - argc;
                    let result = function(self, &self.stack[first_arg..]);
                    // Replace callee and arguments with the return value.
                    self.stack.truncate(first_arg - 1);
                    return self.push(result);
                }

                ObjRef::Class(class) => {
                    self.collect_if_needed();
                    let instance = self.heap.new_instance(class);
                    let callee_slot = self.stack.len() - argc - 1;
                    self.stack[callee_slot] = Value::Obj(ObjRef::Instance(instance));

                    let init = self.init_string;
                    let hash = self.heap.string_hash(init);
                    if let Some(initializer) = self.heap.classes[class].methods.get(init, hash) {
                        return match initializer {
                            Value::Obj(ObjRef::Closure(closure)) => {
                                self.call_closure(closure, argc)
                            }
                            _ => unreachable!("initializer is not a closure"),
                        };
                    }

                    // No initializer: discard the arguments.
                    self.stack.truncate(self.stack.len() - argc);
                    return Ok(());
                }

                ObjRef::BoundMethod(bound) => {
                    let receiver = self.heap.bound_methods[bound].receiver;
                    let method = self.heap.bound_methods[bound].method;
                    // Put the receiver in the callee slot so the method sees
                    // it as `this`.
                    let callee_slot = self.stack.len() - argc - 1;
                    self.stack[callee_slot] = receiver;
                    return self.call_closure(method, argc);
                }

                _ => {}
            }
        }

        Err(self.runtime_error("Can only call functions and classes."))
    }

    fn call_closure(&mut self, closure: ClosureId, argc: usize) -> Result<(), RuntimeError> {
        let function = self.heap.closures[closure].function;
        // Extra arguments are tolerated; only under-arity faults.
        if argc < self.heap.functions[function].arity as usize {
            return Err(self.runtime_error("Not enough arguments."));
        }
        if self.frames.len() == MAX_FRAMES {
            return Err(self.runtime_error("Stack overflow."));
        }

        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            slots: self.stack.len() - argc - 1,
        });
        Ok(())
    }

    fn invoke(&mut self, name: StringId, argc: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc);
        let instance = match receiver {
            Value::Obj(ObjRef::Instance(id)) => id,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };

        // A field shadowing the method wins; call whatever it holds.
        let hash = self.heap.string_hash(name);
        if let Some(field) = self.heap.instances[instance].fields.get(name, hash) {
            let callee_slot = self.stack.len() - argc - 1;
            self.stack[callee_slot] = field;
            return self.call_value(field, argc);
        }

        let class = self.heap.instances[instance].class;
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: ClassId,
        name: StringId,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        let hash = self.heap.string_hash(name);
        let method = match self.heap.classes[class].methods.get(name, hash) {
            Some(method) => method,
            None => {
                let name = self.heap.string(name).to_string();
                return Err(self.runtime_error(format!("Undefined property '{name}'.")));
            }
        };

        match method {
            Value::Obj(ObjRef::Closure(closure)) => self.call_closure(closure, argc),
            _ => unreachable!("method table entry is not a closure"),
        }
    }

    /// Replace the receiver on top of the stack with a bound method for
    /// `name` looked up on `class`.
    fn bind_method(&mut self, class: ClassId, name: StringId) -> Result<(), RuntimeError> {
        let hash = self.heap.string_hash(name);
        let method = match self.heap.classes[class].methods.get(name, hash) {
            Some(Value::Obj(ObjRef::Closure(closure))) => closure,
            Some(_) => unreachable!("method table entry is not a closure"),
            None => {
                let name = self.heap.string(name).to_string();
                return Err(self.runtime_error(format!("Undefined property '{name}'.")));
            }
        };

        self.collect_if_needed();
        let bound = self.heap.new_bound_method(self.peek(0), method);
        self.pop();
        self.push(Value::Obj(ObjRef::BoundMethod(bound)))
    }

    // === Upvalues ===

    /// Find or create an open upvalue for `slot`. Closures capturing the
    /// same variable must share one cell, so an existing entry is reused;
    /// otherwise a new upvalue is spliced in, keeping the list sorted by
    /// descending slot.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> UpvalueId {
        let mut position = self.open_upvalues.len();
        for (i, &upvalue) in self.open_upvalues.iter().enumerate() {
            let open_slot = self.heap.upvalues[upvalue]
                .open_slot()
                .expect("closed upvalue on the open list");
            if open_slot == slot {
                return upvalue;
            }
            if open_slot < slot {
                position = i;
                break;
            }
        }

        self.collect_if_needed();
        let created = self.heap.new_upvalue(slot);
        self.open_upvalues.insert(position, created);
        created
    }

    /// Close every open upvalue pointing at `last` or above: copy the stack
    /// value into the upvalue and drop it from the open list.
    pub(crate) fn close_upvalues(&mut self, last: usize) {
        while let Some(&upvalue) = self.open_upvalues.first() {
            let slot = self.heap.upvalues[upvalue]
                .open_slot()
                .expect("closed upvalue on the open list");
            if slot < last {
                break;
            }
            self.heap.upvalues[upvalue].state = UpvalueState::Closed(self.stack[slot]);
            self.open_upvalues.remove(0);
        }
    }

    #[cfg(test)]
    pub(crate) fn open_upvalue_slots(&self) -> Vec<usize> {
        self.open_upvalues
            .iter()
            .map(|&uv| self.heap.upvalues[uv].open_slot().unwrap())
            .collect()
    }

    // === Binary helpers ===

    fn binary_number(&mut self, make: fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(make(a, b))
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn concatenate(&mut self) -> Result<(), RuntimeError> {
        let (a, b) = match (self.peek(1), self.peek(0)) {
            (Value::Obj(ObjRef::String(a)), Value::Obj(ObjRef::String(b))) => (a, b),
            _ => unreachable!("concatenate called on non-strings"),
        };

        let joined = format!("{}{}", self.heap.string(a), self.heap.string(b));
        // Operands stay on the stack across the safepoint.
        self.collect_if_needed();
        let result = self.heap.take_string(joined);
        self.pop();
        self.pop();
        self.push(Value::Obj(ObjRef::String(result)))
    }

    // === Dispatch ===

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let byte = self.read_byte();
            let op = Op::try_from(byte).expect("corrupt bytecode: unknown opcode");

            match op {
                Op::Constant => {
                    let constant = self.read_constant();
                    self.push(constant)?;
                }
                Op::Nil => self.push(Value::Nil)?,
                Op::True => self.push(Value::Bool(true))?,
                Op::False => self.push(Value::Bool(false))?,
                Op::Pop => {
                    self.pop();
                }

                Op::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let value = self.stack[self.frame().slots + slot];
                    self.push(value)?;
                }
                Op::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slots;
                    self.stack[base + slot] = self.peek(0);
                }

                Op::GetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value)?,
                        None => {
                            let name = self.heap.string(name).to_string();
                            return Err(
                                self.runtime_error(format!("Undefined variable '{name}'."))
                            );
                        }
                    }
                }
                Op::DefineGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                Op::SetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    // No implicit creation; the value stays on the stack.
                    if self.globals.set(name, hash, self.peek(0)) {
                        let name = self.heap.string(name).to_string();
                        return Err(self.runtime_error(format!("Undefined variable '{name}'.")));
                    }
                }

                Op::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.heap.closures[self.frame().closure].upvalues[slot];
                    let value = match self.heap.upvalues[upvalue].state {
                        UpvalueState::Open(stack_slot) => self.stack[stack_slot],
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value)?;
                }
                Op::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.heap.closures[self.frame().closure].upvalues[slot];
                    let value = self.peek(0);
                    match self.heap.upvalues[upvalue].state {
                        UpvalueState::Open(stack_slot) => self.stack[stack_slot] = value,
                        UpvalueState::Closed(_) => {
                            self.heap.upvalues[upvalue].state = UpvalueState::Closed(value);
                        }
                    }
                }

                Op::GetProperty => {
                    let instance = match self.peek(0) {
                        Value::Obj(ObjRef::Instance(id)) => id,
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);

                    if let Some(value) = self.heap.instances[instance].fields.get(name, hash) {
                        self.pop(); // Instance.
                        self.push(value)?;
                    } else {
                        let class = self.heap.instances[instance].class;
                        self.bind_method(class, name)?;
                    }
                }
                Op::SetProperty => {
                    let instance = match self.peek(1) {
                        Value::Obj(ObjRef::Instance(id)) => id,
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    };
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.heap.instances[instance].fields.set(name, hash, value);

                    // Assignment is an expression; the value stays.
                    let value = self.pop();
                    self.pop(); // Instance.
                    self.push(value)?;
                }

                Op::GetSuper => {
                    let name = self.read_string();
                    let superclass = match self.pop() {
                        Value::Obj(ObjRef::Class(id)) => id,
                        _ => unreachable!("super lookup without a class on the stack"),
                    };
                    self.bind_method(superclass, name)?;
                }

                Op::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b))?;
                }
                Op::Greater => self.binary_number(|a, b| Value::Bool(a > b))?,
                Op::Less => self.binary_number(|a, b| Value::Bool(a < b))?,

                Op::Add => match (self.peek(1), self.peek(0)) {
                    (Value::Obj(ObjRef::String(_)), Value::Obj(ObjRef::String(_))) => {
                        self.concatenate()?;
                    }
                    (Value::Number(a), Value::Number(b)) => {
                        self.pop();
                        self.pop();
                        self.push(Value::Number(a + b))?;
                    }
                    _ => {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                },
                Op::Subtract => self.binary_number(|a, b| Value::Number(a - b))?,
                Op::Multiply => self.binary_number(|a, b| Value::Number(a * b))?,
                Op::Divide => self.binary_number(|a, b| Value::Number(a / b))?,

                Op::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()))?;
                }
                Op::Negate => match self.peek(0) {
                    Value::Number(n) => {
                        self.pop();
                        self.push(Value::Number(-n))?;
                    }
                    _ => return Err(self.runtime_error("Operand must be a number.")),
                },

                Op::Print => {
                    let value = self.pop();
                    println!("{}", self.heap.format_value(value));
                }

                Op::Jump => {
                    let offset = self.read_short() as usize;
                    self.frame_mut().ip += offset;
                }
                Op::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    // The condition is left on the stack; the compiler pops
                    // it at the merge points.
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += offset;
                    }
                }
                Op::Loop => {
                    let offset = self.read_short() as usize;
                    self.frame_mut().ip -= offset;
                }

                Op::Call0
                | Op::Call1
                | Op::Call2
                | Op::Call3
                | Op::Call4
                | Op::Call5
                | Op::Call6
                | Op::Call7
                | Op::Call8 => {
                    let argc = (byte - u8::from(Op::Call0)) as usize;
                    self.call_value(self.peek(argc), argc)?;
                }

                Op::Invoke0
                | Op::Invoke1
                | Op::Invoke2
                | Op::Invoke3
                | Op::Invoke4
                | Op::Invoke5
                | Op::Invoke6
                | Op::Invoke7
                | Op::Invoke8 => {
                    let name = self.read_string();
                    let argc = (byte - u8::from(Op::Invoke0)) as usize;
                    self.invoke(name, argc)?;
                }

                Op::Super0
                | Op::Super1
                | Op::Super2
                | Op::Super3
                | Op::Super4
                | Op::Super5
                | Op::Super6
                | Op::Super7
                | Op::Super8 => {
                    let name = self.read_string();
                    let argc = (byte - u8::from(Op::Super0)) as usize;
                    let superclass = match self.pop() {
                        Value::Obj(ObjRef::Class(id)) => id,
                        _ => unreachable!("super invoke without a class on the stack"),
                    };
                    self.invoke_from_class(superclass, name, argc)?;
                }

                Op::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(ObjRef::Function(id)) => id,
                        other => unreachable!("closure constant is not a function: {other:?}"),
                    };

                    // Push the closure before capturing upvalues so the
                    // captures cannot collect it.
                    self.collect_if_needed();
                    let closure = self.heap.new_closure(function);
                    self.push(Value::Obj(ObjRef::Closure(closure)))?;

                    let upvalue_count = self.heap.functions[function].upvalue_count;
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let slot = self.frame().slots + index;
                            self.capture_upvalue(slot)
                        } else {
                            self.heap.closures[self.frame().closure].upvalues[index]
                        };
                        self.heap.closures[closure].upvalues.push(upvalue);
                    }
                }

                Op::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                Op::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("return without a frame");
                    self.close_upvalues(frame.slots);

                    if self.frames.is_empty() {
                        self.stack.truncate(frame.slots);
                        return Ok(());
                    }

                    self.stack.truncate(frame.slots);
                    self.push(result)?;
                }

                Op::Class => {
                    let name = self.read_string();
                    self.collect_if_needed();
                    let class = self.heap.new_class(name, None);
                    self.push(Value::Obj(ObjRef::Class(class)))?;
                }

                Op::Subclass => {
                    let superclass = match self.peek(0) {
                        Value::Obj(ObjRef::Class(id)) => id,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let name = self.read_string();

                    self.collect_if_needed();
                    let class = self.heap.new_class(name, Some(superclass));
                    self.push(Value::Obj(ObjRef::Class(class)))?;

                    // Inheritance resolves now, by copy: one probe per
                    // lookup, at the cost of re-copying on subclassing.
                    let inherited = self.heap.classes[superclass].methods.clone();
                    self.heap.classes[class].methods.add_all(&inherited);
                }

                Op::Method => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let method = self.peek(0);
                    let class = match self.peek(1) {
                        Value::Obj(ObjRef::Class(id)) => id,
                        _ => unreachable!("method definition without a class on the stack"),
                    };
                    self.heap.classes[class].methods.set(name, hash, method);
                    self.pop();
                }
            }
        }
    }
}
