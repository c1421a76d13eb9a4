//! Compiler state: token stream management, function/scope bookkeeping,
//! and bytecode emission helpers. The grammar productions live in `expr`
//! and `stmt`.

use lox_lex::{Scanner, Token, TokenKind};
use lox_runtime::{Chunk, FunId, ObjRef, Op, StringId, Value, Vm};
use lox_util::FxHashMap;

use crate::error::CompileError;

/// Locals are addressed by a one-byte slot operand.
pub(crate) const MAX_LOCALS: usize = 256;

/// Upvalue indices are one byte as well.
pub(crate) const MAX_UPVALUES: usize = 256;

/// Constant pool indices are one byte.
pub(crate) const MAX_CONSTANTS: usize = 256;

/// What kind of function body is being compiled; drives slot 0 and the
/// implicit return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug)]
pub(crate) struct Local<'src> {
    name: &'src str,
    /// Scope depth, or -1 while declared but not yet initialized.
    depth: i32,
    is_captured: bool,
}

/// An upvalue slot of the function being compiled: either a local of the
/// enclosing function or one of the enclosing function's own upvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UpvalueDescriptor {
    pub is_local: bool,
    pub index: u8,
}

/// Per-function compilation state; enclosing functions form a chain.
pub(crate) struct FunctionState<'src> {
    enclosing: Option<Box<FunctionState<'src>>>,
    pub kind: FunctionKind,
    pub name: Option<StringId>,
    pub arity: u8,
    pub chunk: Chunk,
    locals: Vec<Local<'src>>,
    pub upvalues: Vec<UpvalueDescriptor>,
    scope_depth: i32,
    /// Identifier constants are deduplicated per function.
    ident_constants: FxHashMap<StringId, u8>,
}

/// Name resolution outcome, surfaced to the parser which owns error
/// reporting.
pub(crate) enum Resolved {
    Local(u8),
    Upvalue(u8),
    Global,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<StringId>) -> Self {
        // Slot 0 belongs to the callee: `this` inside methods, unnameable
        // otherwise.
        let slot_zero = Local {
            name: if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
                "this"
            } else {
                ""
            },
            depth: 0,
            is_captured: false,
        };

        Self {
            enclosing: None,
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
            ident_constants: FxHashMap::default(),
        }
    }

    fn resolve_local(&self, name: &str) -> Result<Option<u8>, &'static str> {
        for (slot, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err("Cannot read local variable in its own initializer.");
                }
                return Ok(Some(slot as u8));
            }
        }
        Ok(None)
    }

    fn resolve_upvalue(&mut self, name: &str) -> Result<Option<u8>, &'static str> {
        let enclosing = match self.enclosing.as_mut() {
            Some(enclosing) => enclosing,
            None => return Ok(None),
        };

        if let Some(local) = enclosing.resolve_local(name)? {
            enclosing.locals[local as usize].is_captured = true;
            return self.add_upvalue(UpvalueDescriptor {
                is_local: true,
                index: local,
            })
            .map(Some);
        }

        if let Some(upvalue) = enclosing.resolve_upvalue(name)? {
            return self.add_upvalue(UpvalueDescriptor {
                is_local: false,
                index: upvalue,
            })
            .map(Some);
        }

        Ok(None)
    }

    /// Closures capturing the same variable twice share one slot.
    fn add_upvalue(&mut self, descriptor: UpvalueDescriptor) -> Result<u8, &'static str> {
        if let Some(existing) = self.upvalues.iter().position(|&u| u == descriptor) {
            return Ok(existing as u8);
        }
        if self.upvalues.len() == MAX_UPVALUES {
            return Err("Too many closure variables in function.");
        }
        self.upvalues.push(descriptor);
        Ok((self.upvalues.len() - 1) as u8)
    }
}

/// Class context, tracked so `this` and `super` can be validated.
pub(crate) struct ClassState {
    enclosing: Option<Box<ClassState>>,
    pub has_superclass: bool,
}

/// The single-pass compiler: scanner, current/previous tokens, the chain of
/// functions under construction, and the VM whose heap receives the output.
pub(crate) struct Compiler<'src, 'vm> {
    pub vm: &'vm mut Vm,
    scanner: Scanner<'src>,
    pub current: Token<'src>,
    pub previous: Token<'src>,
    errors: Vec<CompileError>,
    panic_mode: bool,
    pub func: Box<FunctionState<'src>>,
    pub class: Option<Box<ClassState>>,
}

impl<'src, 'vm> Compiler<'src, 'vm> {
    pub fn new(vm: &'vm mut Vm, source: &'src str) -> Self {
        let placeholder = Token::synthetic("");
        Self {
            vm,
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            errors: Vec::new(),
            panic_mode: false,
            func: Box::new(FunctionState::new(FunctionKind::Script, None)),
            class: None,
        }
    }

    // === Token stream ===

    pub fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            // Error tokens carry their message as the lexeme.
            let token = self.current;
            self.error_at(token, token.lexeme);
        }
    }

    pub fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    pub fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    pub fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    // === Small state queries ===

    pub fn in_panic_mode(&self) -> bool {
        self.panic_mode
    }

    pub fn is_script(&self) -> bool {
        self.func.kind == FunctionKind::Script
    }

    pub fn is_initializer(&self) -> bool {
        self.func.kind == FunctionKind::Initializer
    }

    pub fn arity(&self) -> u8 {
        self.func.arity
    }

    pub fn bump_arity(&mut self) {
        self.func.arity += 1;
    }

    pub fn code_len(&self) -> usize {
        self.func.chunk.code.len()
    }

    // === Class context ===

    pub fn push_class(&mut self) {
        self.class = Some(Box::new(ClassState {
            enclosing: self.class.take(),
            has_superclass: false,
        }));
    }

    pub fn set_class_has_superclass(&mut self) {
        self.class
            .as_mut()
            .expect("superclass clause outside a class")
            .has_superclass = true;
    }

    pub fn pop_class(&mut self) {
        self.class = self
            .class
            .take()
            .expect("pop_class without a class")
            .enclosing;
    }

    // === Errors ===

    pub fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    pub fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        // One error per panic region; synchronize() reopens reporting.
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;

        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors.push(CompileError {
            line: token.line,
            location,
            message: message.to_string(),
        });
    }

    /// Skip forward to a statement boundary after a parse error.
    pub fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // === Emission ===

    pub fn emit_op(&mut self, op: Op) {
        let line = self.previous.line;
        self.func.chunk.write_op(op, line);
    }

    pub fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.func.chunk.write_byte(byte, line);
    }

    pub fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op(Op::Constant);
        self.emit_byte(index);
    }

    pub fn make_constant(&mut self, value: Value) -> u8 {
        if self.func.chunk.constants.len() == MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        self.func.chunk.add_constant(value) as u8
    }

    /// Intern `text` and keep it rooted for the rest of the compile.
    pub fn intern(&mut self, text: &str) -> StringId {
        self.vm.collect_if_needed();
        let id = self.vm.heap.copy_string(text);
        self.vm.heap.push_compiler_root(Value::Obj(ObjRef::String(id)));
        id
    }

    /// Constant-pool index of an identifier, deduplicated per function.
    pub fn identifier_constant(&mut self, token: Token<'src>) -> u8 {
        let id = self.intern(token.lexeme);
        if let Some(&index) = self.func.ident_constants.get(&id) {
            return index;
        }
        let index = self.make_constant(Value::Obj(ObjRef::String(id)));
        self.func.ident_constants.insert(id, index);
        index
    }

    /// Emit the implicit return: `this` for initializers, `nil` otherwise.
    pub fn emit_return(&mut self) {
        if self.func.kind == FunctionKind::Initializer {
            self.emit_op(Op::GetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(Op::Nil);
        }
        self.emit_op(Op::Return);
    }

    // === Jumps ===

    /// Emit `op` with a placeholder offset, returning the patch site.
    pub fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.func.chunk.code.len() - 2
    }

    pub fn patch_jump(&mut self, site: usize) {
        // -2 to step over the offset operand itself.
        let jump = self.func.chunk.code.len() - site - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let bytes = (jump as u16).to_be_bytes();
        self.func.chunk.code[site] = bytes[0];
        self.func.chunk.code[site + 1] = bytes[1];
    }

    pub fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Op::Loop);
        // +2 to hop back over this instruction's own operand.
        let offset = self.func.chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    // === Scopes and locals ===

    pub fn begin_scope(&mut self) {
        self.func.scope_depth += 1;
    }

    pub fn end_scope(&mut self) {
        self.func.scope_depth -= 1;

        loop {
            let captured = match self.func.locals.last() {
                Some(local) if local.depth > self.func.scope_depth => local.is_captured,
                _ => break,
            };
            // Captured locals are hoisted into their upvalue; the rest just
            // pop.
            if captured {
                self.emit_op(Op::CloseUpvalue);
            } else {
                self.emit_op(Op::Pop);
            }
            self.func.locals.pop();
        }
    }

    pub fn in_scope(&self) -> bool {
        self.func.scope_depth > 0
    }

    /// Reserve a local for the name in `previous`, rejecting redeclaration
    /// within the same scope. No-op at top level.
    pub fn declare_variable(&mut self) {
        if !self.in_scope() {
            return;
        }
        let name = self.previous;
        self.declare_local(name);
    }

    pub fn declare_local(&mut self, name: Token<'src>) {
        let mut duplicate = false;
        for local in self.func.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.func.scope_depth {
                break;
            }
            if local.name == name.lexeme {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Variable with this name already declared in this scope.");
        }
        self.add_local(name.lexeme);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.func.locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.func.locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    /// A local created by the compiler itself (`super`), born initialized.
    pub fn add_synthetic_local(&mut self, name: &'static str) {
        self.add_local(name);
        self.mark_initialized();
    }

    pub fn mark_initialized(&mut self) {
        if !self.in_scope() {
            return;
        }
        let depth = self.func.scope_depth;
        if let Some(local) = self.func.locals.last_mut() {
            local.depth = depth;
        }
    }

    /// Parse a variable name; returns its identifier constant for globals,
    /// 0 for locals (which are addressed by slot, not by name).
    pub fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.in_scope() {
            return 0;
        }
        let token = self.previous;
        self.identifier_constant(token)
    }

    pub fn define_variable(&mut self, global: u8) {
        if self.in_scope() {
            self.mark_initialized();
            return;
        }
        self.emit_op(Op::DefineGlobal);
        self.emit_byte(global);
    }

    /// Resolve a name against locals, then upvalues, else global.
    pub fn resolve(&mut self, name: &str) -> Resolved {
        match self.func.resolve_local(name) {
            Ok(Some(slot)) => return Resolved::Local(slot),
            Ok(None) => {}
            Err(message) => {
                self.error(message);
                return Resolved::Local(0);
            }
        }
        match self.func.resolve_upvalue(name) {
            Ok(Some(slot)) => Resolved::Upvalue(slot),
            Ok(None) => Resolved::Global,
            Err(message) => {
                self.error(message);
                Resolved::Local(0)
            }
        }
    }

    // === Function construction ===

    /// Enter a nested function body.
    pub fn begin_function(&mut self, kind: FunctionKind, name: StringId) {
        let mut state = Box::new(FunctionState::new(kind, Some(name)));
        std::mem::swap(&mut self.func, &mut state);
        self.func.enclosing = Some(state);
    }

    /// Finish the current nested function: emit its implicit return, build
    /// the heap object, and hand back its upvalue descriptors so the caller
    /// can emit the `Closure` instruction in the enclosing chunk.
    pub fn finish_function(&mut self) -> (FunId, Vec<UpvalueDescriptor>) {
        self.emit_return();

        let enclosing = self
            .func
            .enclosing
            .take()
            .expect("finish_function on the script function");
        let finished = std::mem::replace(&mut self.func, enclosing);

        let upvalues = finished.upvalues.clone();
        let function = self.build_function(*finished);
        (function, upvalues)
    }

    /// Finish the top-level script.
    pub fn finish_script(mut self) -> (FunId, Vec<CompileError>) {
        self.emit_return();
        let state = std::mem::replace(
            &mut self.func,
            Box::new(FunctionState::new(FunctionKind::Script, None)),
        );
        let function = self.build_function(*state);
        (function, self.errors)
    }

    fn build_function(&mut self, state: FunctionState<'src>) -> FunId {
        self.vm.collect_if_needed();
        let function = self.vm.heap.new_function(
            state.name,
            state.arity,
            state.upvalues.len(),
            state.chunk,
        );
        self.vm
            .heap
            .push_compiler_root(Value::Obj(ObjRef::Function(function)));
        function
    }
}
