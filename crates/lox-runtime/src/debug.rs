//! Bytecode disassembly, for diagnostics and the driver's `--emit-bytecode`.

use std::fmt::Write;

use crate::chunk::{Chunk, Op};
use crate::heap::Heap;
use crate::object::{FunId, ObjRef};
use crate::value::Value;

/// Render a function's chunk, one instruction per line.
pub fn disassemble_function(heap: &Heap, function: FunId) -> String {
    let name = match heap.functions[function].name {
        Some(name) => format!("<fn {}>", heap.string(name)),
        None => "<script>".to_string(),
    };

    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");

    let chunk = &heap.functions[function].chunk;
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(heap, chunk, offset, &mut out);
    }
    out
}

/// Render every function reachable from `function`'s constant pool,
/// innermost first.
pub fn disassemble_program(heap: &Heap, function: FunId) -> String {
    let mut out = String::new();
    let mut worklist = vec![function];
    let mut ordered = Vec::new();

    while let Some(next) = worklist.pop() {
        ordered.push(next);
        for constant in &heap.functions[next].chunk.constants {
            if let Value::Obj(ObjRef::Function(nested)) = constant {
                worklist.push(*nested);
            }
        }
    }

    for function in ordered.into_iter().rev() {
        out.push_str(&disassemble_function(heap, function));
        out.push('\n');
    }
    out
}

/// Render the instruction at `offset`, returning the next offset.
pub fn disassemble_instruction(
    heap: &Heap,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    let _ = write!(out, "{offset:04} ");
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{:4} ", chunk.lines[offset]);
    }

    let byte = chunk.code[offset];
    let op = match Op::try_from(byte) {
        Ok(op) => op,
        Err(_) => {
            let _ = writeln!(out, "UNKNOWN {byte:#04x}");
            return offset + 1;
        }
    };

    match op {
        Op::Constant
        | Op::GetGlobal
        | Op::SetGlobal
        | Op::DefineGlobal
        | Op::GetProperty
        | Op::SetProperty
        | Op::GetSuper
        | Op::Class
        | Op::Subclass
        | Op::Method => constant_instruction(heap, chunk, op, offset, out),

        Op::GetLocal | Op::SetLocal | Op::GetUpvalue | Op::SetUpvalue => {
            byte_instruction(chunk, op, offset, out)
        }

        Op::Jump | Op::JumpIfFalse => jump_instruction(chunk, op, 1, offset, out),
        Op::Loop => jump_instruction(chunk, op, -1, offset, out),

        Op::Call0
        | Op::Call1
        | Op::Call2
        | Op::Call3
        | Op::Call4
        | Op::Call5
        | Op::Call6
        | Op::Call7
        | Op::Call8 => {
            let argc = byte - u8::from(Op::Call0);
            let _ = writeln!(out, "{:<16} ({argc} args)", "CALL");
            offset + 1
        }

        Op::Invoke0
        | Op::Invoke1
        | Op::Invoke2
        | Op::Invoke3
        | Op::Invoke4
        | Op::Invoke5
        | Op::Invoke6
        | Op::Invoke7
        | Op::Invoke8 => invoke_instruction(heap, chunk, "INVOKE", u8::from(Op::Invoke0), offset, out),

        Op::Super0
        | Op::Super1
        | Op::Super2
        | Op::Super3
        | Op::Super4
        | Op::Super5
        | Op::Super6
        | Op::Super7
        | Op::Super8 => invoke_instruction(heap, chunk, "SUPER", u8::from(Op::Super0), offset, out),

        Op::Closure => {
            let constant = chunk.code[offset + 1] as usize;
            let value = chunk.constants[constant];
            let _ = writeln!(
                out,
                "{:<16} {constant:4} {}",
                "CLOSURE",
                heap.format_value(value)
            );

            let mut next = offset + 2;
            if let Value::Obj(ObjRef::Function(function)) = value {
                for _ in 0..heap.functions[function].upvalue_count {
                    let is_local = chunk.code[next] == 1;
                    let index = chunk.code[next + 1];
                    let _ = writeln!(
                        out,
                        "{next:04}    |                     {} {index}",
                        if is_local { "local" } else { "upvalue" }
                    );
                    next += 2;
                }
            }
            next
        }

        _ => {
            let _ = writeln!(out, "{}", op_name(op));
            offset + 1
        }
    }
}

fn constant_instruction(
    heap: &Heap,
    chunk: &Chunk,
    op: Op,
    offset: usize,
    out: &mut String,
) -> usize {
    let constant = chunk.code[offset + 1] as usize;
    let _ = writeln!(
        out,
        "{:<16} {constant:4} '{}'",
        op_name(op),
        heap.format_value(chunk.constants[constant])
    );
    offset + 2
}

fn byte_instruction(chunk: &Chunk, op: Op, offset: usize, out: &mut String) -> usize {
    let slot = chunk.code[offset + 1];
    let _ = writeln!(out, "{:<16} {slot:4}", op_name(op));
    offset + 2
}

fn jump_instruction(chunk: &Chunk, op: Op, sign: i64, offset: usize, out: &mut String) -> usize {
    let jump = u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]) as i64;
    let target = offset as i64 + 3 + sign * jump;
    let _ = writeln!(out, "{:<16} {offset:4} -> {target}", op_name(op));
    offset + 3
}

fn invoke_instruction(
    heap: &Heap,
    chunk: &Chunk,
    name: &str,
    base: u8,
    offset: usize,
    out: &mut String,
) -> usize {
    let argc = chunk.code[offset] - base;
    let constant = chunk.code[offset + 1] as usize;
    let _ = writeln!(
        out,
        "{name:<16} ({argc} args) {constant:4} '{}'",
        heap.format_value(chunk.constants[constant])
    );
    offset + 2
}

fn op_name(op: Op) -> &'static str {
    match op {
        Op::Constant => "CONSTANT",
        Op::Nil => "NIL",
        Op::True => "TRUE",
        Op::False => "FALSE",
        Op::Pop => "POP",
        Op::GetLocal => "GET_LOCAL",
        Op::SetLocal => "SET_LOCAL",
        Op::GetGlobal => "GET_GLOBAL",
        Op::SetGlobal => "SET_GLOBAL",
        Op::DefineGlobal => "DEFINE_GLOBAL",
        Op::GetUpvalue => "GET_UPVALUE",
        Op::SetUpvalue => "SET_UPVALUE",
        Op::GetProperty => "GET_PROPERTY",
        Op::SetProperty => "SET_PROPERTY",
        Op::GetSuper => "GET_SUPER",
        Op::Equal => "EQUAL",
        Op::Greater => "GREATER",
        Op::Less => "LESS",
        Op::Add => "ADD",
        Op::Subtract => "SUBTRACT",
        Op::Multiply => "MULTIPLY",
        Op::Divide => "DIVIDE",
        Op::Not => "NOT",
        Op::Negate => "NEGATE",
        Op::Print => "PRINT",
        Op::Jump => "JUMP",
        Op::JumpIfFalse => "JUMP_IF_FALSE",
        Op::Loop => "LOOP",
        Op::Closure => "CLOSURE",
        Op::CloseUpvalue => "CLOSE_UPVALUE",
        Op::Return => "RETURN",
        Op::Class => "CLASS",
        Op::Subclass => "SUBCLASS",
        Op::Method => "METHOD",
        _ => "CALL_FAMILY",
    }
}
