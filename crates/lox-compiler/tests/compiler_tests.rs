//! Compiler tests: bytecode shape for representative programs, and every
//! compile-error diagnostic.

use lox_compiler::{compile, CompileErrors};
use lox_runtime::{debug, GcConfig, Vm};

/// Compile `source` and return the disassembly of the whole program.
fn compile_to_text(source: &str) -> String {
    let mut vm = Vm::new(GcConfig::default());
    let function = compile(&mut vm, source).expect("program should compile");
    debug::disassemble_program(&vm.heap, function)
}

/// Compile `source`, expecting failure, and return the rendered errors.
fn compile_errors(source: &str) -> CompileErrors {
    let mut vm = Vm::new(GcConfig::default());
    compile(&mut vm, source).expect_err("program should not compile")
}

fn assert_order(text: &str, needles: &[&str]) {
    let mut at = 0;
    for needle in needles {
        match text[at..].find(needle) {
            Some(found) => at += found + needle.len(),
            None => panic!("expected {needle:?} after position {at} in:\n{text}"),
        }
    }
}

#[test]
fn test_precedence_orders_operands() {
    let text = compile_to_text("print 1 + 2 * 3;");
    assert_order(
        &text,
        &["'1'", "'2'", "'3'", "MULTIPLY", "ADD", "PRINT", "NIL", "RETURN"],
    );
}

#[test]
fn test_grouping_overrides_precedence() {
    let text = compile_to_text("print (1 + 2) * 3;");
    assert_order(&text, &["'1'", "'2'", "ADD", "'3'", "MULTIPLY", "PRINT"]);
}

#[test]
fn test_comparison_desugaring() {
    let text = compile_to_text("print 1 <= 2;");
    assert_order(&text, &["GREATER", "NOT"]);
    let text = compile_to_text("print 1 != 2;");
    assert_order(&text, &["EQUAL", "NOT"]);
}

#[test]
fn test_global_define_get_set() {
    let text = compile_to_text("var a = 1; a = 2; print a;");
    assert_order(
        &text,
        &["DEFINE_GLOBAL", "'a'", "SET_GLOBAL", "POP", "GET_GLOBAL", "PRINT"],
    );
}

#[test]
fn test_locals_compile_to_slots() {
    let text = compile_to_text("{ var a = 1; var b = a; print b; }");
    assert_order(&text, &["GET_LOCAL", "GET_LOCAL", "PRINT", "POP", "POP"]);
    // Locals never touch the globals table.
    assert!(!text.contains("GET_GLOBAL"));
}

#[test]
fn test_identifier_constants_are_deduplicated() {
    let text = compile_to_text("var a = 1; a = a + a; print a;");
    // Every reference to `a` shares one constant-pool slot.
    assert_eq!(text.matches("'a'").count(), text.matches("0 'a'").count());
}

#[test]
fn test_if_else_shape() {
    let text = compile_to_text("if (true) print 1; else print 2;");
    assert_order(
        &text,
        &["TRUE", "JUMP_IF_FALSE", "POP", "PRINT", "JUMP", "POP", "PRINT"],
    );
}

#[test]
fn test_and_or_short_circuit_shape() {
    let text = compile_to_text("print true and false;");
    assert_order(&text, &["TRUE", "JUMP_IF_FALSE", "POP", "FALSE"]);

    let text = compile_to_text("print false or true;");
    assert_order(&text, &["FALSE", "JUMP_IF_FALSE", "JUMP", "POP", "TRUE"]);
}

#[test]
fn test_while_loops_backward() {
    let text = compile_to_text("while (false) print 1;");
    assert_order(&text, &["JUMP_IF_FALSE", "POP", "PRINT", "LOOP"]);
}

#[test]
fn test_for_desugars_to_while_shape() {
    let text = compile_to_text("for (var i = 0; i < 3; i = i + 1) print i;");
    assert_order(&text, &["JUMP_IF_FALSE", "JUMP", "LOOP", "PRINT", "LOOP"]);
}

#[test]
fn test_function_declaration_emits_closure() {
    let text = compile_to_text("fun add(a, b) { return a + b; } print add(1, 2);");
    assert_order(&text, &["== <fn add> ==", "ADD", "RETURN", "== <script> =="]);
    assert_order(&text, &["CLOSURE", "DEFINE_GLOBAL", "CALL", "(2 args)", "PRINT"]);
}

#[test]
fn test_functions_return_nil_implicitly() {
    let text = compile_to_text("fun f() {} f();");
    assert_order(&text, &["== <fn f> ==", "NIL", "RETURN"]);
}

#[test]
fn test_upvalue_capture_descriptors() {
    let text = compile_to_text(
        "fun outer() { var x = 1; fun inner() { return x; } return inner; }",
    );
    assert_order(&text, &["== <fn inner> ==", "GET_UPVALUE"]);
    // The Closure instruction carries one captured-local descriptor.
    assert_order(&text, &["== <fn outer> ==", "CLOSURE", "local 1"]);
}

#[test]
fn test_transitive_upvalue_goes_through_enclosing() {
    let text = compile_to_text(
        "fun a() { var x = 1; fun b() { fun c() { return x; } return c; } return b; }",
    );
    // `c` captures `b`'s upvalue, not a local.
    assert_order(&text, &["== <fn b> ==", "CLOSURE", "upvalue 0"]);
}

#[test]
fn test_scope_end_closes_captured_local() {
    let text = compile_to_text(
        "{ var x = 1; fun f() { return x; } print f; }",
    );
    assert_order(&text, &["CLOSE_UPVALUE"]);
}

#[test]
fn test_class_with_methods() {
    let text = compile_to_text("class P { init(x) { this.x = x; } get() { return this.x; } }");
    assert_order(&text, &["CLASS", "'P'"]);
    assert_order(&text, &["== <fn init> ==", "GET_LOCAL", "SET_PROPERTY"]);
    assert_order(&text, &["METHOD", "'init'", "METHOD", "'get'", "DEFINE_GLOBAL"]);

    // Initializers return `this` (slot 0), never nil.
    let init_section = {
        let start = text.find("== <fn init> ==").unwrap();
        let rest = &text[start + 1..];
        let end = rest.find("== ").map(|i| i + start + 1).unwrap_or(text.len());
        &text[start..end]
    };
    assert!(init_section.contains("GET_LOCAL"));
    assert!(!init_section.contains("NIL"));
}

#[test]
fn test_property_call_fuses_to_invoke() {
    let text = compile_to_text("var o = Maker(); o.update(1);");
    assert_order(&text, &["INVOKE", "(1 args)", "'update'"]);
}

#[test]
fn test_subclass_and_super_shape() {
    let text = compile_to_text(
        "class A { m() {} } class B < A { m() { super.m(); } }",
    );
    assert_order(&text, &["SUBCLASS", "'B'"]);
    // super.m() loads this, then the captured superclass.
    assert_order(&text, &["== <fn m> ==", "GET_LOCAL", "GET_UPVALUE", "SUPER", "'m'"]);
}

// === Diagnostics ===

fn assert_error(source: &str, expected: &str) {
    let errors = compile_errors(source);
    let rendered = errors.to_string();
    assert!(
        rendered.contains(expected),
        "expected {expected:?} in:\n{rendered}"
    );
}

#[test]
fn test_error_format() {
    let errors = compile_errors("var 1 = 2;");
    assert_eq!(
        errors.to_string(),
        "[line 1] Error at '1': Expect variable name."
    );
}

#[test]
fn test_error_at_end() {
    assert_error("print 1", "[line 1] Error at end: Expect ';' after value.");
}

#[test]
fn test_expect_expression() {
    assert_error("print;", "Expect expression.");
}

#[test]
fn test_invalid_assignment_target() {
    assert_error("var a = 1; var b = 2; a + b = 3;", "Invalid assignment target.");
}

#[test]
fn test_duplicate_local() {
    assert_error(
        "{ var a = 1; var a = 2; }",
        "Variable with this name already declared in this scope.",
    );
}

#[test]
fn test_local_in_own_initializer() {
    assert_error(
        "{ var a = 1; { var a = a; } }",
        "Cannot read local variable in its own initializer.",
    );
}

#[test]
fn test_return_outside_function() {
    assert_error("return 1;", "Cannot return from top-level code.");
}

#[test]
fn test_return_value_from_initializer() {
    assert_error(
        "class A { init() { return 1; } }",
        "Cannot return a value from an initializer.",
    );
}

#[test]
fn test_bare_return_in_initializer_is_fine() {
    compile_to_text("class A { init() { return; } }");
}

#[test]
fn test_this_outside_class() {
    assert_error("print this;", "Cannot use 'this' outside of a class.");
}

#[test]
fn test_super_outside_class() {
    assert_error("print super.m;", "Cannot use 'super' outside of a class.");
}

#[test]
fn test_super_without_superclass() {
    assert_error(
        "class A { m() { super.m(); } }",
        "Cannot use 'super' in a class with no superclass.",
    );
}

#[test]
fn test_self_inheritance() {
    assert_error("class A < A {}", "A class cannot inherit from itself.");
}

#[test]
fn test_too_many_parameters() {
    assert_error(
        "fun f(a, b, c, d, e, f, g, h, i) {}",
        "Cannot have more than 8 parameters.",
    );
}

#[test]
fn test_too_many_arguments() {
    assert_error(
        "fun f() {} f(1, 2, 3, 4, 5, 6, 7, 8, 9);",
        "Cannot have more than 8 arguments.",
    );
}

#[test]
fn test_too_many_constants() {
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("print {i}.5;\n"));
    }
    assert_error(&source, "Too many constants in one chunk.");
}

#[test]
fn test_error_recovery_reports_multiple() {
    let errors = compile_errors("var 1; print; var x = ;");
    assert!(
        errors.0.len() >= 2,
        "synchronize should allow later errors: {errors}"
    );
}

#[test]
fn test_unterminated_string_reported() {
    assert_error("var s = \"oops;", "Unterminated string.");
}

#[test]
fn test_unexpected_character_reported() {
    assert_error("var a = 1 @ 2;", "Unexpected character.");
}
