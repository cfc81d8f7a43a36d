//! Tests for the bytecode compiler.

use super::compile;
use crate::compiler::bytecode::{FuncProto, Opcode, OP_CONST_OFFSET};
use crate::error::CompileError;
use crate::parser::Parser;

fn compile_source(src: &str) -> Result<FuncProto, CompileError> {
    let root = Parser::new(src, "test.skf")
        .parse_program()
        .expect("source should parse");
    compile(&root, "test.skf")
}

fn compile_ok(src: &str) -> FuncProto {
    compile_source(src).expect("source should compile")
}

fn compile_err(src: &str) -> CompileError {
    compile_source(src).expect_err("source should not compile")
}

/// The instruction stream rendered in `OP R<a> K<b>` notation.
fn listing(proto: &FuncProto) -> Vec<String> {
    proto.code.iter().map(|instr| instr.to_string()).collect()
}

fn consts(proto: &FuncProto) -> Vec<String> {
    proto.consts.iter().map(|value| value.to_string()).collect()
}

fn walk_protos(proto: &FuncProto, visit: &mut impl FnMut(&FuncProto)) {
    visit(proto);
    for nested in &proto.funcs {
        walk_protos(nested, visit);
    }
}

// ============================================================================
// Whole-program scenarios
// ============================================================================

#[test]
fn test_constant_expression_collapses_to_one_load() {
    let proto = compile_ok("var x = 1 + 2");
    assert_eq!(listing(&proto), ["LOADCONST R0 K0", "RETURN R0 0"]);
    assert_eq!(consts(&proto), ["3"]);
}

#[test]
fn test_binary_references_locals_and_constants_in_place() {
    let proto = compile_ok("var x = 1\nvar y = x + 2");
    assert_eq!(
        listing(&proto),
        ["LOADCONST R0 K0", "ADD R1 R0 K1", "RETURN R0 0"]
    );
    assert_eq!(consts(&proto), ["1", "2"]);
}

#[test]
fn test_if_else_shape() {
    let proto = compile_ok("if a { b() } else { c() }");
    assert_eq!(
        listing(&proto),
        [
            "LOADGLOBAL R0 K0",
            "JMPFALSE R0 +3",
            "LOADGLOBAL R1 K1",
            "CALL R1 1 0",
            "JMP +2",
            "LOADGLOBAL R1 K2",
            "CALL R1 1 0",
            "RETURN R0 0",
        ]
    );
    assert_eq!(consts(&proto), ["\"a\"", "\"b\"", "\"c\""]);
}

#[test]
fn test_if_without_else_patches_past_the_body() {
    let proto = compile_ok("if a { b() }");
    assert_eq!(
        listing(&proto),
        [
            "LOADGLOBAL R0 K0",
            "JMPFALSE R0 +2",
            "LOADGLOBAL R1 K1",
            "CALL R1 1 0",
            "RETURN R0 0",
        ]
    );
}

#[test]
fn test_for_loop_shape() {
    let proto = compile_ok("for i := 0; i < 10; i = i + 1 { }");
    assert_eq!(
        listing(&proto),
        [
            "LOADCONST R0 K0",
            "LT R1 R0 K1",
            "JMPFALSE R1 +2",
            "ADD R0 R0 K2",
            "JMP -4",
            "RETURN R0 0",
        ]
    );
    assert_eq!(consts(&proto), ["0", "10", "1"]);
}

#[test]
fn test_const_declarations_emit_nothing() {
    let proto = compile_ok("const PI = 3\nvar x = PI * 2");
    assert_eq!(listing(&proto), ["LOADCONST R0 K0", "RETURN R0 0"]);
    assert_eq!(consts(&proto), ["6"]);
}

#[test]
fn test_function_definition_and_call() {
    let proto = compile_ok("func f(a, b) { return a + b }; f(1, 2)");
    // The named function keeps its register like a declaration; the call
    // moves the closure to the base of its own window.
    assert_eq!(
        listing(&proto),
        [
            "FUNC R0 F0",
            "MOVE R1 R0",
            "LOADCONST R2 K0",
            "LOADCONST R3 K1",
            "CALL R1 1 2",
            "RETURN R0 0",
        ]
    );
    assert_eq!(consts(&proto), ["1", "2"]);

    assert_eq!(proto.funcs.len(), 1);
    let inner = &proto.funcs[0];
    assert_eq!(listing(inner), ["ADD R2 R0 R1", "RETURN R2 1"]);
    assert!(inner.consts.is_empty());
}

#[test]
fn test_named_functions_keep_their_registers() {
    // Two named functions back to back, then a call to the first: the
    // bindings must not share a register, and the call must reach the
    // first prototype.
    let proto = compile_ok("func f() { return 1 }\nfunc g() { return 2 }\nf()");
    assert_eq!(
        listing(&proto),
        [
            "FUNC R0 F0",
            "FUNC R1 F1",
            "MOVE R2 R0",
            "CALL R2 1 0",
            "RETURN R0 0",
        ]
    );
    // F0 really is f's body, not g's.
    assert_eq!(consts(&proto.funcs[0]), ["1"]);
    assert_eq!(consts(&proto.funcs[1]), ["2"]);
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[test]
fn test_declaration_fills_missing_values_with_nil() {
    let proto = compile_ok("var a, b, c = 1");
    assert_eq!(
        listing(&proto),
        ["LOADCONST R0 K0", "LOADNIL R1 R2", "RETURN R0 0"]
    );

    let proto = compile_ok("var a");
    assert_eq!(listing(&proto), ["LOADNIL R0 R0", "RETURN R0 0"]);
}

#[test]
fn test_trailing_call_fans_out_over_remaining_registers() {
    let proto = compile_ok("var a, b, c = f()");
    assert_eq!(
        listing(&proto),
        ["LOADGLOBAL R0 K0", "CALL R0 3 0", "RETURN R0 0"]
    );
}

#[test]
fn test_multi_value_assignment_uses_a_scratch_window() {
    let proto = compile_ok("var a, b = 1, 2\na, b = b, a");
    assert_eq!(
        listing(&proto),
        [
            "LOADCONST R0 K0",
            "LOADCONST R1 K1",
            // Both values land in the scratch window first, then move.
            "MOVE R2 R1",
            "MOVE R3 R0",
            "MOVE R0 R2",
            "MOVE R1 R3",
            "RETURN R0 0",
        ]
    );
}

#[test]
fn test_greater_than_swaps_operands() {
    let proto = compile_ok("var r = a > b");
    assert_eq!(
        listing(&proto),
        [
            "LOADGLOBAL R0 K0",
            "LOADGLOBAL R1 K1",
            "LT R0 R1 R0",
            "RETURN R0 0",
        ]
    );

    let proto = compile_ok("var r = a >= b");
    assert!(listing(&proto).contains(&"LE R0 R1 R0".to_string()));
}

#[test]
fn test_short_circuit_and() {
    let proto = compile_ok("var x = a && b");
    assert_eq!(
        listing(&proto),
        [
            "LOADGLOBAL R0 K0",
            "JMPFALSE R0 +1",
            "LOADGLOBAL R0 K1",
            "RETURN R0 0",
        ]
    );

    let proto = compile_ok("var x = a || b");
    assert!(listing(&proto).contains(&"JMPTRUE R0 +1".to_string()));
}

#[test]
fn test_ternary_shape() {
    let proto = compile_ok("var x = a ? b : c");
    assert_eq!(
        listing(&proto),
        [
            "LOADGLOBAL R1 K0",
            "JMPFALSE R1 +2",
            "LOADGLOBAL R0 K1",
            "JMP +1",
            "LOADGLOBAL R0 K2",
            "RETURN R0 0",
        ]
    );
}

#[test]
fn test_single_local_assignment_compiles_in_place() {
    let proto = compile_ok("var x = 1\nx = x + 1");
    assert_eq!(
        listing(&proto),
        ["LOADCONST R0 K0", "ADD R0 R0 K0", "RETURN R0 0"]
    );
}

#[test]
fn test_compound_assignment_desugars() {
    let proto = compile_ok("var x = 1\nx += 2");
    assert_eq!(
        listing(&proto),
        ["LOADCONST R0 K0", "ADD R0 R0 K1", "RETURN R0 0"]
    );
    assert_eq!(consts(&proto), ["1", "2"]);
}

#[test]
fn test_postfix_in_rvalue_position_keeps_the_old_value() {
    let proto = compile_ok("var x = 1\nvar y = x++");
    assert_eq!(
        listing(&proto),
        [
            "LOADCONST R0 K0",
            "MOVE R1 R0",
            "ADD R0 R0 K0",
            "RETURN R0 0",
        ]
    );
}

#[test]
fn test_array_literal_appends_in_batches() {
    let proto = compile_ok("var a = [1, 2, 3]");
    let code = listing(&proto);
    assert_eq!(code[0], "ARRAY R0");
    assert_eq!(code[4], "APPEND R0 3");

    // Twelve elements split into a batch of ten and a batch of two.
    let src = "var a = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]";
    let proto = compile_ok(src);
    let appends: Vec<String> = listing(&proto)
        .into_iter()
        .filter(|line| line.starts_with("APPEND"))
        .collect();
    assert_eq!(appends, ["APPEND R0 10", "APPEND R0 2"]);
}

#[test]
fn test_object_literal_sets_fields() {
    let proto = compile_ok("var o = {a: 1, b: 2}");
    let code = listing(&proto);
    assert_eq!(code[0], "OBJECT R0");
    assert!(code.iter().any(|line| line.starts_with("SET R0 K")));
}

#[test]
fn test_object_shorthand_reads_the_variable() {
    let proto = compile_ok("var x = 1\nvar o = {x}");
    // The shorthand field value is the local x, referenced in place.
    assert!(listing(&proto).contains(&"SET R1 K1 R0".to_string()));
}

#[test]
fn test_selector_and_subscript_loads() {
    let proto = compile_ok("var x = o.a");
    assert_eq!(
        listing(&proto),
        ["LOADGLOBAL R1 K0", "GET R0 R1 K1", "RETURN R0 0"]
    );

    let proto = compile_ok("var x = o[k]");
    assert_eq!(
        listing(&proto),
        [
            "LOADGLOBAL R1 K0",
            "LOADGLOBAL R2 K1",
            "GET R0 R1 R2",
            "RETURN R0 0",
        ]
    );
}

#[test]
fn test_member_assignment_stores() {
    let proto = compile_ok("o.a = 1");
    let code = listing(&proto);
    // Value first, then the container, then one SET.
    assert_eq!(code[0], "LOADCONST R0 K0");
    assert_eq!(code[1], "LOADGLOBAL R2 K1");
    assert_eq!(code[2], "SET R2 K2 R0");
}

// ============================================================================
// Closures
// ============================================================================

#[test]
fn test_captured_local_is_accessed_by_ref() {
    let proto = compile_ok("var x = 1\nfunc f() { return x }\nx = 2");
    // The inner function reads the capture through LOADREF.
    assert_eq!(
        listing(&proto.funcs[0]),
        ["LOADREF R0 K0", "RETURN R0 1"]
    );
    // After the capture, the outer function sees x as a ref too. The
    // assignment window opens above f's still-live register.
    assert_eq!(
        listing(&proto),
        [
            "LOADCONST R0 K0",
            "FUNC R1 F0",
            "LOADCONST R2 K1",
            "SETREF R2 K2",
            "RETURN R0 0",
        ]
    );
}

#[test]
fn test_capture_only_crosses_function_boundaries() {
    let proto = compile_ok("var x = 1\nif true { x = 2 }");
    // Same function: still a plain register move, no refs.
    let code = listing(&proto);
    assert!(!code.iter().any(|line| line.contains("REF")));
}

#[test]
fn test_curried_function_nests_prototypes() {
    let proto = compile_ok("func add(a) ^(b) => a + b");
    assert_eq!(proto.funcs.len(), 1);
    assert_eq!(proto.funcs[0].funcs.len(), 1);
    // The innermost body adds a capture and a parameter.
    let innermost = &proto.funcs[0].funcs[0];
    assert_eq!(
        listing(innermost),
        ["LOADREF R1 K0", "ADD R1 R1 R0", "RETURN R1 1"]
    );
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn test_no_self_moves_are_emitted() {
    let sources = [
        "var x = 1; x = x",
        "func f() { return 1 }; f(1)",
        "var a, b = 1, 2; a = b",
        "var x = 0; x++",
    ];
    for src in sources {
        let proto = compile_ok(src);
        walk_protos(&proto, &mut |p| {
            for instr in &p.code {
                if instr.opcode() == Some(Opcode::Move) {
                    assert_ne!(instr.a(), instr.b(), "MOVE a,a in {:?}: {}", src, instr);
                }
            }
        });
    }
}

#[test]
fn test_line_table_is_monotonic() {
    let proto = compile_ok("var a = f()\nvar b = g()\n\nvar c = h()");
    let mut last_instr = 0;
    let mut last_line = 0;
    for entry in &proto.lines {
        assert!(entry.instr >= last_instr);
        assert!(entry.line >= last_line);
        last_instr = entry.instr;
        last_line = entry.line;
    }
    // Three distinct source lines produce exactly three entries.
    assert_eq!(proto.lines.len(), 3);
}

#[test]
fn test_line_table_compresses_runs() {
    let proto = compile_ok("var a = f(); var b = g(); var c = h()");
    assert_eq!(proto.lines.len(), 1);
    assert_eq!(proto.lines[0].line, 1);
    assert_eq!(proto.line_at(proto.code.len() - 1), 1);
}

#[test]
fn test_break_is_patched_past_the_loop() {
    let proto = compile_ok("for i := 0; i < 3; i++ { break }");
    let code = listing(&proto);
    // break placeholder was rewritten to a forward jump over the step and
    // the backward jump.
    assert_eq!(code[3], "JMP +2");
    assert_eq!(code[5], "JMP -5");
}

#[test]
fn test_continue_jumps_to_the_condition() {
    let proto = compile_ok("for i := 0; i < 3; i++ { continue }");
    // continue at index 3; the condition test starts at index 1.
    assert_eq!(listing(&proto)[3], "JMP -3");
}

#[test]
fn test_break_inside_a_conditional_still_targets_the_loop() {
    let proto = compile_ok("for i := 0; i < 3; i++ { if i > 1 { break } }");
    let code = listing(&proto);
    let break_jmp = code
        .iter()
        .filter(|line| line.starts_with("JMP +"))
        .last()
        .expect("patched break");
    assert_ne!(break_jmp, "JMP +0");
}

#[test]
fn test_no_unpatched_placeholders_survive() {
    let sources = [
        "if a { b() } else { c() }",
        "for i := 0; i < 3; i++ { if i > 1 { break } else { continue } }",
        "var x = a && b || c",
        "var y = a ? f() : g()",
    ];
    for src in sources {
        let proto = compile_ok(src);
        walk_protos(&proto, &mut |p| {
            for instr in &p.code {
                if matches!(
                    instr.opcode(),
                    Some(Opcode::Jmp | Opcode::JmpFalse | Opcode::JmpTrue)
                ) {
                    assert_ne!(instr.sbx(), 0, "unpatched placeholder in {:?}", src);
                }
            }
        });
    }
}

#[test]
fn test_constant_pool_interns_by_value() {
    let proto = compile_ok("var a = 1\nvar b = 1\nvar c = \"s\"\nvar d = \"s\"");
    assert_eq!(consts(&proto), ["1", "\"s\""]);
}

#[test]
fn test_constant_pool_is_per_prototype() {
    let proto = compile_ok("var a = 7\nfunc f() { return 7 }");
    assert_eq!(consts(&proto), ["7"]);
    assert_eq!(consts(&proto.funcs[0]), ["7"]);
}

#[test]
fn test_constant_operands_use_the_bias() {
    let proto = compile_ok("var x = 1\nvar y = x + 2");
    let add = proto.code[1];
    assert_eq!(add.opcode(), Some(Opcode::Add));
    assert!(add.b() < OP_CONST_OFFSET);
    assert!(add.c() >= OP_CONST_OFFSET);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_redeclaration_in_the_same_block() {
    let err = compile_err("var x = 1\nvar x = 2");
    assert_eq!(err.to_string(), "test.skf:2: cannot redeclare 'x'");

    // Shadowing in an inner scope is allowed.
    compile_ok("var x = 1\nif true { x := 2; f(x) }");
}

#[test]
fn test_const_requires_a_constant_initializer() {
    let err = compile_err("const X");
    assert!(err.message.contains("const 'X' without initializer"));

    let err = compile_err("const X = f()");
    assert!(err.message.contains("initializer is not a constant"));

    compile_ok("const X = 1 + 2 * 3");
    compile_ok("const A = 1; const B = A + 1");
}

#[test]
fn test_cannot_assign_to_a_constant() {
    let err = compile_err("const X = 1\nX = 2");
    assert!(err.message.contains("cannot assign to constant 'X'"));
}

#[test]
fn test_postfix_requires_a_mutable_place() {
    let err = compile_err("5++");
    assert!(err
        .message
        .contains("invalid operand to '++': cannot modify a number constant"));

    let err = compile_err("const X = 1\nX--");
    assert!(err.message.contains("cannot modify a number constant"));
}

#[test]
fn test_branch_statements_outside_loops() {
    assert!(compile_err("break").message.contains("break outside loop"));
    assert!(compile_err("continue")
        .message
        .contains("continue outside loop"));
    // A loop in an enclosing function does not count.
    let err = compile_err("for i := 0; i < 3; i++ { var f = func() { break } }");
    assert!(err.message.contains("break outside loop"));
}

#[test]
fn test_unimplemented_surfaces_report_clearly() {
    assert!(compile_err("var x = a[1:2]")
        .message
        .contains("slice expressions are not implemented"));
    assert!(compile_err("f(k = 1)")
        .message
        .contains("keyword arguments are not implemented"));
    assert!(compile_err("f(xs...)")
        .message
        .contains("variadic argument unpacking is not implemented"));
    assert!(compile_err("for k, v in pairs { }")
        .message
        .contains("'for ... in' loops are not implemented"));
}

#[test]
fn test_constant_pool_overflow() {
    // 256 distinct numbers exceed what a biased operand can index.
    let mut src = String::new();
    for i in 0..256 {
        src.push_str(&format!("var v{} = {}\n", i, i));
    }
    let err = compile_err(&src);
    assert!(err.message.contains("too many constants"));
}

#[test]
fn test_errors_carry_file_and_line() {
    let err = compile_err("var ok = 1\nbreak");
    assert_eq!(err.file, "test.skf");
    assert_eq!(err.line, 2);
}
