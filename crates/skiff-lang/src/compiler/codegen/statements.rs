//! Statement compilation documentation.
//!
//! This module documents the statement lowering implemented in `mod.rs`.
//! Statements manage registers themselves; an expression used in statement
//! position leaves one temporary that the enclosing block discards.
//!
//! ## Statement Lowering Overview
//!
//! | Statement | Key instructions | Notes |
//! |-----------|------------------|-------|
//! | `var a, b = ...` | value code, `LOADNIL` | registers allocated in sequence |
//! | `const X = ...` | none | folded into the scope table |
//! | `a, b = ...` | value code, `MOVE`/`SET*` | values first, stores second |
//! | `x := ...` | as `var` | short declaration |
//! | `if`/`else` | `JMPFALSE`, `JMP` | back-patched placeholders |
//! | `for` | `JMPFALSE`, backward `JMP` | condition re-tested per iteration |
//! | `break` | `JMP` (pending) | patched when the loop block closes |
//! | `continue` | backward `JMP` | targets the condition label |
//! | `return` | `RETURN` | values in consecutive registers |
//!
//! ## Declarations
//!
//! Registers are handed out left to right. With fewer initializers than
//! names, the remainder is filled by a single `LOADNIL start, end`. A
//! trailing call receives the whole remaining register range so the VM can
//! fan its results out:
//!
//! ```text
//! var a, b, c = f()
//!
//!   LOADGLOBAL R0 K0      ; f
//!   CALL R0 3 0           ; three expected results: R0, R1, R2
//! ```
//!
//! Redeclaring a name in the same block is a compile error.
//!
//! ## If statement
//!
//! ```text
//! if cond { then } else { otherwise }
//!
//!   [cond -> Rc]
//!   JMPFALSE Rc -> else_label
//!   [then]
//!   JMP -> end_label
//! else_label:
//!   [otherwise]
//! end_label:
//! ```
//!
//! The whole statement sits in a `Branch` block; the condition owns one
//! allocated register, and body temporaries allocate above it. Without an
//! `else`, only the `JMPFALSE` placeholder exists and is patched past the
//! body.
//!
//! ## For loop
//!
//! ```text
//! for init; cond; step { body }
//!
//!   [init]
//! cond_label:
//!   [cond -> Rc]
//!   JMPFALSE Rc -> end_label
//!   [body]
//!   [step]
//!   JMP -> cond_label
//! end_label:
//! ```
//!
//! The loop opens a `Loop` block whose `start` is `cond_label`; `continue`
//! jumps there, and every `break` emits a `JMP 0` placeholder collected in
//! the block's pending list and patched past the backward jump when the
//! block closes.

// This module serves as documentation. The implementation lives in mod.rs.
