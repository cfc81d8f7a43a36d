//! Expression compilation documentation.
//!
//! This module documents the expression lowering implemented in `mod.rs`.
//! Expressions compile against the register request protocol described in
//! the module docs: each visit receives a destination register and, under
//! propagation, may answer with the register or constant index where its
//! value already lives.
//!
//! ## Expression Lowering Overview
//!
//! | Expression | Key instructions | Propagates |
//! |------------|------------------|------------|
//! | literal | `LOADCONST` (or nothing) | pool index |
//! | `nil` | `LOADNIL` | destination register |
//! | local name | `MOVE` (or nothing) | the local's register |
//! | global name | `LOADGLOBAL` | destination register |
//! | captured name | `LOADREF` | destination register |
//! | `const` name | as literal | pool index of folded value |
//! | binary | `ADD`..`NE` | destination register |
//! | `&&` / `\|\|` | `JMPFALSE`/`JMPTRUE` | destination register |
//! | unary | `NEG`/`NOT`/`CMPL` | destination register |
//! | `a ? b : c` | `JMPFALSE`, `JMP` | destination register |
//! | `a.b` / `a[i]` | `GET` | destination register |
//! | call | `CALL` | result register |
//! | `[..]` | `ARRAY`, `APPEND` | destination register |
//! | `{..}` | `OBJECT`, `SET` | destination register |
//! | `func` | `FUNC` | destination register |
//! | `x++` / `x--` | `MOVE`, `ADD`/`SUB` | pre-update register |
//!
//! ## Constant folding
//!
//! Unary and binary expressions fold before any code is emitted, so a
//! constant-only tree collapses to a single `LOADCONST` (or to a bare pool
//! index when propagated):
//!
//! ```text
//! var x = 1 + 2        ; pool: K0 = 3
//!
//!   LOADCONST R0 K0
//! ```
//!
//! ## Operand propagation
//!
//! Binary operands propagate, which lets the instruction reference locals
//! and constants directly:
//!
//! ```text
//! var x = 1
//! var y = x + 2        ; pool: K0 = 1, K1 = 2
//!
//!   LOADCONST R0 K0
//!   ADD R1 R0 K1       ; K1 rides in the biased operand range
//! ```
//!
//! ## Relational inversion
//!
//! There are no greater-than opcodes. `a > b` emits `LT` with swapped
//! operands, `a >= b` emits `LE` the same way.
//!
//! ## Calls
//!
//! The callee compiles without propagation so it lands at the base of the
//! call window; arguments follow in consecutive registers. The expected
//! result count is inherited from the surrounding request, which is how a
//! declaration like `var a, b = f()` asks one call for two values.

// This module serves as documentation. The implementation lives in mod.rs.
